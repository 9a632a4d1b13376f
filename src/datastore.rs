//! Data-store segment parameters.

/// Describes a call to a database or cache.
///
/// `product`, `operation` and `collection` are always reported; the remaining
/// fields are optional extras that backends attach when present.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DataStoreSegment {
    /// Store product, e.g. `MongoDB`, `Postgres`, `Redis`.
    pub product: String,
    /// Operation verb, e.g. `find`, `SELECT`.
    pub operation: String,
    /// Collection or table name.
    pub collection: String,
    pub statement: Option<String>,
    pub host: Option<String>,
    /// Port, socket path or instance id.
    pub port_path_or_id: Option<String>,
    pub database_name: Option<String>,
}

impl DataStoreSegment {
    pub fn new(
        product: impl Into<String>,
        operation: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            product: product.into(),
            operation: operation.into(),
            collection: collection.into(),
            ..Default::default()
        }
    }

    pub fn statement(mut self, statement: impl Into<String>) -> Self {
        self.statement = Some(statement.into());
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port_path_or_id(mut self, value: impl Into<String>) -> Self {
        self.port_path_or_id = Some(value.into());
        self
    }

    pub fn database_name(mut self, name: impl Into<String>) -> Self {
        self.database_name = Some(name.into());
        self
    }

    /// Lowercased product name, used as the `db.system` value.
    pub fn system(&self) -> String {
        self.product.trim().to_lowercase()
    }
}
