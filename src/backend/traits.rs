//! Backend capability trait.

use std::error::Error as StdError;
use std::fmt::Debug;

use super::BackendKind;
use super::handle::{BackendId, Handle};
use crate::Result;
use crate::attribute::AttributeValue;
use crate::datastore::DataStoreSegment;
use crate::web::{ResponseWriter, WebRequest};

/// Fixed operation set every APM backend provides.
///
/// Handles returned by `start_*` are only meaningful to the backend instance
/// that produced them; passing a foreign handle yields
/// [`Error::InvalidHandle`](crate::Error::InvalidHandle).
pub trait Backend: Send + Sync + Debug {
    fn id(&self) -> BackendId;

    fn kind(&self) -> BackendKind {
        self.id().kind()
    }

    fn start_transaction(&self, name: &str) -> Result<Handle>;

    fn start_web_transaction(
        &self,
        name: &str,
        writer: Option<&ResponseWriter>,
        request: &WebRequest,
    ) -> Result<Handle>;

    fn end_transaction(&self, txn: &Handle, error: Option<&dyn StdError>) -> Result<()>;

    fn start_segment(&self, txn: &Handle, name: &str) -> Result<Handle>;

    fn end_segment(&self, segment: &Handle) -> Result<()>;

    fn start_data_store_segment(&self, txn: &Handle, segment: &DataStoreSegment)
    -> Result<Handle>;

    fn end_data_store_segment(&self, segment: &Handle) -> Result<()>;

    fn start_external_segment(&self, txn: &Handle, url: &str) -> Result<Handle>;

    fn start_external_web_segment(&self, txn: &Handle, request: &WebRequest) -> Result<Handle>;

    fn end_external_segment(&self, segment: &Handle) -> Result<()>;

    fn notice_error(&self, txn: &Handle, error: &dyn StdError) -> Result<()>;

    fn add_attribute(&self, txn: &Handle, key: &str, value: AttributeValue) -> Result<()>;

    /// Exports buffered spans.
    fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Flushes and stops the export pipeline. Later spans are dropped.
    fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}
