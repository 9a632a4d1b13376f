//! SaaS backend adapter (application name + license key, hosted ingest).

use std::collections::HashMap;
use std::error::Error as StdError;

use http::Method;
use opentelemetry::KeyValue;
use secrecy::ExposeSecret;
use url::Url;

use super::base::{Conventions, ExportSettings, SpanRecorder, parse_server_url, semantic};
use super::handle::{BackendId, Handle};
use super::traits::Backend;
use super::BackendKind;
use crate::attribute::AttributeValue;
use crate::config::Config;
use crate::datastore::DataStoreSegment;
use crate::web::{ResponseWriter, WebRequest};
use crate::{Error, Result};

pub const DEFAULT_ENDPOINT: &str = "https://otlp.nr-data.net";
pub const EU_ENDPOINT: &str = "https://otlp.eu01.nr-data.net";

const LICENSE_KEY_LEN: usize = 40;
const EU_KEY_PREFIX: &str = "eu";
const LICENSE_HEADER: &str = "api-key";

pub(crate) struct SaasConventions;

impl Conventions for SaasConventions {
    const KIND: BackendKind = BackendKind::Saas;

    fn transaction_name(name: &str, request: Option<&WebRequest>) -> String {
        let name = name.trim_start_matches('/');
        match request {
            Some(_) => format!("WebTransaction/Custom/{name}"),
            None => format!("OtherTransaction/Custom/{name}"),
        }
    }

    fn transaction_attributes(request: Option<&WebRequest>) -> Vec<KeyValue> {
        let kind = if request.is_some() { "Web" } else { "Other" };
        vec![KeyValue::new(semantic::TRANSACTION_TYPE, kind)]
    }

    fn segment_name(name: &str) -> String {
        format!("Custom/{name}")
    }

    fn data_store_name(segment: &DataStoreSegment) -> String {
        if segment.collection.is_empty() {
            format!(
                "Datastore/operation/{}/{}",
                segment.product, segment.operation
            )
        } else {
            format!(
                "Datastore/statement/{}/{}/{}",
                segment.product, segment.collection, segment.operation
            )
        }
    }

    fn external_name(url: &Url, method: Option<&Method>) -> String {
        let host = url.host_str().unwrap_or("unknown");
        match method {
            Some(method) => format!("External/{host}/http/{method}"),
            None => format!("External/{host}/all"),
        }
    }
}

fn validate_license_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::backend_init(BackendKind::Saas, "license key is required"));
    }
    if key.len() != LICENSE_KEY_LEN || !key.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(Error::backend_init(
            BackendKind::Saas,
            format!("license key must be {LICENSE_KEY_LEN} alphanumeric characters"),
        ));
    }
    Ok(())
}

/// Adapter for a hosted APM service keyed by application name and license.
pub struct SaasAdapter {
    app_name: String,
    endpoint: Option<Url>,
    recorder: SpanRecorder<SaasConventions>,
}

impl std::fmt::Debug for SaasAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaasAdapter")
            .field("id", &self.recorder.id())
            .field("app_name", &self.app_name)
            .field("endpoint", &self.endpoint.as_ref().map(Url::as_str))
            .field("initialized", &self.recorder.is_initialized())
            .finish()
    }
}

impl SaasAdapter {
    pub fn new(config: &Config) -> Result<Self> {
        let app_name = config.app_name.trim();
        if app_name.is_empty() {
            return Err(Error::backend_init(
                BackendKind::Saas,
                "application name is required",
            ));
        }

        let key = config
            .license_key
            .as_ref()
            .map(|k| k.expose_secret().trim())
            .unwrap_or_default();
        validate_license_key(key)?;

        let default = if key.starts_with(EU_KEY_PREFIX) {
            EU_ENDPOINT
        } else {
            DEFAULT_ENDPOINT
        };
        let endpoint = parse_server_url(BackendKind::Saas, &config.server_url, default)?;

        let settings = ExportSettings {
            server_url: endpoint.clone(),
            headers: HashMap::from([(LICENSE_HEADER.to_string(), key.to_string())]),
            service_name: app_name.to_string(),
            service_version: config.service_version.clone(),
            environment: config.environment.clone(),
            sample_ratio: config.sample_ratio,
            timeout: config.export_timeout,
        };

        Ok(Self {
            app_name: app_name.to_string(),
            endpoint: Some(endpoint),
            recorder: SpanRecorder::new(&settings)?,
        })
    }

    /// An adapter without an SDK application. Every operation fails with
    /// [`Error::NotInitialized`].
    pub fn detached(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            endpoint: None,
            recorder: SpanRecorder::detached(),
        }
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// Ingest URL spans are exported to, if initialized.
    pub fn endpoint(&self) -> Option<&Url> {
        self.endpoint.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.recorder.is_initialized()
    }
}

impl Backend for SaasAdapter {
    fn id(&self) -> BackendId {
        self.recorder.id()
    }

    fn start_transaction(&self, name: &str) -> Result<Handle> {
        self.recorder.start_transaction(name)
    }

    fn start_web_transaction(
        &self,
        name: &str,
        writer: Option<&ResponseWriter>,
        request: &WebRequest,
    ) -> Result<Handle> {
        self.recorder.start_web_transaction(name, writer, request)
    }

    fn end_transaction(&self, txn: &Handle, error: Option<&dyn StdError>) -> Result<()> {
        self.recorder.end_transaction(txn, error)
    }

    fn start_segment(&self, txn: &Handle, name: &str) -> Result<Handle> {
        self.recorder.start_segment(txn, name)
    }

    fn end_segment(&self, segment: &Handle) -> Result<()> {
        self.recorder.end_segment(segment)
    }

    fn start_data_store_segment(
        &self,
        txn: &Handle,
        segment: &DataStoreSegment,
    ) -> Result<Handle> {
        self.recorder.start_data_store_segment(txn, segment)
    }

    fn end_data_store_segment(&self, segment: &Handle) -> Result<()> {
        self.recorder.end_data_store_segment(segment)
    }

    fn start_external_segment(&self, txn: &Handle, url: &str) -> Result<Handle> {
        self.recorder.start_external_segment(txn, url)
    }

    fn start_external_web_segment(&self, txn: &Handle, request: &WebRequest) -> Result<Handle> {
        self.recorder.start_external_web_segment(txn, request)
    }

    fn end_external_segment(&self, segment: &Handle) -> Result<()> {
        self.recorder.end_external_segment(segment)
    }

    fn notice_error(&self, txn: &Handle, error: &dyn StdError) -> Result<()> {
        self.recorder.notice_error(txn, error)
    }

    fn add_attribute(&self, txn: &Handle, key: &str, value: AttributeValue) -> Result<()> {
        self.recorder.add_attribute(txn, key, value)
    }

    fn flush(&self) -> Result<()> {
        self.recorder.flush()
    }

    fn shutdown(&self) -> Result<()> {
        self.recorder.shutdown()
    }
}
