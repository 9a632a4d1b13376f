//! Self-hosted backend adapter (service name + your own tracing server).

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

pub const DEFAULT_SERVER_URL: &str = "http://localhost:8200";

pub(crate) struct SelfHostedConventions;

impl Conventions for SelfHostedConventions {
    const KIND: BackendKind = BackendKind::SelfHosted;

    fn transaction_name(name: &str, request: Option<&WebRequest>) -> String {
        match request {
            Some(request) => format!("{} {name}", request.method()),
            None => name.to_string(),
        }
    }

    fn transaction_attributes(request: Option<&WebRequest>) -> Vec<KeyValue> {
        let kind = if request.is_some() { "request" } else { "custom" };
        vec![KeyValue::new(semantic::TRANSACTION_TYPE, kind)]
    }

    fn segment_name(name: &str) -> String {
        name.to_string()
    }

    fn segment_attributes() -> Vec<KeyValue> {
        vec![KeyValue::new(semantic::SPAN_TYPE, "custom")]
    }

    fn data_store_name(segment: &DataStoreSegment) -> String {
        if segment.collection.is_empty() {
            format!("{} {}", segment.product, segment.operation)
        } else {
            format!("{}.{}", segment.collection, segment.operation)
        }
    }

    fn data_store_attributes(segment: &DataStoreSegment) -> Vec<KeyValue> {
        vec![
            KeyValue::new(semantic::SPAN_TYPE, "db"),
            KeyValue::new(semantic::SPAN_SUBTYPE, segment.system()),
            KeyValue::new(semantic::SPAN_ACTION, "query"),
        ]
    }

    fn external_name(url: &Url, method: Option<&Method>) -> String {
        let host = url.host_str().unwrap_or("unknown");
        match method {
            Some(method) => format!("{method} {host}"),
            None => format!("HTTP {host}"),
        }
    }

    fn external_attributes(_url: &Url, _method: Option<&Method>) -> Vec<KeyValue> {
        vec![
            KeyValue::new(semantic::SPAN_TYPE, "external"),
            KeyValue::new(semantic::SPAN_SUBTYPE, "http"),
        ]
    }
}

/// Adapter for a self-hosted tracing server.
pub struct SelfHostedAdapter {
    service_name: String,
    server_url: Option<Url>,
    recorder: SpanRecorder<SelfHostedConventions>,
}

impl std::fmt::Debug for SelfHostedAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelfHostedAdapter")
            .field("id", &self.recorder.id())
            .field("service_name", &self.service_name)
            .field("server_url", &self.server_url.as_ref().map(Url::as_str))
            .field("initialized", &self.recorder.is_initialized())
            .finish()
    }
}

impl SelfHostedAdapter {
    pub fn new(config: &Config) -> Result<Self> {
        let service_name = config.service_name.trim();
        if service_name.is_empty() {
            return Err(Error::backend_init(
                BackendKind::SelfHosted,
                "service name is required",
            ));
        }

        let server_url =
            parse_server_url(BackendKind::SelfHosted, &config.server_url, DEFAULT_SERVER_URL)?;

        let mut headers = HashMap::new();
        if let Some(token) = &config.secret_token {
            let token = token.expose_secret().trim();
            if !token.is_empty() {
                headers.insert(
                    http::header::AUTHORIZATION.to_string(),
                    format!("Bearer {token}"),
                );
            }
        }

        let settings = ExportSettings {
            server_url: server_url.clone(),
            headers,
            service_name: service_name.to_string(),
            service_version: config.service_version.clone(),
            environment: config.environment.clone(),
            sample_ratio: config.sample_ratio,
            timeout: config.export_timeout,
        };

        Ok(Self {
            service_name: service_name.to_string(),
            server_url: Some(server_url),
            recorder: SpanRecorder::new(&settings)?,
        })
    }

    /// An adapter without an SDK application. Every operation fails with
    /// [`Error::NotInitialized`].
    pub fn detached(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            server_url: None,
            recorder: SpanRecorder::detached(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn server_url(&self) -> Option<&Url> {
        self.server_url.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.recorder.is_initialized()
    }
}

impl Backend for SelfHostedAdapter {
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
