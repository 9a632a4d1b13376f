//! Span mechanics shared by both adapters.
//!
//! Adapters differ only in naming and attribute conventions; everything that
//! talks to the OpenTelemetry SDK lives here, parameterised by a
//! [`Conventions`] type. Because the payload types are generic over the
//! conventions, a handle minted by one adapter can never downcast to the
//! other's payload type.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use http::Method;
use opentelemetry::trace::{
    Span as _, SpanKind, Status, TraceContextExt as _, Tracer as _, TracerProvider as _,
};
use opentelemetry::{Context, KeyValue};
use opentelemetry_otlp::{Protocol, SpanExporter, WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{
    RandomIdGenerator, Sampler, SdkTracer, SdkTracerProvider, Span as SdkSpan,
};
use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_VERSION};
use url::Url;

use super::handle::{BackendId, Handle, HandleKind, Owned};
use super::BackendKind;
use crate::attribute::AttributeValue;
use crate::datastore::DataStoreSegment;
use crate::web::{ResponseWriter, WebRequest};
use crate::{Error, Result};

/// Attribute keys written by the adapters.
pub mod semantic {
    pub const DEPLOYMENT_ENVIRONMENT: &str = "deployment.environment.name";

    pub const TRANSACTION_TYPE: &str = "transaction.type";
    pub const SPAN_TYPE: &str = "span.type";
    pub const SPAN_SUBTYPE: &str = "span.subtype";
    pub const SPAN_ACTION: &str = "span.action";

    pub const HTTP_REQUEST_METHOD: &str = "http.request.method";
    pub const HTTP_RESPONSE_STATUS_CODE: &str = "http.response.status_code";
    pub const URL_FULL: &str = "url.full";
    pub const URL_PATH: &str = "url.path";
    pub const USER_AGENT: &str = "user_agent.original";
    pub const SERVER_ADDRESS: &str = "server.address";
    pub const SERVER_PORT: &str = "server.port";

    pub const DB_SYSTEM: &str = "db.system.name";
    pub const DB_OPERATION: &str = "db.operation.name";
    pub const DB_COLLECTION: &str = "db.collection.name";
    pub const DB_STATEMENT: &str = "db.query.text";
    pub const DB_NAMESPACE: &str = "db.namespace";
    pub const DB_INSTANCE_ID: &str = "db.instance.id";

    pub const RPC_SYSTEM: &str = "rpc.system";
}

/// Exporter and resource settings resolved by an adapter from its config.
#[derive(Debug, Clone)]
pub(crate) struct ExportSettings {
    pub server_url: Url,
    pub headers: HashMap<String, String>,
    pub service_name: String,
    pub service_version: Option<String>,
    pub environment: Option<String>,
    pub sample_ratio: f64,
    pub timeout: Duration,
}

impl ExportSettings {
    fn traces_endpoint(&self) -> String {
        format!("{}/v1/traces", self.server_url.as_str().trim_end_matches('/'))
    }

    fn sampler(&self) -> Sampler {
        // `sample_ratio` is a public field; NaN falls back to sampling everything.
        if self.sample_ratio.is_nan() || self.sample_ratio >= 1.0 {
            Sampler::AlwaysOn
        } else if self.sample_ratio <= 0.0 {
            Sampler::AlwaysOff
        } else {
            Sampler::TraceIdRatioBased(self.sample_ratio)
        }
    }

    fn resource(&self) -> Resource {
        let mut attributes = vec![KeyValue::new(SERVICE_NAME, self.service_name.clone())];

        if let Some(ref version) = self.service_version {
            attributes.push(KeyValue::new(SERVICE_VERSION, version.clone()));
        }
        if let Some(ref environment) = self.environment {
            attributes.push(KeyValue::new(
                semantic::DEPLOYMENT_ENVIRONMENT,
                environment.clone(),
            ));
        }

        Resource::builder().with_attributes(attributes).build()
    }
}

/// The SDK application handle: a tracer provider and the tracer it hands out.
pub(crate) struct Application {
    provider: SdkTracerProvider,
    tracer: SdkTracer,
}

impl Application {
    pub fn init(kind: BackendKind, settings: &ExportSettings) -> Result<Self> {
        let exporter = SpanExporter::builder()
            .with_http()
            .with_protocol(Protocol::HttpBinary)
            .with_endpoint(settings.traces_endpoint())
            .with_timeout(settings.timeout)
            .with_headers(settings.headers.clone())
            .build()
            .map_err(|e| {
                Error::backend_init(kind, format!("Failed to create span exporter: {}", e))
            })?;

        let provider = SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_sampler(settings.sampler())
            .with_id_generator(RandomIdGenerator::default())
            .with_resource(settings.resource())
            .build();

        let tracer = provider.tracer(env!("CARGO_PKG_NAME"));

        tracing::info!(
            backend = %kind,
            service = %settings.service_name,
            endpoint = %settings.traces_endpoint(),
            "APM backend initialized"
        );

        Ok(Self { provider, tracer })
    }

    #[cfg(test)]
    pub(crate) fn from_provider(provider: SdkTracerProvider) -> Self {
        let tracer = provider.tracer(env!("CARGO_PKG_NAME"));
        Self { provider, tracer }
    }

    pub fn flush(&self) -> Result<()> {
        self.provider.force_flush().map_err(|e| {
            tracing::warn!("Failed to flush tracer provider: {:?}", e);
            Error::Export(e.to_string())
        })
    }

    pub fn shutdown(&self) -> Result<()> {
        self.provider.shutdown().map_err(|e| {
            tracing::warn!("Failed to shutdown tracer provider: {:?}", e);
            Error::Export(e.to_string())
        })
    }
}

/// Validates a configured ingest URL, falling back to `default` when empty.
pub(crate) fn parse_server_url(kind: BackendKind, raw: &str, default: &str) -> Result<Url> {
    let raw = raw.trim();
    let raw = if raw.is_empty() { default } else { raw };

    let url = Url::parse(raw)
        .map_err(|e| Error::backend_init(kind, format!("invalid server URL {raw:?}: {e}")))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(Error::backend_init(
                kind,
                format!("server URL scheme must be http or https, got {other:?}"),
            ));
        }
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(Error::backend_init(
            kind,
            format!("server URL {raw:?} has no host"),
        ));
    }

    Ok(url)
}

/// Naming and attribute rules of one backend.
pub(crate) trait Conventions: Send + Sync + 'static {
    const KIND: BackendKind;

    fn transaction_name(name: &str, request: Option<&WebRequest>) -> String;

    fn transaction_attributes(_request: Option<&WebRequest>) -> Vec<KeyValue> {
        Vec::new()
    }

    fn segment_name(name: &str) -> String;

    fn segment_attributes() -> Vec<KeyValue> {
        Vec::new()
    }

    fn data_store_name(segment: &DataStoreSegment) -> String;

    fn data_store_attributes(_segment: &DataStoreSegment) -> Vec<KeyValue> {
        Vec::new()
    }

    fn external_name(url: &Url, method: Option<&Method>) -> String;

    fn external_attributes(_url: &Url, _method: Option<&Method>) -> Vec<KeyValue> {
        Vec::new()
    }
}

/// Payload behind a transaction handle.
pub(crate) struct Transaction<C> {
    owner: BackendId,
    name: String,
    span: Mutex<SdkSpan>,
    writer: Option<ResponseWriter>,
    _conventions: PhantomData<fn() -> C>,
}

impl<C: Conventions> Owned for Transaction<C> {
    fn owner(&self) -> BackendId {
        self.owner
    }
}

/// Payload behind segment, data-store segment and external segment handles.
pub(crate) struct Segment<C> {
    owner: BackendId,
    kind: HandleKind,
    name: String,
    span: Mutex<SdkSpan>,
    _conventions: PhantomData<fn() -> C>,
}

impl<C: Conventions> Owned for Segment<C> {
    fn owner(&self) -> BackendId {
        self.owner
    }
}

fn lock(span: &Mutex<SdkSpan>, expected: HandleKind) -> Result<MutexGuard<'_, SdkSpan>> {
    span.lock()
        .map_err(|_| Error::invalid_handle(expected, "handle state is poisoned"))
}

fn record_error(span: &mut SdkSpan, error: &dyn StdError) {
    span.record_error(error);
    span.set_status(Status::error(error.to_string()));
}

fn request_attributes(request: &WebRequest) -> Vec<KeyValue> {
    let mut attributes = vec![
        KeyValue::new(semantic::HTTP_REQUEST_METHOD, request.method().to_string()),
        KeyValue::new(semantic::URL_PATH, request.path().to_string()),
    ];
    if let Some(url) = request.absolute_url() {
        attributes.push(KeyValue::new(semantic::URL_FULL, url.to_string()));
    }
    if let Some(agent) = request.header(http::header::USER_AGENT.as_str()) {
        attributes.push(KeyValue::new(semantic::USER_AGENT, agent.to_string()));
    }
    attributes
}

fn data_store_attributes(segment: &DataStoreSegment) -> Vec<KeyValue> {
    let mut attributes = vec![
        KeyValue::new(semantic::DB_SYSTEM, segment.system()),
        KeyValue::new(semantic::DB_OPERATION, segment.operation.clone()),
    ];
    if !segment.collection.is_empty() {
        attributes.push(KeyValue::new(
            semantic::DB_COLLECTION,
            segment.collection.clone(),
        ));
    }
    if let Some(ref statement) = segment.statement {
        attributes.push(KeyValue::new(semantic::DB_STATEMENT, statement.clone()));
    }
    if let Some(ref host) = segment.host {
        attributes.push(KeyValue::new(semantic::SERVER_ADDRESS, host.clone()));
    }
    if let Some(ref value) = segment.port_path_or_id {
        match value.parse::<u16>() {
            Ok(port) => attributes.push(KeyValue::new(semantic::SERVER_PORT, i64::from(port))),
            Err(_) => attributes.push(KeyValue::new(semantic::DB_INSTANCE_ID, value.clone())),
        }
    }
    if let Some(ref database) = segment.database_name {
        attributes.push(KeyValue::new(semantic::DB_NAMESPACE, database.clone()));
    }
    attributes
}

fn external_attributes(url: &Url, method: Option<&Method>) -> Vec<KeyValue> {
    let mut attributes = vec![KeyValue::new(semantic::URL_FULL, url.to_string())];
    if let Some(method) = method {
        attributes.push(KeyValue::new(
            semantic::HTTP_REQUEST_METHOD,
            method.to_string(),
        ));
    }
    if let Some(host) = url.host_str() {
        attributes.push(KeyValue::new(semantic::SERVER_ADDRESS, host.to_string()));
    }
    if let Some(port) = url.port_or_known_default() {
        attributes.push(KeyValue::new(semantic::SERVER_PORT, i64::from(port)));
    }
    attributes
}

/// One adapter's view of the SDK: its identity plus the optional application.
pub(crate) struct SpanRecorder<C> {
    id: BackendId,
    application: Option<Application>,
    _conventions: PhantomData<fn() -> C>,
}

impl<C: Conventions> SpanRecorder<C> {
    pub fn new(settings: &ExportSettings) -> Result<Self> {
        let application = Application::init(C::KIND, settings)?;
        Ok(Self {
            id: BackendId::new(C::KIND),
            application: Some(application),
            _conventions: PhantomData,
        })
    }

    #[cfg(test)]
    pub(crate) fn with_application(application: Application) -> Self {
        Self {
            id: BackendId::new(C::KIND),
            application: Some(application),
            _conventions: PhantomData,
        }
    }

    /// A recorder with no SDK application; every operation reports
    /// [`Error::NotInitialized`].
    pub fn detached() -> Self {
        Self {
            id: BackendId::new(C::KIND),
            application: None,
            _conventions: PhantomData,
        }
    }

    pub fn id(&self) -> BackendId {
        self.id
    }

    pub fn is_initialized(&self) -> bool {
        self.application.is_some()
    }

    fn application(&self) -> Result<&Application> {
        self.application
            .as_ref()
            .ok_or(Error::NotInitialized { backend: C::KIND })
    }

    fn resolve<T: Owned>(&self, handle: &Handle, expected: HandleKind) -> Result<Arc<T>> {
        handle.resolve::<T>(self.id, expected).inspect_err(|e| {
            tracing::debug!(backend = %self.id, error = %e, "rejected handle");
        })
    }

    fn transaction(&self, handle: &Handle) -> Result<Arc<Transaction<C>>> {
        self.resolve::<Transaction<C>>(handle, HandleKind::Transaction)
    }

    fn segment(&self, handle: &Handle, expected: HandleKind) -> Result<Arc<Segment<C>>> {
        let segment = self.resolve::<Segment<C>>(handle, expected)?;
        if segment.kind != expected {
            let err = Error::invalid_handle(expected, format!("handle is a {}", segment.kind));
            tracing::debug!(backend = %self.id, error = %err, "rejected handle");
            return Err(err);
        }
        Ok(segment)
    }

    fn begin_transaction(
        &self,
        name: &str,
        writer: Option<&ResponseWriter>,
        request: Option<&WebRequest>,
    ) -> Result<Handle> {
        let app = self.application()?;

        let full_name = C::transaction_name(name, request);
        let mut attributes = request.map(request_attributes).unwrap_or_default();
        attributes.extend(C::transaction_attributes(request));

        let kind = if request.is_some() {
            SpanKind::Server
        } else {
            SpanKind::Internal
        };

        let span = app
            .tracer
            .span_builder(full_name.clone())
            .with_kind(kind)
            .with_attributes(attributes)
            .start(&app.tracer);

        tracing::trace!(backend = %self.id, transaction = %full_name, "transaction started");

        Ok(Handle::from_payload(Transaction::<C> {
            owner: self.id,
            name: full_name,
            span: Mutex::new(span),
            writer: writer.cloned(),
            _conventions: PhantomData,
        }))
    }

    pub fn start_transaction(&self, name: &str) -> Result<Handle> {
        self.begin_transaction(name, None, None)
    }

    pub fn start_web_transaction(
        &self,
        name: &str,
        writer: Option<&ResponseWriter>,
        request: &WebRequest,
    ) -> Result<Handle> {
        self.begin_transaction(name, writer, Some(request))
    }

    pub fn end_transaction(&self, handle: &Handle, error: Option<&dyn StdError>) -> Result<()> {
        self.application()?;
        let txn = self.transaction(handle)?;
        let mut span = lock(&txn.span, HandleKind::Transaction)?;

        if let Some(writer) = &txn.writer
            && let Some(status) = writer.status()
        {
            span.set_attribute(KeyValue::new(
                semantic::HTTP_RESPONSE_STATUS_CODE,
                i64::from(status.as_u16()),
            ));
            if status.is_server_error() {
                span.set_status(Status::error(format!("HTTP {status}")));
            }
        }

        if let Some(error) = error {
            record_error(&mut span, error);
        }

        span.end();
        tracing::trace!(backend = %self.id, transaction = %txn.name, "transaction ended");
        Ok(())
    }

    fn begin_segment(
        &self,
        parent: &Transaction<C>,
        kind: HandleKind,
        name: String,
        span_kind: SpanKind,
        attributes: Vec<KeyValue>,
    ) -> Result<Handle> {
        let app = self.application()?;

        let parent_context = lock(&parent.span, HandleKind::Transaction)?
            .span_context()
            .clone();
        let cx = Context::new().with_remote_span_context(parent_context);

        let span = app
            .tracer
            .span_builder(name.clone())
            .with_kind(span_kind)
            .with_attributes(attributes)
            .start_with_context(&app.tracer, &cx);

        tracing::trace!(backend = %self.id, kind = %kind, segment = %name, "segment started");

        Ok(Handle::from_payload(Segment::<C> {
            owner: self.id,
            kind,
            name,
            span: Mutex::new(span),
            _conventions: PhantomData,
        }))
    }

    fn finish_segment(&self, handle: &Handle, expected: HandleKind) -> Result<()> {
        self.application()?;
        let segment = self.segment(handle, expected)?;
        lock(&segment.span, expected)?.end();
        tracing::trace!(backend = %self.id, kind = %expected, segment = %segment.name, "segment ended");
        Ok(())
    }

    pub fn start_segment(&self, txn: &Handle, name: &str) -> Result<Handle> {
        self.application()?;
        let parent = self.transaction(txn)?;
        self.begin_segment(
            &parent,
            HandleKind::Segment,
            C::segment_name(name),
            SpanKind::Internal,
            C::segment_attributes(),
        )
    }

    pub fn end_segment(&self, segment: &Handle) -> Result<()> {
        self.finish_segment(segment, HandleKind::Segment)
    }

    pub fn start_data_store_segment(
        &self,
        txn: &Handle,
        segment: &DataStoreSegment,
    ) -> Result<Handle> {
        self.application()?;
        let parent = self.transaction(txn)?;

        let mut attributes = data_store_attributes(segment);
        attributes.extend(C::data_store_attributes(segment));

        self.begin_segment(
            &parent,
            HandleKind::DataStoreSegment,
            C::data_store_name(segment),
            SpanKind::Client,
            attributes,
        )
    }

    pub fn end_data_store_segment(&self, segment: &Handle) -> Result<()> {
        self.finish_segment(segment, HandleKind::DataStoreSegment)
    }

    fn begin_external(
        &self,
        parent: &Transaction<C>,
        url: &Url,
        method: Option<&Method>,
    ) -> Result<Handle> {
        let mut attributes = external_attributes(url, method);
        attributes.extend(C::external_attributes(url, method));

        self.begin_segment(
            parent,
            HandleKind::ExternalSegment,
            C::external_name(url, method),
            SpanKind::Client,
            attributes,
        )
    }

    pub fn start_external_segment(&self, txn: &Handle, url: &str) -> Result<Handle> {
        self.application()?;
        let parent = self.transaction(txn)?;
        let url = Url::parse(url)
            .map_err(|e| Error::InvalidRequest(format!("invalid URL {url:?}: {e}")))?;
        if url.host_str().is_none() {
            return Err(Error::InvalidRequest(format!("URL {url} has no host")));
        }
        self.begin_external(&parent, &url, None)
    }

    pub fn start_external_web_segment(&self, txn: &Handle, request: &WebRequest) -> Result<Handle> {
        self.application()?;
        let parent = self.transaction(txn)?;
        let url = request.absolute_url().ok_or_else(|| {
            Error::InvalidRequest(format!(
                "request URI {:?} is not an absolute URL",
                request.uri().to_string()
            ))
        })?;
        self.begin_external(&parent, &url, Some(request.method()))
    }

    pub fn end_external_segment(&self, segment: &Handle) -> Result<()> {
        self.finish_segment(segment, HandleKind::ExternalSegment)
    }

    pub fn notice_error(&self, txn: &Handle, error: &dyn StdError) -> Result<()> {
        self.application()?;
        let txn = self.transaction(txn)?;
        record_error(&mut *lock(&txn.span, HandleKind::Transaction)?, error);
        Ok(())
    }

    pub fn add_attribute(&self, txn: &Handle, key: &str, value: AttributeValue) -> Result<()> {
        self.application()?;
        let txn = self.transaction(txn)?;
        lock(&txn.span, HandleKind::Transaction)?
            .set_attribute(KeyValue::new(key.to_string(), value.into_otel()));
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.application()?.flush()
    }

    pub fn shutdown(&self) -> Result<()> {
        self.application()?.shutdown()
    }
}
