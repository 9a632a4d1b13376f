//! The instrumentation facade call sites talk to.

use std::error::Error as StdError;
use std::sync::Mutex;

use crate::attribute::AttributeValue;
use crate::backend::{Backend, BackendKind, Handle, HandleKind, create_backend};
use crate::config::Config;
use crate::datastore::DataStoreSegment;
use crate::web::{ResponseWriter, WebRequest};
use crate::{Error, Result};

/// Dispatches instrumentation calls to the backend selected at construction.
///
/// A disabled agent, or one without a backend, accepts every call and does
/// nothing: `start_*` returns the zero handle and the remaining operations
/// return `Ok(())`. An enabled agent with a backend rejects the zero handle
/// with [`Error::MissingHandle`] and foreign handles with
/// [`Error::InvalidHandle`].
///
/// The enabled flag can be toggled at any time through [`Agent::enable`];
/// the backend never changes.
pub struct Agent {
    app_name: String,
    enabled: Mutex<bool>,
    backend: Option<Box<dyn Backend>>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("app_name", &self.app_name)
            .field("enabled", &self.is_enabled())
            .field("backend", &self.backend)
            .finish()
    }
}

fn require(handle: &Handle, expected: HandleKind) -> Result<()> {
    if handle.is_none() {
        tracing::debug!(expected = %expected, "rejected zero handle");
        return Err(Error::MissingHandle { expected });
    }
    Ok(())
}

impl Agent {
    /// Builds an agent for `kind`.
    ///
    /// With `enabled = false` no backend is constructed and no credentials
    /// are needed.
    pub fn new(kind: BackendKind, enabled: bool, config: Config) -> Result<Self> {
        let app_name = match kind {
            BackendKind::Saas if !config.app_name.is_empty() => config.app_name.clone(),
            BackendKind::SelfHosted if !config.service_name.is_empty() => {
                config.service_name.clone()
            }
            _ if !config.app_name.is_empty() => config.app_name.clone(),
            _ => config.service_name.clone(),
        };

        if !enabled {
            tracing::debug!(backend = %kind, app = %app_name, "APM agent disabled");
            return Ok(Self::inert(app_name));
        }

        let backend = create_backend(kind, &config)?;
        Ok(Self {
            app_name,
            enabled: Mutex::new(true),
            backend: Some(backend),
        })
    }

    /// Like [`Agent::new`], with the backend named by a string such as
    /// `"saas"` or `"self-hosted"`. Unknown names fail even when disabled.
    pub fn from_kind_name(name: &str, enabled: bool, config: Config) -> Result<Self> {
        let kind: BackendKind = name.parse()?;
        Self::new(kind, enabled, config)
    }

    /// Wraps an already constructed backend.
    pub fn from_backend(
        app_name: impl Into<String>,
        backend: Box<dyn Backend>,
        enabled: bool,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            enabled: Mutex::new(enabled),
            backend: Some(backend),
        }
    }

    /// An agent with no backend. Every call is a no-op.
    pub fn inert(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            enabled: Mutex::new(false),
            backend: None,
        }
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn backend_kind(&self) -> Option<BackendKind> {
        self.backend.as_ref().map(|b| b.kind())
    }

    pub fn backend(&self) -> Option<&dyn Backend> {
        self.backend.as_deref()
    }

    pub fn is_enabled(&self) -> bool {
        *self.enabled.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Turns dispatch on or off for subsequent calls.
    pub fn enable(&self, enabled: bool) {
        *self.enabled.lock().unwrap_or_else(|e| e.into_inner()) = enabled;
        tracing::debug!(app = %self.app_name, enabled, "APM agent toggled");
    }

    fn active(&self) -> Option<&dyn Backend> {
        if !self.is_enabled() {
            return None;
        }
        self.backend.as_deref()
    }

    pub fn start_transaction(&self, name: &str) -> Result<Handle> {
        match self.active() {
            Some(backend) => backend.start_transaction(name),
            None => Ok(Handle::none()),
        }
    }

    /// Starts a transaction for an inbound HTTP request. When `writer` is
    /// given, the status code written to it is recorded at the end.
    pub fn start_web_transaction(
        &self,
        name: &str,
        writer: Option<&ResponseWriter>,
        request: &WebRequest,
    ) -> Result<Handle> {
        match self.active() {
            Some(backend) => backend.start_web_transaction(name, writer, request),
            None => Ok(Handle::none()),
        }
    }

    pub fn end_transaction(&self, txn: &Handle, error: Option<&dyn StdError>) -> Result<()> {
        let Some(backend) = self.active() else {
            return Ok(());
        };
        require(txn, HandleKind::Transaction)?;
        backend.end_transaction(txn, error)
    }

    pub fn start_segment(&self, txn: &Handle, name: &str) -> Result<Handle> {
        let Some(backend) = self.active() else {
            return Ok(Handle::none());
        };
        require(txn, HandleKind::Transaction)?;
        backend.start_segment(txn, name)
    }

    pub fn end_segment(&self, segment: &Handle) -> Result<()> {
        let Some(backend) = self.active() else {
            return Ok(());
        };
        require(segment, HandleKind::Segment)?;
        backend.end_segment(segment)
    }

    pub fn start_data_store_segment(
        &self,
        txn: &Handle,
        segment: &DataStoreSegment,
    ) -> Result<Handle> {
        let Some(backend) = self.active() else {
            return Ok(Handle::none());
        };
        require(txn, HandleKind::Transaction)?;
        backend.start_data_store_segment(txn, segment)
    }

    pub fn end_data_store_segment(&self, segment: &Handle) -> Result<()> {
        let Some(backend) = self.active() else {
            return Ok(());
        };
        require(segment, HandleKind::DataStoreSegment)?;
        backend.end_data_store_segment(segment)
    }

    /// Starts a segment for an outbound call to `url`.
    pub fn start_external_segment(&self, txn: &Handle, url: &str) -> Result<Handle> {
        let Some(backend) = self.active() else {
            return Ok(Handle::none());
        };
        require(txn, HandleKind::Transaction)?;
        backend.start_external_segment(txn, url)
    }

    /// Starts a segment for an outbound request. The request URI must be
    /// absolute.
    pub fn start_external_web_segment(&self, txn: &Handle, request: &WebRequest) -> Result<Handle> {
        let Some(backend) = self.active() else {
            return Ok(Handle::none());
        };
        require(txn, HandleKind::Transaction)?;
        backend.start_external_web_segment(txn, request)
    }

    pub fn end_external_segment(&self, segment: &Handle) -> Result<()> {
        let Some(backend) = self.active() else {
            return Ok(());
        };
        require(segment, HandleKind::ExternalSegment)?;
        backend.end_external_segment(segment)
    }

    pub fn notice_error(&self, txn: &Handle, error: &dyn StdError) -> Result<()> {
        let Some(backend) = self.active() else {
            return Ok(());
        };
        require(txn, HandleKind::Transaction)?;
        backend.notice_error(txn, error)
    }

    pub fn add_attribute(
        &self,
        txn: &Handle,
        key: &str,
        value: impl Into<AttributeValue>,
    ) -> Result<()> {
        let Some(backend) = self.active() else {
            return Ok(());
        };
        require(txn, HandleKind::Transaction)?;
        backend.add_attribute(txn, key, value.into())
    }

    /// Exports buffered spans. Works regardless of the enabled flag.
    pub fn flush(&self) -> Result<()> {
        match &self.backend {
            Some(backend) => backend.flush(),
            None => Ok(()),
        }
    }

    /// Flushes and stops the backend's export pipeline.
    pub fn shutdown(&self) -> Result<()> {
        match &self.backend {
            Some(backend) => backend.shutdown(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests;
