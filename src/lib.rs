//! # apm-facade
//!
//! Backend-neutral instrumentation for transactions, segments and errors.
//!
//! Call sites talk to one [`Agent`]; the agent dispatches every call to the
//! backend chosen at construction time. Two backends ship with the crate: a
//! SaaS-style adapter (application name + license key, hosted ingest) and a
//! self-hosted adapter (service name + your own tracing server). Both hand
//! spans to the OpenTelemetry SDK, which owns batching and export.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use apm_facade::{Agent, BackendKind, Config, DataStoreSegment};
//!
//! fn main() -> Result<(), apm_facade::Error> {
//!     let agent = Agent::new(
//!         BackendKind::SelfHosted,
//!         true,
//!         Config::new()
//!             .with_service_name("users-api")
//!             .with_server_url("http://localhost:8200"),
//!     )?;
//!
//!     let txn = agent.start_transaction("/users")?;
//!     agent.add_attribute(&txn, "feature", "iam.manage.user.r")?;
//!
//!     let query = agent.start_data_store_segment(
//!         &txn,
//!         &DataStoreSegment::new("MongoDB", "find", "tblUsers"),
//!     )?;
//!     agent.end_data_store_segment(&query)?;
//!
//!     agent.end_transaction(&txn, None)?;
//!     agent.shutdown()
//! }
//! ```
//!
//! ## Disabled agents
//!
//! An agent built with `enabled = false` needs no credentials and turns every
//! call into a silent no-op, so instrumentation can stay in place in
//! environments without an APM backend.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod agent;
pub mod attribute;
pub mod backend;
pub mod config;
pub mod datastore;
#[cfg(feature = "subscriber")]
pub mod logging;
pub mod prelude;
pub mod recovery;
pub mod transport;
pub mod web;

pub use agent::Agent;
pub use attribute::AttributeValue;
pub use backend::{
    Backend, BackendId, BackendKind, Handle, HandleKind, SaasAdapter, SelfHostedAdapter,
    create_backend, semantic,
};
pub use config::Config;
pub use datastore::DataStoreSegment;
pub use recovery::{PanicRecord, SafetyNet, recover, recover_future};
pub use transport::{
    ActiveTransaction, TransactionInterceptor, TransactionLayer, TransactionService,
};
pub use web::{ResponseWriter, WebRequest};

/// Error type for apm-facade operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Requested backend kind is not one of the supported variants.
    #[error("Unsupported APM backend: {0:?}")]
    UnsupportedBackend(String),

    /// Backend construction failed (credentials, server URL, exporter).
    #[error("{backend} backend initialization failed: {message}")]
    BackendInit {
        backend: BackendKind,
        message: String,
    },

    /// Adapter has no SDK application handle.
    #[error("{backend} backend is not initialized")]
    NotInitialized { backend: BackendKind },

    /// Operation needs a handle but received the zero handle.
    #[error("Missing {expected} handle")]
    MissingHandle { expected: HandleKind },

    /// Handle was produced by another backend, another adapter instance, or
    /// for another kind of operation.
    #[error("Invalid {expected} handle: {reason}")]
    InvalidHandle {
        expected: HandleKind,
        reason: String,
    },

    /// Request or URL passed to an external segment is malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Flushing or shutting down the tracing pipeline failed.
    #[error("Telemetry export failed: {0}")]
    Export(String),
}

/// Error category for unified error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Backend selection or construction problems.
    Configuration,
    /// Zero, foreign or wrongly shaped handles.
    Handle,
    /// Malformed request data passed by the caller.
    Request,
    /// Failures inside the tracing pipeline.
    Export,
}

impl Error {
    pub(crate) fn backend_init(backend: BackendKind, message: impl Into<String>) -> Self {
        Error::BackendInit {
            backend,
            message: message.into(),
        }
    }

    pub(crate) fn invalid_handle(expected: HandleKind, reason: impl Into<String>) -> Self {
        Error::InvalidHandle {
            expected,
            reason: reason.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::UnsupportedBackend(_)
            | Error::BackendInit { .. }
            | Error::NotInitialized { .. } => ErrorCategory::Configuration,
            Error::MissingHandle { .. } | Error::InvalidHandle { .. } => ErrorCategory::Handle,
            Error::InvalidRequest(_) => ErrorCategory::Request,
            Error::Export(_) => ErrorCategory::Export,
        }
    }

    pub fn is_configuration_error(&self) -> bool {
        self.category() == ErrorCategory::Configuration
    }

    pub fn is_handle_error(&self) -> bool {
        self.category() == ErrorCategory::Handle
    }
}

/// Result type alias for apm-facade operations.
pub type Result<T> = std::result::Result<T, Error>;
