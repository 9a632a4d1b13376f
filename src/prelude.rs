//! Prelude module for convenient imports.
//!
//! # Usage
//!
//! ```rust
//! use apm_facade::prelude::*;
//! ```

// Core types
pub use crate::Agent;
pub use crate::Config;
pub use crate::Error;
pub use crate::Result;

// Backends
pub use crate::backend::{Backend, BackendKind, Handle, HandleKind};

// Call parameters
pub use crate::attribute::AttributeValue;
pub use crate::datastore::DataStoreSegment;
pub use crate::web::{ResponseWriter, WebRequest};

// Transport
pub use crate::transport::{ActiveTransaction, TransactionInterceptor, TransactionLayer};

// Panic safety net
pub use crate::recovery::{SafetyNet, recover, recover_future};
