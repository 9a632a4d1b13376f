//! Opaque transaction and segment handles.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use super::BackendKind;
use crate::{Error, Result};

/// What an operation expected to receive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Transaction,
    Segment,
    DataStoreSegment,
    ExternalSegment,
}

impl HandleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transaction => "transaction",
            Self::Segment => "segment",
            Self::DataStoreSegment => "data store segment",
            Self::ExternalSegment => "external segment",
        }
    }

    pub fn is_segment(&self) -> bool {
        !matches!(self, Self::Transaction)
    }
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one adapter instance. Every handle an adapter mints carries it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BackendId {
    kind: BackendKind,
    instance: Uuid,
}

impl BackendId {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            instance: Uuid::new_v4(),
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn instance(&self) -> Uuid {
        self.instance
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.instance)
    }
}

/// Payload types minted by adapters.
pub(crate) trait Owned: Any + Send + Sync {
    fn owner(&self) -> BackendId;
}

/// Token returned by `start_*` operations and passed back to the matching
/// `end_*`, `notice_error` or `add_attribute` call on the same backend.
///
/// The default value is the zero handle, returned by inert agents.
#[derive(Clone, Default)]
pub struct Handle {
    payload: Option<Arc<dyn Any + Send + Sync>>,
}

impl Handle {
    /// The zero handle.
    pub fn none() -> Self {
        Self::default()
    }

    /// Wraps an arbitrary value. Backends reject such handles as invalid;
    /// useful for carrying foreign tokens and for tests.
    pub fn opaque<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            payload: Some(Arc::new(value)),
        }
    }

    pub(crate) fn from_payload<T: Owned>(payload: T) -> Self {
        Self {
            payload: Some(Arc::new(payload)),
        }
    }

    pub fn is_none(&self) -> bool {
        self.payload.is_none()
    }

    pub fn is_some(&self) -> bool {
        self.payload.is_some()
    }

    /// True when both handles refer to the same underlying token.
    pub fn same_as(&self, other: &Handle) -> bool {
        match (&self.payload, &other.payload) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    /// Downcasts to the adapter payload `T` and checks it was minted by `owner`.
    pub(crate) fn resolve<T: Owned>(&self, owner: BackendId, expected: HandleKind) -> Result<Arc<T>> {
        let payload = self
            .payload
            .clone()
            .ok_or(Error::MissingHandle { expected })?;

        let value = payload.downcast::<T>().map_err(|_| {
            Error::invalid_handle(
                expected,
                format!("value was not produced by the {} backend", owner.kind()),
            )
        })?;

        if value.owner() != owner {
            return Err(Error::invalid_handle(
                expected,
                format!("handle belongs to backend instance {}", value.owner()),
            ));
        }

        Ok(value)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.payload {
            Some(_) => f.write_str("Handle(..)"),
            None => f.write_str("Handle(none)"),
        }
    }
}
