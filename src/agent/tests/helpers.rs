//! Test doubles for agent tests.

use std::error::Error as StdError;
use std::sync::{Arc, Mutex};

use crate::attribute::AttributeValue;
use crate::backend::{Backend, BackendId, BackendKind, Handle};
use crate::datastore::DataStoreSegment;
use crate::web::{ResponseWriter, WebRequest};
use crate::Result;

/// Backend that records the operations it receives.
#[derive(Debug)]
pub struct RecordingBackend {
    id: BackendId,
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self {
            id: BackendId::new(BackendKind::SelfHosted),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

impl Backend for RecordingBackend {
    fn id(&self) -> BackendId {
        self.id
    }

    fn start_transaction(&self, name: &str) -> Result<Handle> {
        self.record(format!("start_transaction:{name}"));
        Ok(Handle::opaque(name.to_string()))
    }

    fn start_web_transaction(
        &self,
        name: &str,
        _writer: Option<&ResponseWriter>,
        request: &WebRequest,
    ) -> Result<Handle> {
        self.record(format!("start_web_transaction:{} {name}", request.method()));
        Ok(Handle::opaque(name.to_string()))
    }

    fn end_transaction(&self, _txn: &Handle, error: Option<&dyn StdError>) -> Result<()> {
        match error {
            Some(e) => self.record(format!("end_transaction:{e}")),
            None => self.record("end_transaction"),
        }
        Ok(())
    }

    fn start_segment(&self, _txn: &Handle, name: &str) -> Result<Handle> {
        self.record(format!("start_segment:{name}"));
        Ok(Handle::opaque(()))
    }

    fn end_segment(&self, _segment: &Handle) -> Result<()> {
        self.record("end_segment");
        Ok(())
    }

    fn start_data_store_segment(
        &self,
        _txn: &Handle,
        segment: &DataStoreSegment,
    ) -> Result<Handle> {
        self.record(format!("start_data_store_segment:{}", segment.operation));
        Ok(Handle::opaque(()))
    }

    fn end_data_store_segment(&self, _segment: &Handle) -> Result<()> {
        self.record("end_data_store_segment");
        Ok(())
    }

    fn start_external_segment(&self, _txn: &Handle, url: &str) -> Result<Handle> {
        self.record(format!("start_external_segment:{url}"));
        Ok(Handle::opaque(()))
    }

    fn start_external_web_segment(&self, _txn: &Handle, request: &WebRequest) -> Result<Handle> {
        self.record(format!("start_external_web_segment:{}", request.uri()));
        Ok(Handle::opaque(()))
    }

    fn end_external_segment(&self, _segment: &Handle) -> Result<()> {
        self.record("end_external_segment");
        Ok(())
    }

    fn notice_error(&self, _txn: &Handle, error: &dyn StdError) -> Result<()> {
        self.record(format!("notice_error:{error}"));
        Ok(())
    }

    fn add_attribute(&self, _txn: &Handle, key: &str, value: AttributeValue) -> Result<()> {
        self.record(format!("add_attribute:{key}={value}"));
        Ok(())
    }
}

pub const LICENSE_KEY: &str = "0984793213650b3adfc8e4d89a9bb9245fb5934e";
pub const LOCAL_COLLECTOR: &str = "http://127.0.0.1:4318";
