//! HTTP request descriptor and response capture for web transactions.

use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};

use http::{HeaderMap, Method, StatusCode, Uri};
use url::Url;

/// Incoming or outgoing request as seen by the facade: method, URI, headers.
#[derive(Clone, Debug, Default)]
pub struct WebRequest {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
}

impl WebRequest {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Full URL, if the URI carries both scheme and host.
    pub fn absolute_url(&self) -> Option<Url> {
        if self.uri.scheme().is_none() || self.uri.host().is_none() {
            return None;
        }
        Url::parse(&self.uri.to_string()).ok()
    }
}

impl<B> From<&http::Request<B>> for WebRequest {
    fn from(request: &http::Request<B>) -> Self {
        Self {
            method: request.method().clone(),
            uri: request.uri().clone(),
            headers: request.headers().clone(),
        }
    }
}

impl From<&http::request::Parts> for WebRequest {
    fn from(parts: &http::request::Parts) -> Self {
        Self {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            headers: parts.headers.clone(),
        }
    }
}

impl From<http::request::Parts> for WebRequest {
    fn from(parts: http::request::Parts) -> Self {
        Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
        }
    }
}

/// Shared status-code cell a handler writes into.
///
/// Passing a writer to `start_web_transaction` binds it to the transaction;
/// the status recorded here is attached when the transaction ends.
#[derive(Clone, Debug, Default)]
pub struct ResponseWriter {
    status: Arc<AtomicU16>,
}

impl ResponseWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_status(&self, status: StatusCode) {
        self.status.store(status.as_u16(), Ordering::Release);
    }

    pub fn observe<B>(&self, response: &http::Response<B>) {
        self.write_status(response.status());
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self.status.load(Ordering::Acquire) {
            0 => None,
            code => StatusCode::from_u16(code).ok(),
        }
    }
}
