//! Tower middleware wrapping unary calls in a transaction.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use http::{HeaderMap, Request, Response};
use pin_project_lite::pin_project;
use tower::{Layer, Service};

use super::{ActiveTransaction, TransactionInterceptor};
use crate::agent::Agent;
use crate::backend::Handle;

const GRPC_STATUS: &str = "grpc-status";
const GRPC_MESSAGE: &str = "grpc-message";

#[derive(Debug, thiserror::Error)]
enum CallFailure {
    #[error("grpc-status {code}: {message}")]
    Status { code: u32, message: String },
    #[error("{0}")]
    Service(String),
}

fn grpc_failure(headers: &HeaderMap) -> Option<CallFailure> {
    let code = headers
        .get(GRPC_STATUS)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u32>()
        .ok()?;
    if code == 0 {
        return None;
    }
    let message = headers
        .get(GRPC_MESSAGE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    Some(CallFailure::Status { code, message })
}

/// Layer producing [`TransactionService`].
#[derive(Clone, Debug, Default)]
pub struct TransactionLayer {
    interceptor: TransactionInterceptor,
}

impl TransactionLayer {
    pub fn new(agent: Arc<Agent>) -> Self {
        Self {
            interceptor: TransactionInterceptor::new(agent),
        }
    }

    /// A layer whose services forward calls unchanged.
    pub fn disabled() -> Self {
        Self::default()
    }
}

impl<S> Layer<S> for TransactionLayer {
    type Service = TransactionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TransactionService {
            inner,
            interceptor: self.interceptor.clone(),
        }
    }
}

/// Starts a transaction named after the request path, exposes it to the
/// inner service as an [`ActiveTransaction`] extension, and ends it once the
/// response (or error) is available.
///
/// The transaction ends when the response head is ready, so only a
/// `grpc-status` carried in the response headers (a trailers-only response)
/// marks the call as failed. A status sent in trailers after a streamed body
/// is not seen and the call is recorded as successful.
#[derive(Clone, Debug)]
pub struct TransactionService<S> {
    inner: S,
    interceptor: TransactionInterceptor,
}

impl<S> TransactionService<S> {
    pub fn new(inner: S, interceptor: TransactionInterceptor) -> Self {
        Self { inner, interceptor }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for TransactionService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Error: fmt::Display,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<ReqBody>) -> Self::Future {
        let txn = self.interceptor.before(request.uri().path());
        if txn.is_some() {
            request
                .extensions_mut()
                .insert(ActiveTransaction(txn.clone()));
        }

        ResponseFuture {
            inner: self.inner.call(request),
            interceptor: self.interceptor.clone(),
            txn,
        }
    }
}

pin_project! {
    /// Response future of [`TransactionService`].
    pub struct ResponseFuture<F> {
        #[pin]
        inner: F,
        interceptor: TransactionInterceptor,
        txn: Handle,
    }
}

impl<F, ResBody, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<Response<ResBody>, E>>,
    E: fmt::Display,
{
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let result = ready!(this.inner.poll(cx));

        let txn = std::mem::take(this.txn);
        if txn.is_some() {
            let failure = match &result {
                Ok(response) => grpc_failure(response.headers()),
                Err(e) => Some(CallFailure::Service(e.to_string())),
            };
            this.interceptor
                .after(&txn, failure.as_ref().map(|f| f as &dyn std::error::Error));
        }

        Poll::Ready(result)
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::sync::Mutex;

    use futures::executor::block_on;
    use tower::{ServiceBuilder, ServiceExt, service_fn};

    use super::*;
    use crate::agent::tests::helpers::RecordingBackend;

    fn recording_agent() -> (Arc<Agent>, Arc<Mutex<Vec<String>>>) {
        let backend = RecordingBackend::new();
        let calls = Arc::clone(&backend.calls);
        (
            Arc::new(Agent::from_backend("iam", Box::new(backend), true)),
            calls,
        )
    }

    fn grpc_request() -> Request<()> {
        Request::builder()
            .method("POST")
            .uri("http://iam.internal/iam.Users/Get")
            .header("content-type", "application/grpc")
            .body(())
            .unwrap()
    }

    #[test]
    fn test_layer_exposes_and_ends_transaction() {
        let (agent, calls) = recording_agent();
        let service = ServiceBuilder::new()
            .layer(TransactionLayer::new(agent))
            .service(service_fn(|request: Request<()>| async move {
                assert!(ActiveTransaction::of(&request).is_some());
                Ok::<_, Infallible>(Response::new(()))
            }));

        block_on(service.oneshot(grpc_request())).unwrap();

        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                "start_transaction:/iam.Users/Get",
                "add_attribute:rpc.system=grpc",
                "end_transaction",
            ]
        );
    }

    #[test]
    fn test_grpc_status_becomes_outcome() {
        let (agent, calls) = recording_agent();
        let service = TransactionLayer::new(agent).layer(service_fn(|_: Request<()>| async {
            let response = Response::builder()
                .header(GRPC_STATUS, "5")
                .header(GRPC_MESSAGE, "user not found")
                .body(())
                .unwrap();
            Ok::<_, Infallible>(response)
        }));

        block_on(service.oneshot(grpc_request())).unwrap();

        assert_eq!(
            calls.lock().unwrap().last().map(String::as_str),
            Some("end_transaction:grpc-status 5: user not found")
        );
    }

    #[test]
    fn test_service_error_becomes_outcome() {
        let (agent, calls) = recording_agent();
        let service = TransactionLayer::new(agent).layer(service_fn(|_: Request<()>| async {
            Err::<Response<()>, _>("connection reset")
        }));

        let err = block_on(service.oneshot(grpc_request())).unwrap_err();
        assert_eq!(err, "connection reset");
        assert_eq!(
            calls.lock().unwrap().last().map(String::as_str),
            Some("end_transaction:connection reset")
        );
    }

    #[test]
    fn test_status_outside_headers_is_success() {
        let (agent, calls) = recording_agent();
        let service = TransactionLayer::new(agent).layer(service_fn(|_: Request<()>| async {
            let response = Response::builder()
                .header("content-type", "application/grpc")
                .body(())
                .unwrap();
            Ok::<_, Infallible>(response)
        }));

        block_on(service.oneshot(grpc_request())).unwrap();

        assert_eq!(
            calls.lock().unwrap().last().map(String::as_str),
            Some("end_transaction")
        );
    }

    #[test]
    fn test_disabled_layer_passes_through() {
        let service = TransactionLayer::disabled().layer(service_fn(|request: Request<()>| async move {
            assert!(ActiveTransaction::of(&request).is_none());
            Ok::<_, Infallible>(Response::new("ok"))
        }));

        let response = block_on(service.oneshot(grpc_request())).unwrap();
        assert_eq!(*response.body(), "ok");
    }

    #[test]
    fn test_grpc_failure_parsing() {
        let mut headers = HeaderMap::new();
        assert!(grpc_failure(&headers).is_none());

        headers.insert(GRPC_STATUS, "0".parse().unwrap());
        assert!(grpc_failure(&headers).is_none());

        headers.insert(GRPC_STATUS, "14".parse().unwrap());
        let failure = grpc_failure(&headers).unwrap();
        assert_eq!(failure.to_string(), "grpc-status 14: ");
    }
}
