//! gRPC transaction layer example.
//!
//! Stacks `TransactionLayer` over an in-process service that reads the
//! active transaction from the request extensions and records a segment.
//!
//! Run with: cargo run --example grpc_layer

use std::convert::Infallible;
use std::sync::Arc;

use apm_facade::{ActiveTransaction, Agent, BackendKind, Config, TransactionLayer};
use futures::executor::block_on;
use http::{Request, Response};
use tower::{ServiceBuilder, ServiceExt, service_fn};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let agent = Arc::new(Agent::new(
        BackendKind::SelfHosted,
        true,
        Config::new()
            .with_service_name("users-grpc")
            .with_server_url("http://127.0.0.1:4318"),
    )?);

    let handler_agent = Arc::clone(&agent);
    let service = ServiceBuilder::new()
        .layer(TransactionLayer::new(Arc::clone(&agent)))
        .service(service_fn(move |request: Request<()>| {
            let agent = Arc::clone(&handler_agent);
            async move {
                if let Some(txn) = ActiveTransaction::of(&request) {
                    let segment = agent.start_segment(txn, "load-user")?;
                    agent.end_segment(&segment)?;
                }
                Ok::<_, apm_facade::Error>(
                    Response::builder()
                        .header("grpc-status", "0")
                        .body(())
                        .unwrap_or_default(),
                )
            }
        }));

    let request = Request::builder()
        .method("POST")
        .uri("http://users-grpc.local/iam.Users/Get")
        .header("content-type", "application/grpc")
        .body(())?;

    let response = block_on(service.oneshot(request))?;
    println!("status: {}", response.status());

    agent.shutdown()?;
    Ok(())
}
