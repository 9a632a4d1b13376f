//! Instrumented request handler example.
//!
//! Wraps a fake "get user" handler in a web transaction with a data-store
//! segment and an outbound call, then shows the panic safety net.
//!
//! Run with: cargo run --example instrumented_handler
//!
//! Reads ELASTIC_APM_SERVICE_NAME / ELASTIC_APM_SERVER_URL; without them the
//! agent is built disabled and every call is a no-op.

use apm_facade::{
    Agent, BackendKind, Config, DataStoreSegment, ResponseWriter, SafetyNet, WebRequest,
};
use http::{Method, StatusCode, Uri};

fn get_user(agent: &Agent, id: u32) -> Result<String, apm_facade::Error> {
    let writer = ResponseWriter::new();
    let request = WebRequest::new(Method::GET, Uri::from_static("http://users-api.local/users"));
    let txn = agent.start_web_transaction("/users", Some(&writer), &request)?;
    agent.add_attribute(&txn, "feature", "iam.manage.user.r")?;
    agent.add_attribute(&txn, "user.id", id)?;

    let query = agent.start_data_store_segment(
        &txn,
        &DataStoreSegment::new("MongoDB", "find", "tblUsers").database_name("iam"),
    )?;
    let user = format!("user-{id}");
    agent.end_data_store_segment(&query)?;

    let call = agent.start_external_segment(&txn, "https://billing.example.com/accounts")?;
    agent.end_external_segment(&call)?;

    writer.write_status(StatusCode::OK);
    agent.end_transaction(&txn, None)?;
    Ok(user)
}

fn main() -> Result<(), apm_facade::Error> {
    let config = Config::from_env();
    let enabled = !config.service_name.is_empty();
    let agent = Agent::new(BackendKind::SelfHosted, enabled, config)?;
    println!("agent: {agent:?}");

    println!("handler returned {}", get_user(&agent, 7)?);

    let net = SafetyNet::new(agent.app_name());
    let outcome = net.run(|| -> u32 { panic!("corrupt cache entry") });
    println!("guarded work returned {outcome:?}");

    agent.shutdown()
}
