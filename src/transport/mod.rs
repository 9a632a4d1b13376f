//! RPC transaction instrumentation.
//!
//! [`TransactionInterceptor`] is the bare `before`/`after` contract: start a
//! transaction named after the called method, end it with the call outcome.
//! [`TransactionLayer`] applies it to any tower service over `http`
//! requests, which covers gRPC clients and servers built on HTTP/2.

mod layer;

pub use layer::{ResponseFuture, TransactionLayer, TransactionService};

use std::error::Error as StdError;
use std::sync::Arc;

use crate::agent::Agent;
use crate::backend::{Handle, semantic};

/// Request extension carrying the transaction started for the call.
///
/// Handlers use it to attach segments and attributes to the surrounding
/// transaction.
#[derive(Clone, Debug)]
pub struct ActiveTransaction(pub Handle);

impl ActiveTransaction {
    pub fn handle(&self) -> &Handle {
        &self.0
    }

    /// Looks up the active transaction of a request.
    pub fn of<B>(request: &http::Request<B>) -> Option<&Handle> {
        request
            .extensions()
            .get::<ActiveTransaction>()
            .map(ActiveTransaction::handle)
    }
}

/// Starts a transaction before an RPC and ends it after.
///
/// Without an agent both halves do nothing. Instrumentation failures are
/// logged at debug level and never fail the call.
#[derive(Clone, Debug, Default)]
pub struct TransactionInterceptor {
    agent: Option<Arc<Agent>>,
}

impl TransactionInterceptor {
    pub fn new(agent: Arc<Agent>) -> Self {
        Self { agent: Some(agent) }
    }

    /// An interceptor that passes every call through untouched.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn agent(&self) -> Option<&Arc<Agent>> {
        self.agent.as_ref()
    }

    /// Starts a transaction named `method` (e.g. `/iam.Users/Get`).
    pub fn before(&self, method: &str) -> Handle {
        let Some(agent) = &self.agent else {
            return Handle::none();
        };

        let txn = match agent.start_transaction(method) {
            Ok(txn) => txn,
            Err(e) => {
                tracing::debug!(method, error = %e, "failed to start RPC transaction");
                return Handle::none();
            }
        };

        if txn.is_some()
            && let Err(e) = agent.add_attribute(&txn, semantic::RPC_SYSTEM, "grpc")
        {
            tracing::debug!(method, error = %e, "failed to tag RPC transaction");
        }

        txn
    }

    /// Ends `txn`, recording `outcome` as the transaction error.
    pub fn after(&self, txn: &Handle, outcome: Option<&dyn StdError>) {
        let Some(agent) = &self.agent else {
            return;
        };
        if txn.is_none() {
            return;
        }
        if let Err(e) = agent.end_transaction(txn, outcome) {
            tracing::debug!(error = %e, "failed to end RPC transaction");
        }
    }
}
