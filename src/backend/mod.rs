//! APM backend adapters.

mod base;
mod handle;
mod saas;
mod self_hosted;
mod traits;

pub use base::semantic;
pub use handle::{BackendId, Handle, HandleKind};
pub use saas::SaasAdapter;
pub use self_hosted::SelfHostedAdapter;
pub use traits::Backend;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::{Error, Result};

/// Default ingest endpoints.
pub mod endpoints {
    pub use super::saas::{DEFAULT_ENDPOINT as SAAS_DEFAULT, EU_ENDPOINT as SAAS_EU};
    pub use super::self_hosted::DEFAULT_SERVER_URL as SELF_HOSTED_DEFAULT;
}

/// Which backend an agent dispatches to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Hosted APM service (application name + license key).
    Saas,
    /// Self-hosted tracing server (service name + server URL).
    SelfHosted,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Saas => "saas",
            Self::SelfHosted => "self-hosted",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "saas" | "newrelic" | "new-relic" => Ok(Self::Saas),
            "self-hosted" | "self_hosted" | "elastic" => Ok(Self::SelfHosted),
            _ => Err(Error::UnsupportedBackend(s.to_string())),
        }
    }
}

pub fn create_backend(kind: BackendKind, config: &Config) -> Result<Box<dyn Backend>> {
    match kind {
        BackendKind::Saas => Ok(Box::new(SaasAdapter::new(config)?)),
        BackendKind::SelfHosted => Ok(Box::new(SelfHostedAdapter::new(config)?)),
    }
}
