//! Agent configuration.
//!
//! A flat set of options merged over defaults. The struct is consumed by
//! [`Agent::new`](crate::Agent::new) and never mutated afterwards.
//!
//! ```rust
//! use apm_facade::Config;
//!
//! let config = Config::new()
//!     .with_app_name("iam")
//!     .with_license_key("0984793213650b3adfc8e4d89a9bb9245fb5934e")
//!     .with_sample_ratio(0.25);
//!
//! assert_eq!(config.app_name, "iam");
//! assert_eq!(config.sample_ratio, 0.25);
//! ```

mod env;

use std::time::Duration;

use secrecy::SecretString;

pub use env::{
    ENV_APP_NAME, ENV_ENVIRONMENT, ENV_LICENSE_KEY, ENV_SAMPLE_RATE, ENV_SECRET_TOKEN,
    ENV_SERVER_URL, ENV_SERVICE_NAME, ENV_SERVICE_VERSION,
};

pub const DEFAULT_EXPORT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct Config {
    /// Application name reported by the SaaS backend.
    pub app_name: String,
    /// SaaS license key (40 characters).
    pub license_key: Option<SecretString>,
    /// Service name reported by the self-hosted backend.
    pub service_name: String,
    pub service_version: Option<String>,
    /// Deployment environment, e.g. `production`.
    pub environment: Option<String>,
    /// Ingest URL. Empty means the backend's built-in default.
    pub server_url: String,
    /// Bearer token for self-hosted servers that require one.
    pub secret_token: Option<SecretString>,
    /// Fraction of transactions sampled, clamped to `[0, 1]`.
    pub sample_ratio: f64,
    pub export_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: String::new(),
            license_key: None,
            service_name: String::new(),
            service_version: None,
            environment: None,
            server_url: String::new(),
            secret_token: None,
            sample_ratio: 1.0,
            export_timeout: DEFAULT_EXPORT_TIMEOUT,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    pub fn with_license_key(mut self, key: impl Into<String>) -> Self {
        self.license_key = Some(SecretString::from(key.into()));
        self
    }

    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    pub fn with_service_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = Some(version.into());
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = url.into();
        self
    }

    pub fn with_secret_token(mut self, token: impl Into<String>) -> Self {
        self.secret_token = Some(SecretString::from(token.into()));
        self
    }

    /// Non-finite ratios are ignored and leave the current value in place.
    pub fn with_sample_ratio(mut self, ratio: f64) -> Self {
        if ratio.is_finite() {
            self.sample_ratio = ratio.clamp(0.0, 1.0);
        }
        self
    }

    pub fn with_export_timeout(mut self, timeout: Duration) -> Self {
        self.export_timeout = timeout;
        self
    }

    /// Defaults overlaid with the `NEWRELIC_*` and `ELASTIC_APM_*` variables.
    pub fn from_env() -> Self {
        env::overlay(Self::default())
    }
}
