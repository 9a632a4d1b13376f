//! Environment variable overlay.
//!
//! Variables are only read, never written: mutating the environment at
//! runtime is not thread-safe.

use super::Config;

pub const ENV_APP_NAME: &str = "NEWRELIC_APP";
pub const ENV_LICENSE_KEY: &str = "NEWRELIC_KEY";
pub const ENV_SERVICE_NAME: &str = "ELASTIC_APM_SERVICE_NAME";
pub const ENV_SERVICE_VERSION: &str = "ELASTIC_APM_SERVICE_VERSION";
pub const ENV_ENVIRONMENT: &str = "ELASTIC_APM_ENVIRONMENT";
pub const ENV_SERVER_URL: &str = "ELASTIC_APM_SERVER_URL";
pub const ENV_SECRET_TOKEN: &str = "ELASTIC_APM_SECRET_TOKEN";
pub const ENV_SAMPLE_RATE: &str = "ELASTIC_APM_TRANSACTION_SAMPLE_RATE";

pub(super) fn overlay(config: Config) -> Config {
    overlay_from(config, |key| std::env::var(key).ok())
}

fn overlay_from(mut config: Config, lookup: impl Fn(&str) -> Option<String>) -> Config {
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(name) = get(ENV_APP_NAME) {
        config = config.with_app_name(name);
    }
    if let Some(key) = get(ENV_LICENSE_KEY) {
        config = config.with_license_key(key);
    }
    if let Some(name) = get(ENV_SERVICE_NAME) {
        config = config.with_service_name(name);
    }
    if let Some(version) = get(ENV_SERVICE_VERSION) {
        config = config.with_service_version(version);
    }
    if let Some(environment) = get(ENV_ENVIRONMENT) {
        config = config.with_environment(environment);
    }
    if let Some(url) = get(ENV_SERVER_URL) {
        config = config.with_server_url(url);
    }
    if let Some(token) = get(ENV_SECRET_TOKEN) {
        config = config.with_secret_token(token);
    }
    if let Some(ratio) = get(ENV_SAMPLE_RATE) {
        match ratio.trim().parse::<f64>() {
            Ok(r) if r.is_finite() => config = config.with_sample_ratio(r),
            _ => tracing::warn!(
                variable = ENV_SAMPLE_RATE,
                value = %ratio,
                "ignoring invalid sample rate"
            ),
        }
    }

    config
}
