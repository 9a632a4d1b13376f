//! Console logging for binaries that embed the facade.
//!
//! The library itself only emits `tracing` events; this installs an
//! env-filtered fmt subscriber so they become visible. `RUST_LOG` takes
//! precedence over `default_directive`.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub const DEFAULT_DIRECTIVE: &str = "apm_facade=info";

pub fn init(default_directive: Option<&str>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive.unwrap_or(DEFAULT_DIRECTIVE)));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}
