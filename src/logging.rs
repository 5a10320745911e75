//! Tracing subscriber setup for the CLI.

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter from `RUST_LOG` when set, otherwise `default_level`.
pub fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install the global subscriber. Logs go to stderr so command output on
/// stdout stays clean.
pub fn init(default_level: &str) -> Result<()> {
    tracing_subscriber::registry()
        .with(filter(default_level))
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .try_init()
        .map_err(|e| anyhow!("Failed to install log subscriber: {}", e))
}
