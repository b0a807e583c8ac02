//! Tracing subscriber setup

use anyhow::{anyhow, Context, Result};
use s3gate_core::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber.
///
/// Uses `RUST_LOG` if set, otherwise falls back to `logging.level`.
/// `logging.format = "json"` switches to one JSON object per line.
pub fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(&logging.level)
            .with_context(|| format!("invalid log level filter: {}", logging.level))?
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = match logging.format.as_str() {
        "json" => builder.json().try_init(),
        "pretty" => builder.pretty().try_init(),
        _ => builder.try_init(),
    };

    result.map_err(|e| anyhow!("failed to initialise logging: {}", e))
}
