//! Tracing subscriber setup

use tracing_subscriber::EnvFilter;

use crate::{config::Config, error::Result};

/// Install the global `tracing` subscriber from [`LoggingConfig`](crate::config::LoggingConfig)
///
/// An unparsable level falls back to `info`. Fails when a global subscriber
/// is already installed.
pub fn init_tracing(config: &Config) -> Result<()> {
    let filter = env_filter(&config.logging.level);
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = if config.logging.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| crate::Error::Internal(format!("Failed to install tracing subscriber: {}", e)))?;

    tracing::info!(level = %config.logging.level, json = config.logging.json, "tracing initialized");
    Ok(())
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}
