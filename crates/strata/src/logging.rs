//! `tracing-subscriber` initialisation for binaries hosting the ETL engine.

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{Result, StoreError};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Builds the level filter: `RUST_LOG` when set, otherwise the configured level.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            StoreError::ConfigError(format!("invalid log level {}: {}", config.level, e))
        }),
    }
}

/// Installs the global subscriber.
///
/// Fails when the level directive is invalid or a subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = env_filter(config)?;
    let installed = match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty())
            .try_init(),
    };
    installed.map_err(|e| StoreError::ConfigError(format!("logging already initialised: {}", e)))
}
