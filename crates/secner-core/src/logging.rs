//! Logging bootstrap
//!
//! Installs a global `tracing` subscriber from [`LoggingConfig`].
//! `RUST_LOG`, when set, takes precedence over the configured level.

use tracing_subscriber::EnvFilter;

use crate::config::{ConfigError, LoggingConfig};

/// Build the env filter for a logging config
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter, ConfigError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    EnvFilter::try_new(&config.level).map_err(|_| ConfigError::InvalidValue {
        key: "logging.level".to_string(),
        value: config.level.clone(),
    })
}

/// Install the global subscriber.
///
/// Returns an error if the level is not a valid filter directive or a
/// subscriber has already been installed for this process.
pub fn init_logging(config: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = env_filter(config)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    let result = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    result.map_err(|e| ConfigError::InvalidValue {
        key: "logging".to_string(),
        value: e.to_string(),
    })
}
