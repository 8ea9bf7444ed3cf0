//! secner Core - Shared error types, configuration and logging
//!
//! This crate defines the pieces shared by every secner component:
//! - Common error types
//! - Configuration management (environment + TOML)
//! - Logging bootstrap

pub mod config;
pub mod logging;

pub use config::{AppConfig, ConfigError, ExtractorConfig, LoggingConfig, StatisticsConfig};
pub use logging::init_logging;

use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for secner operations
#[derive(Error, Debug)]
pub enum SecnerError {
    /// A rule in the pattern table could not be compiled or is inconsistent.
    /// Raised at construction time only, never while extracting.
    #[error("Configuration error in rule '{rule}': {reason}")]
    Configuration { rule: String, reason: String },

    #[error("Recognizer error: {0}")]
    Recognizer(String),

    #[error("Failed to decode model output: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SecnerError {
    /// Shorthand for a rule configuration error
    pub fn configuration(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            rule: rule.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error is a fatal configuration problem
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. } | Self::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, SecnerError>;
