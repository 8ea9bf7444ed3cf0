//! secner Configuration Management
//!
//! Handles configuration from environment variables and TOML files
//! with sensible defaults for development.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Recognizer and merge pipeline configuration
    pub extractor: ExtractorConfig,

    /// Run statistics configuration
    pub statistics: StatisticsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_override()
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.clone(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        EnvOverrides::read(|key| std::env::var(key).ok())?.apply(&mut self);
        Ok(self)
    }

    /// Check value ranges that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.extractor.neural_min_confidence) {
            return Err(ConfigError::InvalidValue {
                key: "extractor.neural_min_confidence".to_string(),
                value: self.extractor.neural_min_confidence.to_string(),
            });
        }
        for (label, precision) in &self.statistics.precision_estimates {
            if !(0.0..=1.0).contains(precision) {
                return Err(ConfigError::InvalidValue {
                    key: format!("statistics.precision_estimates.{}", label),
                    value: precision.to_string(),
                });
            }
        }
        if !(0.0..=1.0).contains(&self.statistics.default_precision) {
            return Err(ConfigError::InvalidValue {
                key: "statistics.default_precision".to_string(),
                value: self.statistics.default_precision.to_string(),
            });
        }
        Ok(())
    }
}

/// Values of the recognised environment variables that are actually set
#[derive(Debug, Default)]
struct EnvOverrides {
    rules_path: Option<PathBuf>,
    default_sector: Option<Option<String>>,
    neural_enabled: Option<bool>,
    neural_min_confidence: Option<f32>,
    log_level: Option<String>,
    log_json: Option<bool>,
}

impl EnvOverrides {
    fn read(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut overrides = Self {
            rules_path: lookup("SECNER_RULES_PATH").map(PathBuf::from),
            log_level: lookup("LOG_LEVEL"),
            ..Self::default()
        };

        // An empty SECNER_SECTOR clears a sector set in the file
        if let Some(sector) = lookup("SECNER_SECTOR") {
            let sector = sector.trim().to_string();
            overrides.default_sector = Some((!sector.is_empty()).then_some(sector));
        }
        if let Some(enabled) = lookup("SECNER_NEURAL_ENABLED") {
            overrides.neural_enabled = Some(parse_bool("SECNER_NEURAL_ENABLED", &enabled)?);
        }
        if let Some(value) = lookup("SECNER_NEURAL_MIN_CONFIDENCE") {
            let threshold: f32 = value
                .trim()
                .parse()
                .ok()
                .filter(|t| (0.0..=1.0).contains(t))
                .ok_or_else(|| ConfigError::InvalidValue {
                    key: "SECNER_NEURAL_MIN_CONFIDENCE".to_string(),
                    value: value.clone(),
                })?;
            overrides.neural_min_confidence = Some(threshold);
        }
        if let Some(json) = lookup("LOG_JSON") {
            overrides.log_json = Some(parse_bool("LOG_JSON", &json)?);
        }

        Ok(overrides)
    }

    fn apply(self, config: &mut AppConfig) {
        if let Some(path) = self.rules_path {
            config.extractor.rules_path = Some(path);
        }
        if let Some(sector) = self.default_sector {
            config.extractor.default_sector = sector;
        }
        if let Some(enabled) = self.neural_enabled {
            config.extractor.neural_enabled = enabled;
        }
        if let Some(threshold) = self.neural_min_confidence {
            config.extractor.neural_min_confidence = threshold;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if let Some(json) = self.log_json {
            config.logging.json_format = json;
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Recognizer pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// TOML rule table replacing the built-in rules
    pub rules_path: Option<PathBuf>,

    /// Sector hint applied when the caller does not pass one
    pub default_sector: Option<String>,

    /// Run the neural recognizer when one is attached
    pub neural_enabled: bool,

    /// Minimum score for model predictions to become candidates
    pub neural_min_confidence: f32,

    /// Model tag -> pipeline label (e.g. "ORG" -> "VENDOR")
    pub label_map: BTreeMap<String, String>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            rules_path: None,
            default_sector: None,
            neural_enabled: true,
            neural_min_confidence: 0.5,
            label_map: BTreeMap::new(),
        }
    }
}

/// Run statistics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticsConfig {
    /// Collect statistics at all
    pub enabled: bool,

    /// Estimated precision per label, from the last evaluation against gold data
    pub precision_estimates: BTreeMap<String, f32>,

    /// Precision assumed for labels missing from the table
    pub default_precision: f32,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        let precision_estimates = [
            ("VULNERABILITY", 0.99),
            ("WEAKNESS", 0.98),
            ("ATTACK_PATTERN", 0.97),
            ("ADVISORY", 0.97),
            ("PROTOCOL", 0.90),
            ("EQUIPMENT", 0.85),
            ("VENDOR", 0.85),
            ("PRODUCT", 0.80),
            ("VERSION", 0.75),
        ]
        .into_iter()
        .map(|(label, precision)| (label.to_string(), precision))
        .collect();

        Self {
            enabled: true,
            precision_estimates,
            default_precision: 0.7,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,

    /// Include file/line in logs
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}
