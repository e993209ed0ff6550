//! YAML configuration.
//!
//! Every field has a default, so an empty file (or no file at all) is a
//! valid configuration. Command-line flags override whatever is loaded here.
//!
//! ```yaml
//! detector:
//!   confidence_threshold: 0.75
//! ledger:
//!   root: ledger
//!   device_id: device-01
//! dataset:
//!   root: dataset
//!   lock_timeout_ms: 5000
//! logging:
//!   level: info
//!   format: text
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::detect::DEFAULT_CONFIDENCE_THRESHOLD;
use crate::error::ShrinkError;

/// Environment variable naming the config file when `--config` is absent.
pub const CONFIG_ENV: &str = "SHRINKWATCH_CONFIG";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub detector: DetectorConfig,
    pub ledger: LedgerConfig,
    pub dataset: DatasetConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectorConfig {
    pub confidence_threshold: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LedgerConfig {
    pub root: PathBuf,
    pub device_id: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("ledger"),
            device_id: "device-01".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatasetConfig {
    pub root: PathBuf,
    pub lock_timeout_ms: u64,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("dataset"),
            lock_timeout_ms: 5000,
        }
    }
}

impl DatasetConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence when set.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl Config {
    /// Parses and validates a config file.
    pub fn load(path: &Path) -> Result<Self, ShrinkError> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&content, path)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Loads `path` if given, otherwise returns the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ShrinkError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    fn from_yaml(content: &str, path: &Path) -> Result<Self, ShrinkError> {
        // serde_yaml reads an empty document as null rather than an empty map.
        let config: Config = if content.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(content).map_err(|source| ShrinkError::YamlParse {
                path: path.to_path_buf(),
                source,
            })?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ShrinkError> {
        let threshold = self.detector.confidence_threshold;
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            return Err(ShrinkError::InvalidThreshold(threshold));
        }
        if self.ledger.device_id.trim().is_empty() {
            return Err(ShrinkError::Config {
                message: "ledger.device_id must not be empty".to_string(),
            });
        }
        if self.logging.level.trim().is_empty() {
            return Err(ShrinkError::Config {
                message: "logging.level must not be empty".to_string(),
            });
        }
        Ok(())
    }
}
