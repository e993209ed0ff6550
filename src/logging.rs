//! Tracing subscriber setup for the CLI.
//!
//! Logs go to stderr so reports printed on stdout stay machine-readable.

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};
use crate::error::ShrinkError;

/// Installs the global subscriber.
///
/// `RUST_LOG` overrides the configured level. Calling this twice is harmless;
/// the second call keeps the first subscriber.
pub fn init(config: &LoggingConfig) -> Result<(), ShrinkError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(|err| ShrinkError::Config {
            message: format!("invalid logging.level '{}': {err}", config.level),
        })?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let result = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_filter() {
        // Only meaningful when RUST_LOG does not override the level.
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = LoggingConfig {
            level: "shrinkwatch=loud".to_string(),
            format: LogFormat::Text,
        };
        assert!(init(&config).is_err());
    }

    #[test]
    fn init_twice_is_fine() {
        let config = LoggingConfig::default();
        init(&config).unwrap();
        init(&config).unwrap();
    }
}
