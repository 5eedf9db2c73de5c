use serde::Deserialize;
use thiserror::Error;
use tracing::metadata::LevelFilter;
use tracing::Level;
use tracing_subscriber::fmt::format::PrettyFields;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("init logging error: `{0}`")]
    TryInitError(String),
}

/// Logging configuration for the daemon. Deserialized from the same YAML document as
/// the process specs, under a top-level `logging:` key.
#[derive(Debug, Deserialize, PartialEq, Clone, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LoggingFormat,
}

#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct TimestampFormat(pub String);

impl Default for TimestampFormat {
    fn default() -> Self {
        Self("%Y-%m-%dT%H:%M:%S".to_string())
    }
}

/// - `target`: include the emitting module path in formatted output.
/// - `timestamp`: a chrono strftime format string for the timestamp prefix.
#[derive(Debug, Deserialize, PartialEq, Clone, Default)]
pub struct LoggingFormat {
    #[serde(default)]
    pub target: bool,
    #[serde(default)]
    pub timestamp: TimestampFormat,
}

impl LoggingConfig {
    /// Installs the global `tracing` subscriber. `TSPM_LOG` overrides the default `info`
    /// directive, same shape as `RUST_LOG` (e.g. `tspm=debug,tspm::health=trace`).
    pub fn try_init(self) -> Result<(), LoggingError> {
        tracing_subscriber::fmt()
            .with_target(self.format.target)
            .with_max_level(Level::TRACE)
            .with_env_filter(
                EnvFilter::builder()
                    .with_default_directive(LevelFilter::INFO.into())
                    .with_env_var("TSPM_LOG")
                    .from_env_lossy(),
            )
            .with_timer(ChronoLocal::new(self.format.timestamp.0.clone()))
            .fmt_fields(PrettyFields::new())
            .try_init()
            .map_err(|err| LoggingError::TryInitError(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timestamp_format_is_a_valid_chrono_strftime_pattern() {
        let format = TimestampFormat::default();
        assert_eq!(format.0, "%Y-%m-%dT%H:%M:%S");
    }

    #[test]
    fn logging_config_deserializes_from_yaml() {
        let config: LoggingConfig = serde_yaml::from_str(
            r#"
            format:
              target: true
              timestamp: "%H:%M:%S"
            "#,
        )
        .unwrap();
        assert!(config.format.target);
        assert_eq!(config.format.timestamp.0, "%H:%M:%S");
    }

    #[test]
    fn logging_config_defaults_when_absent() {
        let config: LoggingConfig = serde_yaml::from_str("{}").unwrap();
        assert!(!config.format.target);
        assert_eq!(config.format.timestamp.0, "%Y-%m-%dT%H:%M:%S");
    }
}
