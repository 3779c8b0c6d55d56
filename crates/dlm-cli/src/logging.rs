//! Logging setup for the `dlm` binary.
//!
//! Console output goes to stderr so command output on stdout stays clean.
//! File logging is off by default; enable it with `DLM_LOG_FILE=true`.
//!
//! | Variable              | Meaning                         | Default         |
//! |-----------------------|---------------------------------|-----------------|
//! | `DLM_LOG_LEVEL`       | Console level                   | `info`          |
//! | `DLM_LOG_CONSOLE`     | Console output on/off           | `true`          |
//! | `DLM_LOG_FILE`        | File output on/off              | `false`         |
//! | `DLM_LOG_FILE_LEVEL`  | File level                      | console level   |
//! | `DLM_LOG_DIR`         | Directory for `dlm.log`         | `~/dlm/logs`    |
//! | `DLM_LOG_ROTATION`    | `daily`, `hourly` or `never`    | `daily`         |
//!
//! `RUST_LOG` takes precedence over both levels when set.

use std::path::PathBuf;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

const LOG_FILE_NAME: &str = "dlm.log";

/// Log rotation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRotation {
    Daily,
    Hourly,
    Never,
}

impl LogRotation {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "daily" => Some(Self::Daily),
            "hourly" => Some(Self::Hourly),
            "never" => Some(Self::Never),
            _ => None,
        }
    }
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

fn default_log_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(format!("{}/dlm/logs", home))
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_dir: PathBuf,
    pub console_output: bool,
    pub console_level: Level,
    pub file_logging: bool,
    pub file_level: Level,
    pub rotation: LogRotation,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            console_output: true,
            console_level: Level::INFO,
            file_logging: false,
            file_level: Level::INFO,
            rotation: LogRotation::Daily,
        }
    }
}

impl LoggingConfig {
    /// Create from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let console_level = lookup("DLM_LOG_LEVEL")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.console_level);

        Self {
            log_dir: lookup("DLM_LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.log_dir),
            console_output: lookup("DLM_LOG_CONSOLE")
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.console_output),
            console_level,
            file_logging: lookup("DLM_LOG_FILE")
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.file_logging),
            file_level: lookup("DLM_LOG_FILE_LEVEL")
                .and_then(|v| v.parse().ok())
                .unwrap_or(console_level),
            rotation: lookup("DLM_LOG_ROTATION")
                .and_then(|v| LogRotation::parse(&v))
                .unwrap_or(defaults.rotation),
        }
    }
}

/// Keeps the file writer alive; buffered output is flushed on drop.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Install the global subscriber.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<LoggingGuard> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    let mut file_guard = None;

    if config.console_output {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.console_level.to_string()));
        let console_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_filter(filter);
        layers.push(Box::new(console_layer));
    }

    if config.file_logging {
        std::fs::create_dir_all(&config.log_dir)?;

        let appender = RollingFileAppender::new(config.rotation.into(), &config.log_dir, LOG_FILE_NAME);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        file_guard = Some(guard);

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.file_level.to_string()));
        let file_layer = fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_thread_names(true)
            .with_ansi(false)
            .with_filter(filter);
        layers.push(Box::new(file_layer));
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

    if config.file_logging {
        tracing::debug!(log_dir = %config.log_dir.display(), "File logging initialized");
    }

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = LoggingConfig::from_lookup(lookup_from(&[]));
        assert!(config.console_output);
        assert!(!config.file_logging);
        assert_eq!(config.console_level, Level::INFO);
        assert_eq!(config.file_level, Level::INFO);
        assert_eq!(config.rotation, LogRotation::Daily);
        assert!(config.log_dir.ends_with("dlm/logs"));
    }

    #[test]
    fn test_from_variables() {
        let config = LoggingConfig::from_lookup(lookup_from(&[
            ("DLM_LOG_LEVEL", "debug"),
            ("DLM_LOG_CONSOLE", "0"),
            ("DLM_LOG_FILE", "TRUE"),
            ("DLM_LOG_DIR", "/var/log/dlm"),
        ]));
        assert!(!config.console_output);
        assert!(config.file_logging);
        assert_eq!(config.console_level, Level::DEBUG);
        // File level follows the console level unless set.
        assert_eq!(config.file_level, Level::DEBUG);
        assert_eq!(config.log_dir, PathBuf::from("/var/log/dlm"));
    }

    #[test]
    fn test_invalid_level_falls_back() {
        let config = LoggingConfig::from_lookup(lookup_from(&[
            ("DLM_LOG_LEVEL", "loud"),
            ("DLM_LOG_FILE_LEVEL", "warn"),
        ]));
        assert_eq!(config.console_level, Level::INFO);
        assert_eq!(config.file_level, Level::WARN);
    }

    #[test]
    fn test_rotation_from_variable() {
        let hourly = LoggingConfig::from_lookup(lookup_from(&[("DLM_LOG_ROTATION", "Hourly")]));
        assert_eq!(hourly.rotation, LogRotation::Hourly);
        assert_eq!(Rotation::from(hourly.rotation), Rotation::HOURLY);

        let never = LoggingConfig::from_lookup(lookup_from(&[("DLM_LOG_ROTATION", "never")]));
        assert_eq!(never.rotation, LogRotation::Never);
        assert_eq!(Rotation::from(never.rotation), Rotation::NEVER);

        let unknown = LoggingConfig::from_lookup(lookup_from(&[("DLM_LOG_ROTATION", "weekly")]));
        assert_eq!(unknown.rotation, LogRotation::Daily);
    }
}
