//! Logging setup
//!
//! Human-readable or JSON lines on stderr, or appended to a file when
//! `file_path` is set. `RUST_LOG` takes precedence over `min_level`.
//!
//! Usage:
//!   logging::init_logger(&LogConfig::default())?;
//!   tracing::info!(request_id = %id, "request finished");

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;
use tracing_subscriber::{fmt as subscriber_fmt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub json_output: bool,
    pub file_path: Option<PathBuf>,
    pub min_level: LogLevel,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            json_output: false,
            file_path: None,
            min_level: LogLevel::Warn,
        }
    }
}

/// Install the global subscriber. Calling it again is a no-op; only opening
/// the log file can fail.
pub fn init_logger(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.min_level.as_str()));
    let builder = subscriber_fmt().with_env_filter(filter).with_target(false);

    let installed = match &config.file_path {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            if config.json_output {
                builder.json().with_writer(Mutex::new(file)).try_init()
            } else {
                builder.with_ansi(false).with_writer(Mutex::new(file)).try_init()
            }
        }
        None if config.json_output => builder.json().with_writer(std::io::stderr).try_init(),
        None => builder.with_writer(std::io::stderr).try_init(),
    };

    if installed.is_err() {
        tracing::debug!("logger already initialised");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_level_parsing() {
        assert_eq!("INFO".parse::<LogLevel>(), Ok(LogLevel::Info));
        assert_eq!("warning".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_config_from_yaml() {
        let config: LogConfig = serde_yaml::from_str("json_output: true\nmin_level: debug\n").unwrap();
        assert!(config.json_output);
        assert_eq!(config.min_level, LogLevel::Debug);
        assert!(config.file_path.is_none());
    }

    #[test]
    fn test_init_twice_is_noop() {
        let dir = tempdir().unwrap();
        let config = LogConfig {
            file_path: Some(dir.path().join("nlshell.log")),
            ..LogConfig::default()
        };
        init_logger(&config).unwrap();
        init_logger(&config).unwrap();
        assert!(dir.path().join("nlshell.log").exists());
    }

    #[test]
    fn test_unwritable_log_file_is_an_error() {
        let dir = tempdir().unwrap();
        let config = LogConfig {
            file_path: Some(dir.path().join("missing").join("nlshell.log")),
            ..LogConfig::default()
        };
        assert!(init_logger(&config).is_err());
    }
}
