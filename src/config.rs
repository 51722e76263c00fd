//! Configuration for nlshell
//!
//! Loaded from YAML; every section and field is optional. Lookup order:
//! explicit path, `$NLSHELL_CONFIG`, `<config dir>/nlshell/config.yaml`,
//! then built-in defaults. A few settings can be overridden from the
//! environment after loading.

use crate::dispatcher::LiteralLimits;
use crate::executor::ExecutorConfig;
use crate::logging::LogConfig;
use crate::metrics::SamplerConfig;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "NLSHELL_CONFIG";
pub const TIMEOUT_ENV: &str = "NLSHELL_TIMEOUT_MS";
pub const SHELL_ENV: &str = "NLSHELL_SHELL";
pub const LOG_ENV: &str = "NLSHELL_LOG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub executor: ExecutorConfig,
    pub limits: LiteralLimits,
    pub sampler: SamplerConfig,
    pub logging: LogConfig,
    /// Directory every request runs in; the process cwd when unset
    pub working_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).context("Failed to parse config YAML")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_yaml_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Resolve, load and apply environment overrides
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => match Self::discover() {
                Some(path) => Self::load(&path)?,
                None => Self::default(),
            },
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// `$NLSHELL_CONFIG` if set, else the per-user file if it exists
    pub fn discover() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            if !path.trim().is_empty() {
                return Some(PathBuf::from(path));
            }
        }
        Self::user_config_path().filter(|path| path.exists())
    }

    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("nlshell").join("config.yaml"))
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = lookup(TIMEOUT_ENV) {
            self.executor.default_timeout_ms = value
                .trim()
                .parse()
                .with_context(|| format!("{} must be a number of milliseconds, got '{}'", TIMEOUT_ENV, value))?;
        }
        if let Some(shell) = lookup(SHELL_ENV) {
            if !shell.trim().is_empty() {
                self.executor.shell = shell;
            }
        }
        if let Some(level) = lookup(LOG_ENV) {
            self.logging.min_level = level
                .parse()
                .map_err(|e: String| anyhow!("{}: {}", LOG_ENV, e))?;
        }
        Ok(())
    }
}
