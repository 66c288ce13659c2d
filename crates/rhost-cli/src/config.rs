//! Host configuration.
//!
//! [`HostConfig`] is read from TOML.  Missing fields fall back to their
//! defaults, and a handful of environment variables (also picked up from a
//! `.env` file) override the file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rhost_directive::GroupPolicy;
use rhost_sandbox::SandboxConfig;
use serde::{Deserialize, Serialize};

/// Config file used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Overrides [`HostConfig::workers`].
pub const WORKERS_ENV: &str = "RHOST_WORKERS";

/// Overrides [`HostConfig::log_level`].
pub const LOG_LEVEL_ENV: &str = "RHOST_LOG_LEVEL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Instances started per runner.
    pub workers: usize,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Where group steps may appear in a handler.
    pub group_policy: GroupPolicy,
    /// Resource limits for every runnable.
    pub sandbox: SandboxConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            log_level: "info".to_owned(),
            group_policy: GroupPolicy::default(),
            sandbox: SandboxConfig::default(),
        }
    }
}

impl HostConfig {
    /// Load the configuration.
    ///
    /// An explicit `path` must exist.  Without one, [`DEFAULT_CONFIG_PATH`]
    /// is used if present and built-in defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::from_file(&default)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(workers) = var(WORKERS_ENV) {
            self.workers = workers
                .trim()
                .parse()
                .with_context(|| format!("{WORKERS_ENV} must be a positive integer, got `{workers}`"))?;
        }
        if let Some(level) = var(LOG_LEVEL_ENV) {
            self.log_level = level;
        }
        Ok(())
    }
}
