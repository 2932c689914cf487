//! Broker configuration.
//!
//! [`BrokerConfig`] carries the tunables of the lifecycle controller and
//! the background schedulers. [`ConfigLoader`] merges built-in defaults, a
//! project `foreman.toml`, and `FOREMAN_*` environment variables, in that
//! precedence order.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Configuration file name looked up in the project directory.
const CONFIG_FILENAME: &str = "foreman.toml";

/// Tunables for the broker core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// How long finished and errored tasks stay in memory, in milliseconds.
    pub finished_tasks_retention_ms: u64,

    /// Upper bound on deadline expirations signalled per purge pass.
    pub max_expired_tasks_per_cycle: usize,

    /// Checkpoint scheduler period, in milliseconds.
    pub checkpoint_period_ms: u64,

    /// Purge scheduler period, in milliseconds.
    pub purge_period_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            finished_tasks_retention_ms: 30 * 60 * 1000,
            max_expired_tasks_per_cycle: 1_000,
            checkpoint_period_ms: 60 * 1000,
            purge_period_ms: 15 * 1000,
        }
    }
}

impl BrokerConfig {
    pub fn checkpoint_period(&self) -> Duration {
        Duration::from_millis(self.checkpoint_period_ms)
    }

    pub fn purge_period(&self) -> Duration {
        Duration::from_millis(self.purge_period_ms)
    }
}

/// Configuration loader with builder pattern.
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
}

impl ConfigLoader {
    /// Creates a loader rooted at the current directory.
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "FOREMAN".to_string(),
        }
    }

    /// Sets the project directory searched for `foreman.toml`.
    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Sets the environment variable prefix (default: `FOREMAN`).
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Loads configuration from all sources with proper precedence.
    pub fn load(self) -> Result<BrokerConfig> {
        let mut builder = config::Config::builder();

        // 1. Built-in defaults
        let defaults = BrokerConfig::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        // 2. Project config (foreman.toml)
        let config_file = self.project_dir.join(CONFIG_FILENAME);
        if config_file.exists() {
            builder = builder.add_source(
                config::File::from(config_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // 3. Environment variables (FOREMAN_*)
        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix).try_parsing(true),
        );

        let merged = builder.build().context("failed to build configuration")?;
        merged
            .try_deserialize()
            .context("failed to deserialize configuration")
    }

    /// Loads configuration or falls back to defaults.
    pub fn load_or_default(self) -> BrokerConfig {
        self.load().unwrap_or_default()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
