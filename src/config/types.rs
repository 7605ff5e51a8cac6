//! Configuration types.

use crate::types::{DEFAULT_TIMEOUT_SECONDS, Method};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Full configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    #[serde(default)]
    pub submit: SubmitConfig,
}

/// Task store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// How long a connection waits for another process's write lock.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".taskq/tasks.db")
}

fn default_busy_timeout_ms() -> u64 {
    crate::db::DEFAULT_BUSY_TIMEOUT_MS
}

/// Dispatcher settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Sleep between polls in daemon mode.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Directory that task commands resolve in.
    #[serde(default = "default_commands_dir")]
    pub commands_dir: PathBuf,

    /// Extra time past `timeout_seconds` before a silent claim is reaped.
    #[serde(default = "default_reap_grace_seconds")]
    pub reap_grace_seconds: i64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            commands_dir: default_commands_dir(),
            reap_grace_seconds: default_reap_grace_seconds(),
        }
    }
}

impl DispatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_commands_dir() -> PathBuf {
    PathBuf::from("commands")
}

fn default_reap_grace_seconds() -> i64 {
    60
}

/// Defaults applied to submissions that leave a field unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitConfig {
    #[serde(default)]
    pub method: Method,

    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: i64,

    /// Spawn a worker after each submission.
    #[serde(default = "default_auto_dispatch")]
    pub auto_dispatch: bool,
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            method: Method::default(),
            timeout_seconds: default_timeout_seconds(),
            auto_dispatch: default_auto_dispatch(),
        }
    }
}

fn default_timeout_seconds() -> i64 {
    DEFAULT_TIMEOUT_SECONDS
}

fn default_auto_dispatch() -> bool {
    true
}

impl Config {
    /// Load configuration from a single file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    /// Ensure the database directory exists.
    pub fn ensure_db_dir(&self) -> Result<()> {
        if let Some(parent) = self.store.db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.store.db_path, PathBuf::from(".taskq/tasks.db"));
        assert_eq!(config.submit.method, Method::Normal);
        assert_eq!(config.submit.timeout_seconds, 30);
        assert!(config.submit.auto_dispatch);
        assert_eq!(config.dispatcher.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config: Config = serde_yaml::from_str(
            "submit:\n  method: background\ndispatcher:\n  poll_interval_ms: 250\n",
        )
        .unwrap();
        assert_eq!(config.submit.method, Method::Background);
        assert_eq!(config.submit.timeout_seconds, 30);
        assert_eq!(config.dispatcher.poll_interval_ms, 250);
        assert_eq!(config.dispatcher.commands_dir, PathBuf::from("commands"));
    }
}
