//! Configuration loader with tier-based merging.

use super::types::Config;
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Deep merge two values, `overlay` winning.
///
/// Objects merge key by key; everything else is replaced. A null overlay
/// means "not specified" and keeps the base.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (base, Value::Null) => base,
        (_, overlay) => overlay,
    }
}

/// Where each tier lives.
#[derive(Debug, Clone, Default)]
pub struct ConfigPaths {
    /// Explicit file; when set, tier discovery is skipped.
    pub explicit_file: Option<PathBuf>,
    pub project_dir: Option<PathBuf>,
    pub user_dir: Option<PathBuf>,
}

impl ConfigPaths {
    /// Discover configuration paths from environment and defaults.
    pub fn discover() -> Self {
        let explicit_file = std::env::var("TASKQ_CONFIG_PATH").ok().map(PathBuf::from);

        let user_dir = std::env::var("TASKQ_USER_DIR")
            .ok()
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|h| h.join(".taskq")));

        let project_dir = std::env::var("TASKQ_PROJECT_DIR")
            .ok()
            .map(PathBuf::from)
            .or_else(|| Some(PathBuf::from("taskq")));

        Self {
            explicit_file,
            project_dir,
            user_dir,
        }
    }

    /// Create paths with explicit directories.
    pub fn with_dirs(project_dir: Option<PathBuf>, user_dir: Option<PathBuf>) -> Self {
        Self {
            explicit_file: None,
            project_dir,
            user_dir,
        }
    }

    pub fn with_explicit_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.explicit_file = Some(file.into());
        self
    }
}

fn read_yaml_tier(file: &Path) -> Result<Option<Value>> {
    if !file.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("cannot read config {}", file.display()))?;
    let value: Value = serde_yaml::from_str(&content)
        .with_context(|| format!("invalid config {}", file.display()))?;
    debug!(path = %file.display(), "config tier loaded");
    Ok(Some(value))
}

/// Loaded configuration plus where it came from.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    pub paths: ConfigPaths,
    config: Config,
    /// Files that contributed, lowest tier first.
    sources: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Load with explicit paths, reading overrides from the process
    /// environment.
    pub fn load_with_paths(paths: ConfigPaths) -> Result<Self> {
        Self::load_with_env(paths, |key| std::env::var(key).ok())
    }

    /// Load with explicit paths and an explicit environment lookup.
    pub fn load_with_env<F>(paths: ConfigPaths, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut sources = Vec::new();

        let mut config = if let Some(ref explicit) = paths.explicit_file {
            sources.push(explicit.clone());
            Config::load(explicit)?
        } else {
            let mut merged = serde_json::to_value(Config::default())?;
            let tiers = [
                paths.project_dir.as_ref().map(|d| d.join("config.yaml")),
                paths.user_dir.as_ref().map(|d| d.join("config.yaml")),
            ];
            for file in tiers.into_iter().flatten() {
                if let Some(value) = read_yaml_tier(&file)? {
                    merged = deep_merge(merged, value);
                    sources.push(file);
                }
            }
            serde_json::from_value(merged).context("invalid merged configuration")?
        };

        Self::apply_env_overrides(&mut config, env)?;

        Ok(Self {
            paths,
            config,
            sources,
        })
    }

    /// Apply environment variable overrides to config.
    fn apply_env_overrides<F>(config: &mut Config, env: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(db_path) = env("TASKQ_DB_PATH") {
            config.store.db_path = PathBuf::from(db_path);
        }

        if let Some(dir) = env("TASKQ_COMMANDS_DIR") {
            config.dispatcher.commands_dir = PathBuf::from(dir);
        }

        if let Some(interval) = env("TASKQ_POLL_INTERVAL_MS") {
            config.dispatcher.poll_interval_ms = interval
                .parse()
                .with_context(|| format!("TASKQ_POLL_INTERVAL_MS is not a number: {}", interval))?;
        }

        Ok(())
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Consume the loader and return the configuration.
    pub fn into_config(self) -> Config {
        self.config
    }

    /// Files that contributed to the configuration.
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }
}
