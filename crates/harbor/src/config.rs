//! Configuration management for the Harbor CLI.
//!
//! Settings are read from a TOML file. A missing file is created with the
//! default settings. Command-line flags override file values before
//! validation.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use server_manager::ManagerConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
pub const STORAGE_BACKENDS: [&str; 2] = ["memory", "json"];
pub const CONTAINER_ENGINES: [&str; 2] = ["static", "none"];

/// Application configuration loaded from a TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub storage: StorageSettings,
    #[serde(default)]
    pub container: ContainerSettings,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSettings {
    /// `memory` or `json`
    pub backend: String,
    /// Directory of the `json` backend
    pub directory: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSettings {
    /// `static` reports configured facts, `none` makes every inspection fail
    pub engine: String,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            engine: "static".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutSettings {
    #[serde(default = "default_persist_secs")]
    pub persist_secs: u64,
    #[serde(default = "default_inspect_secs")]
    pub inspect_secs: u64,
}

fn default_persist_secs() -> u64 {
    10
}

fn default_inspect_secs() -> u64 {
    15
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            persist_secs: default_persist_secs(),
            inspect_secs: default_inspect_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_apply_defaults")]
    pub apply_defaults: bool,
}

fn default_channel_capacity() -> usize {
    32
}

fn default_apply_defaults() -> bool {
    true
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            apply_defaults: default_apply_defaults(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: String,
    #[serde(default)]
    pub json_format: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageSettings {
                backend: "json".to_string(),
                directory: "servers".to_string(),
            },
            container: ContainerSettings::default(),
            timeouts: TimeoutSettings::default(),
            pipeline: PipelineSettings::default(),
            logging: LoggingSettings {
                level: "warn".to_string(),
                json_format: false,
            },
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, writes the default configuration to `path`
    /// and returns it.
    pub async fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let config: AppConfig =
                toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Checks values that would otherwise fail later at runtime.
    pub fn validate(&self) -> Result<(), String> {
        if !STORAGE_BACKENDS.contains(&self.storage.backend.as_str()) {
            return Err(format!(
                "Invalid storage backend: {}. Must be one of: {STORAGE_BACKENDS:?}",
                self.storage.backend
            ));
        }
        if self.storage.backend == "json" && self.storage.directory.is_empty() {
            return Err("Storage directory cannot be empty".to_string());
        }

        if !CONTAINER_ENGINES.contains(&self.container.engine.as_str()) {
            return Err(format!(
                "Invalid container engine: {}. Must be one of: {CONTAINER_ENGINES:?}",
                self.container.engine
            ));
        }

        if self.timeouts.persist_secs == 0 || self.timeouts.inspect_secs == 0 {
            return Err("Timeouts must be at least one second".to_string());
        }

        if self.pipeline.channel_capacity == 0 {
            return Err("Pipeline channel capacity must be greater than zero".to_string());
        }

        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {VALID_LOG_LEVELS:?}",
                self.logging.level
            ));
        }

        Ok(())
    }

    pub fn storage_directory(&self) -> PathBuf {
        PathBuf::from(&self.storage.directory)
    }

    pub fn to_manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            persist_timeout: Duration::from_secs(self.timeouts.persist_secs),
            inspect_timeout: Duration::from_secs(self.timeouts.inspect_secs),
            channel_capacity: self.pipeline.channel_capacity,
            apply_defaults: self.pipeline.apply_defaults,
        }
    }
}
