//! Dispatch configuration
//!
//! Handles parsing and management of pb-dispatch.toml configuration files.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::provider::{ADD_HANDLER, DELETE_HANDLER, GET_HANDLER, PHONEBOOK_PROVIDER};
use crate::record::RECORD_SIZE;

/// Configuration file name searched for by `find_and_load`.
pub const CONFIG_FILE: &str = "pb-dispatch.toml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root configuration structure matching pb-dispatch.toml.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DispatchConfig {
    /// Provider identity and exported handler names
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Staging memory limits
    #[serde(default)]
    pub staging: StagingConfig,

    /// Provider removal
    #[serde(default)]
    pub unload: UnloadConfig,
}

impl DispatchConfig {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: DispatchConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the current directory or parents.
    pub fn load_from_cwd() -> ConfigResult<Self> {
        let cwd = std::env::current_dir().map_err(ConfigError::Io)?;
        Self::find_and_load(&cwd)
    }

    /// Find and load configuration by searching up from the given directory.
    pub fn find_and_load(start_dir: &Path) -> ConfigResult<Self> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let config_path = dir.join(CONFIG_FILE);
            if config_path.exists() {
                return Self::load(&config_path);
            }
            if !dir.pop() {
                // Reached root without finding config
                return Ok(Self::default());
            }
        }
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings no call could succeed with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.provider.name.is_empty() {
            return Err(ConfigError::Invalid("provider.name is empty".to_string()));
        }
        for (key, value) in [
            ("add", &self.provider.handlers.add),
            ("get", &self.provider.handlers.get),
            ("delete", &self.provider.handlers.delete),
        ] {
            if value.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "provider.handlers.{} is empty",
                    key
                )));
            }
        }
        if self.staging.budget_bytes < RECORD_SIZE {
            return Err(ConfigError::Invalid(format!(
                "staging.budget_bytes must be at least {} (one record)",
                RECORD_SIZE
            )));
        }
        Ok(())
    }
}

/// Provider identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Registry identifier
    #[serde(default = "default_provider_name")]
    pub name: String,

    /// Shared library to load the provider from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library: Option<PathBuf>,

    /// Exported handler names
    #[serde(default)]
    pub handlers: HandlerNames,
}

fn default_provider_name() -> String {
    PHONEBOOK_PROVIDER.to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            library: None,
            handlers: HandlerNames::default(),
        }
    }
}

/// Names the provider exports its handlers under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerNames {
    #[serde(default = "default_add")]
    pub add: String,

    #[serde(default = "default_get")]
    pub get: String,

    #[serde(default = "default_delete")]
    pub delete: String,
}

fn default_add() -> String {
    ADD_HANDLER.to_string()
}

fn default_get() -> String {
    GET_HANDLER.to_string()
}

fn default_delete() -> String {
    DELETE_HANDLER.to_string()
}

impl Default for HandlerNames {
    fn default() -> Self {
        Self {
            add: default_add(),
            get: default_get(),
            delete: default_delete(),
        }
    }
}

/// Staging memory limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingConfig {
    /// Bytes of staging all in-flight calls may hold together
    #[serde(default = "default_budget_bytes")]
    pub budget_bytes: usize,
}

fn default_budget_bytes() -> usize {
    1024 * 1024
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            budget_bytes: default_budget_bytes(),
        }
    }
}

/// Provider removal settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnloadConfig {
    /// How long removal waits for pins to drain; unset waits forever
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drain_timeout_ms: Option<u64>,
}

impl UnloadConfig {
    pub fn drain_timeout(&self) -> Option<Duration> {
        self.drain_timeout_ms.map(Duration::from_millis)
    }
}
