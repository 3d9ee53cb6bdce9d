use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;
use crate::rl::{PpoConfig, VisionPpoNetworksConfig};

/// Where checkpoints are written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub directory: PathBuf,
    pub name: String,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("checkpoints"),
            name: "vision_ppo".to_string(),
        }
    }
}

impl CheckpointConfig {
    /// Checkpoint path without extension
    pub fn path(&self) -> PathBuf {
        self.directory.join(&self.name)
    }
}

/// Top-level application configuration, loadable from TOML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub ppo: PpoConfig,
    pub checkpoint: CheckpointConfig,
    pub network: VisionPpoNetworksConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the file
    /// does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            warn!(path = %path.display(), "config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ppo.validate()?;
        self.network
            .validate()
            .map_err(|e| ConfigError::Validation(format!("network: {e}")))?;

        if self.checkpoint.name.is_empty() {
            return Err(ConfigError::Validation(
                "checkpoint.name must not be empty".into(),
            ));
        }

        Ok(())
    }

    /// The default configuration as TOML text
    pub fn default_toml() -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(&Self::default())
    }
}
