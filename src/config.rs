use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::app_data::publisher_data;
use crate::session::Environment;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub publish: PublishConfig,
    #[serde(default)]
    pub builds: BuildsConfig,
}

/// Service environment and credentials
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Which publishing service to talk to
    #[serde(default)]
    pub environment: Environment,
    /// Bearer token for the service
    #[serde(default)]
    pub access_token: Option<String>,
}

/// Publishing behavior settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Title used when none is given on the command line
    #[serde(default = "default_title")]
    pub default_title: String,
    /// Where the upload archive is written (defaults to the data directory)
    #[serde(default)]
    pub work_dir: Option<String>,
    /// Deflate level 0-9 for the upload archive; 0 stores entries uncompressed
    #[serde(default)]
    pub compression_level: Option<u8>,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            default_title: default_title(),
            work_dir: None,
            compression_level: None,
        }
    }
}

fn default_title() -> String {
    publisher_data().build.default_title.clone()
}

/// Build tracking settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildsConfig {
    /// Maximum number of build directories remembered
    #[serde(default = "default_max_tracked")]
    pub max_tracked: usize,
}

impl Default for BuildsConfig {
    fn default() -> Self {
        Self {
            max_tracked: default_max_tracked(),
        }
    }
}

fn default_max_tracked() -> usize {
    publisher_data().build.max_tracked
}

impl Config {
    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("com", "publisher", "Publisher")
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

        let config_dir = dirs.config_dir();
        std::fs::create_dir_all(config_dir)?;

        Ok(config_dir.join("config.toml"))
    }

    /// Load configuration from file
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)?;
            tracing::debug!("Loaded configuration from {:?}", path);
            Ok(config)
        } else {
            tracing::debug!("No configuration file found, using defaults");
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Directory the upload archive is written to
    pub fn work_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.publish.work_dir {
            let dir = PathBuf::from(dir);
            std::fs::create_dir_all(&dir)?;
            return Ok(dir);
        }

        let dirs = directories::ProjectDirs::from("com", "publisher", "Publisher")
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;

        let work_dir = dirs.data_dir().join("archives");
        std::fs::create_dir_all(&work_dir)?;

        Ok(work_dir)
    }
}
