//! Configuration loader for memwalk
//!
//! Handles loading configuration from TOML files and merging with defaults.

use super::defaults::default_config;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_walker")]
    pub walker: WalkerConfig,

    #[serde(default = "default_layout")]
    pub layout: LayoutConfig,

    #[serde(default = "default_logging")]
    pub logging: LoggingConfig,
}

/// Walker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkerConfig {
    /// Page size of the inspected process, used for slice addresses
    #[serde(default = "default_page_size")]
    pub page_size: u64,
    /// Longest C string read from the target
    #[serde(default = "default_max_string_len")]
    pub max_string_len: usize,
}

/// Layout file configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutConfig {
    #[serde(default = "default_layout_path")]
    pub path: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Configuration loader
pub struct ConfigLoader {
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Creates a new configuration loader
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        ConfigLoader {
            config_path: path.as_ref().to_path_buf(),
        }
    }

    /// Loads configuration from file
    pub fn load(&self) -> Result<Config, ConfigError> {
        if !self.config_path.exists() {
            return Err(ConfigError::FileNotFound(
                self.config_path.display().to_string(),
            ));
        }

        let contents = fs::read_to_string(&self.config_path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Loads configuration or returns defaults if file doesn't exist
    pub fn load_or_default(&self) -> Config {
        self.load().unwrap_or_default()
    }

    /// Saves configuration to file
    pub fn save(&self, config: &Config) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, contents)?;
        Ok(())
    }
}

/// Loads configuration from the default location
pub fn load_config() -> Result<Config, ConfigError> {
    Ok(ConfigLoader::new("memwalk.toml").load_or_default())
}

// Default functions for serde
fn default_walker() -> WalkerConfig {
    let defaults = default_config();
    WalkerConfig {
        page_size: defaults.walker.page_size,
        max_string_len: defaults.walker.max_string_len,
    }
}

fn default_layout() -> LayoutConfig {
    LayoutConfig {
        path: default_layout_path(),
    }
}

fn default_logging() -> LoggingConfig {
    LoggingConfig {
        level: default_log_level(),
    }
}

// Individual field defaults
fn default_page_size() -> u64 {
    default_config().walker.page_size
}

fn default_max_string_len() -> usize {
    default_config().walker.max_string_len
}

fn default_layout_path() -> PathBuf {
    PathBuf::from(default_config().layout.path)
}

fn default_log_level() -> String {
    default_config().logging.level
}

impl Default for Config {
    fn default() -> Self {
        Config {
            walker: default_walker(),
            layout: default_layout(),
            logging: default_logging(),
        }
    }
}
