//! Configuration validator for memwalk
//!
//! Validates configuration values to ensure they are within acceptable ranges.

use super::loader::{Config, ConfigError, LayoutConfig, LoggingConfig, WalkerConfig};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates the entire configuration
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        Self::validate_walker(&config.walker)?;
        Self::validate_layout(&config.layout)?;
        Self::validate_logging(&config.logging)?;
        Ok(())
    }

    /// Validates walker configuration
    fn validate_walker(walker: &WalkerConfig) -> Result<(), ConfigError> {
        if walker.page_size == 0 || !walker.page_size.is_power_of_two() {
            return Err(ConfigError::Invalid(
                "Page size must be a power of 2".to_string(),
            ));
        }

        if walker.max_string_len == 0 {
            return Err(ConfigError::Invalid(
                "Maximum string length must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates layout configuration
    fn validate_layout(layout: &LayoutConfig) -> Result<(), ConfigError> {
        if layout.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "Layout file path cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates logging configuration
    fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                logging.level, valid_levels
            )));
        }

        Ok(())
    }
}

/// Validates a configuration
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    ConfigValidator::validate(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_invalid_page_size() {
        let mut config = Config::default();
        config.walker.page_size = 0;
        assert!(validate_config(&config).is_err());

        config.walker.page_size = 4000; // Not power of 2
        let result = validate_config(&config);
        assert!(result.unwrap_err().to_string().contains("Page size"));

        config.walker.page_size = 65536;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_invalid_string_len() {
        let mut config = Config::default();
        config.walker.max_string_len = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_empty_layout_path() {
        let mut config = Config::default();
        config.layout.path = PathBuf::new();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "invalid".to_string();
        let result = validate_config(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("log level"));

        config.logging.level = "DEBUG".to_string();
        assert!(validate_config(&config).is_ok());
    }
}
