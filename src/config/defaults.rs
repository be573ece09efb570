//! Default configuration values for memwalk

use serde::{Deserialize, Serialize};

/// Default configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigDefaults {
    pub walker: WalkerDefaults,
    pub layout: LayoutDefaults,
    pub logging: LoggingDefaults,
}

/// Default walker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkerDefaults {
    pub page_size: u64,
    pub max_string_len: usize,
}

/// Default layout file location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutDefaults {
    pub path: String,
}

/// Default logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingDefaults {
    pub level: String,
}

/// Returns the default configuration
pub fn default_config() -> ConfigDefaults {
    ConfigDefaults {
        walker: WalkerDefaults {
            page_size: 4096,
            max_string_len: 256,
        },
        layout: LayoutDefaults {
            path: "layout.toml".to_string(),
        },
        logging: LoggingDefaults {
            level: "info".to_string(),
        },
    }
}
