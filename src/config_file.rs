//! Configuration file support
//!
//! Loads encoder, tool and logging settings from TOML files. Every table and
//! key is optional; missing values take their defaults.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::EncodeOptions;
use crate::error::{DcaError, Result};
use crate::transcode::ToolPaths;

/// Configuration file format
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    /// Encoder settings
    pub encode: EncodeOptions,
    /// External tool locations
    pub tools: ToolPaths,
    /// Logging settings
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level or filter directive (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl LoggingSettings {
    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

impl ConfigFile {
    /// Load configuration from a TOML file and validate the encoder settings
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| DcaError::Config(format!("{}: {}", path.display(), e)))?;
        let config: ConfigFile = toml::from_str(&content)
            .map_err(|e| DcaError::Config(format!("{}: {}", path.display(), e)))?;
        config.encode.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| DcaError::Config(e.to_string()))?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }
}
