//! Global Configuration (~/.keel/config.toml)
//!
//! Handles user-level defaults stored in `~/.keel/config.toml`.

use crate::project::validate_opt_level;
use crate::{read_toml, ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Global user configuration from ~/.keel/config.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    /// Default settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defaults: Option<DefaultsConfig>,
}

/// Default settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct DefaultsConfig {
    /// Default compiler command
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cc: Option<String>,

    /// Default optimization level
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opt: Option<u8>,

    /// Declaration directories searched after the project's own
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub declarations: Vec<PathBuf>,
}

impl GlobalConfig {
    /// Load global configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let config: Self = read_toml(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the global configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(defaults) = &self.defaults {
            if let Some(opt) = defaults.opt {
                validate_opt_level("defaults.opt", opt)?;
            }
            if let Some(cc) = &defaults.cc {
                if cc.trim().is_empty() {
                    return Err(ConfigError::InvalidValue {
                        field: "defaults.cc".to_string(),
                        reason: "compiler cannot be empty".to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Get the global config file path (~/.keel/config.toml)
    pub fn global_config_path() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".keel").join("config.toml"))
    }

    /// Get the default compiler
    pub fn default_compiler(&self) -> Option<&str> {
        self.defaults.as_ref().and_then(|d| d.cc.as_deref())
    }

    /// Get the default optimization level
    pub fn default_opt_level(&self) -> Option<u8> {
        self.defaults.as_ref().and_then(|d| d.opt)
    }

    /// Get the extra declaration directories
    pub fn declaration_dirs(&self) -> &[PathBuf] {
        self.defaults
            .as_ref()
            .map(|d| d.declarations.as_slice())
            .unwrap_or(&[])
    }
}
