//! Keel Configuration System
//!
//! Provides the configuration inputs of a keel configuration pass:
//! - Project configuration (keel.toml)
//! - Global user configuration (~/.keel/config.toml)
//! - Dependency declaration files (`<name>.toml` on the declaration search path)
//! - Configuration precedence and environment overrides
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded and merged in the following order (later overrides earlier):
//! 1. Global config (~/.keel/config.toml)
//! 2. Project config (./keel.toml)
//! 3. Environment variables (KEEL_*)
//! 4. CLI flags
//!
//! # Example
//!
//! ```no_run
//! use keel_config::ConfigLoader;
//! use std::path::Path;
//!
//! let mut loader = ConfigLoader::new();
//! let config = loader.load_from_directory(Path::new(".")).unwrap();
//! println!("cc={} opt={}", config.compiler(), config.opt_level());
//! ```

pub mod declaration;
pub mod global;
pub mod loader;
pub mod project;

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax in {file}: {error}")]
    TomlParseError {
        file: PathBuf,
        error: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Home directory not found")]
    HomeNotFound,
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Read a TOML file and deserialize it, mapping failures to [`ConfigError`].
pub(crate) fn read_toml<T: serde::de::DeserializeOwned>(path: &std::path::Path) -> ConfigResult<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::NotFound(path.to_path_buf())
        } else {
            ConfigError::IoError(e)
        }
    })?;

    toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
        file: path.to_path_buf(),
        error: e,
    })
}

// Re-export main types
pub use declaration::{DeclarationFile, PackageKind};
pub use global::GlobalConfig;
pub use loader::{Config, ConfigLoader};
pub use project::ProjectConfig;
