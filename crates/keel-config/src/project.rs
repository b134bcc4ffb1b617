//! Project Configuration (keel.toml)
//!
//! Handles project-level configuration stored in `keel.toml` at the project root.

use crate::{read_toml, ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Highest supported optimization level (`-O3`)
pub const MAX_OPT_LEVEL: u8 = 3;

/// Project configuration from keel.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// The package being configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<PackageConfig>,

    /// Compiler toolchain selection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub toolchain: Option<ToolchainConfig>,

    /// Configuration pass options
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configure: Option<ConfigureConfig>,
}

/// The primary package and its dependencies
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PackageConfig {
    /// Package name
    pub name: String,

    /// Dependencies that must configure successfully
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,

    /// Dependencies whose flags are used when available
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub optional: Vec<String>,

    /// Libraries built by this package (default: the package name)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub libs: Option<Vec<String>>,
}

/// Toolchain configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ToolchainConfig {
    /// C compiler command (gcc, clang, icc, cc, optionally versioned)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cc: Option<String>,

    /// Optimization level (0-3)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opt: Option<u8>,

    /// Probe timeout in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe_timeout: Option<u64>,
}

/// Configuration pass options
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ConfigureConfig {
    /// Escalate optional dependency failures to errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,

    /// Run compile and link probes (false: header existence checks only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt_build: Option<bool>,

    /// Declaration search path, relative to the project root
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub declarations: Vec<PathBuf>,

    /// Cache file location, relative to the project root
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<PathBuf>,
}

impl ProjectConfig {
    /// Load project configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let config: Self = read_toml(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the project configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(pkg) = &self.package {
            if pkg.name.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "package.name".to_string(),
                    reason: "name cannot be empty".to_string(),
                });
            }
            validate_dependency_lists(&pkg.name, &pkg.required, &pkg.optional)?;
        }

        if let Some(opt) = self.toolchain.as_ref().and_then(|t| t.opt) {
            validate_opt_level("toolchain.opt", opt)?;
        }

        if let Some(0) = self.toolchain.as_ref().and_then(|t| t.probe_timeout) {
            return Err(ConfigError::InvalidValue {
                field: "toolchain.probe-timeout".to_string(),
                reason: "timeout must be at least one second".to_string(),
            });
        }

        Ok(())
    }

    /// Get the package name, if present
    pub fn package_name(&self) -> Option<&str> {
        self.package.as_ref().map(|p| p.name.as_str())
    }

    /// Get the configured compiler command, if present
    pub fn compiler(&self) -> Option<&str> {
        self.toolchain.as_ref().and_then(|t| t.cc.as_deref())
    }

    /// Get the configured optimization level, if present
    pub fn opt_level(&self) -> Option<u8> {
        self.toolchain.as_ref().and_then(|t| t.opt)
    }

    /// Mutable access to the toolchain section, creating it when absent
    pub fn toolchain_mut(&mut self) -> &mut ToolchainConfig {
        self.toolchain.get_or_insert_with(Default::default)
    }

    /// Mutable access to the configure section, creating it when absent
    pub fn configure_mut(&mut self) -> &mut ConfigureConfig {
        self.configure.get_or_insert_with(Default::default)
    }
}

/// Check an optimization level is in 0..=3
pub(crate) fn validate_opt_level(field: &str, opt: u8) -> ConfigResult<()> {
    if opt > MAX_OPT_LEVEL {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            reason: format!("optimization level must be 0-{}, got {}", MAX_OPT_LEVEL, opt),
        });
    }
    Ok(())
}

/// Validate required/optional dependency name lists of one package
pub(crate) fn validate_dependency_lists(
    package: &str,
    required: &[String],
    optional: &[String],
) -> ConfigResult<()> {
    let mut seen = HashSet::new();
    for name in required.iter().chain(optional) {
        if name.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: format!("dependencies of '{}'", package),
                reason: "dependency name cannot be empty".to_string(),
            });
        }
        if name == package {
            return Err(ConfigError::ValidationError(format!(
                "package '{}' cannot depend on itself",
                package
            )));
        }
        if !seen.insert(name.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "dependency '{}' of '{}' is listed more than once",
                name, package
            )));
        }
    }
    Ok(())
}
