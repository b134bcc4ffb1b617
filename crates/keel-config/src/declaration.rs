//! Dependency Declaration Files
//!
//! A declaration file (`<name>.toml`) describes one dependency: what it
//! provides (headers, libraries, include and library directories) and what it
//! depends on. Declarations live on a search path; the core only ever sees the
//! registry built from them.

use crate::project::validate_dependency_lists;
use crate::{read_toml, ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// How a package's include directories are exposed to compilations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageKind {
    /// Headers tracked as build inputs
    #[default]
    Package,
    /// Third-party headers, passed as system includes
    External,
}

impl PackageKind {
    /// Get kind name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Package => "package",
            Self::External => "external",
        }
    }
}

/// Declaration file contents
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct DeclarationFile {
    /// What the package provides
    #[serde(default)]
    pub package: DeclaredPackage,

    /// What the package depends on
    #[serde(default)]
    pub dependencies: DeclaredDependencies,

    /// Alternate installation layouts
    #[serde(default)]
    pub layout: LayoutConfig,
}

/// The `[package]` table of a declaration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct DeclaredPackage {
    /// Package name (default: the file stem)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Installed version, part of the adapter identity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Package kind
    #[serde(default)]
    pub kind: PackageKind,

    /// Installation root
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,

    /// Headers checked by probes
    #[serde(default)]
    pub headers: Vec<String>,

    /// Main libraries (default: the package name)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub libs: Option<Vec<String>>,

    /// Libraries linked only into Python modules
    #[serde(default)]
    pub python_libs: Vec<String>,

    /// Libraries linked only into test programs
    #[serde(default)]
    pub test_libs: Vec<String>,

    /// Include directories relative to the root (default: ["include"])
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_dirs: Option<Vec<PathBuf>>,

    /// Library directories relative to the root (default: ["lib"])
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lib_dirs: Option<Vec<PathBuf>>,

    /// Preprocessor definitions
    #[serde(default)]
    pub defines: BTreeMap<String, String>,
}

/// The `[dependencies]` table of a declaration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct DeclaredDependencies {
    #[serde(default)]
    pub required: Vec<String>,

    #[serde(default)]
    pub optional: Vec<String>,
}

/// The `[layout]` table of a declaration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct LayoutConfig {
    /// Include directories used instead of `include-dirs` under a managed toolchain
    #[serde(default)]
    pub managed_include_dirs: Vec<PathBuf>,
}

impl DeclarationFile {
    /// Load a declaration from a file, defaulting the name to the file stem
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let mut declaration: Self = read_toml(path)?;

        if declaration.package.name.is_none() {
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| ConfigError::InvalidValue {
                    field: "package.name".to_string(),
                    reason: format!("cannot derive a name from {}", path.display()),
                })?;
            declaration.package.name = Some(stem.to_string());
        }

        declaration.validate()?;
        Ok(declaration)
    }

    /// Validate the declaration
    pub fn validate(&self) -> ConfigResult<()> {
        let name = self.name();
        if name.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "package.name".to_string(),
                reason: "name cannot be empty".to_string(),
            });
        }

        for header in &self.package.headers {
            if header.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("{}: package.headers", name),
                    reason: "header name cannot be empty".to_string(),
                });
            }
        }

        for lib in self.main_libs() {
            if lib.trim().is_empty() || lib.starts_with("-l") {
                return Err(ConfigError::InvalidValue {
                    field: format!("{}: package.libs", name),
                    reason: format!("'{}' is not a bare library name", lib),
                });
            }
        }

        validate_dependency_lists(
            name,
            &self.dependencies.required,
            &self.dependencies.optional,
        )
    }

    /// Package name
    pub fn name(&self) -> &str {
        self.package.name.as_deref().unwrap_or("")
    }

    /// Main libraries, defaulting to the package name
    pub fn main_libs(&self) -> Vec<String> {
        match &self.package.libs {
            Some(libs) => libs.clone(),
            None => vec![self.name().to_string()],
        }
    }

    /// Include directories relative to the root
    pub fn include_dirs(&self) -> Vec<PathBuf> {
        self.package
            .include_dirs
            .clone()
            .unwrap_or_else(|| vec![PathBuf::from("include")])
    }

    /// Library directories relative to the root
    pub fn lib_dirs(&self) -> Vec<PathBuf> {
        self.package
            .lib_dirs
            .clone()
            .unwrap_or_else(|| vec![PathBuf::from("lib")])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_parse_full_declaration() {
        let toml = r#"
[package]
name = "fftw"
version = "3.3.10"
kind = "external"
root = "/opt/fftw"
headers = ["fftw3.h"]
libs = ["fftw3", "fftw3f"]
test-libs = ["fftw3_threads"]
include-dirs = ["include"]
lib-dirs = ["lib64"]
defines = { HAVE_FFTW = "1" }

[dependencies]
required = ["base"]
optional = ["openmp"]

[layout]
managed-include-dirs = ["include/fftw3"]
"#;
        let decl: DeclarationFile = toml::from_str(toml).unwrap();
        assert!(decl.validate().is_ok());
        assert_eq!(decl.name(), "fftw");
        assert_eq!(decl.package.kind, PackageKind::External);
        assert_eq!(decl.main_libs(), vec!["fftw3", "fftw3f"]);
        assert_eq!(decl.lib_dirs(), vec![PathBuf::from("lib64")]);
        assert_eq!(decl.package.defines.get("HAVE_FFTW").unwrap(), "1");
        assert_eq!(decl.dependencies.required, vec!["base"]);
        assert_eq!(
            decl.layout.managed_include_dirs,
            vec![PathBuf::from("include/fftw3")]
        );
    }

    #[test]
    fn test_defaults() {
        let decl: DeclarationFile = toml::from_str("[package]\nname = \"zlib\"\n").unwrap();
        assert_eq!(decl.package.kind, PackageKind::Package);
        assert_eq!(decl.main_libs(), vec!["zlib"]);
        assert_eq!(decl.include_dirs(), vec![PathBuf::from("include")]);
        assert_eq!(decl.lib_dirs(), vec![PathBuf::from("lib")]);
    }

    #[test]
    fn test_header_only_package() {
        let decl: DeclarationFile =
            toml::from_str("[package]\nname = \"eigen\"\nlibs = []\n").unwrap();
        assert!(decl.main_libs().is_empty());
    }

    #[test]
    fn test_name_from_file_stem() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("boost.toml");
        fs::write(&path, "[package]\nheaders = [\"boost/version.hpp\"]\n").unwrap();

        let decl = DeclarationFile::load_from_file(&path).unwrap();
        assert_eq!(decl.name(), "boost");
        assert_eq!(decl.main_libs(), vec!["boost"]);
    }

    #[test]
    fn test_linker_flag_rejected_as_lib() {
        let decl: DeclarationFile =
            toml::from_str("[package]\nname = \"m\"\nlibs = [\"-lm\"]\n").unwrap();
        assert!(decl.validate().is_err());
    }

    #[test]
    fn test_malformed_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.toml");
        fs::write(&path, "[package\nname = ").unwrap();

        assert!(matches!(
            DeclarationFile::load_from_file(&path),
            Err(ConfigError::TomlParseError { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let result = DeclarationFile::load_from_file(Path::new("/nonexistent/x.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }
}
