//! Package declarations
//!
//! A [`PackageDeclaration`] names a package, where it lives, and which
//! dependencies it needs. Declarations are immutable once built.

use crate::error::{BuildError, BuildResult};
use keel_config::Config;
use std::fmt;
use std::path::{Path, PathBuf};

/// Reference to a registered adapter by name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DependencyRef(String);

impl DependencyRef {
    /// Create a reference
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Referenced name
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DependencyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DependencyRef {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for DependencyRef {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Whether a dependency edge must be satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Requirement {
    Required,
    Optional,
}

impl Requirement {
    /// Get requirement name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::Optional => "optional",
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Static description of one package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDeclaration {
    name: String,
    root: PathBuf,
    required: Vec<DependencyRef>,
    optional: Vec<DependencyRef>,
}

impl PackageDeclaration {
    /// Create a declaration with no dependencies
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            required: Vec::new(),
            optional: Vec::new(),
        }
    }

    /// Add a required dependency
    pub fn requires(mut self, dependency: impl Into<DependencyRef>) -> Self {
        self.required.push(dependency.into());
        self
    }

    /// Add an optional dependency
    pub fn optionally(mut self, dependency: impl Into<DependencyRef>) -> Self {
        self.optional.push(dependency.into());
        self
    }

    /// Declaration of the project package described by `keel.toml`
    pub fn from_config(config: &Config) -> BuildResult<Self> {
        let package = config.project.package.as_ref().ok_or_else(|| {
            BuildError::MissingDeclaration("keel.toml has no [package] section".to_string())
        })?;
        let root = config
            .project_root()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let mut declaration = Self::new(&package.name, root);
        declaration.required = package.required.iter().map(|n| n.as_str().into()).collect();
        declaration.optional = package.optional.iter().map(|n| n.as_str().into()).collect();
        Ok(declaration)
    }

    /// Package name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Package root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Required dependencies, in declaration order
    pub fn required(&self) -> &[DependencyRef] {
        &self.required
    }

    /// Optional dependencies, in declaration order
    pub fn optional(&self) -> &[DependencyRef] {
        &self.optional
    }

    /// All dependencies with their requirement, required first
    pub fn dependencies(&self) -> impl Iterator<Item = (&DependencyRef, Requirement)> {
        self.required
            .iter()
            .map(|d| (d, Requirement::Required))
            .chain(self.optional.iter().map(|d| (d, Requirement::Optional)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_config::project::{PackageConfig, ProjectConfig};
    use keel_config::GlobalConfig;

    #[test]
    fn test_builder_keeps_declaration_order() {
        let decl = PackageDeclaration::new("imaging", "/src/imaging")
            .requires("fftw")
            .requires("boost")
            .optionally("eigen");

        let deps: Vec<_> = decl
            .dependencies()
            .map(|(d, r)| (d.name().to_string(), r))
            .collect();
        assert_eq!(
            deps,
            vec![
                ("fftw".to_string(), Requirement::Required),
                ("boost".to_string(), Requirement::Required),
                ("eigen".to_string(), Requirement::Optional),
            ]
        );
    }

    #[test]
    fn test_from_config() {
        let config = Config {
            project: ProjectConfig {
                package: Some(PackageConfig {
                    name: "imaging".to_string(),
                    required: vec!["boost".to_string()],
                    optional: vec!["eigen".to_string()],
                    libs: None,
                }),
                ..Default::default()
            },
            global: GlobalConfig::default(),
            project_root: Some(PathBuf::from("/src/imaging")),
        };

        let decl = PackageDeclaration::from_config(&config).unwrap();
        assert_eq!(decl.name(), "imaging");
        assert_eq!(decl.root(), Path::new("/src/imaging"));
        assert_eq!(decl.required(), &[DependencyRef::new("boost")]);
        assert_eq!(decl.optional(), &[DependencyRef::new("eigen")]);
    }

    #[test]
    fn test_from_config_without_package() {
        let config = Config {
            project: ProjectConfig::default(),
            global: GlobalConfig::default(),
            project_root: None,
        };
        assert!(matches!(
            PackageDeclaration::from_config(&config),
            Err(BuildError::MissingDeclaration(_))
        ));
    }
}
