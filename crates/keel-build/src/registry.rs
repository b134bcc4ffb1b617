//! Adapter registry
//!
//! Built once at start-up from the declaration search path and then passed
//! by reference to the resolver and configurator. Nothing is looked up
//! ambiently during resolution.

use crate::adapter::{ConfigurationAdapter, FlagHook};
use crate::error::{BuildError, BuildResult};
use crate::package::{DependencyRef, PackageDeclaration};
use keel_config::DeclarationFile;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// A declaration together with its adapter
#[derive(Debug, Clone)]
pub struct RegisteredPackage {
    pub declaration: PackageDeclaration,
    pub adapter: ConfigurationAdapter,
}

/// Name to adapter registry
#[derive(Debug, Clone, Default)]
pub struct Registry {
    packages: Vec<RegisteredPackage>,
    index: HashMap<String, usize>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a package
    pub fn register(
        &mut self,
        declaration: PackageDeclaration,
        adapter: ConfigurationAdapter,
    ) -> BuildResult<()> {
        let name = declaration.name().to_string();
        if self.index.contains_key(&name) {
            return Err(BuildError::DuplicatePackage { name });
        }
        self.index.insert(name, self.packages.len());
        self.packages.push(RegisteredPackage {
            declaration,
            adapter,
        });
        Ok(())
    }

    /// Register a package, replacing any earlier package of the same name
    ///
    /// Used for the package being built, whose own description takes
    /// precedence over a declaration file on the search path.
    pub fn register_or_replace(
        &mut self,
        declaration: PackageDeclaration,
        adapter: ConfigurationAdapter,
    ) {
        let package = RegisteredPackage {
            declaration,
            adapter,
        };
        match self.index.get(package.declaration.name()) {
            Some(&i) => {
                debug!("Replacing declaration of '{}'", package.declaration.name());
                self.packages[i] = package;
            }
            None => {
                self.index
                    .insert(package.declaration.name().to_string(), self.packages.len());
                self.packages.push(package);
            }
        }
    }

    /// Register an adapter with the given dependencies
    pub fn register_adapter(
        &mut self,
        adapter: ConfigurationAdapter,
        required: &[&str],
        optional: &[&str],
    ) -> BuildResult<()> {
        let mut declaration = PackageDeclaration::new(adapter.name(), adapter.root());
        for name in required {
            declaration = declaration.requires(*name);
        }
        for name in optional {
            declaration = declaration.optionally(*name);
        }
        self.register(declaration, adapter)
    }

    /// Load every `*.toml` declaration from a search path
    ///
    /// Directories are searched in order and the first declaration of a name
    /// wins. Missing directories are skipped. Files that fail to parse or
    /// validate are skipped with a warning, which leaves their package absent.
    pub fn load(search_path: &[PathBuf]) -> BuildResult<Self> {
        let mut registry = Self::new();

        for dir in search_path {
            if !dir.is_dir() {
                debug!("Declaration directory {} does not exist", dir.display());
                continue;
            }

            let entries = WalkDir::new(dir)
                .min_depth(1)
                .max_depth(1)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("toml"));

            for entry in entries {
                let path = entry.path();
                let declaration = match DeclarationFile::load_from_file(path) {
                    Ok(declaration) => declaration,
                    Err(e) => {
                        warn!("Skipping declaration {}: {}", path.display(), e);
                        continue;
                    }
                };

                if registry.contains(declaration.name()) {
                    debug!(
                        "Ignoring {}: '{}' already declared earlier on the search path",
                        path.display(),
                        declaration.name()
                    );
                    continue;
                }

                let root = resolve_root(&declaration, path);
                registry.register(
                    declaration_of(&declaration, &root),
                    ConfigurationAdapter::from_declaration(&declaration, root),
                )?;
            }
        }

        debug!("Registered {} package declaration(s)", registry.len());
        Ok(registry)
    }

    /// Attach a hook to a registered adapter
    pub fn add_hook(&mut self, name: &str, hook: Arc<dyn FlagHook>) -> BuildResult<()> {
        let index = *self
            .index
            .get(name)
            .ok_or_else(|| BuildError::MissingDeclaration(name.to_string()))?;
        let package = &mut self.packages[index];
        package.adapter = package.adapter.clone().with_hook(hook);
        Ok(())
    }

    /// Get a registered package
    pub fn get(&self, name: &str) -> Option<&RegisteredPackage> {
        self.index.get(name).map(|&i| &self.packages[i])
    }

    /// Get a registered declaration
    pub fn declaration(&self, name: &str) -> Option<&PackageDeclaration> {
        self.get(name).map(|p| &p.declaration)
    }

    /// Get a registered adapter
    pub fn adapter(&self, name: &str) -> Option<&ConfigurationAdapter> {
        self.get(name).map(|p| &p.adapter)
    }

    /// Check whether a name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Registered names in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.packages.iter().map(|p| p.declaration.name())
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

fn declaration_of(file: &DeclarationFile, root: &Path) -> PackageDeclaration {
    let mut declaration = PackageDeclaration::new(file.name(), root);
    for name in &file.dependencies.required {
        declaration = declaration.requires(DependencyRef::new(name.as_str()));
    }
    for name in &file.dependencies.optional {
        declaration = declaration.optionally(DependencyRef::new(name.as_str()));
    }
    declaration
}

/// Environment variable naming a package's root (`<NAME>_DIR`)
pub fn root_env_var(name: &str) -> String {
    format!("{}_DIR", name.to_uppercase().replace('-', "_"))
}

/// Installation root of a declared package
///
/// An explicit `root` (relative to the declaration's directory) wins, then
/// the `<NAME>_DIR` environment variable, then the parent of the
/// declaration's directory.
fn resolve_root(declaration: &DeclarationFile, path: &Path) -> PathBuf {
    let decl_dir = path.parent().unwrap_or_else(|| Path::new("."));

    if let Some(root) = &declaration.package.root {
        return decl_dir.join(root);
    }

    if let Some(dir) = std::env::var_os(root_env_var(declaration.name())) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }

    decl_dir
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| decl_dir.to_path_buf())
}
