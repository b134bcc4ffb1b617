pub mod configure;
pub mod query;
pub mod resolve;

use anyhow::{Context, Result};
use keel_build::{ConfigurationAdapter, PackageDeclaration, Registry};
use keel_config::{Config, ConfigLoader};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A loaded project: merged configuration, registry and the package being built
pub struct Project {
    pub config: Config,
    pub registry: Registry,
    pub primary: PackageDeclaration,
}

/// Load `keel.toml` from (or above) a directory and build the registry
///
/// The project's own package replaces any declaration file of the same name.
pub fn load_project(project_dir: Option<&Path>) -> Result<Project> {
    let start = match project_dir {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir().context("Failed to read current directory")?,
    };

    let config = ConfigLoader::new()
        .load_from_directory(&start)
        .with_context(|| format!("Failed to load configuration from {}", start.display()))?;
    if !config.is_project() {
        anyhow::bail!(
            "No {} found in {} or any parent directory",
            keel_config::loader::PROJECT_FILE,
            start.display()
        );
    }

    let mut registry = Registry::load(&config.declaration_paths())
        .context("Failed to load package declarations")?;
    debug!(
        "Loaded {} declaration(s) from {} director(ies)",
        registry.len(),
        config.declaration_paths().len()
    );

    let primary = PackageDeclaration::from_config(&config)?;
    let mut adapter = ConfigurationAdapter::new(primary.name(), primary.root());
    if let Some(libs) = config.project.package.as_ref().and_then(|p| p.libs.clone()) {
        adapter = adapter.with_libs(libs);
    }
    registry.register_or_replace(primary.clone(), adapter);

    Ok(Project {
        config,
        registry,
        primary,
    })
}

/// Directory probes compile in, next to the cache file
pub fn scratch_dir(cache_path: &Path) -> PathBuf {
    cache_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("probes")
}
