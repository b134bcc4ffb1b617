//! Configuration Loader
//!
//! Handles loading and merging configuration from multiple sources with proper precedence.

use crate::global::GlobalConfig;
use crate::project::{validate_opt_level, ProjectConfig};
use crate::{ConfigError, ConfigResult};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Project configuration file name
pub const PROJECT_FILE: &str = "keel.toml";

/// Compiler used when nothing selects one
pub const DEFAULT_COMPILER: &str = "gcc";

/// Optimization level used when nothing selects one
pub const DEFAULT_OPT_LEVEL: u8 = 3;

/// Probe timeout used when nothing selects one
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default declaration directory, relative to the project root
pub const DEFAULT_DECLARATION_DIR: &str = "declarations";

/// Default cache file, relative to the project root
pub const DEFAULT_CACHE_FILE: &str = ".keel_temp/build-cache.toml";

/// Configuration loader
///
/// Loads configuration from multiple sources and merges them with proper precedence:
/// 1. Global config (~/.keel/config.toml) - lowest priority
/// 2. Project config (./keel.toml) - overrides global
/// 3. Environment variables (KEEL_*) - overrides project
/// 4. CLI flags - highest priority (handled by caller)
pub struct ConfigLoader {
    /// Cached global config path
    global_config_path: Option<PathBuf>,
}

/// Merged configuration result
#[derive(Debug, Clone)]
pub struct Config {
    /// Project configuration
    pub project: ProjectConfig,

    /// Global configuration
    pub global: GlobalConfig,

    /// Project root directory (where keel.toml was found)
    pub project_root: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            global_config_path: None,
        }
    }

    /// Use a specific global config file instead of ~/.keel/config.toml
    pub fn with_global_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.global_config_path = Some(path.into());
        self
    }

    /// Load configuration starting from the given directory
    ///
    /// Walks up the directory tree to find keel.toml, then loads and merges
    /// global config if it exists.
    pub fn load_from_directory(&mut self, start_dir: &Path) -> ConfigResult<Config> {
        let start_dir = absolute(start_dir)?;
        let (project_root, project_config) = self.find_project_config(&start_dir)?;

        // Global config is optional
        let global_config = self.load_global_config().unwrap_or_default();

        let project_config = self.apply_env_overrides(project_config)?;

        Ok(Config {
            project: project_config,
            global: global_config,
            project_root,
        })
    }

    /// Load configuration from a specific project config file
    pub fn load_from_file(&mut self, config_path: &Path) -> ConfigResult<Config> {
        let project_config = ProjectConfig::load_from_file(config_path)?;
        let global_config = self.load_global_config().unwrap_or_default();
        let project_config = self.apply_env_overrides(project_config)?;

        let project_root = absolute(config_path)?.parent().map(|p| p.to_path_buf());

        Ok(Config {
            project: project_config,
            global: global_config,
            project_root,
        })
    }

    /// Find project configuration by walking up directory tree
    ///
    /// Returns (project_root, project_config) or error if a found file is invalid
    fn find_project_config(
        &self,
        start_dir: &Path,
    ) -> ConfigResult<(Option<PathBuf>, ProjectConfig)> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(PROJECT_FILE);

            if config_path.exists() {
                let project_config = ProjectConfig::load_from_file(&config_path)?;
                return Ok((Some(current), project_config));
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => return Ok((None, ProjectConfig::default())),
            }
        }
    }

    /// Load global configuration from ~/.keel/config.toml
    fn load_global_config(&mut self) -> ConfigResult<GlobalConfig> {
        let path = match &self.global_config_path {
            Some(path) => path.clone(),
            None => {
                let path = GlobalConfig::global_config_path()?;
                self.global_config_path = Some(path.clone());
                path
            }
        };

        if !path.exists() {
            return Ok(GlobalConfig::default());
        }

        GlobalConfig::load_from_file(&path)
    }

    /// Apply environment variable overrides to project config
    ///
    /// - KEEL_CC: compiler command
    /// - KEEL_OPT: optimization level
    /// - KEEL_STRICT: escalate optional dependency failures
    /// - KEEL_CACHE: cache file location
    /// - KEEL_DECLARATION_PATH: `:`-separated directories searched first
    fn apply_env_overrides(&self, mut config: ProjectConfig) -> ConfigResult<ProjectConfig> {
        if let Ok(cc) = env::var("KEEL_CC") {
            if !cc.trim().is_empty() {
                config.toolchain_mut().cc = Some(cc);
            }
        }

        if let Ok(opt) = env::var("KEEL_OPT") {
            let level: u8 = opt.trim().parse().map_err(|_| ConfigError::InvalidValue {
                field: "KEEL_OPT".to_string(),
                reason: format!("'{}' is not an optimization level", opt),
            })?;
            validate_opt_level("KEEL_OPT", level)?;
            config.toolchain_mut().opt = Some(level);
        }

        if let Ok(strict) = env::var("KEEL_STRICT") {
            let strict = matches!(strict.to_lowercase().as_str(), "true" | "1" | "yes");
            config.configure_mut().strict = Some(strict);
        }

        if let Ok(cache) = env::var("KEEL_CACHE") {
            if !cache.is_empty() {
                config.configure_mut().cache = Some(PathBuf::from(cache));
            }
        }

        if let Ok(paths) = env::var("KEEL_DECLARATION_PATH") {
            let mut dirs: Vec<PathBuf> = env::split_paths(&paths)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
            let configure = config.configure_mut();
            dirs.append(&mut configure.declarations);
            configure.declarations = dirs;
        }

        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Get the project root directory
    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    /// Get the package name
    pub fn package_name(&self) -> Option<&str> {
        self.project.package_name()
    }

    /// Check if this is a project (has keel.toml)
    pub fn is_project(&self) -> bool {
        self.project_root.is_some()
    }

    /// Effective compiler command (project > global > default)
    pub fn compiler(&self) -> &str {
        self.project
            .compiler()
            .or_else(|| self.global.default_compiler())
            .unwrap_or(DEFAULT_COMPILER)
    }

    /// Effective optimization level (project > global > default)
    pub fn opt_level(&self) -> u8 {
        self.project
            .opt_level()
            .or_else(|| self.global.default_opt_level())
            .unwrap_or(DEFAULT_OPT_LEVEL)
    }

    /// Effective probe timeout
    pub fn probe_timeout(&self) -> Duration {
        self.project
            .toolchain
            .as_ref()
            .and_then(|t| t.probe_timeout)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_PROBE_TIMEOUT)
    }

    /// Whether optional dependency failures are escalated
    pub fn strict(&self) -> bool {
        self.project
            .configure
            .as_ref()
            .and_then(|c| c.strict)
            .unwrap_or(false)
    }

    /// Whether compile and link probes run
    pub fn attempt_build(&self) -> bool {
        self.project
            .configure
            .as_ref()
            .and_then(|c| c.attempt_build)
            .unwrap_or(true)
    }

    /// Declaration search path: project entries (resolved against the project
    /// root), or the default directory, followed by the global entries
    pub fn declaration_paths(&self) -> Vec<PathBuf> {
        let root = self.base_dir();
        let project_dirs = self
            .project
            .configure
            .as_ref()
            .map(|c| c.declarations.as_slice())
            .unwrap_or(&[]);

        let mut paths: Vec<PathBuf> = if project_dirs.is_empty() {
            vec![root.join(DEFAULT_DECLARATION_DIR)]
        } else {
            project_dirs.iter().map(|p| root.join(p)).collect()
        };

        for dir in self.global.declaration_dirs() {
            if !paths.contains(dir) {
                paths.push(dir.clone());
            }
        }
        paths
    }

    /// Cache file location
    pub fn cache_path(&self) -> PathBuf {
        let relative = self
            .project
            .configure
            .as_ref()
            .and_then(|c| c.cache.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_FILE));
        self.base_dir().join(relative)
    }

    fn base_dir(&self) -> PathBuf {
        self.project_root
            .clone()
            .or_else(|| env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Anchor a relative path at the current directory
fn absolute(path: &Path) -> ConfigResult<PathBuf> {
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()?.join(path)
    };
    Ok(path.components().collect())
}
