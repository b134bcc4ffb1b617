/// Configuration engine error types
use std::path::PathBuf;
use thiserror::Error;

pub type BuildResult<T> = Result<T, BuildError>;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Circular dependency detected: {}", cycle.join(" -> "))]
    CycleDetected { cycle: Vec<String> },

    #[error(
        "Package '{package}' cannot be configured: required dependency '{dependency}' is unavailable{}",
        format_diagnostics(diagnostics)
    )]
    MissingRequiredDependency {
        package: String,
        dependency: String,
        diagnostics: Vec<String>,
    },

    #[error(
        "Package '{package}' cannot be configured in strict mode: optional dependency '{dependency}' is unavailable{}",
        format_diagnostics(diagnostics)
    )]
    MissingOptionalDependency {
        package: String,
        dependency: String,
        diagnostics: Vec<String>,
    },

    #[error("Package '{name}' is registered more than once")]
    DuplicatePackage { name: String },

    #[error("No package declaration: {0}")]
    MissingDeclaration(String),

    #[error("Unrecognised compiler: {0}")]
    UnrecognisedCompiler(String),

    #[error("Invalid optimization level {0}: expected 0-3")]
    InvalidOptLevel(u8),

    #[error("Configuration cache error: {0}")]
    CacheError(String),

    #[error("I/O error at {path}: {error}")]
    IoError {
        path: PathBuf,
        error: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] keel_config::ConfigError),
}

fn format_diagnostics(diagnostics: &[String]) -> String {
    if diagnostics.is_empty() {
        String::new()
    } else {
        format!(" ({})", diagnostics.join("; "))
    }
}

impl BuildError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
        Self::IoError {
            path: path.into(),
            error,
        }
    }

    /// Create a missing required dependency error
    pub fn missing_required(
        package: impl Into<String>,
        dependency: impl Into<String>,
        diagnostics: Vec<String>,
    ) -> Self {
        Self::MissingRequiredDependency {
            package: package.into(),
            dependency: dependency.into(),
            diagnostics,
        }
    }

    /// Create a strict-mode optional dependency error
    pub fn missing_optional(
        package: impl Into<String>,
        dependency: impl Into<String>,
        diagnostics: Vec<String>,
    ) -> Self {
        Self::MissingOptionalDependency {
            package: package.into(),
            dependency: dependency.into(),
            diagnostics,
        }
    }

    /// Create a cache error
    pub fn cache(error: impl ToString) -> Self {
        Self::CacheError(error.to_string())
    }
}
