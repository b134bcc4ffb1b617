//! Configuration cache
//!
//! The cache file is read once at the start of a pass and written once at
//! the end, only after a fully successful pass. Anything wrong with the file
//! is a cache miss, never an error.

pub mod entry;
pub mod fingerprint;

pub use entry::{CacheEntry, StaleReason};
pub use fingerprint::{compute_fingerprint, FingerprintInputs};

use crate::error::{BuildError, BuildResult};
use crate::toolchain::OptLevel;
use keel_config::loader::DEFAULT_CACHE_FILE;
use serde::Deserialize;
use std::fmt;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// What was found at the cache location
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLoad {
    Absent,
    Unreadable(String),
    Loaded(CacheEntry),
}

/// Whether a pass reused the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss(MissReason),
    Disabled,
}

/// Why the cache could not be reused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissReason {
    Absent,
    Unreadable(String),
    Stale(StaleReason),
}

impl fmt::Display for MissReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => f.write_str("no cache file"),
            Self::Unreadable(reason) => write!(f, "cache file unreadable: {}", reason),
            Self::Stale(reason) => write!(f, "{}", reason),
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hit => f.write_str("hit"),
            Self::Miss(reason) => write!(f, "miss ({})", reason),
            Self::Disabled => f.write_str("disabled"),
        }
    }
}

/// Cache file at a fixed location
#[derive(Debug, Clone)]
pub struct ConfigCache {
    path: PathBuf,
}

impl ConfigCache {
    /// Cache stored at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Cache at the default location under a package root
    pub fn for_root(root: &Path) -> Self {
        Self::new(root.join(DEFAULT_CACHE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the cache file, classifying what was found
    pub fn try_load(&self) -> CacheLoad {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return CacheLoad::Absent,
            Err(e) => return CacheLoad::Unreadable(e.to_string()),
        };
        match toml::from_str::<CacheEntry>(&text) {
            Ok(entry) => CacheLoad::Loaded(entry),
            Err(e) => CacheLoad::Unreadable(e.message().to_string()),
        }
    }

    /// Load the cache entry, if there is a usable one
    pub fn load(&self) -> Option<CacheEntry> {
        match self.try_load() {
            CacheLoad::Loaded(entry) => Some(entry),
            CacheLoad::Absent => None,
            CacheLoad::Unreadable(reason) => {
                warn!(
                    "Ignoring unreadable cache {}: {}",
                    self.path.display(),
                    reason
                );
                None
            }
        }
    }

    /// Check an entry against the current invocation
    pub fn is_valid(
        entry: &CacheEntry,
        compiler_id: &str,
        opt_level: OptLevel,
        fingerprint: &str,
    ) -> bool {
        entry.staleness(compiler_id, opt_level, fingerprint).is_none()
    }

    /// Write an entry, replacing the file atomically
    pub fn save(&self, entry: &CacheEntry) -> BuildResult<()> {
        let text = toml::to_string_pretty(entry).map_err(BuildError::cache)?;
        atomic_write(&self.path, text.as_bytes())?;
        debug!("Wrote configuration cache {}", self.path.display());
        Ok(())
    }
}

/// Write to a sibling temp file, sync, then rename over the target
fn atomic_write(path: &Path, content: &[u8]) -> BuildResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
        }
    }

    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    {
        let mut file = File::create(&temp_path).map_err(|e| BuildError::io(&temp_path, e))?;
        file.write_all(content)
            .map_err(|e| BuildError::io(&temp_path, e))?;
        file.sync_all().map_err(|e| BuildError::io(&temp_path, e))?;
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(BuildError::io(path, e));
    }
    Ok(())
}

/// Effective toolchain reported by the diagnostic query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResult {
    pub compiler_id: String,
    pub opt_level: u8,
    /// Set when the fallback values had to be used
    pub warning: Option<String>,
}

impl QueryResult {
    /// `cc=<id> opt=<level>`
    pub fn line(&self) -> String {
        format!("cc={} opt={}", self.compiler_id, self.opt_level)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct QueryView {
    compiler_id: String,
    opt_level: u8,
}

/// Read the effective compiler and optimization level from a cache file
///
/// Only the two scalar fields are read, so files written by other versions
/// still answer. A missing file, or one lacking either field, yields the
/// fallbacks with a warning.
pub fn query_effective(path: Option<&Path>, default_cc: &str, default_opt: u8) -> QueryResult {
    let fallback = |warning: String| QueryResult {
        compiler_id: default_cc.to_string(),
        opt_level: default_opt,
        warning: Some(warning),
    };

    let Some(path) = path else {
        return fallback("no cache file given; using defaults".to_string());
    };

    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return fallback(format!(
                "cache file {} does not exist; using defaults",
                path.display()
            ))
        }
        Err(e) => {
            return fallback(format!(
                "cannot read cache file {}: {}; using defaults",
                path.display(),
                e
            ))
        }
    };

    match toml::from_str::<QueryView>(&text) {
        Ok(view) => QueryResult {
            compiler_id: view.compiler_id,
            opt_level: view.opt_level,
            warning: None,
        },
        Err(e) => fallback(format!(
            "malformed cache file {}: {}; using defaults",
            path.display(),
            e.message()
        )),
    }
}
