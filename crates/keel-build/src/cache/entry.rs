//! Persisted configuration result

use crate::configurator::Diagnostic;
use crate::environment::{Environment, EnvironmentDelta};
use crate::toolchain::OptLevel;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result of the last successful configuration pass
///
/// Stored as TOML. Scalars come first so the file reads top to bottom as
/// `compiler-id`, `opt-level`, then the `[flags]` table. Diagnostics of the
/// pass are kept so a reused entry reports the same skipped dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CacheEntry {
    pub compiler_id: String,
    pub opt_level: OptLevel,
    pub fingerprint: String,
    /// RFC 3339 time of the pass that produced this entry
    pub timestamp: String,
    #[serde(default)]
    pub configured: Vec<String>,
    #[serde(default)]
    pub primaries: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
    #[serde(default)]
    pub flags: EnvironmentDelta,
}

/// Why a cache entry cannot be reused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    CompilerChanged { cached: String, current: String },
    OptLevelChanged { cached: OptLevel, current: OptLevel },
    InputsChanged,
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CompilerChanged { cached, current } => {
                write!(f, "compiler changed from {} to {}", cached, current)
            }
            Self::OptLevelChanged { cached, current } => {
                write!(f, "optimization level changed from {} to {}", cached, current)
            }
            Self::InputsChanged => f.write_str("dependency declarations changed"),
        }
    }
}

impl CacheEntry {
    /// Record a finished environment
    pub fn from_environment(env: &Environment, fingerprint: impl Into<String>) -> Self {
        Self {
            compiler_id: env.compiler_id.clone(),
            opt_level: env.opt_level,
            fingerprint: fingerprint.into(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            configured: env.configured.clone(),
            primaries: env.primaries.clone(),
            diagnostics: Vec::new(),
            flags: env.flags.clone(),
        }
    }

    /// Attach the non-fatal diagnostics of the pass
    pub fn with_diagnostics(mut self, diagnostics: Vec<Diagnostic>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Rebuild the environment this entry was recorded from
    pub fn to_environment(&self, managed_layout: bool) -> Environment {
        Environment {
            compiler_id: self.compiler_id.clone(),
            opt_level: self.opt_level,
            managed_layout,
            configured: self.configured.clone(),
            primaries: self.primaries.clone(),
            flags: self.flags.clone(),
        }
    }

    /// First mismatch against the current invocation, if any
    pub fn staleness(
        &self,
        compiler_id: &str,
        opt_level: OptLevel,
        fingerprint: &str,
    ) -> Option<StaleReason> {
        if self.compiler_id != compiler_id {
            return Some(StaleReason::CompilerChanged {
                cached: self.compiler_id.clone(),
                current: compiler_id.to_string(),
            });
        }
        if self.opt_level != opt_level {
            return Some(StaleReason::OptLevelChanged {
                cached: self.opt_level,
                current: opt_level,
            });
        }
        if self.fingerprint != fingerprint {
            return Some(StaleReason::InputsChanged);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::LibTarget;
    use pretty_assertions::assert_eq;

    fn entry() -> CacheEntry {
        let mut env = Environment::new("gcc", OptLevel::O2);
        env.configured = vec!["fftw".to_string(), "app".to_string()];
        env.primaries = vec!["app".to_string()];
        env.flags = EnvironmentDelta::new()
            .with_include_path("/opt/fftw/include")
            .with_lib(LibTarget::Main, "fftw3")
            .with_define("HAVE_FFTW", "1");
        CacheEntry::from_environment(&env, "abc123")
    }

    #[test]
    fn test_toml_layout() {
        let text = toml::to_string_pretty(&entry()).unwrap();
        assert!(text.starts_with("compiler-id = \"gcc\"\nopt-level = 2\n"));
        assert!(text.contains("[flags]"));
        assert!(text.contains("HAVE_FFTW = \"1\""));

        let parsed: CacheEntry = toml::from_str(&text).unwrap();
        assert_eq!(parsed, entry_with_timestamp(&parsed.timestamp));
    }

    fn entry_with_timestamp(timestamp: &str) -> CacheEntry {
        CacheEntry {
            timestamp: timestamp.to_string(),
            ..entry()
        }
    }

    #[test]
    fn test_diagnostics_survive_round_trip() {
        let entry = entry().with_diagnostics(vec![Diagnostic {
            package: "app".to_string(),
            message: "optional dependency 'eigen' skipped".to_string(),
        }]);
        let text = toml::to_string_pretty(&entry).unwrap();
        assert!(text.contains("[[diagnostics]]"));

        let parsed: CacheEntry = toml::from_str(&text).unwrap();
        assert_eq!(parsed.diagnostics, entry.diagnostics);
        assert_eq!(parsed.flags, entry.flags);
    }

    #[test]
    fn test_opt_level_out_of_range_rejected() {
        let text = "compiler-id = \"gcc\"\nopt-level = 7\nfingerprint = \"x\"\ntimestamp = \"t\"\n";
        assert!(toml::from_str::<CacheEntry>(text).is_err());
    }

    #[test]
    fn test_staleness() {
        let entry = entry();
        assert_eq!(entry.staleness("gcc", OptLevel::O2, "abc123"), None);
        assert_eq!(
            entry.staleness("gcc", OptLevel::O0, "abc123"),
            Some(StaleReason::OptLevelChanged {
                cached: OptLevel::O2,
                current: OptLevel::O0,
            })
        );
        assert!(matches!(
            entry.staleness("clang", OptLevel::O2, "abc123"),
            Some(StaleReason::CompilerChanged { .. })
        ));
        assert_eq!(
            entry.staleness("gcc", OptLevel::O2, "def456"),
            Some(StaleReason::InputsChanged)
        );
    }

    #[test]
    fn test_round_trip_to_environment() {
        let entry = entry();
        let env = entry.to_environment(false);
        assert_eq!(env.flags, entry.flags);
        assert_eq!(env.primaries, vec!["app"]);
    }
}
