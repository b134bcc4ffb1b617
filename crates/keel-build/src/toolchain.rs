//! Compiler toolchain identity
//!
//! Resolves the configured C compiler command into a toolchain: the matching
//! C++ driver, the compiler family and its version. The family is what the
//! configuration cache records as the compiler identity.

use crate::error::{BuildError, BuildResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::Command;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Environment variable that disables managed-toolchain layouts
pub const AVOID_MANAGED_ENV: &str = "KEEL_AVOID_MANAGED_TOOLCHAIN";

/// Optimization level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum OptLevel {
    /// No optimization
    O0,
    /// Basic optimization
    O1,
    /// Full optimization
    O2,
    /// Aggressive optimization
    O3,
}

impl OptLevel {
    /// Numeric level
    pub fn as_u8(self) -> u8 {
        match self {
            Self::O0 => 0,
            Self::O1 => 1,
            Self::O2 => 2,
            Self::O3 => 3,
        }
    }

    /// Compiler flag (`-O<n>`)
    pub fn flag(self) -> String {
        format!("-O{}", self.as_u8())
    }
}

impl TryFrom<u8> for OptLevel {
    type Error = BuildError;

    fn try_from(value: u8) -> BuildResult<Self> {
        match value {
            0 => Ok(Self::O0),
            1 => Ok(Self::O1),
            2 => Ok(Self::O2),
            3 => Ok(Self::O3),
            other => Err(BuildError::InvalidOptLevel(other)),
        }
    }
}

impl From<OptLevel> for u8 {
    fn from(level: OptLevel) -> u8 {
        level.as_u8()
    }
}

impl fmt::Display for OptLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Compiler family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompilerFamily {
    Gcc,
    Clang,
    Icc,
    Unknown,
}

impl CompilerFamily {
    /// Get family name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Gcc => "gcc",
            Self::Clang => "clang",
            Self::Icc => "icc",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for CompilerFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A C/C++ compiler pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    cc: String,
    cxx: String,
    family: CompilerFamily,
    version: Option<String>,
}

impl Toolchain {
    /// Build a toolchain from a compiler command without running it
    pub fn from_cc(cc: &str) -> BuildResult<Self> {
        let cc = cc.trim();
        let cxx = derive_cxx(cc)?;
        let program = cc.split_whitespace().next().unwrap_or(cc);
        let family = if program.starts_with("gcc") {
            CompilerFamily::Gcc
        } else if program.starts_with("clang") {
            CompilerFamily::Clang
        } else if program.starts_with("icc") {
            CompilerFamily::Icc
        } else {
            CompilerFamily::Unknown
        };

        Ok(Self {
            cc: cc.to_string(),
            cxx,
            family,
            version: None,
        })
    }

    /// Build a toolchain and classify it from `<cc> --version`
    ///
    /// A compiler that cannot be run keeps the family guessed from its name.
    pub fn detect(cc: &str) -> BuildResult<Self> {
        let mut toolchain = Self::from_cc(cc)?;
        let mut words = toolchain.cc.split_whitespace();
        let Some(program) = words.next() else {
            return Err(BuildError::UnrecognisedCompiler(cc.to_string()));
        };

        match Command::new(program).args(words).arg("--version").output() {
            Ok(output) if output.status.success() => {
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                text.push_str(&String::from_utf8_lossy(&output.stderr));
                let (family, version) = Self::classify(&text);
                debug!(
                    "Classified '{}' as {} {}",
                    toolchain.cc,
                    family,
                    version.as_deref().unwrap_or("(unknown version)")
                );
                toolchain.family = family;
                toolchain.version = version;
            }
            Ok(output) => {
                warn!(
                    "'{} --version' exited with {}; identifying compiler by name",
                    toolchain.cc, output.status
                );
            }
            Err(e) => {
                warn!(
                    "Could not run '{}': {}; identifying compiler by name",
                    toolchain.cc, e
                );
            }
        }

        Ok(toolchain)
    }

    /// Classify `--version` output into a family and version
    pub fn classify(version_output: &str) -> (CompilerFamily, Option<String>) {
        // Only the first line is meaningful; a trailing space keeps the
        // patterns that expect one working on single-line output.
        let first_line = format!("{} ", version_output.lines().next().unwrap_or(""));
        for (pattern, family) in version_patterns() {
            if let Some(caps) = pattern.captures(&first_line) {
                return (*family, caps.get(1).map(|m| m.as_str().to_string()));
            }
        }
        (CompilerFamily::Unknown, None)
    }

    /// C compiler command
    pub fn cc(&self) -> &str {
        &self.cc
    }

    /// C++ compiler command
    pub fn cxx(&self) -> &str {
        &self.cxx
    }

    /// Compiler family
    pub fn family(&self) -> CompilerFamily {
        self.family
    }

    /// Compiler version, when detected
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Identity recorded in the configuration cache
    pub fn compiler_id(&self) -> String {
        match self.family {
            CompilerFamily::Unknown => self.cc.clone(),
            family => family.name().to_string(),
        }
    }
}

fn version_patterns() -> &'static [(Regex, CompilerFamily)] {
    static PATTERNS: OnceLock<Vec<(Regex, CompilerFamily)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (r"gcc(?:-.+)? +\(.+\) +([0-9.a-zA-Z]+)", CompilerFamily::Gcc),
            (r"gnu-cc(?:-.+)? +\(.+\) +([0-9.a-zA-Z]+)", CompilerFamily::Gcc),
            (r"\(GCC\) +([0-9.a-zA-Z]+) ", CompilerFamily::Gcc),
            (r"LLVM +version +([0-9.a-zA-Z]+) ", CompilerFamily::Clang),
            (r"clang +version +([0-9.a-zA-Z]+) ", CompilerFamily::Clang),
            (r"\(ICC\) +([0-9.a-zA-Z]+) ", CompilerFamily::Icc),
            (r"cc \(Ubuntu +([0-9~\-.a-zA-Z]+)\)", CompilerFamily::Gcc),
        ]
        .into_iter()
        .filter_map(|(pattern, family)| Regex::new(pattern).ok().map(|re| (re, family)))
        .collect()
    })
}

fn derive_cxx(cc: &str) -> BuildResult<String> {
    static RULES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    let rules = RULES.get_or_init(|| {
        [
            (r"^gcc(-\d+(?:\.\d+)*)?( |$)", "g++${1}${2}"),
            (r"^icc( |$)", "icpc${1}"),
            (r"^clang( |$)", "clang++${1}"),
            (r"^cc( |$)", "c++${1}"),
        ]
        .into_iter()
        .filter_map(|(pattern, replacement)| {
            Regex::new(pattern).ok().map(|re| (re, replacement))
        })
        .collect()
    });

    rules
        .iter()
        .find(|(re, _)| re.is_match(cc))
        .map(|(re, replacement)| re.replace(cc, *replacement).into_owned())
        .ok_or_else(|| BuildError::UnrecognisedCompiler(cc.to_string()))
}

/// Whether a managed (conda-style) toolchain environment is in effect
///
/// `KEEL_AVOID_MANAGED_TOOLCHAIN` being set, to any value, disables it.
pub fn managed_environment_active() -> bool {
    if std::env::var_os(AVOID_MANAGED_ENV).is_some() {
        return false;
    }
    if std::env::var_os("CONDA_BUILD_SYSROOT").is_some()
        || std::env::var_os("CONDA_PREFIX").is_some()
    {
        return true;
    }
    std::env::var("CONDA_BUILD").map(|v| v == "1").unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serial_test::serial;

    #[rstest]
    #[case("gcc", "g++")]
    #[case("gcc-12", "g++-12")]
    #[case("gcc-4.8.5 -m64", "g++-4.8.5 -m64")]
    #[case("clang", "clang++")]
    #[case("icc", "icpc")]
    #[case("cc", "c++")]
    fn test_cxx_derivation(#[case] cc: &str, #[case] cxx: &str) {
        assert_eq!(Toolchain::from_cc(cc).unwrap().cxx(), cxx);
    }

    #[rstest]
    #[case("tcc")]
    #[case("clang-15")]
    #[case("")]
    fn test_unrecognised_compiler(#[case] cc: &str) {
        assert!(matches!(
            Toolchain::from_cc(cc),
            Err(BuildError::UnrecognisedCompiler(_))
        ));
    }

    #[rstest]
    #[case(
        "gcc (Ubuntu 11.4.0-1ubuntu1~22.04) 11.4.0\nCopyright (C) 2021",
        CompilerFamily::Gcc,
        "11.4.0"
    )]
    #[case("gcc-12 (Homebrew GCC 12.2.0) 12.2.0", CompilerFamily::Gcc, "12.2.0")]
    #[case(
        "clang version 15.0.7 (Fedora 15.0.7-2.fc37)",
        CompilerFamily::Clang,
        "15.0.7"
    )]
    #[case(
        "Apple LLVM version 10.0.0 (clang-1000.10.44.4)",
        CompilerFamily::Clang,
        "10.0.0"
    )]
    #[case("icc (ICC) 19.1.3.304 20200925", CompilerFamily::Icc, "19.1.3.304")]
    #[case("cc (Ubuntu 4.8.2-19ubuntu1)", CompilerFamily::Gcc, "4.8.2-19ubuntu1")]
    fn test_classify(
        #[case] output: &str,
        #[case] family: CompilerFamily,
        #[case] version: &str,
    ) {
        let (got_family, got_version) = Toolchain::classify(output);
        assert_eq!(got_family, family);
        assert_eq!(got_version.as_deref(), Some(version));
    }

    #[test]
    fn test_classify_unknown() {
        assert_eq!(
            Toolchain::classify("tcc version 0.9.27"),
            (CompilerFamily::Unknown, None)
        );
    }

    #[test]
    fn test_compiler_id() {
        assert_eq!(Toolchain::from_cc("gcc-12").unwrap().compiler_id(), "gcc");
        assert_eq!(Toolchain::from_cc("cc").unwrap().compiler_id(), "cc");
    }

    #[test]
    fn test_opt_level_conversions() {
        assert_eq!(OptLevel::try_from(2).unwrap(), OptLevel::O2);
        assert!(OptLevel::try_from(4).is_err());
        assert_eq!(OptLevel::O3.flag(), "-O3");
        assert_eq!(OptLevel::O1.to_string(), "1");
    }

    #[test]
    #[serial]
    fn test_managed_environment_switch() {
        std::env::set_var("CONDA_PREFIX", "/opt/conda");
        std::env::remove_var(AVOID_MANAGED_ENV);
        assert!(managed_environment_active());

        std::env::set_var(AVOID_MANAGED_ENV, "");
        assert!(!managed_environment_active());

        std::env::remove_var(AVOID_MANAGED_ENV);
        std::env::remove_var("CONDA_PREFIX");
    }
}
