//! Build environment accumulation
//!
//! Adapters never touch the shared environment. Each returns an
//! [`EnvironmentDelta`] which the [`EnvironmentAccumulator`] merges in
//! resolution order: paths are appended once (first position wins), library
//! names keep the exact order they arrive in.

use crate::toolchain::OptLevel;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Library category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LibTarget {
    /// Linked into everything
    Main,
    /// Linked into Python extension modules
    Python,
    /// Linked into test programs
    Test,
}

/// Flags contributed by one configuration step
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct EnvironmentDelta {
    pub include_paths: Vec<PathBuf>,
    pub system_include_paths: Vec<PathBuf>,
    pub library_paths: Vec<PathBuf>,
    pub libs: Vec<String>,
    pub python_libs: Vec<String>,
    pub test_libs: Vec<String>,
    pub defines: BTreeMap<String, String>,
}

impl EnvironmentDelta {
    /// Create an empty delta
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an include path
    pub fn with_include_path(mut self, path: impl Into<PathBuf>) -> Self {
        push_path(&mut self.include_paths, path.into());
        self
    }

    /// Add a system include path
    pub fn with_system_include_path(mut self, path: impl Into<PathBuf>) -> Self {
        push_path(&mut self.system_include_paths, path.into());
        self
    }

    /// Add a library search path
    pub fn with_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        push_path(&mut self.library_paths, path.into());
        self
    }

    /// Add a library to a category
    pub fn with_lib(mut self, target: LibTarget, lib: impl Into<String>) -> Self {
        push_lib(self.libs_mut(target), lib.into());
        self
    }

    /// Add a preprocessor definition
    pub fn with_define(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.defines.entry(name.into()).or_insert_with(|| value.into());
        self
    }

    /// Libraries of one category
    pub fn libs(&self, target: LibTarget) -> &[String] {
        match target {
            LibTarget::Main => &self.libs,
            LibTarget::Python => &self.python_libs,
            LibTarget::Test => &self.test_libs,
        }
    }

    fn libs_mut(&mut self, target: LibTarget) -> &mut Vec<String> {
        match target {
            LibTarget::Main => &mut self.libs,
            LibTarget::Python => &mut self.python_libs,
            LibTarget::Test => &mut self.test_libs,
        }
    }

    /// Merge another delta into this one
    ///
    /// Paths already present keep their position. Library lists are appended
    /// in order, skipping only names already listed in the same category.
    /// Defines keep their first value.
    pub fn merge(&mut self, other: &EnvironmentDelta) {
        for path in &other.include_paths {
            push_path(&mut self.include_paths, path.clone());
        }
        for path in &other.system_include_paths {
            push_path(&mut self.system_include_paths, path.clone());
        }
        for path in &other.library_paths {
            push_path(&mut self.library_paths, path.clone());
        }
        for target in [LibTarget::Main, LibTarget::Python, LibTarget::Test] {
            for lib in other.libs(target) {
                push_lib(self.libs_mut(target), lib.clone());
            }
        }
        for (name, value) in &other.defines {
            self.defines
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
    }

    /// Check whether the delta contributes nothing
    pub fn is_empty(&self) -> bool {
        self.include_paths.is_empty()
            && self.system_include_paths.is_empty()
            && self.library_paths.is_empty()
            && self.libs.is_empty()
            && self.python_libs.is_empty()
            && self.test_libs.is_empty()
            && self.defines.is_empty()
    }
}

fn push_path(paths: &mut Vec<PathBuf>, path: PathBuf) {
    if !paths.contains(&path) {
        paths.push(path);
    }
}

fn push_lib(libs: &mut Vec<String>, lib: String) {
    if !libs.contains(&lib) {
        libs.push(lib);
    }
}

/// The accumulated build environment handed to the build tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Environment {
    pub compiler_id: String,
    pub opt_level: OptLevel,
    pub managed_layout: bool,
    /// Names configured so far, in order
    pub configured: Vec<String>,
    /// Packages being built (as opposed to dependencies)
    pub primaries: Vec<String>,
    pub flags: EnvironmentDelta,
}

impl Environment {
    /// Create an empty environment
    pub fn new(compiler_id: impl Into<String>, opt_level: OptLevel) -> Self {
        Self {
            compiler_id: compiler_id.into(),
            opt_level,
            managed_layout: false,
            configured: Vec::new(),
            primaries: Vec::new(),
            flags: EnvironmentDelta::default(),
        }
    }

    /// Set whether managed-toolchain layouts apply
    pub fn with_managed_layout(mut self, managed: bool) -> Self {
        self.managed_layout = managed;
        self
    }

    /// Check whether a package has been configured
    pub fn is_configured(&self, name: &str) -> bool {
        self.configured.iter().any(|n| n == name)
    }

    /// Copy of this environment with a delta applied on top
    ///
    /// Probes run against this view so a package sees its own paths as well
    /// as everything configured before it.
    pub fn with_delta(&self, delta: &EnvironmentDelta) -> Environment {
        let mut env = self.clone();
        env.flags.merge(delta);
        env
    }

    /// Libraries for a space-separated list of categories, in link order
    ///
    /// Categories are `main`, `python`, `test` and `self`. `self` is `main`
    /// without the libraries of the packages being built. Unknown categories
    /// are ignored. Each category is accumulated in configuration order and
    /// returned reversed, so a package's libraries precede those of its
    /// dependencies on the link line.
    pub fn libs_for(&self, categories: &str) -> Vec<String> {
        let mut libs = Vec::new();
        for category in categories.split_whitespace() {
            let source: Vec<&String> = match category {
                "main" => self.flags.libs.iter().collect(),
                "python" => self.flags.python_libs.iter().collect(),
                "test" => self.flags.test_libs.iter().collect(),
                "self" => self
                    .flags
                    .libs
                    .iter()
                    .filter(|lib| !self.primaries.contains(lib))
                    .collect(),
                _ => continue,
            };
            for lib in source.into_iter().rev() {
                push_lib(&mut libs, lib.clone());
            }
        }
        libs
    }

    /// Preprocessor and include flags for a compile
    pub fn compile_flags(&self) -> Vec<String> {
        let mut flags = vec![self.opt_level.flag()];
        flags.extend(
            self.flags
                .include_paths
                .iter()
                .map(|p| format!("-I{}", p.display())),
        );
        for path in &self.flags.system_include_paths {
            flags.push("-isystem".to_string());
            flags.push(path.display().to_string());
        }
        flags.extend(self.flags.defines.iter().map(|(name, value)| {
            if value.is_empty() {
                format!("-D{}", name)
            } else {
                format!("-D{}={}", name, value)
            }
        }));
        flags
    }

    /// Library search path and `-l` flags for a link
    pub fn link_flags(&self, libs: &[String]) -> Vec<String> {
        let mut flags: Vec<String> = self
            .flags
            .library_paths
            .iter()
            .map(|p| format!("-L{}", p.display()))
            .collect();
        flags.extend(libs.iter().map(|lib| format!("-l{}", lib)));
        flags
    }
}

/// Merges deltas into one environment
#[derive(Debug, Clone)]
pub struct EnvironmentAccumulator {
    env: Environment,
}

impl EnvironmentAccumulator {
    /// Start from an empty environment
    pub fn new(compiler_id: impl Into<String>, opt_level: OptLevel, managed_layout: bool) -> Self {
        Self {
            env: Environment::new(compiler_id, opt_level).with_managed_layout(managed_layout),
        }
    }

    /// Continue from an existing environment
    pub fn from_environment(env: Environment) -> Self {
        Self { env }
    }

    /// Apply a delta
    pub fn apply(&mut self, delta: &EnvironmentDelta) {
        self.env.flags.merge(delta);
    }

    /// Record a package as configured
    pub fn mark_configured(&mut self, name: &str, primary: bool) {
        if !self.env.is_configured(name) {
            self.env.configured.push(name.to_string());
        }
        if primary && !self.env.primaries.iter().any(|n| n == name) {
            self.env.primaries.push(name.to_string());
        }
    }

    /// Read-only view of the environment so far
    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Copy of the current environment
    pub fn snapshot(&self) -> Environment {
        self.env.clone()
    }

    /// Finish accumulation
    pub fn into_environment(self) -> Environment {
        self.env
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn accumulator() -> EnvironmentAccumulator {
        EnvironmentAccumulator::new("gcc", OptLevel::O2, false)
    }

    #[test]
    fn test_include_path_dedup_keeps_first_position() {
        let mut acc = accumulator();
        acc.apply(
            &EnvironmentDelta::new()
                .with_include_path("/opt/a/include")
                .with_include_path("/usr/include"),
        );
        acc.apply(
            &EnvironmentDelta::new()
                .with_include_path("/opt/b/include")
                .with_include_path("/opt/a/include"),
        );

        assert_eq!(
            acc.snapshot().flags.include_paths,
            vec![
                PathBuf::from("/opt/a/include"),
                PathBuf::from("/usr/include"),
                PathBuf::from("/opt/b/include"),
            ]
        );
    }

    #[test]
    fn test_link_order_preserved() {
        let mut acc = accumulator();
        for lib in ["x", "y", "z"] {
            acc.apply(&EnvironmentDelta::new().with_lib(LibTarget::Main, lib));
        }
        assert_eq!(acc.snapshot().flags.libs, vec!["x", "y", "z"]);
    }

    #[test]
    fn test_link_line_puts_dependents_first() {
        let mut acc = accumulator();
        acc.apply(&EnvironmentDelta::new().with_lib(LibTarget::Main, "boost"));
        acc.apply(&EnvironmentDelta::new().with_lib(LibTarget::Main, "fftw3"));
        acc.apply(
            &EnvironmentDelta::new()
                .with_lib(LibTarget::Main, "imaging")
                .with_lib(LibTarget::Test, "gtest"),
        );
        let env = acc.snapshot();

        assert_eq!(env.flags.libs, vec!["boost", "fftw3", "imaging"]);
        assert_eq!(env.libs_for("main"), vec!["imaging", "fftw3", "boost"]);
        assert_eq!(
            env.link_flags(&env.libs_for("main test")),
            vec!["-limaging", "-lfftw3", "-lboost", "-lgtest"]
        );
    }

    #[test]
    fn test_defines_first_value_wins() {
        let mut acc = accumulator();
        acc.apply(&EnvironmentDelta::new().with_define("USE_FFT", "1"));
        acc.apply(&EnvironmentDelta::new().with_define("USE_FFT", "0"));
        assert_eq!(acc.snapshot().flags.defines.get("USE_FFT").unwrap(), "1");
    }

    #[test]
    fn test_with_delta_leaves_original_untouched() {
        let env = accumulator().snapshot();
        let view = env.with_delta(&EnvironmentDelta::new().with_library_path("/opt/lib"));
        assert!(env.flags.library_paths.is_empty());
        assert_eq!(view.flags.library_paths, vec![PathBuf::from("/opt/lib")]);
    }

    #[test]
    fn test_libs_for_categories() {
        let mut acc = accumulator();
        acc.apply(
            &EnvironmentDelta::new()
                .with_lib(LibTarget::Main, "imaging")
                .with_lib(LibTarget::Main, "fftw3")
                .with_lib(LibTarget::Test, "gtest")
                .with_lib(LibTarget::Python, "boost_python"),
        );
        acc.mark_configured("imaging", true);
        let env = acc.snapshot();

        assert_eq!(env.libs_for("main test"), vec!["fftw3", "imaging", "gtest"]);
        assert_eq!(env.libs_for("self"), vec!["fftw3"]);
        assert_eq!(env.libs_for("python bogus"), vec!["boost_python"]);
        assert!(env.libs_for("").is_empty());
    }

    #[test]
    fn test_compile_and_link_flags() {
        let mut acc = accumulator();
        acc.apply(
            &EnvironmentDelta::new()
                .with_include_path("/opt/a/include")
                .with_system_include_path("/opt/ext/include")
                .with_library_path("/opt/a/lib")
                .with_define("NDEBUG", ""),
        );
        let env = acc.snapshot();

        assert_eq!(
            env.compile_flags(),
            vec![
                "-O2",
                "-I/opt/a/include",
                "-isystem",
                "/opt/ext/include",
                "-DNDEBUG"
            ]
        );
        assert_eq!(
            env.link_flags(&["a".to_string()]),
            vec!["-L/opt/a/lib", "-la"]
        );
    }

    #[test]
    fn test_mark_configured_once() {
        let mut acc = accumulator();
        acc.mark_configured("boost", false);
        acc.mark_configured("boost", false);
        let env = acc.into_environment();
        assert_eq!(env.configured, vec!["boost"]);
        assert!(env.primaries.is_empty());
    }
}
