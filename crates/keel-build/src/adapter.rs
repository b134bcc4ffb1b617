//! Configuration adapters
//!
//! One adapter per dependency. `configure` runs the header and library probes
//! for the dependency and returns the flags it contributes; it never modifies
//! the shared environment and never fails with an error. Whether a failed
//! configure is fatal is decided by the caller from the dependency graph.
//!
//! Behaviour varies by data rather than by subtype: the [`PackageKind`]
//! decides how include directories are exposed, the managed layout replaces
//! include directories under a managed toolchain, and [`FlagHook`]s may adjust
//! flags before and after probing.

use crate::environment::{Environment, EnvironmentDelta, LibTarget};
use crate::probe::{locate_header, ProbeOutcome, ProbeRequest, Prober};
use keel_config::{DeclarationFile, PackageKind};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Options of one configuration pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigureOptions {
    /// Escalate optional failures and collect every failing check
    pub strict: bool,
    /// Run compile and link probes; `false` checks header existence only
    pub attempt_build: bool,
}

impl Default for ConfigureOptions {
    fn default() -> Self {
        Self {
            strict: false,
            attempt_build: true,
        }
    }
}

/// Dependencies configured so far in this pass
#[derive(Debug, Clone, Default)]
pub struct ConfiguredSet {
    names: Vec<String>,
    headers: HashSet<String>,
    libs: HashSet<String>,
}

impl ConfiguredSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an adapter whose checks all passed
    pub fn record(&mut self, adapter: &ConfigurationAdapter) {
        if !self.contains(adapter.name()) {
            self.names.push(adapter.name().to_string());
        }
        self.headers.extend(adapter.headers().iter().cloned());
        self.libs.extend(adapter.libs().iter().cloned());
    }

    /// Check whether a dependency was configured
    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Check whether a header was already verified
    pub fn has_header(&self, header: &str) -> bool {
        self.headers.contains(header)
    }

    /// Check whether a library was already verified
    pub fn has_lib(&self, lib: &str) -> bool {
        self.libs.contains(lib)
    }

    /// Configured names in order
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// Outcome of configuring one dependency
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfigureResult {
    pub success: bool,
    /// Contributed flags (empty on failure)
    pub flags: EnvironmentDelta,
    pub diagnostics: Vec<String>,
    /// Number of checks actually executed
    pub checks_run: usize,
}

impl ConfigureResult {
    /// A successful result contributing `flags`
    pub fn ok(flags: EnvironmentDelta) -> Self {
        Self {
            success: true,
            flags,
            diagnostics: Vec::new(),
            checks_run: 0,
        }
    }
}

/// Hook points around an adapter's configure step
pub trait FlagHook: Send + Sync {
    /// Adjust the delta before any probe runs
    fn pre_configure(
        &self,
        _adapter: &ConfigurationAdapter,
        _env: &Environment,
        _delta: &mut EnvironmentDelta,
    ) {
    }

    /// Adjust the result after probing
    fn post_configure(
        &self,
        _adapter: &ConfigurationAdapter,
        _env: &Environment,
        _result: &mut ConfigureResult,
    ) {
    }
}

/// Configuration logic for one dependency
#[derive(Clone)]
pub struct ConfigurationAdapter {
    name: String,
    version: Option<String>,
    kind: PackageKind,
    root: PathBuf,
    headers: Vec<String>,
    libs: Vec<String>,
    python_libs: Vec<String>,
    test_libs: Vec<String>,
    include_dirs: Vec<PathBuf>,
    lib_dirs: Vec<PathBuf>,
    managed_include_dirs: Vec<PathBuf>,
    defines: BTreeMap<String, String>,
    hooks: Vec<Arc<dyn FlagHook>>,
}

impl fmt::Debug for ConfigurationAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigurationAdapter")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("kind", &self.kind)
            .field("root", &self.root)
            .field("headers", &self.headers)
            .field("libs", &self.libs)
            .field("include_dirs", &self.include_dirs)
            .field("lib_dirs", &self.lib_dirs)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl ConfigurationAdapter {
    /// Create an adapter with the default layout (`include/`, `lib/`, one
    /// library named after the package)
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        let name = name.into();
        Self {
            libs: vec![name.clone()],
            name,
            version: None,
            kind: PackageKind::Package,
            root: root.into(),
            headers: Vec::new(),
            python_libs: Vec::new(),
            test_libs: Vec::new(),
            include_dirs: vec![PathBuf::from("include")],
            lib_dirs: vec![PathBuf::from("lib")],
            managed_include_dirs: Vec::new(),
            defines: BTreeMap::new(),
            hooks: Vec::new(),
        }
    }

    /// Build an adapter from a declaration file
    pub fn from_declaration(declaration: &DeclarationFile, root: impl Into<PathBuf>) -> Self {
        let package = &declaration.package;
        let mut adapter = Self::new(declaration.name(), root)
            .with_kind(package.kind)
            .with_headers(package.headers.iter().cloned())
            .with_libs(declaration.main_libs())
            .with_include_dirs(declaration.include_dirs())
            .with_lib_dirs(declaration.lib_dirs())
            .with_managed_include_dirs(declaration.layout.managed_include_dirs.clone());
        adapter.version = package.version.clone();
        adapter.python_libs = package.python_libs.clone();
        adapter.test_libs = package.test_libs.clone();
        adapter.defines = package.defines.clone();
        adapter
    }

    /// Set version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Set kind
    pub fn with_kind(mut self, kind: PackageKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the headers to check
    pub fn with_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.headers.clear();
        for header in headers {
            let header = header.into();
            if !self.headers.contains(&header) {
                self.headers.push(header);
            }
        }
        self
    }

    /// Set the main libraries, in link order
    pub fn with_libs<I, S>(mut self, libs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.libs = libs.into_iter().map(Into::into).collect();
        self
    }

    /// Add a library to a non-main category
    pub fn with_extra_lib(mut self, target: LibTarget, lib: impl Into<String>) -> Self {
        match target {
            LibTarget::Main => self.libs.push(lib.into()),
            LibTarget::Python => self.python_libs.push(lib.into()),
            LibTarget::Test => self.test_libs.push(lib.into()),
        }
        self
    }

    /// Set include directories relative to the root
    pub fn with_include_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.include_dirs = dirs;
        self
    }

    /// Set library directories relative to the root
    pub fn with_lib_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.lib_dirs = dirs;
        self
    }

    /// Set include directories used under a managed toolchain
    pub fn with_managed_include_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.managed_include_dirs = dirs;
        self
    }

    /// Add a preprocessor definition
    pub fn with_define(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.defines.insert(name.into(), value.into());
        self
    }

    /// Add a flag hook
    pub fn with_hook(mut self, hook: Arc<dyn FlagHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn kind(&self) -> PackageKind {
        self.kind
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Main libraries
    pub fn libs(&self) -> &[String] {
        &self.libs
    }

    pub fn python_libs(&self) -> &[String] {
        &self.python_libs
    }

    pub fn test_libs(&self) -> &[String] {
        &self.test_libs
    }

    pub fn include_dirs(&self) -> &[PathBuf] {
        &self.include_dirs
    }

    pub fn lib_dirs(&self) -> &[PathBuf] {
        &self.lib_dirs
    }

    pub fn managed_include_dirs(&self) -> &[PathBuf] {
        &self.managed_include_dirs
    }

    pub fn defines(&self) -> &BTreeMap<String, String> {
        &self.defines
    }

    /// Identity recorded in the cache fingerprint
    pub fn identity(&self) -> String {
        format!(
            "{}@{}:{}",
            self.name,
            self.version.as_deref().unwrap_or("unversioned"),
            self.kind.name()
        )
    }

    /// Include directories in effect for an environment
    pub fn effective_include_dirs(&self, env: &Environment) -> &[PathBuf] {
        if env.managed_layout && !self.managed_include_dirs.is_empty() {
            &self.managed_include_dirs
        } else {
            &self.include_dirs
        }
    }

    /// Flags this dependency contributes, before any probe
    ///
    /// Only directories that exist under the root are contributed.
    pub fn contributed_delta(&self, env: &Environment) -> EnvironmentDelta {
        let mut delta = EnvironmentDelta::new();

        for dir in self.effective_include_dirs(env) {
            let path = self.root.join(dir);
            if !path.is_dir() {
                continue;
            }
            delta = match self.kind {
                PackageKind::Package => delta.with_include_path(path),
                PackageKind::External => delta.with_system_include_path(path),
            };
        }

        for dir in &self.lib_dirs {
            let path = self.root.join(dir);
            if path.is_dir() {
                delta = delta.with_library_path(path);
            }
        }

        for lib in &self.libs {
            delta = delta.with_lib(LibTarget::Main, lib.as_str());
        }
        for lib in &self.python_libs {
            delta = delta.with_lib(LibTarget::Python, lib.as_str());
        }
        for lib in &self.test_libs {
            delta = delta.with_lib(LibTarget::Test, lib.as_str());
        }
        for (name, value) in &self.defines {
            delta = delta.with_define(name.as_str(), value.as_str());
        }

        delta
    }

    /// Contribute flags for a package being built, without probing
    pub fn configure_primary(&self, env: &Environment) -> ConfigureResult {
        let mut delta = self.contributed_delta(env);
        for hook in &self.hooks {
            hook.pre_configure(self, env, &mut delta);
        }
        let mut result = ConfigureResult::ok(delta);
        for hook in &self.hooks {
            hook.post_configure(self, env, &mut result);
        }
        result
    }

    /// Check the dependency's headers and libraries
    ///
    /// Probes run against `env` plus this adapter's own flags. Headers and
    /// libraries already verified for an earlier dependency are not probed
    /// again. Without `attempt_build` only header existence is checked.
    /// Checking stops at the first failure unless `strict` asks for every
    /// failure to be reported.
    pub fn configure(
        &self,
        env: &Environment,
        configured: &ConfiguredSet,
        options: ConfigureOptions,
        prober: &dyn Prober,
    ) -> ConfigureResult {
        let mut delta = self.contributed_delta(env);
        for hook in &self.hooks {
            hook.pre_configure(self, env, &mut delta);
        }
        let view = env.with_delta(&delta);

        let mut requests: Vec<ProbeRequest> = self
            .headers
            .iter()
            .filter(|h| !configured.has_header(h))
            .map(|h| ProbeRequest::Header(h.clone()))
            .collect();
        if options.attempt_build {
            requests.extend(
                self.libs
                    .iter()
                    .filter(|l| !configured.has_lib(l))
                    .map(|l| ProbeRequest::Library(l.clone())),
            );
        }

        let mut diagnostics = Vec::new();
        let mut checks_run = 0;
        for request in &requests {
            checks_run += 1;
            let outcome = if options.attempt_build {
                prober.probe(request, &view)
            } else {
                dry_run_check(request, &view)
            };

            if let Some(diagnostic) = outcome.diagnostic(request) {
                debug!("{}: {}", self.name, diagnostic);
                diagnostics.push(diagnostic);
                if !options.strict {
                    break;
                }
            }
        }

        let success = diagnostics.is_empty();
        let mut result = ConfigureResult {
            success,
            flags: if success { delta } else { EnvironmentDelta::new() },
            diagnostics,
            checks_run,
        };
        for hook in &self.hooks {
            hook.post_configure(self, env, &mut result);
        }
        result
    }
}

fn dry_run_check(request: &ProbeRequest, env: &Environment) -> ProbeOutcome {
    match request {
        ProbeRequest::Header(header) => match locate_header(header, env) {
            Some(_) => ProbeOutcome::Found,
            None => ProbeOutcome::Missing {
                detail: "not under any include path".to_string(),
            },
        },
        ProbeRequest::Library(_) => ProbeOutcome::Found,
    }
}
