//! Configuration pass orchestration
//!
//! Resolves the order, consults the cache, then runs each adapter in order
//! against the environment accumulated so far. Probes are serialized: a later
//! probe may depend on paths found by an earlier one, and all probes share
//! one scratch directory.

use crate::adapter::{ConfigureOptions, ConfigureResult, ConfiguredSet};
use crate::cache::{
    compute_fingerprint, CacheEntry, CacheLoad, CacheStatus, ConfigCache, FingerprintInputs,
    MissReason,
};
use crate::environment::{Environment, EnvironmentAccumulator};
use crate::error::{BuildError, BuildResult};
use crate::package::{PackageDeclaration, Requirement};
use crate::probe::Prober;
use crate::registry::Registry;
use crate::resolver::{ResolvedNode, Resolution, Resolver};
use crate::toolchain::OptLevel;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Configuration pass settings
#[derive(Debug, Clone)]
pub struct ConfigureConfig {
    /// Compiler identity recorded in the environment and cache
    pub compiler_id: String,
    pub opt_level: OptLevel,
    pub options: ConfigureOptions,
    /// Whether managed-toolchain include layouts apply
    pub managed_layout: bool,
    /// Cache file; `None` disables caching
    pub cache_path: Option<PathBuf>,
}

impl Default for ConfigureConfig {
    fn default() -> Self {
        Self {
            compiler_id: keel_config::loader::DEFAULT_COMPILER.to_string(),
            opt_level: OptLevel::O3,
            options: ConfigureOptions::default(),
            managed_layout: false,
            cache_path: None,
        }
    }
}

/// A non-fatal message about one package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub package: String,
    pub message: String,
}

/// Configuration pass statistics
#[derive(Debug, Clone, Default)]
pub struct ConfigureStats {
    /// Checks executed by adapters (zero on a cache hit)
    pub probes_run: usize,
    pub packages_configured: usize,
    pub elapsed: Duration,
}

/// Result of a successful configuration pass
#[derive(Debug, Clone)]
pub struct ConfigurationReport {
    /// The environment handed to the build tool
    pub environment: Environment,
    pub resolution: Resolution,
    pub cache: CacheStatus,
    pub fingerprint: String,
    pub diagnostics: Vec<Diagnostic>,
    /// Resolved packages left out of the environment
    pub skipped: Vec<String>,
    pub stats: ConfigureStats,
}

/// Runs configuration passes
pub struct Configurator<'a> {
    registry: &'a Registry,
    prober: &'a dyn Prober,
    config: ConfigureConfig,
}

impl<'a> Configurator<'a> {
    /// Create a configurator over a registry and prober
    pub fn new(registry: &'a Registry, prober: &'a dyn Prober) -> Self {
        Self {
            registry,
            prober,
            config: ConfigureConfig::default(),
        }
    }

    /// Set pass configuration
    pub fn with_config(mut self, config: ConfigureConfig) -> Self {
        self.config = config;
        self
    }

    /// Set compiler identity
    pub fn with_compiler_id(mut self, compiler_id: impl Into<String>) -> Self {
        self.config.compiler_id = compiler_id.into();
        self
    }

    /// Set optimization level
    pub fn with_opt_level(mut self, level: OptLevel) -> Self {
        self.config.opt_level = level;
        self
    }

    /// Enable/disable strict mode
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.config.options.strict = strict;
        self
    }

    /// Enable/disable compile and link probes
    pub fn with_attempt_build(mut self, attempt_build: bool) -> Self {
        self.config.options.attempt_build = attempt_build;
        self
    }

    /// Enable/disable managed-toolchain layouts
    pub fn with_managed_layout(mut self, managed: bool) -> Self {
        self.config.managed_layout = managed;
        self
    }

    /// Use a cache file
    pub fn with_cache(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.cache_path = Some(path.into());
        self
    }

    /// Disable the cache
    pub fn without_cache(mut self) -> Self {
        self.config.cache_path = None;
        self
    }

    pub fn config(&self) -> &ConfigureConfig {
        &self.config
    }

    /// Resolve the configuration order without probing
    pub fn resolve(&self, primaries: &[PackageDeclaration]) -> BuildResult<Resolution> {
        Resolver::new(self.registry).resolve(primaries)
    }

    /// Run a configuration pass
    ///
    /// Fails on a cycle, on a required dependency that is undeclared or
    /// fails its checks, and in strict mode on any optional dependency that
    /// is unavailable. The cache is written only when the pass succeeds.
    pub fn run(&self, primaries: &[PackageDeclaration]) -> BuildResult<ConfigurationReport> {
        let started = Instant::now();
        let strict = self.config.options.strict;

        let resolution = self.resolve(primaries)?;
        if let Some(error) = resolution.fatal_errors().next() {
            return Err(BuildError::missing_required(
                error.package(),
                error.dependency(),
                vec!["no declaration found".to_string()],
            ));
        }

        let mut diagnostics = Vec::new();
        for warning in resolution.warnings() {
            if strict {
                return Err(BuildError::missing_optional(
                    warning.package(),
                    warning.dependency(),
                    vec![warning.to_string()],
                ));
            }
            warn!("{}", warning);
            diagnostics.push(Diagnostic {
                package: warning.package().to_string(),
                message: warning.to_string(),
            });
        }

        let fingerprint = compute_fingerprint(&FingerprintInputs {
            primaries,
            resolution: &resolution,
            registry: self.registry,
            options: self.config.options,
            managed_layout: self.config.managed_layout,
        });

        let cache = self.config.cache_path.as_ref().map(ConfigCache::new);
        let status = match &cache {
            None => CacheStatus::Disabled,
            Some(cache) => match self.check_cache(cache, &fingerprint) {
                Ok(entry) => {
                    info!("Configuration cache {} is up to date", cache.path().display());
                    let environment = entry.to_environment(self.config.managed_layout);
                    let skipped = skipped_nodes(&resolution, &environment);
                    if strict {
                        if let Some(node) = skipped.first().and_then(|name| resolution.get(name)) {
                            return Err(cached_optional_failure(node, &entry.diagnostics));
                        }
                    }
                    diagnostics.extend(entry.diagnostics);
                    return Ok(ConfigurationReport {
                        stats: ConfigureStats {
                            probes_run: 0,
                            packages_configured: environment.configured.len(),
                            elapsed: started.elapsed(),
                        },
                        environment,
                        resolution,
                        cache: CacheStatus::Hit,
                        fingerprint,
                        diagnostics,
                        skipped,
                    });
                }
                Err(reason) => {
                    info!("Reconfiguring: {}", reason);
                    CacheStatus::Miss(reason)
                }
            },
        };

        let mut accumulator = EnvironmentAccumulator::new(
            self.config.compiler_id.clone(),
            self.config.opt_level,
            self.config.managed_layout,
        );
        let mut configured = ConfiguredSet::new();
        let mut failed: HashSet<String> = HashSet::new();
        let mut probes_run = 0;
        let resolution_warnings = diagnostics.len();

        for node in &resolution.order {
            let failed_dependency = self
                .declaration(primaries, &node.name)
                .and_then(|d| d.required().iter().find(|dep| failed.contains(dep.name())));

            let result = match failed_dependency {
                Some(dep) => ConfigureResult {
                    diagnostics: vec![format!("required dependency '{}' was skipped", dep)],
                    ..Default::default()
                },
                None => {
                    let result = self.configure_node(node, accumulator.environment(), &configured);
                    probes_run += result.checks_run;
                    result
                }
            };

            if result.success {
                accumulator.apply(&result.flags);
                accumulator.mark_configured(&node.name, node.primary);
                if let Some(adapter) = self.registry.adapter(&node.name) {
                    configured.record(adapter);
                }
                diagnostics.extend(result.diagnostics.into_iter().map(|message| Diagnostic {
                    package: node.name.clone(),
                    message,
                }));
                continue;
            }

            match node.requirement {
                Requirement::Required => {
                    return Err(BuildError::missing_required(
                        node.dependent.as_deref().unwrap_or(&node.name),
                        &node.name,
                        result.diagnostics,
                    ));
                }
                Requirement::Optional if strict => {
                    return Err(BuildError::missing_optional(
                        node.dependent.as_deref().unwrap_or(&node.name),
                        &node.name,
                        result.diagnostics,
                    ));
                }
                Requirement::Optional => {
                    let message = format!(
                        "optional dependency '{}' skipped: {}",
                        node.name,
                        result.diagnostics.join("; ")
                    );
                    warn!("{}", message);
                    diagnostics.push(Diagnostic {
                        package: node.dependent.clone().unwrap_or_else(|| node.name.clone()),
                        message,
                    });
                    failed.insert(node.name.clone());
                }
            }
        }

        let environment = accumulator.into_environment();

        if let Some(cache) = &cache {
            let entry = CacheEntry::from_environment(&environment, &fingerprint)
                .with_diagnostics(diagnostics[resolution_warnings..].to_vec());
            if let Err(e) = cache.save(&entry) {
                warn!("Failed to write configuration cache: {}", e);
            }
        }

        let skipped = skipped_nodes(&resolution, &environment);
        Ok(ConfigurationReport {
            stats: ConfigureStats {
                probes_run,
                packages_configured: environment.configured.len(),
                elapsed: started.elapsed(),
            },
            environment,
            resolution,
            cache: status,
            fingerprint,
            diagnostics,
            skipped,
        })
    }

    fn check_cache(&self, cache: &ConfigCache, fingerprint: &str) -> Result<CacheEntry, MissReason> {
        match cache.try_load() {
            CacheLoad::Absent => Err(MissReason::Absent),
            CacheLoad::Unreadable(reason) => {
                warn!(
                    "Ignoring unreadable cache {}: {}",
                    cache.path().display(),
                    reason
                );
                Err(MissReason::Unreadable(reason))
            }
            CacheLoad::Loaded(entry) => {
                match entry.staleness(&self.config.compiler_id, self.config.opt_level, fingerprint) {
                    None => Ok(entry),
                    Some(reason) => Err(MissReason::Stale(reason)),
                }
            }
        }
    }

    fn declaration<'b>(
        &'b self,
        primaries: &'b [PackageDeclaration],
        name: &str,
    ) -> Option<&'b PackageDeclaration> {
        primaries
            .iter()
            .find(|d| d.name() == name)
            .or_else(|| self.registry.declaration(name))
    }

    fn configure_node(
        &self,
        node: &ResolvedNode,
        env: &Environment,
        configured: &ConfiguredSet,
    ) -> ConfigureResult {
        match self.registry.adapter(&node.name) {
            Some(adapter) if node.primary => {
                debug!("Adding flags of primary package '{}'", node.name);
                adapter.configure_primary(env)
            }
            Some(adapter) => {
                info!("Configuring {}", node.name);
                adapter.configure(env, configured, self.config.options, self.prober)
            }
            None => ConfigureResult::ok(Default::default()),
        }
    }
}

/// Strict-mode error for an optional dependency a cached lenient pass skipped
fn cached_optional_failure(node: &ResolvedNode, cached: &[Diagnostic]) -> BuildError {
    let dependent = node.dependent.as_deref().unwrap_or(&node.name);
    let mut messages: Vec<String> = cached
        .iter()
        .filter(|d| d.package == dependent && d.message.contains(&format!("'{}'", node.name)))
        .map(|d| d.message.clone())
        .collect();
    if messages.is_empty() {
        messages.push(format!("'{}' was skipped by the cached configuration", node.name));
    }
    BuildError::missing_optional(dependent, &node.name, messages)
}

fn skipped_nodes(resolution: &Resolution, environment: &Environment) -> Vec<String> {
    resolution
        .order
        .iter()
        .filter(|n| !environment.is_configured(&n.name))
        .map(|n| n.name.clone())
        .collect()
}
