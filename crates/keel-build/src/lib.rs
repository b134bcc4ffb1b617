//! Keel configuration engine
//!
//! Prepares native packages for compilation by an external build tool:
//! - Dependency resolution with cycle detection (required vs optional edges)
//! - Per-dependency header and library probes through a pluggable [`Prober`]
//! - Accumulation of include/library paths, libraries and defines
//! - A configuration cache that skips probing when nothing relevant changed
//! - Compiler toolchain identification
//!
//! # Example
//!
//! ```no_run
//! use keel_build::{Configurator, PackageDeclaration, Registry, Toolchain, ToolchainProber};
//! use std::path::PathBuf;
//!
//! let registry = Registry::load(&[PathBuf::from("declarations")]).unwrap();
//! let toolchain = Toolchain::detect("gcc").unwrap();
//! let prober = ToolchainProber::new(toolchain.clone(), ".keel_temp/probes");
//!
//! let app = PackageDeclaration::new("app", ".").requires("fftw").optionally("eigen");
//! let report = Configurator::new(&registry, &prober)
//!     .with_compiler_id(toolchain.compiler_id())
//!     .with_cache(".keel_temp/build-cache.toml")
//!     .run(&[app])
//!     .unwrap();
//! println!("{:?}", report.environment.libs_for("main"));
//! ```

pub mod adapter;
pub mod cache;
pub mod configurator;
pub mod environment;
pub mod error;
pub mod package;
pub mod probe;
pub mod registry;
pub mod resolver;
pub mod toolchain;

// Re-export main types
pub use adapter::{
    ConfigurationAdapter, ConfigureOptions, ConfigureResult, ConfiguredSet, FlagHook,
};
pub use cache::{
    compute_fingerprint, query_effective, CacheEntry, CacheStatus, ConfigCache, MissReason,
    QueryResult, StaleReason,
};
pub use configurator::{
    ConfigurationReport, ConfigureConfig, ConfigureStats, Configurator, Diagnostic,
};
pub use environment::{Environment, EnvironmentAccumulator, EnvironmentDelta, LibTarget};
pub use error::{BuildError, BuildResult};
pub use package::{DependencyRef, PackageDeclaration, Requirement};
pub use probe::{ProbeOutcome, ProbeRequest, Prober, ToolchainProber};
pub use registry::{RegisteredPackage, Registry};
pub use resolver::{Resolution, ResolutionError, ResolvedNode, Resolver};
pub use toolchain::{managed_environment_active, CompilerFamily, OptLevel, Toolchain};
