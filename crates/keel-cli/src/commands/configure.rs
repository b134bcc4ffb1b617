//! Configure command - resolve, probe and print the build environment

use super::{load_project, scratch_dir};
use anyhow::{Context, Result};
use keel_build::{
    managed_environment_active, ConfigurationReport, Configurator, OptLevel, Toolchain,
    ToolchainProber,
};
use std::path::PathBuf;

/// Configure command arguments
#[derive(Default)]
pub struct ConfigureArgs {
    /// Project directory (defaults to current directory)
    pub project_dir: Option<PathBuf>,
    /// Compiler command override
    pub cc: Option<String>,
    /// Optimization level override
    pub opt: Option<u8>,
    /// Escalate optional dependency failures
    pub strict: bool,
    /// Header existence checks only
    pub no_build_probes: bool,
    /// Cache file override
    pub cache: Option<PathBuf>,
    /// Disable the cache
    pub no_cache: bool,
    /// Print only these library categories
    pub libs: Option<String>,
    /// JSON output
    pub json: bool,
}

/// Run the configure command
pub fn run(args: ConfigureArgs) -> Result<()> {
    let mut project = load_project(args.project_dir.as_deref())?;

    if let Some(cc) = &args.cc {
        project.config.project.toolchain_mut().cc = Some(cc.clone());
    }
    if let Some(opt) = args.opt {
        project.config.project.toolchain_mut().opt = Some(opt);
    }
    let config = &project.config;

    let opt_level = OptLevel::try_from(config.opt_level())?;
    let toolchain = Toolchain::detect(config.compiler())
        .with_context(|| format!("Cannot use compiler '{}'", config.compiler()))?;

    let cache_path = args.cache.clone().unwrap_or_else(|| config.cache_path());
    let prober = ToolchainProber::new(toolchain.clone(), scratch_dir(&cache_path))
        .with_timeout(config.probe_timeout());

    let configurator = Configurator::new(&project.registry, &prober)
        .with_compiler_id(toolchain.compiler_id())
        .with_opt_level(opt_level)
        .with_strict(args.strict || config.strict())
        .with_attempt_build(config.attempt_build() && !args.no_build_probes)
        .with_managed_layout(managed_environment_active());
    let configurator = if args.no_cache {
        configurator.without_cache()
    } else {
        configurator.with_cache(cache_path)
    };

    let report = configurator
        .run(std::slice::from_ref(&project.primary))
        .context("Configuration failed")?;

    if let Some(categories) = &args.libs {
        print_libs(&report, categories, args.json)?;
    } else if args.json {
        print_json(&report)?;
    } else {
        print_summary(&report);
    }

    Ok(())
}

fn print_libs(report: &ConfigurationReport, categories: &str, json: bool) -> Result<()> {
    let libs = report.environment.libs_for(categories);
    if json {
        println!("{}", serde_json::to_string(&libs)?);
    } else {
        println!("{}", libs.join(" "));
    }
    Ok(())
}

fn print_json(report: &ConfigurationReport) -> Result<()> {
    let env = &report.environment;
    let diagnostics: Vec<_> = report
        .diagnostics
        .iter()
        .map(|d| serde_json::json!({ "package": d.package, "message": d.message }))
        .collect();

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "success": true,
            "cache": report.cache.to_string(),
            "fingerprint": report.fingerprint,
            "probes_run": report.stats.probes_run,
            "elapsed": report.stats.elapsed.as_secs_f64(),
            "environment": serde_json::to_value(env)?,
            "compile_flags": env.compile_flags(),
            "link_flags": env.link_flags(&env.libs_for("main")),
            "skipped": report.skipped,
            "diagnostics": diagnostics,
        }))?
    );
    Ok(())
}

fn print_summary(report: &ConfigurationReport) {
    let env = &report.environment;

    println!("\n{}", "=".repeat(60));
    println!(
        "Configured {} package(s) in {:.2}s",
        report.stats.packages_configured,
        report.stats.elapsed.as_secs_f64()
    );
    println!("{}", "=".repeat(60));
    println!("  Compiler: {}", env.compiler_id);
    println!("  Optimization: {}", env.opt_level.flag());
    println!("  Cache: {}", report.cache);
    println!("  Checks run: {}", report.stats.probes_run);
    println!("  Order: {}", env.configured.join(", "));
    if !report.skipped.is_empty() {
        println!("  Skipped: {}", report.skipped.join(", "));
    }
    println!("  Compile flags: {}", env.compile_flags().join(" "));
    println!("  Link flags: {}", env.link_flags(&env.libs_for("main")).join(" "));
    println!("{}", "=".repeat(60));

    for diagnostic in &report.diagnostics {
        eprintln!("warning: {}: {}", diagnostic.package, diagnostic.message);
    }
}
