use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

/// Keel native package configuration engine.
///
/// Resolves the dependencies of a native package, probes each one with the
/// selected compiler and hands the accumulated include paths, libraries and
/// defines to the build tool. Results are cached until the compiler, the
/// optimization level or a declaration changes.
///
/// EXAMPLES:
///     keel configure                      Configure the project in this directory
///     keel configure --libs "main test"   Print the libraries to link
///     keel resolve                        Show the configuration order
///     keel query .keel_temp/build-cache.toml --default-cc gcc --default-opt 3
///
/// ENVIRONMENT VARIABLES:
///     KEEL_LOG                       Log filter (default: warn)
///     KEEL_JSON                      Set to '1' for JSON output by default
///     KEEL_CC, KEEL_OPT              Compiler and optimization level
///     KEEL_STRICT                    Escalate optional dependency failures
///     KEEL_CACHE                     Cache file location
///     KEEL_DECLARATION_PATH          Extra declaration directories
///     KEEL_AVOID_MANAGED_TOOLCHAIN   Ignore managed (conda) include layouts
#[derive(Parser)]
#[command(name = "keel")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Log progress to stderr
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure the project and print the build environment
    ///
    /// Resolves dependencies, runs header and library probes for every
    /// dependency not already cached and writes the configuration cache.
    ///
    /// EXAMPLES:
    ///     keel configure                   Configure and print flags
    ///     keel configure --opt 0 --cc clang
    ///     keel configure --no-build-probes Check headers exist, skip compiling
    ///     keel configure --json            Output the environment as JSON
    Configure {
        /// Project directory (defaults to the current directory)
        #[arg(long)]
        project: Option<PathBuf>,
        /// Compiler command (gcc, clang, icc, cc, optionally versioned)
        #[arg(long)]
        cc: Option<String>,
        /// Optimization level (0-3)
        #[arg(long)]
        opt: Option<u8>,
        /// Fail when an optional dependency is unavailable
        #[arg(long)]
        strict: bool,
        /// Only check that headers exist; do not compile or link probes
        #[arg(long)]
        no_build_probes: bool,
        /// Cache file location
        #[arg(long, conflicts_with = "no_cache")]
        cache: Option<PathBuf>,
        /// Always reconfigure and do not write a cache
        #[arg(long)]
        no_cache: bool,
        /// Print only the libraries of these categories (e.g. "main test self")
        #[arg(long)]
        libs: Option<String>,
        /// Output in JSON format
        #[arg(long, env = "KEEL_JSON")]
        json: bool,
    },

    /// Print the dependency configuration order without probing
    ///
    /// EXAMPLES:
    ///     keel resolve           Show order and warnings
    ///     keel resolve --json    Output as JSON
    Resolve {
        /// Project directory (defaults to the current directory)
        #[arg(long)]
        project: Option<PathBuf>,
        /// Output in JSON format
        #[arg(long, env = "KEEL_JSON")]
        json: bool,
    },

    /// Print the compiler and optimization level recorded in a cache file
    ///
    /// Prints `cc=<compiler> opt=<level>`. A missing or unreadable file
    /// falls back to the defaults and prints a warning on stderr.
    ///
    /// EXAMPLES:
    ///     keel query .keel_temp/build-cache.toml
    ///     keel query --default-cc clang --default-opt 2
    Query {
        /// Cache file to read
        cache_path: Option<PathBuf>,
        /// Compiler reported when the cache cannot be read
        #[arg(long, default_value = keel_config::loader::DEFAULT_COMPILER)]
        default_cc: String,
        /// Optimization level reported when the cache cannot be read
        #[arg(long, default_value_t = keel_config::loader::DEFAULT_OPT_LEVEL)]
        default_opt: u8,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cli_config = config::Config::from_env();
    init_logging(cli.verbose, &cli_config);

    match cli.command {
        Commands::Configure {
            project,
            cc,
            opt,
            strict,
            no_build_probes,
            cache,
            no_cache,
            libs,
            json,
        } => {
            let args = commands::configure::ConfigureArgs {
                project_dir: project,
                cc,
                opt,
                strict,
                no_build_probes,
                cache,
                no_cache,
                libs,
                json,
            };
            commands::configure::run(args)?;
        }
        Commands::Resolve { project, json } => {
            commands::resolve::run(project.as_deref(), json)?;
        }
        Commands::Query {
            cache_path,
            default_cc,
            default_opt,
        } => {
            commands::query::run(cache_path.as_deref(), &default_cc, default_opt)?;
        }
    }

    Ok(())
}

/// Install the stderr log subscriber
///
/// `KEEL_LOG` takes precedence; otherwise warnings only, or info with
/// `--verbose`.
fn init_logging(verbose: bool, cli_config: &config::Config) {
    let filter = match &cli_config.log_filter {
        Some(directives) => EnvFilter::new(directives),
        None if verbose => EnvFilter::new("info"),
        None => EnvFilter::new("warn"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}
