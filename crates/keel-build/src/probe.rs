//! Header and library probes
//!
//! A probe is a minimal compile (header) or link (library) against the
//! environment accumulated so far. Adapters only see the [`Prober`] trait so
//! tests can substitute a fake for the real toolchain.

use crate::environment::Environment;
use crate::toolchain::Toolchain;
use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// What a probe checks for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProbeRequest {
    /// A header that must compile when included
    Header(String),
    /// A library that must link
    Library(String),
}

impl fmt::Display for ProbeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Header(name) => write!(f, "header '{}'", name),
            Self::Library(name) => write!(f, "library '{}'", name),
        }
    }
}

/// Result of one probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Found,
    Missing { detail: String },
    TimedOut { after: Duration },
}

impl ProbeOutcome {
    /// Check whether the probe succeeded
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found)
    }

    /// Human-readable diagnostic for a failed probe
    pub fn diagnostic(&self, request: &ProbeRequest) -> Option<String> {
        match self {
            Self::Found => None,
            Self::Missing { detail } if detail.is_empty() => {
                Some(format!("{} not found", request))
            }
            Self::Missing { detail } => Some(format!("{} not found: {}", request, detail)),
            Self::TimedOut { after } => Some(format!(
                "{} probe timed out after {}s",
                request,
                after.as_secs_f64()
            )),
        }
    }
}

/// Capability to run a probe against an environment
pub trait Prober {
    fn probe(&self, request: &ProbeRequest, env: &Environment) -> ProbeOutcome;
}

/// Prober that invokes the configured compiler
///
/// All probes share one scratch directory, so calls must not overlap.
#[derive(Debug)]
pub struct ToolchainProber {
    toolchain: Toolchain,
    scratch_dir: PathBuf,
    timeout: Duration,
    counter: AtomicUsize,
}

impl ToolchainProber {
    /// Create a prober writing its sources under `scratch_dir`
    pub fn new(toolchain: Toolchain, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            toolchain,
            scratch_dir: scratch_dir.into(),
            timeout: keel_config::loader::DEFAULT_PROBE_TIMEOUT,
            counter: AtomicUsize::new(0),
        }
    }

    /// Set the per-probe timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Toolchain used for probes
    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    fn command(
        &self,
        request: &ProbeRequest,
        env: &Environment,
        stem: &Path,
    ) -> std::io::Result<Command> {
        let (compiler, source, body) = match request {
            ProbeRequest::Header(header) => {
                let is_c = header.ends_with(".h");
                let compiler = if is_c {
                    self.toolchain.cc()
                } else {
                    self.toolchain.cxx()
                };
                let extension = if is_c { "c" } else { "cc" };
                (
                    compiler,
                    stem.with_extension(extension),
                    format!("#include <{}>\nint main(void) {{ return 0; }}\n", header),
                )
            }
            ProbeRequest::Library(_) => (
                self.toolchain.cc(),
                stem.with_extension("c"),
                "int main(void) { return 0; }\n".to_string(),
            ),
        };
        fs::write(&source, body)?;

        let mut words = compiler.split_whitespace();
        let program = words.next().unwrap_or(compiler);
        let mut cmd = Command::new(program);
        cmd.args(words).args(env.compile_flags());

        match request {
            ProbeRequest::Header(_) => {
                cmd.arg("-c")
                    .arg(&source)
                    .arg("-o")
                    .arg(stem.with_extension("o"));
            }
            ProbeRequest::Library(lib) => {
                cmd.arg(&source)
                    .arg("-o")
                    .arg(stem.with_extension("out"))
                    .args(env.link_flags(std::slice::from_ref(lib)));
            }
        }
        Ok(cmd)
    }

    /// Create the scratch directory and return its absolute path
    ///
    /// Probe commands run inside it and name their sources by the same
    /// path, so a relative directory would be applied twice.
    fn prepare_scratch_dir(&self) -> std::io::Result<PathBuf> {
        fs::create_dir_all(&self.scratch_dir)?;
        fs::canonicalize(&self.scratch_dir)
    }

    fn run(&self, mut cmd: Command, dir: &Path, log_path: &Path) -> ProbeOutcome {
        let log = match File::create(log_path) {
            Ok(file) => file,
            Err(e) => {
                return ProbeOutcome::Missing {
                    detail: format!("cannot create {}: {}", log_path.display(), e),
                }
            }
        };

        let mut child = match cmd
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(log)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return ProbeOutcome::Missing {
                    detail: format!("cannot run compiler: {}", e),
                }
            }
        };

        let started = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) if status.success() => return ProbeOutcome::Found,
                Ok(Some(_)) => {
                    let detail = fs::read_to_string(log_path)
                        .ok()
                        .and_then(|text| {
                            text.lines()
                                .find(|line| line.contains("error"))
                                .map(str::to_string)
                        })
                        .unwrap_or_default();
                    return ProbeOutcome::Missing { detail };
                }
                Ok(None) if started.elapsed() >= self.timeout => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return ProbeOutcome::TimedOut {
                        after: self.timeout,
                    };
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    return ProbeOutcome::Missing {
                        detail: e.to_string(),
                    }
                }
            }
        }
    }
}

impl Prober for ToolchainProber {
    fn probe(&self, request: &ProbeRequest, env: &Environment) -> ProbeOutcome {
        let scratch_dir = match self.prepare_scratch_dir() {
            Ok(dir) => dir,
            Err(e) => {
                return ProbeOutcome::Missing {
                    detail: format!("cannot create {}: {}", self.scratch_dir.display(), e),
                }
            }
        };

        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let stem = scratch_dir.join(format!("probe_{}", n));
        debug!("Probing {} ({})", request, stem.display());

        let outcome = match self.command(request, env, &stem) {
            Ok(cmd) => self.run(cmd, &scratch_dir, &stem.with_extension("log")),
            Err(e) => ProbeOutcome::Missing {
                detail: format!("cannot write probe source: {}", e),
            },
        };
        debug!("Probe of {}: {:?}", request, outcome);
        outcome
    }
}

/// Check for a header under the include paths without compiling
pub fn locate_header(header: &str, env: &Environment) -> Option<PathBuf> {
    env.flags
        .include_paths
        .iter()
        .chain(&env.flags.system_include_paths)
        .map(|dir| dir.join(header))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::EnvironmentDelta;
    use crate::toolchain::OptLevel;
    use tempfile::TempDir;

    #[test]
    fn test_diagnostics() {
        let header = ProbeRequest::Header("fftw3.h".to_string());
        assert_eq!(ProbeOutcome::Found.diagnostic(&header), None);
        assert_eq!(
            ProbeOutcome::Missing {
                detail: String::new()
            }
            .diagnostic(&header)
            .unwrap(),
            "header 'fftw3.h' not found"
        );
        assert!(ProbeOutcome::TimedOut {
            after: Duration::from_secs(2)
        }
        .diagnostic(&ProbeRequest::Library("m".to_string()))
        .unwrap()
        .contains("timed out"));
    }

    #[test]
    fn test_locate_header() {
        let temp_dir = TempDir::new().unwrap();
        let include = temp_dir.path().join("include");
        fs::create_dir_all(include.join("boost")).unwrap();
        fs::write(include.join("boost/version.hpp"), "").unwrap();

        let env = Environment::new("gcc", OptLevel::O0)
            .with_delta(&EnvironmentDelta::new().with_system_include_path(&include));

        assert_eq!(
            locate_header("boost/version.hpp", &env),
            Some(include.join("boost/version.hpp"))
        );
        assert_eq!(locate_header("fftw3.h", &env), None);
    }

    fn prober(scratch_dir: impl Into<PathBuf>) -> ToolchainProber {
        ToolchainProber::new(Toolchain::from_cc("gcc").unwrap(), scratch_dir)
    }

    #[cfg(unix)]
    #[test]
    fn test_relative_scratch_dir_is_not_applied_twice() {
        let temp_dir = tempfile::Builder::new()
            .prefix("keel-scratch")
            .tempdir_in(".")
            .unwrap();
        let relative = temp_dir.path().join("probes");
        assert!(relative.is_relative());
        let prober = prober(&relative);

        let scratch_dir = prober.prepare_scratch_dir().unwrap();
        assert!(scratch_dir.is_absolute());
        assert!(scratch_dir.ends_with("probes"));

        let source = scratch_dir.join("probe_0.c");
        fs::write(&source, "int main(void) { return 0; }\n").unwrap();
        let mut cmd = Command::new("cat");
        cmd.arg(&source);
        let outcome = prober.run(cmd, &scratch_dir, &scratch_dir.join("probe_0.log"));
        assert_eq!(outcome, ProbeOutcome::Found);
    }

    #[cfg(unix)]
    #[test]
    fn test_hung_command_times_out() {
        let temp_dir = TempDir::new().unwrap();
        let prober = prober(temp_dir.path()).with_timeout(Duration::from_millis(1));

        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let started = Instant::now();
        let outcome = prober.run(cmd, temp_dir.path(), &temp_dir.path().join("sleep.log"));

        assert_eq!(
            outcome,
            ProbeOutcome::TimedOut {
                after: Duration::from_millis(1)
            }
        );
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_missing_compiler_is_a_failed_probe() {
        let temp_dir = TempDir::new().unwrap();
        let toolchain = Toolchain::from_cc("gcc-999").unwrap();
        let prober = ToolchainProber::new(toolchain, temp_dir.path().join("probes"))
            .with_timeout(Duration::from_secs(5));

        let env = Environment::new("gcc", OptLevel::O0);
        let outcome = prober.probe(&ProbeRequest::Header("stdio.h".to_string()), &env);
        assert!(matches!(outcome, ProbeOutcome::Missing { .. }));
    }
}
