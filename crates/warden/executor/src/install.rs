use crate::error::ExecutorError;
use crate::process::{self, ProcessSpec, DEFAULT_MAX_STREAM_BYTES};
use crate::verify::{VerificationProbe, DEFAULT_VERIFY_TIMEOUT_SECS};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use warden_types::{InstallationOutcome, PackageName, ResolvedVersion};

pub const DEFAULT_INSTALL_TIMEOUT_SECS: u64 = 300;
const FALLBACK_INTERPRETER: &str = "python3";

/// Installer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallerConfig {
    /// Interpreter whose package manager is driven. Falls back to the active
    /// virtualenv, then `python3`.
    #[serde(default)]
    pub interpreter: Option<PathBuf>,

    #[serde(default = "default_install_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_verify_timeout_secs")]
    pub verify_timeout_secs: u64,

    /// Extra flags appended after `pip install`, e.g. `--no-cache-dir`.
    #[serde(default)]
    pub extra_args: Vec<String>,

    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            interpreter: None,
            timeout_secs: default_install_timeout_secs(),
            verify_timeout_secs: default_verify_timeout_secs(),
            extra_args: Vec::new(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

fn default_install_timeout_secs() -> u64 {
    DEFAULT_INSTALL_TIMEOUT_SECS
}

fn default_verify_timeout_secs() -> u64 {
    DEFAULT_VERIFY_TIMEOUT_SECS
}

fn default_max_output_bytes() -> usize {
    DEFAULT_MAX_STREAM_BYTES
}

impl InstallerConfig {
    /// Interpreter to run, never a bare system `pip`.
    pub fn resolve_interpreter(&self) -> PathBuf {
        if let Some(explicit) = &self.interpreter {
            return explicit.clone();
        }
        if let Some(venv) = std::env::var_os("VIRTUAL_ENV") {
            let candidate = Path::new(&venv).join("bin").join("python");
            if candidate.exists() {
                return candidate;
            }
        }
        PathBuf::from(FALLBACK_INTERPRETER)
    }
}

/// Installs and verifies packages on the host.
#[async_trait]
pub trait PackageInstaller: Send + Sync {
    /// Install one package. Failures are reported in the outcome, never
    /// raised.
    async fn install(&self, package: &PackageName, version: &ResolvedVersion) -> InstallationOutcome;

    /// Best-effort check that the installed package can be loaded.
    async fn verify(&self, package: &PackageName) -> bool;
}

/// Drives `<interpreter> -m pip install`.
#[derive(Debug, Clone)]
pub struct PipInstaller {
    interpreter: PathBuf,
    timeout: Duration,
    extra_args: Vec<String>,
    max_output_bytes: usize,
    probe: VerificationProbe,
    spawned: Arc<AtomicU64>,
}

impl PipInstaller {
    pub fn new(config: &InstallerConfig) -> Self {
        let interpreter = config.resolve_interpreter();
        tracing::info!(interpreter = %interpreter.display(), "Package installer configured");
        Self {
            probe: VerificationProbe::new(
                interpreter.clone(),
                Duration::from_secs(config.verify_timeout_secs),
            ),
            interpreter,
            timeout: Duration::from_secs(config.timeout_secs),
            extra_args: config.extra_args.clone(),
            max_output_bytes: config.max_output_bytes,
            spawned: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }

    /// Installer processes started so far.
    pub fn spawn_count(&self) -> u64 {
        self.spawned.load(Ordering::Relaxed)
    }

    fn spec(&self, requirement: &str) -> ProcessSpec {
        let mut spec = ProcessSpec::new(&self.interpreter, self.timeout)
            .args(["-m", "pip", "install"])
            .args(self.extra_args.iter().cloned())
            .arg(requirement);
        spec.max_stream_bytes = self.max_output_bytes;
        spec
    }
}

#[async_trait]
impl PackageInstaller for PipInstaller {
    #[tracing::instrument(skip(self), fields(package = %package, version = %version))]
    async fn install(&self, package: &PackageName, version: &ResolvedVersion) -> InstallationOutcome {
        let requirement = version.requirement(package);
        let spec = self.spec(&requirement);
        let started = Instant::now();

        self.spawned.fetch_add(1, Ordering::Relaxed);
        tracing::info!(requirement = %requirement, "Starting installation");

        let result = process::run(&spec).await.and_then(|output| {
            if output.success {
                Ok(output)
            } else {
                Err(ExecutorError::NonZeroExit {
                    program: spec.program.display().to_string(),
                    code: output.code,
                    output: output.combined(),
                })
            }
        });

        match result {
            Ok(output) => {
                tracing::info!(
                    duration_ms = output.duration.as_millis() as u64,
                    "Installation finished"
                );
                InstallationOutcome {
                    success: true,
                    raw_tool_output: output.combined(),
                    verified: false,
                    duration: output.duration,
                    error: None,
                    timed_out: false,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Installation failed");
                InstallationOutcome {
                    success: false,
                    raw_tool_output: e.output().to_string(),
                    verified: false,
                    duration: started.elapsed(),
                    error: Some(e.to_string()),
                    timed_out: e.is_timeout(),
                }
            }
        }
    }

    async fn verify(&self, package: &PackageName) -> bool {
        self.probe.verify(package).await
    }
}
