//! Sandbox runner abstraction.
//!
//! Decouples the orchestrator from the concrete isolation boundary so that
//! different backends (Docker containers, plain subprocesses for
//! development and tests) can be used interchangeably.

pub mod docker;
pub mod process;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Synthetic exit code reported when the runner kills a process at the
/// wall-clock limit. Distinct from any real OS exit code.
pub const TIMEOUT_EXIT_CODE: i32 = -999;

/// A bind mount handed to the sandbox. The mount is the only writable
/// area the sandboxed process sees.
#[derive(Debug, Clone)]
pub struct Mount {
    pub host: PathBuf,
    pub container: PathBuf,
}

/// Resource limits enforced by the isolation boundary itself, not by
/// cooperative checks.
#[derive(Debug, Clone)]
pub struct SandboxLimits {
    pub cpu_share: f64,
    pub memory_bytes: u64,
    pub wall_clock: Duration,
}

/// One sandboxed invocation.
#[derive(Debug, Clone)]
pub struct SandboxSpec {
    /// Image providing the language toolchain (ignored by the process
    /// backend).
    pub image: String,
    pub mounts: Vec<Mount>,
    /// Working directory as seen by the sandboxed process.
    pub workdir: PathBuf,
    pub argv: Vec<String>,
    pub limits: SandboxLimits,
}

/// What came back from a sandboxed invocation. Standard error is merged
/// into the stdout stream to preserve interleaving order for harness
/// markers.
#[derive(Debug, Clone)]
pub struct SandboxOutcome {
    pub exit_code: i32,
    pub stdout_merged: String,
    /// Peak memory observed while sampling the boundary's stats channel;
    /// `None` when sampling is unavailable, never zero-for-unknown.
    pub peak_memory_bytes: Option<u64>,
    pub timed_out: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Failures of the isolation boundary itself, as opposed to outcomes of
/// the sandboxed program (which are reported through [`SandboxOutcome`]).
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The boundary could not run the request at all (daemon unreachable,
    /// image pull failed). The orchestrator retries these with backoff.
    #[error("sandbox unavailable: {0}")]
    Unavailable(String),
    /// A non-retryable internal failure.
    #[error("sandbox internal error: {0}")]
    Internal(String),
}

/// Trait for sandbox runner backends.
#[async_trait]
pub trait Sandbox: Send + Sync + std::fmt::Debug {
    /// Backend name ("docker", "process").
    fn name(&self) -> &str;

    /// Launch a process inside the isolation boundary and wait for it to
    /// finish or hit the wall-clock limit.
    async fn run(&self, spec: &SandboxSpec) -> Result<SandboxOutcome, SandboxError>;

    /// Cheap reachability check used by startup validation.
    async fn probe(&self) -> Result<(), SandboxError>;
}

/// Factory: create a sandbox backend from a mode string.
pub fn create_sandbox(mode: &str) -> Result<Arc<dyn Sandbox>> {
    match mode {
        "docker" => Ok(Arc::new(docker::DockerSandbox::new())),
        "process" => Ok(Arc::new(process::ProcessSandbox::new())),
        other => {
            bail!("unknown sandbox mode: {other:?} (expected \"docker\" or \"process\")")
        }
    }
}

/// Escape a path for use in a shell command.
pub(crate) fn shell_escape(path: &std::path::Path) -> String {
    let s = path.to_string_lossy();
    // Wrap in single quotes, escaping any embedded single quotes.
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Quote an argv element for embedding in an `sh -c` script.
pub(crate) fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', "'\\''"))
}
