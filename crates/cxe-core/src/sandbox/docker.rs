//! Docker sandbox backend.
//!
//! Launches each invocation as `docker run` with the network disabled, a
//! hard memory limit, a CPU share cap, and only the per-submission working
//! directory bind-mounted. Stdout and stderr are merged at the shell level
//! so harness markers keep their interleaving order. While the container
//! runs, a sampler polls `docker stats` for the peak memory observation.

use std::sync::Arc;

use chrono::Utc;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{
    Sandbox, SandboxError, SandboxOutcome, SandboxSpec, TIMEOUT_EXIT_CODE, shell_escape,
    shell_quote,
};

/// Stats sampling period. Two samples per second is the floor the runner
/// guarantees; short-lived processes may still produce zero samples.
const STATS_PERIOD_MS: u64 = 500;

/// Sandbox backend that runs commands inside Docker containers.
#[derive(Debug, Clone)]
pub struct DockerSandbox {
    /// Path to the `docker` binary. Defaults to `"docker"` (found via
    /// `$PATH`).
    docker_binary: String,
}

impl DockerSandbox {
    /// Create a backend that looks for `docker` on `$PATH`.
    pub fn new() -> Self {
        Self {
            docker_binary: "docker".to_string(),
        }
    }

    /// Create a backend with a custom binary path. Useful for testing.
    pub fn with_binary(path: impl Into<String>) -> Self {
        Self {
            docker_binary: path.into(),
        }
    }

    /// Unique container name so the runner can `docker kill` on timeout
    /// and address `docker stats` while the container runs.
    fn container_name() -> String {
        format!("cxe-run-{}", uuid::Uuid::new_v4().simple())
    }

    fn run_script(&self, spec: &SandboxSpec, container_name: &str) -> String {
        let mut parts: Vec<String> = vec![
            "exec".to_string(),
            shell_quote(&self.docker_binary),
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            container_name.to_string(),
            "--network".to_string(),
            "none".to_string(),
            "--memory".to_string(),
            spec.limits.memory_bytes.to_string(),
            "--cpus".to_string(),
            format!("{}", spec.limits.cpu_share),
        ];
        for mount in &spec.mounts {
            parts.push("-v".to_string());
            parts.push(format!(
                "{}:{}",
                shell_escape(&mount.host),
                mount.container.display()
            ));
        }
        parts.push("-w".to_string());
        parts.push(shell_escape(&spec.workdir));
        parts.push(shell_quote(&spec.image));
        for arg in &spec.argv {
            parts.push(shell_quote(arg));
        }
        parts.push("2>&1".to_string());
        parts.join(" ")
    }
}

impl Default for DockerSandbox {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Sandbox for DockerSandbox {
    fn name(&self) -> &str {
        "docker"
    }

    async fn run(&self, spec: &SandboxSpec) -> Result<SandboxOutcome, SandboxError> {
        let container_name = Self::container_name();
        let script = self.run_script(spec, &container_name);

        let started_at = Utc::now();
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&script)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| SandboxError::Unavailable(format!("failed to spawn docker: {e}")))?;

        let mut stdout_pipe = child.stdout.take();
        let reader = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(ref mut pipe) = stdout_pipe {
                pipe.read_to_end(&mut buf).await.ok();
            }
            String::from_utf8_lossy(&buf).into_owned()
        });

        // Sample the stats channel until the run finishes.
        let peak = Arc::new(Mutex::new(None::<u64>));
        let sampler_cancel = CancellationToken::new();
        let sampler = tokio::spawn(sample_peak_memory(
            self.docker_binary.clone(),
            container_name.clone(),
            Arc::clone(&peak),
            sampler_cancel.clone(),
        ));

        let (exit_code, timed_out) =
            match tokio::time::timeout(spec.limits.wall_clock, child.wait()).await {
                Ok(Ok(status)) => (status.code().unwrap_or(-1), false),
                Ok(Err(e)) => {
                    sampler_cancel.cancel();
                    let _ = sampler.await;
                    return Err(SandboxError::Internal(format!(
                        "failed to wait on docker run: {e}"
                    )));
                }
                Err(_) => {
                    debug!(container = %container_name, "wall-clock limit hit, killing container");
                    let kill = Command::new(&self.docker_binary)
                        .args(["kill", &container_name])
                        .output()
                        .await;
                    if let Err(e) = kill {
                        warn!(container = %container_name, error = %e, "docker kill failed");
                    }
                    let _ = child.wait().await;
                    (TIMEOUT_EXIT_CODE, true)
                }
            };

        sampler_cancel.cancel();
        let _ = sampler.await;

        // If `docker kill` failed, the attached CLI may never close the
        // pipe; bound the wait after a timeout.
        let stdout_merged = if timed_out {
            match tokio::time::timeout(std::time::Duration::from_secs(2), reader).await {
                Ok(Ok(output)) => output,
                _ => String::new(),
            }
        } else {
            reader.await.unwrap_or_default()
        };
        let finished_at = Utc::now();

        // `docker run` reserves 125 (daemon error), 126 (command not
        // runnable) and 127 (command not found) for its own failures.
        if !timed_out && (125..=127).contains(&exit_code) {
            return Err(SandboxError::Unavailable(format!(
                "docker run exited {exit_code}: {}",
                stdout_merged.trim()
            )));
        }

        let peak_memory_bytes = *peak.lock().await;

        Ok(SandboxOutcome {
            exit_code,
            stdout_merged,
            peak_memory_bytes,
            timed_out,
            started_at,
            finished_at,
        })
    }

    async fn probe(&self) -> Result<(), SandboxError> {
        let output = Command::new(&self.docker_binary)
            .args(["version", "--format", "{{.Server.Version}}"])
            .output()
            .await
            .map_err(|e| SandboxError::Unavailable(format!("docker not runnable: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SandboxError::Unavailable(format!(
                "docker daemon unreachable: {}",
                stderr.trim()
            )));
        }
        Ok(())
    }
}

/// Poll `docker stats` for the container and record the peak memory
/// observation until cancelled.
async fn sample_peak_memory(
    docker_binary: String,
    container_name: String,
    peak: Arc<Mutex<Option<u64>>>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(std::time::Duration::from_millis(STATS_PERIOD_MS));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {}
        }

        let output = Command::new(&docker_binary)
            .args([
                "stats",
                "--no-stream",
                "--format",
                "{{.MemUsage}}",
                &container_name,
            ])
            .output()
            .await;

        let Ok(output) = output else { continue };
        if !output.status.success() {
            // Container not up yet or already gone.
            continue;
        }
        let text = String::from_utf8_lossy(&output.stdout);
        if let Some(sample) = parse_mem_usage(text.trim()) {
            let mut guard = peak.lock().await;
            match *guard {
                Some(current) if current >= sample => {}
                _ => *guard = Some(sample),
            }
        }
    }
}

/// Parse the current-usage half of a `docker stats` MemUsage cell, e.g.
/// `"15.2MiB / 256MiB"` -> bytes.
fn parse_mem_usage(cell: &str) -> Option<u64> {
    let current = cell.split('/').next()?.trim();
    let split_at = current.find(|c: char| c.is_ascii_alphabetic())?;
    let (number, unit) = current.split_at(split_at);
    let value: f64 = number.trim().parse().ok()?;
    let scale: f64 = match unit.trim() {
        "B" => 1.0,
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        "kB" | "KB" => 1000.0,
        "MB" => 1e6,
        "GB" => 1e9,
        _ => return None,
    };
    Some((value * scale) as u64)
}
