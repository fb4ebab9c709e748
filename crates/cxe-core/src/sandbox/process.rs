//! Plain-subprocess sandbox backend.
//!
//! Runs the command directly on the host with wall-clock enforcement and
//! merged output, but without memory/cpu isolation. Used for development
//! and for the test suite, where the Docker daemon is not assumed.

use chrono::Utc;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{Sandbox, SandboxError, SandboxOutcome, SandboxSpec, TIMEOUT_EXIT_CODE, shell_quote};

/// Sandbox backend that spawns the argv as a direct child process.
///
/// The working directory is the first mount's host path, so the same
/// [`SandboxSpec`] (argv with relative paths) drives both this backend
/// and the Docker backend.
#[derive(Debug, Default)]
pub struct ProcessSandbox;

impl ProcessSandbox {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Sandbox for ProcessSandbox {
    fn name(&self) -> &str {
        "process"
    }

    async fn run(&self, spec: &SandboxSpec) -> Result<SandboxOutcome, SandboxError> {
        let cwd = spec
            .mounts
            .first()
            .map(|m| m.host.clone())
            .unwrap_or_else(|| spec.workdir.clone());

        // `exec` replaces the shell so that killing the child hits the
        // real process; `2>&1` merges stderr into the captured stream in
        // arrival order.
        let script = format!(
            "exec {} 2>&1",
            spec.argv.iter().map(|a| shell_quote(a)).collect::<Vec<_>>().join(" ")
        );

        let started_at = Utc::now();
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&script)
            .current_dir(&cwd)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null());
        // Own process group so a timeout kill reaches grandchildren that
        // would otherwise keep the stdout pipe open.
        #[cfg(unix)]
        cmd.process_group(0);
        let mut child = cmd
            .spawn()
            .map_err(|e| SandboxError::Unavailable(format!("failed to spawn shell: {e}")))?;

        // Read stdout concurrently with waiting so a chatty child cannot
        // fill the pipe buffer and deadlock; on timeout the partial output
        // read so far is still returned.
        let mut stdout_pipe = child.stdout.take();
        let reader = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(ref mut pipe) = stdout_pipe {
                pipe.read_to_end(&mut buf).await.ok();
            }
            String::from_utf8_lossy(&buf).into_owned()
        });

        let (exit_code, timed_out) =
            match tokio::time::timeout(spec.limits.wall_clock, child.wait()).await {
                Ok(Ok(status)) => (status.code().unwrap_or(-1), false),
                Ok(Err(e)) => {
                    return Err(SandboxError::Internal(format!(
                        "failed to wait on sandboxed process: {e}"
                    )));
                }
                Err(_) => {
                    debug!(argv = ?spec.argv, "wall-clock limit hit, terminating process");
                    terminate(&mut child).await;
                    (TIMEOUT_EXIT_CODE, true)
                }
            };

        // A surviving grandchild could hold the pipe open indefinitely;
        // after a kill, bound the wait for the captured output.
        let stdout_merged = if timed_out {
            match tokio::time::timeout(std::time::Duration::from_secs(2), reader).await {
                Ok(Ok(output)) => output,
                _ => String::new(),
            }
        } else {
            reader.await.unwrap_or_default()
        };
        let finished_at = Utc::now();

        Ok(SandboxOutcome {
            exit_code,
            stdout_merged,
            // No isolation boundary to sample; unknown, not zero.
            peak_memory_bytes: None,
            timed_out,
            started_at,
            finished_at,
        })
    }

    async fn probe(&self) -> Result<(), SandboxError> {
        let status = Command::new("sh")
            .args(["-c", "true"])
            .status()
            .await
            .map_err(|e| SandboxError::Unavailable(format!("sh not runnable: {e}")))?;
        if !status.success() {
            return Err(SandboxError::Unavailable(format!(
                "sh probe exited with {status}"
            )));
        }
        Ok(())
    }
}

/// SIGTERM to the process group first, SIGKILL if it does not exit
/// promptly.
async fn terminate(child: &mut tokio::process::Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: pid is a valid u32 from a child we spawned into its own
        // process group; the negative pid addresses the whole group.
        let ret = unsafe { libc::kill(-(pid as i32), libc::SIGTERM) };
        if ret != 0 {
            warn!(pid, "SIGTERM to process group failed, proceeding to SIGKILL");
        }
    }

    let exited =
        tokio::time::timeout(std::time::Duration::from_millis(500), child.wait()).await;
    if exited.is_err() {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            // SAFETY: as above.
            unsafe { libc::kill(-(pid as i32), libc::SIGKILL) };
        }
        let _ = child.kill().await;
        let _ = child.wait().await;
    }
}
