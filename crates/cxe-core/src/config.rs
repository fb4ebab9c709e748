//! Engine configuration. An injected value, not process-global state, so
//! the engine stays embeddable and testable.

use std::path::PathBuf;
use std::time::Duration;

/// Tunables for the execution pipeline. The server binary resolves this
/// from its config file and environment; tests build it directly.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of long-lived worker agents.
    pub worker_count: usize,
    /// Wall-clock limit for the COMPILE phase.
    pub compile_timeout: Duration,
    /// Wall-clock limit for the RUN phase.
    pub run_timeout: Duration,
    /// Hard memory limit enforced by the isolation boundary.
    pub run_memory_limit_bytes: u64,
    /// CPU share handed to the sandbox (e.g. 0.5 of one core).
    pub run_cpu_share: f64,
    /// TTL for status cache records.
    pub cache_ttl: Duration,
    /// Where per-submission working directories are created. Never the
    /// application root.
    pub temp_dir: PathBuf,
    /// Sandbox backend: "docker" or "process".
    pub sandbox_mode: String,
    /// Leave working directories on disk after terminal states, for
    /// forensics. Off by default; cleanup is otherwise unconditional.
    pub keep_workdir: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: 5,
            compile_timeout: Duration::from_secs(30),
            run_timeout: Duration::from_secs(10),
            run_memory_limit_bytes: 256 * 1024 * 1024,
            run_cpu_share: 0.5,
            cache_ttl: Duration::from_secs(3600),
            temp_dir: std::env::temp_dir(),
            sandbox_mode: "docker".to_string(),
            keep_workdir: false,
        }
    }
}
