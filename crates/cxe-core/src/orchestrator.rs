//! Compile/run orchestrator: drives one submission through WRITE,
//! COMPILE, RUN, and PARSE, and classifies the overall outcome.
//!
//! `execute` is a pure function over (submission, sandbox, workdir); it
//! owns no shared state. Callers that need to publish phase transitions
//! (the worker publishes RUNNING to the status cache) hook in through
//! [`PhaseObserver`].

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::language::LanguageAdapter;
use crate::marker::{self, MARKER_PREFIX};
use crate::model::{ExecutionResult, ExecutionStatus, SubmissionRequest, TestCaseResult};
use crate::sandbox::{Mount, Sandbox, SandboxError, SandboxLimits, SandboxOutcome, SandboxSpec};

/// Backoff schedule for sandbox infrastructure failures.
const RETRY_DELAYS: [Duration; 2] = [Duration::from_millis(200), Duration::from_secs(1)];

/// Cap on how much raw output is surfaced in diagnostics.
const MAX_SURFACED_OUTPUT: usize = 8 * 1024;

/// Execution phases, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPhase {
    Write,
    Compile,
    Run,
    Parse,
}

/// Callback for phase transitions during [`execute`].
#[async_trait]
pub trait PhaseObserver: Send + Sync {
    async fn phase_changed(&self, phase: ExecutionPhase);
}

/// Observer that ignores all transitions.
pub struct NoopObserver;

#[async_trait]
impl PhaseObserver for NoopObserver {
    async fn phase_changed(&self, _phase: ExecutionPhase) {}
}

/// Run one submission to an [`ExecutionResult`].
///
/// Pipeline-level failures (compile error, harness crash, timeout,
/// unreachable sandbox) are classified into the result status; only
/// working-directory I/O failures surface as `Err`.
pub async fn execute(
    submission: &SubmissionRequest,
    adapter: &dyn LanguageAdapter,
    sandbox: &dyn Sandbox,
    config: &EngineConfig,
    workdir: &Path,
    observer: &dyn PhaseObserver,
) -> Result<ExecutionResult> {
    // 1. WRITE: harness generation + sources on disk.
    observer.phase_changed(ExecutionPhase::Write).await;
    let files = match adapter.generate(submission) {
        Ok(files) => files,
        Err(e) => {
            return Ok(internal_error(format!("harness generation failed: {e:#}"), None));
        }
    };
    for file in &files {
        let path = workdir.join(&file.relative_path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&path, &file.contents)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    // 2. COMPILE. A no-op for interpreted languages.
    let compilation_output = match adapter.compile_argv(submission) {
        None => Some(format!("no compilation required for {}", adapter.name())),
        Some(argv) => {
            observer.phase_changed(ExecutionPhase::Compile).await;
            let spec = phase_spec(adapter, config, workdir, argv, config.compile_timeout);
            let outcome = match run_with_retry(sandbox, &spec).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    return Ok(internal_error(format!("compile sandbox failed: {e}"), None));
                }
            };
            if outcome.timed_out {
                return Ok(ExecutionResult {
                    status: ExecutionStatus::CompilationError,
                    compilation_output: Some(clip(&outcome.stdout_merged)),
                    test_case_results: Vec::new(),
                    runtime_ms: None,
                    peak_memory_bytes: None,
                    error_message: Some(format!(
                        "compilation exceeded the {}s limit",
                        config.compile_timeout.as_secs()
                    )),
                });
            }
            if outcome.exit_code != 0 {
                return Ok(ExecutionResult {
                    status: ExecutionStatus::CompilationError,
                    compilation_output: Some(clip(&outcome.stdout_merged)),
                    test_case_results: Vec::new(),
                    runtime_ms: None,
                    peak_memory_bytes: None,
                    error_message: None,
                });
            }
            Some(clip(&outcome.stdout_merged))
        }
    };

    // 3. RUN.
    observer.phase_changed(ExecutionPhase::Run).await;
    let run_spec = phase_spec(
        adapter,
        config,
        workdir,
        adapter.run_argv(submission),
        config.run_timeout,
    );
    let outcome = match run_with_retry(sandbox, &run_spec).await {
        Ok(outcome) => outcome,
        Err(e) => {
            return Ok(internal_error(format!("run sandbox failed: {e}"), compilation_output));
        }
    };

    // 4. PARSE. Partial markers are retained on timeout and harness
    // crashes; missing indices are gap-filled.
    observer.phase_changed(ExecutionPhase::Parse).await;
    let test_case_results = parse_markers(&outcome.stdout_merged, submission.test_cases.len());

    let status = if outcome.timed_out {
        ExecutionStatus::Timeout
    } else if outcome.exit_code != 0 {
        ExecutionStatus::RuntimeError
    } else {
        ExecutionStatus::Success
    };

    let error_message = match status {
        ExecutionStatus::Timeout => Some(format!(
            "execution exceeded the {}s limit",
            config.run_timeout.as_secs()
        )),
        ExecutionStatus::RuntimeError => Some(format!(
            "harness exited with code {}: {}",
            outcome.exit_code,
            clip(&outcome.stdout_merged)
        )),
        _ => None,
    };

    let runtime_ms = (outcome.finished_at - outcome.started_at)
        .num_milliseconds()
        .max(0) as u64;

    Ok(ExecutionResult {
        status,
        compilation_output,
        test_case_results,
        runtime_ms: Some(runtime_ms),
        peak_memory_bytes: outcome.peak_memory_bytes,
        error_message,
    })
}

/// Scan merged output for marker lines and fold them into per-case
/// results. Malformed markers are logged and skipped; non-marker lines
/// (user prints) are ignored; indices the harness never reported are
/// filled with `PrematureTermination`.
pub fn parse_markers(output: &str, expected_cases: usize) -> Vec<TestCaseResult> {
    let mut by_index: BTreeMap<usize, TestCaseResult> = BTreeMap::new();

    for line in output.lines() {
        let Some(body) = line.trim_end_matches('\r').strip_prefix(MARKER_PREFIX) else {
            continue;
        };
        match marker::parse_body(body) {
            Ok(m) => {
                if m.index >= expected_cases {
                    warn!(index = m.index, expected_cases, "marker index out of range, skipping");
                    continue;
                }
                if by_index.contains_key(&m.index) {
                    warn!(index = m.index, "duplicate marker for test case, keeping first");
                    continue;
                }
                by_index.insert(m.index, m.into_test_case_result());
            }
            Err(e) => {
                warn!(error = %e, line, "skipping malformed marker line");
            }
        }
    }

    (0..expected_cases)
        .map(|i| {
            by_index
                .remove(&i)
                .unwrap_or_else(|| TestCaseResult::premature(i))
        })
        .collect()
}

/// Invoke the sandbox, retrying infrastructure failures on the backoff
/// schedule before giving up.
async fn run_with_retry(
    sandbox: &dyn Sandbox,
    spec: &SandboxSpec,
) -> Result<SandboxOutcome, SandboxError> {
    let mut attempt = sandbox.run(spec).await;
    for delay in RETRY_DELAYS {
        match attempt {
            Err(SandboxError::Unavailable(ref reason)) => {
                debug!(%reason, ?delay, "sandbox unavailable, retrying");
                tokio::time::sleep(delay).await;
                attempt = sandbox.run(spec).await;
            }
            _ => break,
        }
    }
    attempt
}

fn phase_spec(
    adapter: &dyn LanguageAdapter,
    config: &EngineConfig,
    workdir: &Path,
    argv: Vec<String>,
    wall_clock: Duration,
) -> SandboxSpec {
    SandboxSpec {
        image: adapter.image().to_string(),
        mounts: vec![Mount {
            host: workdir.to_path_buf(),
            container: "/workspace".into(),
        }],
        workdir: "/workspace".into(),
        argv,
        limits: SandboxLimits {
            cpu_share: config.run_cpu_share,
            memory_bytes: config.run_memory_limit_bytes,
            wall_clock,
        },
    }
}

fn internal_error(message: String, compilation_output: Option<String>) -> ExecutionResult {
    ExecutionResult {
        status: ExecutionStatus::InternalError,
        compilation_output,
        test_case_results: Vec::new(),
        runtime_ms: None,
        peak_memory_bytes: None,
        error_message: Some(message),
    }
}

fn clip(output: &str) -> String {
    let trimmed = output.trim();
    if trimmed.len() <= MAX_SURFACED_OUTPUT {
        return trimmed.to_string();
    }
    let tail_start = trimmed.len() - MAX_SURFACED_OUTPUT;
    // Snap to a char boundary.
    let tail_start = (tail_start..trimmed.len())
        .find(|&i| trimmed.is_char_boundary(i))
        .unwrap_or(trimmed.len());
    format!("...{}", &trimmed[tail_start..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::format_marker;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn parse_markers_fills_gaps() {
        let output = format!("{}\n", format_marker(0, "3", 5, ""));
        let results = parse_markers(&output, 3);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].actual_output.as_deref(), Some("3"));
        assert_eq!(results[1].error.as_deref(), Some("PrematureTermination"));
        assert_eq!(results[2].error.as_deref(), Some("PrematureTermination"));
        assert_eq!(results[1].execution_time_ms, 0);
    }

    #[test]
    fn parse_markers_ignores_user_prints() {
        let output = format!(
            "debug: thinking hard\n{}\nTEST_CASE_RESULT but not really\n",
            format_marker(0, "42", 1, "")
        );
        let results = parse_markers(&output, 1);
        assert_eq!(results[0].actual_output.as_deref(), Some("42"));
        assert!(results[0].error.is_none());
    }

    #[test]
    fn parse_markers_skips_malformed_and_out_of_range() {
        let output = format!(
            "TEST_CASE_RESULT: bogus\n{}\n{}\n",
            format_marker(7, "ignored", 1, ""),
            format_marker(0, "kept", 1, "")
        );
        let results = parse_markers(&output, 1);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].actual_output.as_deref(), Some("kept"));
    }

    #[test]
    fn parse_markers_keeps_first_duplicate() {
        let output = format!(
            "{}\n{}\n",
            format_marker(0, "first", 1, ""),
            format_marker(0, "second", 1, "")
        );
        let results = parse_markers(&output, 1);
        assert_eq!(results[0].actual_output.as_deref(), Some("first"));
    }

    #[test]
    fn parse_markers_handles_crlf() {
        let output = format!("{}\r\n", format_marker(0, "3", 5, ""));
        let results = parse_markers(&output, 1);
        assert_eq!(results[0].actual_output.as_deref(), Some("3"));
    }

    #[test]
    fn clip_keeps_short_output() {
        assert_eq!(clip("  hello  "), "hello");
    }

    #[test]
    fn clip_truncates_long_output_to_tail() {
        let long = "x".repeat(MAX_SURFACED_OUTPUT + 100);
        let clipped = clip(&long);
        assert!(clipped.starts_with("..."));
        assert_eq!(clipped.len(), MAX_SURFACED_OUTPUT + 3);
    }

    /// Sandbox that always reports the boundary as unavailable and counts
    /// attempts.
    #[derive(Debug)]
    struct DownSandbox {
        attempts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Sandbox for DownSandbox {
        fn name(&self) -> &str {
            "down"
        }

        async fn run(&self, _spec: &SandboxSpec) -> Result<SandboxOutcome, SandboxError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(SandboxError::Unavailable("daemon is down".to_string()))
        }

        async fn probe(&self) -> Result<(), SandboxError> {
            Err(SandboxError::Unavailable("daemon is down".to_string()))
        }
    }

    #[tokio::test]
    async fn unavailable_sandbox_is_retried_then_surfaced() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let sandbox = DownSandbox {
            attempts: Arc::clone(&attempts),
        };
        let spec = SandboxSpec {
            image: "img".to_string(),
            mounts: vec![],
            workdir: "/workspace".into(),
            argv: vec!["true".to_string()],
            limits: SandboxLimits {
                cpu_share: 0.5,
                memory_bytes: 1024,
                wall_clock: Duration::from_secs(1),
            },
        };

        let result = run_with_retry(&sandbox, &spec).await;
        assert!(matches!(result, Err(SandboxError::Unavailable(_))));
        // Initial attempt plus one per backoff step.
        assert_eq!(attempts.load(Ordering::SeqCst), 1 + RETRY_DELAYS.len());
    }
}
