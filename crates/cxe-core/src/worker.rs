//! Worker pool: long-lived agents that dequeue submissions, drive the
//! orchestrator, and publish status transitions to the cache.
//!
//! Workers are the single writer for a submission's record once they win
//! the QUEUED -> COMPILING compare-and-set. Working directories live
//! under the configured temp area and are removed on every exit path,
//! panics included, via an RAII guard; a startup sweep clears directories
//! orphaned by a crashed process. A worker that dies mid-submission
//! leaves the record in COMPILING/RUNNING until TTL expiry -- there is no
//! automatic requeue, to avoid double execution of side-effectful code.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::StatusCache;
use crate::config::EngineConfig;
use crate::language::LanguageRegistry;
use crate::model::{
    ExecutionResult, ExecutionStatus, StatusRecord, SubmissionRequest, SubmissionStatus,
};
use crate::orchestrator::{self, ExecutionPhase, PhaseObserver};
use crate::queue::SubmissionQueue;
use crate::sandbox::Sandbox;

/// Prefix of per-submission working directories under the temp area.
const WORKDIR_PREFIX: &str = "cxe-";

/// Backoff schedule for status writes when the cache is unavailable.
/// After the last attempt the write is dropped (accepted loss, logged).
const PUBLISH_RETRY_DELAYS: [Duration; 3] = [
    Duration::from_millis(100),
    Duration::from_millis(200),
    Duration::from_millis(400),
];

/// Everything a worker needs, injected rather than process-global.
pub struct WorkerContext {
    pub queue: Arc<SubmissionQueue>,
    pub cache: Arc<dyn StatusCache>,
    pub languages: Arc<LanguageRegistry>,
    pub sandbox: Arc<dyn Sandbox>,
    pub config: EngineConfig,
}

/// Handle to a running pool of workers.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Sweep orphaned working directories, then spawn
    /// `config.worker_count` workers with stable ids `worker-<k>`.
    pub fn start(ctx: Arc<WorkerContext>, cancel: CancellationToken) -> Self {
        let swept = sweep_orphaned_workdirs(&ctx.config.temp_dir);
        if swept > 0 {
            info!(swept, "removed orphaned working directories");
        }

        let handles = (0..ctx.config.worker_count)
            .map(|k| {
                let worker_id = format!("worker-{k}");
                let ctx = Arc::clone(&ctx);
                let cancel = cancel.clone();
                tokio::spawn(worker_main(worker_id, ctx, cancel))
            })
            .collect();

        Self { handles, cancel }
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Signal shutdown and wait for workers to finish their current
    /// submissions.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

async fn worker_main(worker_id: String, ctx: Arc<WorkerContext>, cancel: CancellationToken) {
    info!(worker_id, "worker started");
    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => break,
            request = ctx.queue.dequeue_blocking(&worker_id) => request,
        };

        // A panicking submission must not take the worker down; the
        // workdir guard's Drop still runs during unwind.
        let outcome = std::panic::AssertUnwindSafe(process_submission(&worker_id, &ctx, request))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(worker_id, error = %format!("{e:#}"), "submission processing failed");
            }
            Err(_) => {
                error!(worker_id, "submission processing panicked");
            }
        }
    }
    info!(worker_id, "worker stopped");
}

async fn process_submission(
    worker_id: &str,
    ctx: &WorkerContext,
    request: SubmissionRequest,
) -> Result<()> {
    let Some(submission_id) = request.submission_id.clone() else {
        warn!(worker_id, "dequeued submission without an id, dropping");
        return Ok(());
    };
    let dequeued_at = Instant::now();
    let ttl = ctx.config.cache_ttl;

    // 1. Claim the submission: CAS QUEUED -> COMPILING. Losing the CAS
    // means it was cancelled (or the record is gone); drop silently.
    let mut record = match ctx.cache.get(&submission_id).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            warn!(worker_id, submission_id, "no cache record (expired?), dropping");
            return Ok(());
        }
        Err(e) => {
            warn!(worker_id, submission_id, error = %e, "cache unreachable at pickup, dropping");
            return Ok(());
        }
    };
    record.status = SubmissionStatus::Compiling;
    record.worker_id = Some(worker_id.to_string());
    record.started_at = Some(Utc::now());
    record.queue_position = None;

    match ctx
        .cache
        .compare_and_set(&submission_id, SubmissionStatus::Queued, record.clone())
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            debug!(worker_id, submission_id, "submission no longer QUEUED, dropping");
            return Ok(());
        }
        Err(e) => {
            warn!(worker_id, submission_id, error = %e, "cache unreachable at pickup, dropping");
            return Ok(());
        }
    }

    info!(worker_id, submission_id, language = %request.language, "processing submission");

    // 2. Working directory under the temp area, removed on all paths.
    let workdir = ctx
        .config
        .temp_dir
        .join(format!("{WORKDIR_PREFIX}{submission_id}"));
    let guard = match WorkdirGuard::create(workdir, ctx.config.keep_workdir) {
        Ok(guard) => guard,
        Err(e) => {
            let final_record = failed_record(record, format!("INTERNAL_ERROR: {e:#}"));
            publish_with_retry(ctx.cache.as_ref(), final_record, ttl).await;
            return Ok(());
        }
    };

    // 3. Resolve the language adapter.
    let Some(adapter) = ctx.languages.get(&request.language) else {
        let final_record = failed_record(
            record,
            format!("INTERNAL_ERROR: unsupported language {:?}", request.language),
        );
        publish_with_retry(ctx.cache.as_ref(), final_record, ttl).await;
        return Ok(());
    };

    // 4. Execute, publishing the RUNNING transition as the run phase
    // starts.
    let observer = RunningPublisher {
        cache: Arc::clone(&ctx.cache),
        record: record.clone(),
        ttl,
    };
    let exec = orchestrator::execute(
        &request,
        adapter,
        ctx.sandbox.as_ref(),
        &ctx.config,
        guard.path(),
        &observer,
    )
    .await;

    // 5. Publish the terminal record.
    let final_record = match exec {
        Ok(exec) => terminal_record(record, exec),
        Err(e) => failed_record(record, format!("INTERNAL_ERROR: {e:#}")),
    };
    let final_status = final_record.status;
    publish_with_retry(ctx.cache.as_ref(), final_record, ttl).await;

    // 6. Feed the wait estimator.
    let elapsed_ms = dequeued_at.elapsed().as_millis() as u64;
    ctx.queue.record_execution_ms(elapsed_ms).await;

    info!(
        worker_id,
        submission_id,
        status = %final_status,
        elapsed_ms,
        "submission finished"
    );
    Ok(())
}

/// Observer that flips the cached record to RUNNING when the run phase
/// starts. Safe as a plain overwrite: once the worker owns the record,
/// CANCELLED is unreachable.
struct RunningPublisher {
    cache: Arc<dyn StatusCache>,
    record: StatusRecord,
    ttl: Duration,
}

#[async_trait]
impl PhaseObserver for RunningPublisher {
    async fn phase_changed(&self, phase: ExecutionPhase) {
        if phase != ExecutionPhase::Run {
            return;
        }
        let mut record = self.record.clone();
        record.status = SubmissionStatus::Running;
        if let Err(e) = self.cache.put(record, self.ttl).await {
            warn!(
                submission_id = %self.record.submission_id,
                error = %e,
                "failed to publish RUNNING transition"
            );
        }
    }
}

/// Fold an [`ExecutionResult`] into the terminal status record.
fn terminal_record(mut record: StatusRecord, exec: ExecutionResult) -> StatusRecord {
    record.status = if exec.status == ExecutionStatus::Success {
        SubmissionStatus::Completed
    } else {
        SubmissionStatus::Failed
    };
    record.runtime_ms = exec.runtime_ms;
    record.memory_kb = exec.peak_memory_bytes.map(|b| b / 1024);
    record.compilation_output = exec.compilation_output;
    record.error_message = match exec.status {
        ExecutionStatus::Success => None,
        status => Some(match exec.error_message {
            Some(detail) => format!("{status}: {detail}"),
            None => status.to_string(),
        }),
    };
    record.test_case_results = exec.test_case_results;
    record.completed_at = Some(Utc::now());
    record
}

fn failed_record(mut record: StatusRecord, error_message: String) -> StatusRecord {
    record.status = SubmissionStatus::Failed;
    record.error_message = Some(error_message);
    record.test_case_results = Vec::new();
    record.completed_at = Some(Utc::now());
    record
}

/// Write a status record, retrying on cache unavailability. After the
/// backoff schedule the write is dropped and the loss logged.
async fn publish_with_retry(cache: &dyn StatusCache, record: StatusRecord, ttl: Duration) {
    let submission_id = record.submission_id.clone();
    let mut attempt = cache.put(record.clone(), ttl).await;
    for delay in PUBLISH_RETRY_DELAYS {
        match attempt {
            Ok(()) => return,
            Err(ref e) => {
                warn!(submission_id, error = %e, ?delay, "status write failed, retrying");
                tokio::time::sleep(delay).await;
                attempt = cache.put(record.clone(), ttl).await;
            }
        }
    }
    if let Err(e) = attempt {
        error!(submission_id, error = %e, "dropping status write after retries, record is lost");
    }
}

// ---------------------------------------------------------------------------
// Working directory lifecycle
// ---------------------------------------------------------------------------

/// Scoped owner of a per-submission working directory. Removal happens in
/// `Drop`, so it runs on success, failure, and unwind alike.
struct WorkdirGuard {
    path: PathBuf,
    keep: bool,
}

impl WorkdirGuard {
    fn create(path: PathBuf, keep: bool) -> Result<Self> {
        std::fs::create_dir_all(&path)
            .with_context(|| format!("failed to create working directory {}", path.display()))?;
        Ok(Self { path, keep })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkdirGuard {
    fn drop(&mut self) {
        if self.keep {
            debug!(path = %self.path.display(), "keeping working directory (keep_workdir)");
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to remove working directory");
            }
        }
    }
}

/// Remove working directories left behind by a previous process. Runs
/// before any worker starts, so live directories cannot be hit.
pub fn sweep_orphaned_workdirs(temp_dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(temp_dir) else {
        return 0;
    };
    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(WORKDIR_PREFIX) {
            continue;
        }
        if !entry.path().is_dir() {
            continue;
        }
        match std::fs::remove_dir_all(entry.path()) {
            Ok(()) => {
                warn!(path = %entry.path().display(), "removed orphaned working directory");
                removed += 1;
            }
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "failed to remove orphaned directory");
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NeverJudged, TestCaseResult};

    #[test]
    fn workdir_guard_removes_on_drop() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cxe-guard-test");
        {
            let guard = WorkdirGuard::create(path.clone(), false).unwrap();
            assert!(guard.path().is_dir());
        }
        assert!(!path.exists());
    }

    #[test]
    fn workdir_guard_keeps_when_asked() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cxe-keep-test");
        {
            let _guard = WorkdirGuard::create(path.clone(), true).unwrap();
        }
        assert!(path.exists());
    }

    #[test]
    fn workdir_guard_removes_during_unwind() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cxe-panic-test");
        let path_clone = path.clone();
        let result = std::panic::catch_unwind(move || {
            let _guard = WorkdirGuard::create(path_clone, false).unwrap();
            panic!("boom");
        });
        assert!(result.is_err());
        assert!(!path.exists());
    }

    #[test]
    fn sweep_removes_only_prefixed_directories() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("cxe-stale-1")).unwrap();
        std::fs::create_dir(tmp.path().join("cxe-stale-2")).unwrap();
        std::fs::create_dir(tmp.path().join("unrelated")).unwrap();
        std::fs::write(tmp.path().join("cxe-not-a-dir"), "x").unwrap();

        let removed = sweep_orphaned_workdirs(tmp.path());
        assert_eq!(removed, 2);
        assert!(tmp.path().join("unrelated").exists());
        assert!(tmp.path().join("cxe-not-a-dir").exists());
    }

    #[test]
    fn sweep_of_missing_dir_is_zero() {
        assert_eq!(sweep_orphaned_workdirs(Path::new("/nonexistent/cxe")), 0);
    }

    fn exec_result(status: ExecutionStatus) -> ExecutionResult {
        ExecutionResult {
            status,
            compilation_output: Some("ok".to_string()),
            test_case_results: vec![TestCaseResult {
                index: 0,
                passed: NeverJudged,
                actual_output: Some("3".to_string()),
                expected_output: NeverJudged,
                execution_time_ms: 4,
                memory_bytes: None,
                error: None,
                error_type: None,
            }],
            runtime_ms: Some(12),
            peak_memory_bytes: Some(4096),
            error_message: None,
        }
    }

    #[test]
    fn terminal_record_maps_success_to_completed() {
        let base = StatusRecord::queued("s", Utc::now());
        let record = terminal_record(base, exec_result(ExecutionStatus::Success));

        assert_eq!(record.status, SubmissionStatus::Completed);
        assert_eq!(record.runtime_ms, Some(12));
        assert_eq!(record.memory_kb, Some(4));
        assert!(record.error_message.is_none());
        assert!(record.completed_at.is_some());
        assert_eq!(record.test_case_results.len(), 1);
    }

    #[test]
    fn terminal_record_maps_failures_with_classification() {
        let base = StatusRecord::queued("s", Utc::now());
        let mut exec = exec_result(ExecutionStatus::Timeout);
        exec.error_message = Some("execution exceeded the 10s limit".to_string());
        let record = terminal_record(base, exec);

        assert_eq!(record.status, SubmissionStatus::Failed);
        assert_eq!(
            record.error_message.as_deref(),
            Some("TIMEOUT: execution exceeded the 10s limit")
        );
    }

    #[test]
    fn terminal_record_without_detail_uses_bare_classification() {
        let base = StatusRecord::queued("s", Utc::now());
        let record = terminal_record(base, {
            let mut e = exec_result(ExecutionStatus::CompilationError);
            e.error_message = None;
            e
        });
        assert_eq!(record.error_message.as_deref(), Some("COMPILATION_ERROR"));
    }
}
