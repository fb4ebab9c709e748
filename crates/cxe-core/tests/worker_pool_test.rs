//! Worker pool integration: dequeue, claim via CAS, execute through the
//! process sandbox, publish terminal records, clean up working
//! directories.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use common::{ScriptAdapter, marker_line, script_submission};
use cxe_core::cache::{MemoryCache, StatusCache};
use cxe_core::config::EngineConfig;
use cxe_core::language::LanguageRegistry;
use cxe_core::model::{StatusRecord, SubmissionStatus};
use cxe_core::queue::SubmissionQueue;
use cxe_core::sandbox::process::ProcessSandbox;
use cxe_core::worker::{WorkerContext, WorkerPool};
use tokio_util::sync::CancellationToken;

struct Harness {
    queue: Arc<SubmissionQueue>,
    cache: Arc<MemoryCache>,
    ctx: Arc<WorkerContext>,
    _temp: tempfile::TempDir,
}

fn harness(run_script: String) -> Harness {
    let temp = tempfile::tempdir().unwrap();
    let queue = Arc::new(SubmissionQueue::new());
    let cache = Arc::new(MemoryCache::new());
    let mut languages = LanguageRegistry::new();
    languages.register(ScriptAdapter::new(run_script));

    let config = EngineConfig {
        worker_count: 2,
        run_timeout: Duration::from_secs(5),
        compile_timeout: Duration::from_secs(5),
        temp_dir: temp.path().to_path_buf(),
        sandbox_mode: "process".to_string(),
        ..EngineConfig::default()
    };

    let ctx = Arc::new(WorkerContext {
        queue: Arc::clone(&queue),
        cache: cache.clone() as Arc<dyn StatusCache>,
        languages: Arc::new(languages),
        sandbox: Arc::new(ProcessSandbox::new()),
        config,
    });

    Harness {
        queue,
        cache,
        ctx,
        _temp: temp,
    }
}

async fn wait_for_terminal(cache: &MemoryCache, id: &str) -> StatusRecord {
    for _ in 0..100 {
        if let Some(record) = cache.get(id).await.unwrap() {
            if record.status.is_terminal() {
                return record;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("submission {id} did not reach a terminal status");
}

fn workdir_exists(temp_dir: &std::path::Path, id: &str) -> bool {
    temp_dir.join(format!("cxe-{id}")).exists()
}

#[tokio::test]
async fn pool_runs_a_submission_to_completion() {
    let h = harness(format!(
        "{}\n{}\n",
        marker_line(0, "3", 2, ""),
        marker_line(1, "0", 1, "")
    ));
    let ttl = h.ctx.config.cache_ttl;

    let id = "pool-ok";
    h.cache
        .put(StatusRecord::queued(id, Utc::now()), ttl)
        .await
        .unwrap();
    h.queue.enqueue(script_submission(id, 2)).await;

    let pool = WorkerPool::start(Arc::clone(&h.ctx), CancellationToken::new());
    assert_eq!(pool.worker_count(), 2);

    let record = wait_for_terminal(&h.cache, id).await;
    assert_eq!(record.status, SubmissionStatus::Completed);
    assert_eq!(record.test_case_results.len(), 2);
    assert_eq!(record.test_case_results[0].actual_output.as_deref(), Some("3"));
    assert_eq!(record.test_case_results[1].actual_output.as_deref(), Some("0"));
    assert!(record.worker_id.as_deref().unwrap().starts_with("worker-"));
    assert!(record.started_at.is_some());
    assert!(record.completed_at.is_some());
    assert!(record.error_message.is_none());
    assert!(record.runtime_ms.is_some());

    // Working directory cleaned up; wait estimator fed.
    assert!(!workdir_exists(&h.ctx.config.temp_dir, id));
    assert!(h.queue.avg_execution_ms().await < 5_000.0);

    pool.shutdown().await;
}

#[tokio::test]
async fn failed_execution_publishes_failed_with_classification() {
    let h = harness("echo 'kaboom' >&2\nexit 9\n".to_string());
    let ttl = h.ctx.config.cache_ttl;

    let id = "pool-crash";
    h.cache
        .put(StatusRecord::queued(id, Utc::now()), ttl)
        .await
        .unwrap();
    h.queue.enqueue(script_submission(id, 1)).await;

    let pool = WorkerPool::start(Arc::clone(&h.ctx), CancellationToken::new());
    let record = wait_for_terminal(&h.cache, id).await;

    assert_eq!(record.status, SubmissionStatus::Failed);
    assert!(
        record
            .error_message
            .as_deref()
            .unwrap()
            .starts_with("RUNTIME_ERROR"),
        "classification should lead the message: {:?}",
        record.error_message
    );
    // Gap-filled result for the case the harness never reported.
    assert_eq!(record.test_case_results.len(), 1);
    assert_eq!(
        record.test_case_results[0].error.as_deref(),
        Some("PrematureTermination")
    );
    assert!(!workdir_exists(&h.ctx.config.temp_dir, id));

    pool.shutdown().await;
}

#[tokio::test]
async fn cancelled_submission_is_dropped_without_a_workdir() {
    let h = harness(format!("{}\n", marker_line(0, "1", 1, "")));
    let ttl = h.ctx.config.cache_ttl;

    // The API's cancel CAS already ran: the record is CANCELLED but the
    // queue entry races in anyway.
    let id = "pool-cancelled";
    let mut record = StatusRecord::queued(id, Utc::now());
    record.status = SubmissionStatus::Cancelled;
    h.cache.put(record, ttl).await.unwrap();
    h.queue.enqueue(script_submission(id, 1)).await;

    let pool = WorkerPool::start(Arc::clone(&h.ctx), CancellationToken::new());

    // Give a worker time to dequeue and lose the CAS.
    for _ in 0..50 {
        if h.queue.is_empty().await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    let record = h.cache.get(id).await.unwrap().unwrap();
    assert_eq!(record.status, SubmissionStatus::Cancelled);
    assert!(record.worker_id.is_none());
    assert!(!workdir_exists(&h.ctx.config.temp_dir, id));

    pool.shutdown().await;
}

#[tokio::test]
async fn unsupported_language_fails_cleanly() {
    let h = harness(format!("{}\n", marker_line(0, "1", 1, "")));
    let ttl = h.ctx.config.cache_ttl;

    let id = "pool-bad-lang";
    h.cache
        .put(StatusRecord::queued(id, Utc::now()), ttl)
        .await
        .unwrap();
    let mut submission = script_submission(id, 1);
    submission.language = "fortran".to_string();
    h.queue.enqueue(submission).await;

    let pool = WorkerPool::start(Arc::clone(&h.ctx), CancellationToken::new());
    let record = wait_for_terminal(&h.cache, id).await;

    assert_eq!(record.status, SubmissionStatus::Failed);
    assert!(
        record
            .error_message
            .as_deref()
            .unwrap()
            .contains("unsupported language"),
        "got: {:?}",
        record.error_message
    );

    pool.shutdown().await;
}

#[tokio::test]
async fn startup_sweep_clears_orphaned_workdirs() {
    let h = harness(format!("{}\n", marker_line(0, "1", 1, "")));

    // A directory left behind by a crashed process.
    let orphan = h.ctx.config.temp_dir.join("cxe-orphan-from-last-run");
    std::fs::create_dir_all(orphan.join("nested")).unwrap();

    let pool = WorkerPool::start(Arc::clone(&h.ctx), CancellationToken::new());
    assert!(!orphan.exists());
    pool.shutdown().await;
}

#[tokio::test]
async fn shutdown_stops_idle_workers() {
    let h = harness(format!("{}\n", marker_line(0, "1", 1, "")));

    let pool = WorkerPool::start(Arc::clone(&h.ctx), CancellationToken::new());
    // Workers are parked on the empty queue; shutdown must not hang.
    tokio::time::timeout(Duration::from_secs(5), pool.shutdown())
        .await
        .expect("shutdown should complete promptly");
}
