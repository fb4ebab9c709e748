//! FIFO queue of pending submissions.
//!
//! Total FIFO order across all producers; workers block on
//! [`SubmissionQueue::dequeue_blocking`] and are woken through a
//! [`tokio::sync::Notify`]. A not-yet-dequeued submission can be
//! cancelled (removed) from any position. The estimated wait time is
//! `len() * rolling average execution time`, where the rolling average is
//! an exponential moving average fed by workers after each run.

use std::collections::VecDeque;

use tokio::sync::{Mutex, Notify};
use tracing::debug;

use crate::model::SubmissionRequest;

/// Smoothing factor for the execution-time EMA.
pub const EMA_ALPHA: f64 = 0.2;

/// Wait estimate used before the first run has been observed.
const DEFAULT_EXECUTION_MS: f64 = 5_000.0;

/// In-process FIFO submission queue.
pub struct SubmissionQueue {
    inner: Mutex<VecDeque<SubmissionRequest>>,
    notify: Notify,
    avg_execution_ms: Mutex<Option<f64>>,
}

impl SubmissionQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            avg_execution_ms: Mutex::new(None),
        }
    }

    /// Append a submission; returns its zero-based queue position.
    pub async fn enqueue(&self, request: SubmissionRequest) -> usize {
        let position = {
            let mut queue = self.inner.lock().await;
            queue.push_back(request);
            queue.len() - 1
        };
        self.notify.notify_one();
        position
    }

    /// Remove and return the head, waiting until one is available.
    pub async fn dequeue_blocking(&self, worker_id: &str) -> SubmissionRequest {
        loop {
            {
                let mut queue = self.inner.lock().await;
                if let Some(request) = queue.pop_front() {
                    debug!(
                        worker_id,
                        submission_id = ?request.submission_id,
                        "dequeued submission"
                    );
                    return request;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Zero-based position from the head, or `None` if not queued.
    pub async fn position_of(&self, submission_id: &str) -> Option<usize> {
        let queue = self.inner.lock().await;
        queue
            .iter()
            .position(|r| r.submission_id.as_deref() == Some(submission_id))
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    /// Remove a submission that has not been dequeued yet. Returns `false`
    /// when it is absent (already being processed, finished, or unknown).
    pub async fn cancel(&self, submission_id: &str) -> bool {
        let mut queue = self.inner.lock().await;
        let before = queue.len();
        queue.retain(|r| r.submission_id.as_deref() != Some(submission_id));
        queue.len() != before
    }

    /// Fold one observed end-to-end execution duration into the EMA.
    pub async fn record_execution_ms(&self, duration_ms: u64) {
        let mut avg = self.avg_execution_ms.lock().await;
        *avg = Some(match *avg {
            Some(current) => EMA_ALPHA * duration_ms as f64 + (1.0 - EMA_ALPHA) * current,
            None => duration_ms as f64,
        });
    }

    /// Current EMA of end-to-end execution time.
    pub async fn avg_execution_ms(&self) -> f64 {
        self.avg_execution_ms
            .lock()
            .await
            .unwrap_or(DEFAULT_EXECUTION_MS)
    }

    /// `len() * avg execution time`, in milliseconds.
    pub async fn estimated_wait_ms(&self) -> u64 {
        let len = self.len().await;
        (len as f64 * self.avg_execution_ms().await) as u64
    }
}

impl Default for SubmissionQueue {
    fn default() -> Self {
        Self::new()
    }
}
