//! Status cache -- the only channel between workers and pollers.
//!
//! A key-addressable store of [`StatusRecord`]s with TTL. The trait is
//! the seam for a remote store; [`MemoryCache`] is the in-process
//! implementation. Per-key writes are linearizable: the single-writer
//! discipline is enforced by `compare_and_set` at phase boundaries
//! (worker pickup and cancellation).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use crate::model::{StatusRecord, SubmissionStatus};

/// Failures of the cache backend itself. Absent keys are not errors.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// Key-value store of status records with TTL.
#[async_trait]
pub trait StatusCache: Send + Sync {
    /// Full overwrite, atomic. Resets the TTL.
    async fn put(&self, record: StatusRecord, ttl: Duration) -> Result<(), CacheError>;

    /// Point read. Expired entries read as absent.
    async fn get(&self, submission_id: &str) -> Result<Option<StatusRecord>, CacheError>;

    /// Replace the record iff the current status equals `expected`.
    /// Returns whether the swap happened. The TTL deadline is left
    /// unchanged.
    async fn compare_and_set(
        &self,
        submission_id: &str,
        expected: SubmissionStatus,
        record: StatusRecord,
    ) -> Result<bool, CacheError>;

    /// Extend the TTL of an existing entry. Returns whether it existed.
    async fn touch(&self, submission_id: &str, ttl: Duration) -> Result<bool, CacheError>;
}

struct Entry {
    record: StatusRecord,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// In-process [`StatusCache`]. Expiry is lazy on reads; the server also
/// schedules [`MemoryCache::purge_expired`] periodically so abandoned
/// records do not accumulate.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all expired entries; returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "purged expired cache entries");
        }
        removed
    }

    /// Number of live (unexpired) entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.read().await;
        entries.values().filter(|e| !e.is_expired(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl StatusCache for MemoryCache {
    async fn put(&self, record: StatusRecord, ttl: Duration) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        entries.insert(
            record.submission_id.clone(),
            Entry {
                record,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, submission_id: &str) -> Result<Option<StatusRecord>, CacheError> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(submission_id) {
                Some(entry) if !entry.is_expired(now) => {
                    return Ok(Some(entry.record.clone()));
                }
                Some(_) => {}
                None => return Ok(None),
            }
        }
        // Expired: drop it under the write lock.
        let mut entries = self.entries.write().await;
        if entries.get(submission_id).is_some_and(|e| e.is_expired(now)) {
            entries.remove(submission_id);
        }
        Ok(None)
    }

    async fn compare_and_set(
        &self,
        submission_id: &str,
        expected: SubmissionStatus,
        record: StatusRecord,
    ) -> Result<bool, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        match entries.get_mut(submission_id) {
            Some(entry) if !entry.is_expired(now) && entry.record.status == expected => {
                entry.record = record;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn touch(&self, submission_id: &str, ttl: Duration) -> Result<bool, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        match entries.get_mut(submission_id) {
            Some(entry) if !entry.is_expired(now) => {
                entry.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const TTL: Duration = Duration::from_secs(60);

    fn record(id: &str, status: SubmissionStatus) -> StatusRecord {
        let mut r = StatusRecord::queued(id, Utc::now());
        r.status = status;
        r
    }

    #[tokio::test]
    async fn put_then_get() {
        let cache = MemoryCache::new();
        cache
            .put(record("a", SubmissionStatus::Queued), TTL)
            .await
            .unwrap();

        let got = cache.get("a").await.unwrap().unwrap();
        assert_eq!(got.submission_id, "a");
        assert_eq!(got.status, SubmissionStatus::Queued);
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let cache = MemoryCache::new();
        assert!(cache.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_overwrites() {
        let cache = MemoryCache::new();
        cache
            .put(record("a", SubmissionStatus::Queued), TTL)
            .await
            .unwrap();
        cache
            .put(record("a", SubmissionStatus::Completed), TTL)
            .await
            .unwrap();

        let got = cache.get("a").await.unwrap().unwrap();
        assert_eq!(got.status, SubmissionStatus::Completed);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn expired_entries_read_as_absent() {
        let cache = MemoryCache::new();
        cache
            .put(record("a", SubmissionStatus::Queued), Duration::from_millis(10))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cas_succeeds_on_expected_status() {
        let cache = MemoryCache::new();
        cache
            .put(record("a", SubmissionStatus::Queued), TTL)
            .await
            .unwrap();

        let swapped = cache
            .compare_and_set("a", SubmissionStatus::Queued, record("a", SubmissionStatus::Compiling))
            .await
            .unwrap();
        assert!(swapped);
        assert_eq!(
            cache.get("a").await.unwrap().unwrap().status,
            SubmissionStatus::Compiling
        );
    }

    #[tokio::test]
    async fn cas_fails_on_unexpected_status() {
        let cache = MemoryCache::new();
        cache
            .put(record("a", SubmissionStatus::Compiling), TTL)
            .await
            .unwrap();

        let swapped = cache
            .compare_and_set("a", SubmissionStatus::Queued, record("a", SubmissionStatus::Cancelled))
            .await
            .unwrap();
        assert!(!swapped);
        // Record untouched.
        assert_eq!(
            cache.get("a").await.unwrap().unwrap().status,
            SubmissionStatus::Compiling
        );
    }

    #[tokio::test]
    async fn cas_on_missing_key_fails() {
        let cache = MemoryCache::new();
        let swapped = cache
            .compare_and_set("ghost", SubmissionStatus::Queued, record("ghost", SubmissionStatus::Cancelled))
            .await
            .unwrap();
        assert!(!swapped);
    }

    #[tokio::test]
    async fn touch_extends_ttl() {
        let cache = MemoryCache::new();
        cache
            .put(record("a", SubmissionStatus::Queued), Duration::from_millis(40))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.touch("a", TTL).await.unwrap());

        tokio::time::sleep(Duration::from_millis(40)).await;
        // Would have expired without the touch.
        assert!(cache.get("a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn touch_missing_returns_false() {
        let cache = MemoryCache::new();
        assert!(!cache.touch("nope", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn purge_removes_only_expired() {
        let cache = MemoryCache::new();
        cache
            .put(record("old", SubmissionStatus::Completed), Duration::from_millis(10))
            .await
            .unwrap();
        cache
            .put(record("fresh", SubmissionStatus::Queued), TTL)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.len().await, 1);
        assert!(cache.get("fresh").await.unwrap().is_some());
    }
}
