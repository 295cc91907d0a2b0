use crate::error::SyncResult;
use crate::github::issues::IssueRecord;
use crate::storage::CacheStorage;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Default age after which a cached snapshot is refreshed in the background.
pub const DEFAULT_STALE_AFTER: Duration = Duration::minutes(15);

/// The last fetched snapshot of one repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub repository_key: String,
    pub fetched_at: DateTime<Utc>,
    /// When the fetch that produced this entry started.
    pub requested_at: DateTime<Utc>,
    pub issues: Vec<IssueRecord>,
    pub pull_requests: Vec<IssueRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Served as is.
    Fresh,
    /// Served as is, with a refresh in the background.
    Stale,
}

/// Snapshot cache keyed by repository.
///
/// Entries never expire on their own: an old entry stays usable until a
/// newer fetch replaces it or it is cleared.
///
/// Writes through clones of one store are serialized, so a read-compare-write
/// never interleaves with another write.
#[derive(Clone)]
pub struct CacheStore {
    storage: Arc<dyn CacheStorage>,
    stale_after: Duration,
    writes: Arc<Mutex<()>>,
}

impl CacheStore {
    pub fn new(storage: Arc<dyn CacheStorage>) -> Self {
        CacheStore {
            storage,
            stale_after: DEFAULT_STALE_AFTER,
            writes: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub async fn get(&self, key: &str) -> SyncResult<Option<CacheEntry>> {
        self.storage.read(key).await
    }

    /// Overwrites the entry for `key`, stamped with the current time.
    pub async fn put(
        &self,
        key: &str,
        issues: Vec<IssueRecord>,
        pull_requests: Vec<IssueRecord>,
    ) -> SyncResult<CacheEntry> {
        let now = Utc::now();
        let entry = CacheEntry {
            repository_key: key.to_string(),
            fetched_at: now,
            requested_at: now,
            issues,
            pull_requests,
        };
        let _writing = self.writes.lock().await;
        self.storage.write(key, &entry).await?;
        Ok(entry)
    }

    /// Like [`CacheStore::put`], but keeps the stored entry when it came from a
    /// fetch that started after `requested_at`. Returns the entry written, if any.
    pub async fn put_if_newer(
        &self,
        key: &str,
        issues: Vec<IssueRecord>,
        pull_requests: Vec<IssueRecord>,
        requested_at: DateTime<Utc>,
    ) -> SyncResult<Option<CacheEntry>> {
        let _writing = self.writes.lock().await;
        if let Some(current) = self.storage.read(key).await? {
            if current.requested_at > requested_at {
                tracing::debug!(
                    key,
                    stored = %current.requested_at,
                    incoming = %requested_at,
                    "discarding out-of-order fetch result"
                );
                return Ok(None);
            }
        }
        let entry = CacheEntry {
            repository_key: key.to_string(),
            fetched_at: Utc::now(),
            requested_at,
            issues,
            pull_requests,
        };
        self.storage.write(key, &entry).await?;
        Ok(Some(entry))
    }

    /// Edits the stored entry in place, for changes written to the remote.
    ///
    /// When `edit` reports a change the entry is stamped with the current time
    /// as both fetch and request time, so a fetch that started before the edit
    /// can no longer overwrite it. Returns the stored entry after the edit.
    pub async fn update<F>(&self, key: &str, edit: F) -> SyncResult<Option<CacheEntry>>
    where
        F: FnOnce(&mut CacheEntry) -> bool + Send,
    {
        let _writing = self.writes.lock().await;
        let Some(mut entry) = self.storage.read(key).await? else {
            return Ok(None);
        };
        if edit(&mut entry) {
            let now = Utc::now();
            entry.fetched_at = now;
            entry.requested_at = now;
            self.storage.write(key, &entry).await?;
        }
        Ok(Some(entry))
    }

    pub async fn clear(&self, key: &str) -> SyncResult<()> {
        let _writing = self.writes.lock().await;
        self.storage.erase(key).await
    }

    pub fn freshness(&self, entry: &CacheEntry, now: DateTime<Utc>) -> Freshness {
        if now - entry.fetched_at < self.stale_after {
            Freshness::Fresh
        } else {
            Freshness::Stale
        }
    }
}
