//! Stale-while-revalidate refresh of the cached snapshot.
//!
//! The coordinator owns the lifecycle (`Uninitialized → Authenticating →
//! Ready`), decides when the cache must be refreshed, runs refreshes in the
//! background and on a timer, and publishes a [`DataUpdated`] event for every
//! refresh it commits to the cache. Write-backs (checkbox toggles and title
//! edits) also go through here so the cache follows them.

use crate::auth::{AuthProvider, SCOPES, Session};
use crate::cache::{CacheEntry, CacheStore, Freshness};
use crate::checklist;
use crate::config::{self, Settings};
use crate::error::{SyncError, SyncResult};
use crate::github::client::IssueSource;
use crate::github::fetch::{Snapshot, fetch_snapshot};
use crate::github::issues::{IssueRecord, ItemNumber, ItemPatch};
use crate::node::{IssueTree, NodeId};
use crate::repository::{RepoRef, RepositoryResolver};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const UPDATE_CHANNEL_CAPACITY: usize = 16;
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(1);
const MAX_REFRESH_INTERVAL: Duration = Duration::from_secs(config::MAX_MINUTES * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Authenticating,
    Ready,
}

/// Published once for every refresh whose result was written to the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct DataUpdated {
    pub repository_key: String,
    pub issues: Vec<IssueRecord>,
    pub pull_requests: Vec<IssueRecord>,
}

impl From<CacheEntry> for Snapshot {
    fn from(entry: CacheEntry) -> Self {
        Snapshot {
            issues: entry.issues,
            pull_requests: entry.pull_requests,
        }
    }
}

struct Inner {
    state: LifecycleState,
    session: Option<Session>,
    repo: Option<RepoRef>,
    timer: Option<JoinHandle<()>>,
    background: Option<JoinHandle<()>>,
}

/// Clears the in-flight flag however the background refresh ends, including
/// abort and panic.
struct RefreshInFlight(Arc<RefreshCoordinator>);

impl Drop for RefreshInFlight {
    fn drop(&mut self) {
        self.0.refreshing.store(false, Ordering::SeqCst);
    }
}

pub struct RefreshCoordinator {
    source: Arc<dyn IssueSource>,
    auth: Arc<dyn AuthProvider>,
    resolver: Arc<dyn RepositoryResolver>,
    cache: CacheStore,
    page_size: u32,
    refresh_interval: Duration,
    inner: Mutex<Inner>,
    refreshing: AtomicBool,
    updates: broadcast::Sender<DataUpdated>,
}

impl RefreshCoordinator {
    pub fn new(
        source: Arc<dyn IssueSource>,
        auth: Arc<dyn AuthProvider>,
        resolver: Arc<dyn RepositoryResolver>,
        cache: CacheStore,
        settings: &Settings,
    ) -> Arc<Self> {
        let cache = match chrono::Duration::from_std(settings.stale_after) {
            Ok(stale_after) => cache.with_stale_after(stale_after),
            Err(_) => cache,
        };
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Arc::new(RefreshCoordinator {
            source,
            auth,
            resolver,
            cache,
            page_size: settings.page_size,
            refresh_interval: settings
                .refresh_interval
                .clamp(MIN_REFRESH_INTERVAL, MAX_REFRESH_INTERVAL),
            inner: Mutex::new(Inner {
                state: LifecycleState::Uninitialized,
                session: None,
                repo: None,
                timer: None,
                background: None,
            }),
            refreshing: AtomicBool::new(false),
            updates,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> LifecycleState {
        self.lock().state
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DataUpdated> {
        self.updates.subscribe()
    }

    /// Repository this coordinator serves, resolved on first use.
    pub async fn repository(&self) -> SyncResult<RepoRef> {
        let known = self.lock().repo.clone();
        if let Some(repo) = known {
            return Ok(repo);
        }
        let repo = self.resolver.resolve().await.inspect_err(|err| {
            tracing::error!(error = %err, "cannot determine repository");
        })?;
        self.lock().repo = Some(repo.clone());
        Ok(repo)
    }

    /// Resolves the repository and signs in. On success the coordinator is `Ready`.
    pub async fn initialize(&self) -> SyncResult<RepoRef> {
        let repo = self.repository().await?;
        self.lock().state = LifecycleState::Authenticating;

        match self.auth.get_session(SCOPES).await {
            Ok(session) => {
                let mut inner = self.lock();
                inner.session = Some(session);
                inner.state = LifecycleState::Ready;
                tracing::info!(%repo, "ready");
                Ok(repo)
            }
            Err(err) => {
                tracing::error!(error = %err, "authentication failed");
                let mut inner = self.lock();
                inner.session = None;
                inner.state = LifecycleState::Uninitialized;
                Err(err)
            }
        }
    }

    fn access_token(&self) -> SyncResult<String> {
        let inner = self.lock();
        match (&inner.state, &inner.session) {
            (LifecycleState::Ready, Some(session)) => Ok(session.access_token.clone()),
            _ => Err(SyncError::NotInitialized),
        }
    }

    fn is_ready(&self) -> bool {
        self.state() == LifecycleState::Ready
    }

    async fn read_cache(&self, key: &str) -> Option<CacheEntry> {
        match self.cache.get(key).await {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(key, error = %err, "cache read failed");
                None
            }
        }
    }

    pub async fn cached_entry(&self) -> SyncResult<Option<CacheEntry>> {
        let repo = self.repository().await?;
        self.cache.get(&repo.key()).await
    }

    /// Fetches everything and commits it to the cache unless a fetch that
    /// started later has already been committed.
    async fn fetch_and_store(&self, repo: &RepoRef) -> SyncResult<Snapshot> {
        let token = self.access_token()?;
        let key = repo.key();
        let requested_at = Utc::now();

        let fetched = fetch_snapshot(self.source.as_ref(), &token, repo, self.page_size).await;
        self.lock().state = LifecycleState::Ready;
        let snapshot = fetched.map_err(|err| SyncError::fetch(format!("{err:#}")))?;

        let stored = self
            .cache
            .put_if_newer(
                &key,
                snapshot.issues.clone(),
                snapshot.pull_requests.clone(),
                requested_at,
            )
            .await?;

        match stored {
            Some(entry) => {
                tracing::info!(
                    %repo,
                    issues = entry.issues.len(),
                    pull_requests = entry.pull_requests.len(),
                    "cache refreshed"
                );
                // No subscribers is fine.
                let _ = self.updates.send(DataUpdated {
                    repository_key: key,
                    issues: entry.issues,
                    pull_requests: entry.pull_requests,
                });
                Ok(snapshot)
            }
            None => Ok(self.read_cache(&key).await.map(Snapshot::from).unwrap_or(snapshot)),
        }
    }

    /// Serves the cache when it is fresh, serves it and refreshes in the
    /// background when it is stale, and fetches in place when there is none.
    ///
    /// Fetch failures are not errors here: they degrade to the cached or an
    /// empty snapshot.
    pub async fn get_cached_or_fetch(self: &Arc<Self>) -> SyncResult<Snapshot> {
        let repo = self.repository().await?;
        let key = repo.key();

        if let Some(entry) = self.read_cache(&key).await {
            match self.cache.freshness(&entry, Utc::now()) {
                Freshness::Fresh => tracing::debug!(key, "serving fresh cache"),
                Freshness::Stale => {
                    tracing::debug!(key, fetched_at = %entry.fetched_at, "serving stale cache");
                    self.schedule_refresh();
                }
            }
            return Ok(entry.into());
        }

        if !self.is_ready() {
            tracing::debug!(key, "no cache and not signed in yet");
            return Ok(Snapshot::default());
        }

        match self.fetch_and_store(&repo).await {
            Ok(snapshot) => Ok(snapshot),
            Err(err) => {
                tracing::warn!(%repo, error = %err, "initial fetch failed");
                Ok(Snapshot::default())
            }
        }
    }

    /// Returns whatever is cached right away and always refreshes in the background.
    pub async fn load_cache_and_fetch(self: &Arc<Self>) -> SyncResult<Snapshot> {
        let repo = self.repository().await?;
        let cached = self.read_cache(&repo.key()).await;
        self.schedule_refresh();
        Ok(cached.map(Snapshot::from).unwrap_or_default())
    }

    /// Fetches now. A failed fetch is logged and answered with the cached snapshot.
    pub async fn refresh(&self) -> SyncResult<Snapshot> {
        let repo = self.repository().await?;
        let key = repo.key();
        if !self.is_ready() {
            return Ok(self.read_cache(&key).await.map(Snapshot::from).unwrap_or_default());
        }

        match self.fetch_and_store(&repo).await {
            Ok(snapshot) => Ok(snapshot),
            Err(err) => {
                tracing::warn!(%repo, error = %err, "refresh failed, keeping cached data");
                Ok(self.read_cache(&key).await.map(Snapshot::from).unwrap_or_default())
            }
        }
    }

    /// Starts one background refresh unless one is already running.
    fn schedule_refresh(self: &Arc<Self>) {
        if !self.is_ready() {
            return;
        }
        if self.refreshing.swap(true, Ordering::SeqCst) {
            tracing::debug!("refresh already in flight");
            return;
        }

        let in_flight = RefreshInFlight(Arc::clone(self));
        let handle = tokio::spawn(async move {
            let in_flight = in_flight;
            let _ = in_flight.0.refresh().await;
        });
        self.lock().background = Some(handle);
    }

    /// Refreshes every `refresh_interval` regardless of freshness until
    /// [`RefreshCoordinator::shutdown`].
    pub fn start_periodic_refresh(self: &Arc<Self>) {
        let period = self.refresh_interval;
        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(this) = weak.upgrade() else {
                    break;
                };
                tracing::debug!("periodic refresh");
                let _ = this.refresh().await;
            }
        });

        if let Some(previous) = self.lock().timer.replace(handle) {
            previous.abort();
        }
    }

    /// Stops the timer and waits for a background refresh still in flight.
    pub async fn shutdown(&self) {
        let (timer, background) = {
            let mut inner = self.lock();
            (inner.timer.take(), inner.background.take())
        };
        if let Some(timer) = timer {
            timer.abort();
        }
        if let Some(background) = background {
            if let Err(err) = background.await {
                tracing::warn!(error = %err, "background refresh did not finish");
            }
        }
    }

    pub async fn clear_cache(&self) -> SyncResult<()> {
        let repo = self.repository().await?;
        self.cache.clear(&repo.key()).await?;
        tracing::info!(%repo, "cache cleared");
        Ok(())
    }

    /// Sends `patch` for `number` and mirrors it into the cached record.
    async fn write_back(&self, number: u64, patch: ItemPatch) -> SyncResult<IssueRecord> {
        let token = self.access_token()?;
        let repo = self.repository().await?;

        let mut updated = self
            .source
            .update_item(&token, &repo, number, &patch)
            .await
            .map_err(|err| SyncError::RemoteUpdateFailed {
                number: number.to_string(),
                reason: format!("{err:#}"),
            })?;

        let key = repo.key();
        let mut cached = None;
        let edited = self
            .cache
            .update(&key, |entry| {
                let record = entry
                    .issues
                    .iter_mut()
                    .chain(entry.pull_requests.iter_mut())
                    .find(|record| record.number == ItemNumber::Remote(number));
                match record {
                    Some(record) => {
                        patch.apply(record);
                        cached = Some(record.clone());
                        true
                    }
                    None => false,
                }
            })
            .await;
        match edited {
            Ok(_) => updated = cached.unwrap_or(updated),
            Err(err) => tracing::warn!(key, error = %err, "failed to store write-back in cache"),
        }
        Ok(updated)
    }

    /// Flips a sub-item's checkbox and writes the parent's rewritten body back.
    ///
    /// The tree shows the new state right away; if the write-back fails the
    /// flip is undone and the error returned. Returns `Ok(None)` for nodes
    /// that are not sub-items.
    pub async fn toggle(&self, tree: &mut IssueTree, id: NodeId) -> SyncResult<Option<bool>> {
        let node = tree.get(id);
        if !node.is_sub_item {
            return Ok(None);
        }
        self.access_token()?;

        let number = node.number();
        let (Some(parent), Some(index)) = (node.parent(), node.checklist_index) else {
            return Err(SyncError::ItemNotFound(number.to_string()));
        };
        let parent_number = tree.get(parent).number().remote();

        let Some(checked) = tree.toggle(id) else {
            return Ok(None);
        };
        let Some(body) = checklist::set_checked(&tree.get(parent).record.body, index, checked) else {
            tree.set_checked(id, !checked);
            return Err(SyncError::ItemNotFound(number.to_string()));
        };

        match self.write_back(parent_number, ItemPatch::body(&body)).await {
            Ok(_) => {
                tree.set_body(parent, body);
                tracing::info!(%number, checked, "checkbox written back");
                Ok(Some(checked))
            }
            Err(err) => {
                tree.set_checked(id, !checked);
                tracing::warn!(%number, error = %err, "checkbox write-back failed, reverted");
                Err(err)
            }
        }
    }

    /// Renames an issue, a pull request or a checklist sub-item.
    ///
    /// A sub-item is renamed by rewriting its line in the parent body. The
    /// returned record is the remote item after the update.
    pub async fn update_title(&self, number: ItemNumber, title: &str) -> SyncResult<IssueRecord> {
        self.access_token()?;
        match number {
            ItemNumber::Remote(number) => self.write_back(number, ItemPatch::title(title)).await,
            ItemNumber::SubItem { parent, index } => {
                let entry = self
                    .cached_entry()
                    .await?
                    .ok_or_else(|| SyncError::ItemNotFound(number.to_string()))?;
                let record = entry
                    .issues
                    .iter()
                    .chain(entry.pull_requests.iter())
                    .find(|record| record.number == ItemNumber::Remote(parent))
                    .ok_or_else(|| SyncError::ItemNotFound(number.to_string()))?;
                let body = checklist::set_text(&record.body, index - 1, title)
                    .ok_or_else(|| SyncError::ItemNotFound(number.to_string()))?;
                self.write_back(parent, ItemPatch::body(&body)).await
            }
        }
    }
}
