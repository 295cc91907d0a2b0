//! In-memory issue source.
//!
//! Stands in for the GitHub API in tests: items live in a map per
//! repository, failures can be switched on, and fetches can be held back to
//! simulate a slow network.

use crate::github::client::{IssueSource, Page};
use crate::github::issues::{IssueRecord, IssueState, ItemNumber, ItemPatch};
use crate::repository::RepoRef;
use anyhow::{Result, bail};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::watch;

pub struct InMemoryIssueSource {
    items: Mutex<HashMap<RepoRef, BTreeMap<u64, IssueRecord>>>,
    fail_fetches: AtomicBool,
    fail_updates: AtomicBool,
    paused: watch::Sender<bool>,
    list_calls: AtomicUsize,
    updates: Mutex<Vec<(u64, ItemPatch)>>,
}

impl Default for InMemoryIssueSource {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryIssueSource {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        InMemoryIssueSource {
            items: Mutex::new(HashMap::new()),
            fail_fetches: AtomicBool::new(false),
            fail_updates: AtomicBool::new(false),
            paused,
            list_calls: AtomicUsize::new(0),
            updates: Mutex::new(Vec::new()),
        }
    }

    fn insert(&self, repo: &RepoRef, record: IssueRecord) {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items
            .entry(repo.clone())
            .or_default()
            .insert(record.number.remote(), record);
    }

    pub fn add_issue(&self, repo: &RepoRef, number: u64, title: &str, body: &str, state: IssueState) {
        let mut record = IssueRecord::new(ItemNumber::Remote(number), title, body, state);
        record
            .extra
            .insert("pull_request".to_string(), serde_json::Value::Null);
        self.insert(repo, record);
    }

    pub fn add_pull_request(
        &self,
        repo: &RepoRef,
        number: u64,
        title: &str,
        body: &str,
        state: IssueState,
    ) {
        let mut record = IssueRecord::new(ItemNumber::Remote(number), title, body, state);
        record.extra.insert(
            "pull_request".to_string(),
            serde_json::json!({ "url": format!("https://api.github.com/repos/{repo}/pulls/{number}") }),
        );
        self.insert(repo, record);
    }

    pub fn remove(&self, repo: &RepoRef, number: u64) {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(repo_items) = items.get_mut(repo) {
            repo_items.remove(&number);
        }
    }

    pub fn item(&self, repo: &RepoRef, number: u64) -> Option<IssueRecord> {
        let items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.get(repo).and_then(|repo_items| repo_items.get(&number)).cloned()
    }

    pub fn fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::SeqCst);
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    /// While paused, every `list_items` call waits until [`Self::resume`].
    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Patches received so far, in order.
    pub fn updates(&self) -> Vec<(u64, ItemPatch)> {
        self.updates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl IssueSource for InMemoryIssueSource {
    async fn list_items(
        &self,
        _token: &str,
        repo: &RepoRef,
        state: IssueState,
        page: u32,
        per_page: u32,
    ) -> Result<Page> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let mut paused = self.paused.subscribe();
        if paused.wait_for(|paused| !*paused).await.is_err() {
            bail!("issue source shut down");
        }
        if self.fail_fetches.load(Ordering::SeqCst) {
            bail!("remote unreachable");
        }

        let items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        let skip = (page.saturating_sub(1) * per_page) as usize;
        let records: Vec<IssueRecord> = items
            .get(repo)
            .map(|repo_items| {
                repo_items
                    .values()
                    .filter(|record| record.state == state)
                    .skip(skip)
                    .take(per_page as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(Page::from(records))
    }

    async fn update_item(
        &self,
        _token: &str,
        repo: &RepoRef,
        number: u64,
        patch: &ItemPatch,
    ) -> Result<IssueRecord> {
        if self.fail_updates.load(Ordering::SeqCst) {
            bail!("update rejected");
        }
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        let Some(record) = items
            .get_mut(repo)
            .and_then(|repo_items| repo_items.get_mut(&number))
        else {
            bail!("#{number} not found in {repo}");
        };
        patch.apply(record);
        let updated = record.clone();
        drop(items);

        self.updates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((number, patch.clone()));
        Ok(updated)
    }
}
