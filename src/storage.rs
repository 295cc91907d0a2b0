use crate::cache::CacheEntry;
use crate::error::SyncError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Directory under `$HOME` holding the token and the cache.
pub const APP_DIR: &str = ".issuesync";

fn app_dir() -> Result<PathBuf> {
    let home = std::env::var_os("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(APP_DIR))
}

/// Abstract token persistence interface
pub trait TokenStorage: Send + Sync {
    /// Stored token, `Ok(None)` when nothing was saved yet
    fn load(&self) -> Result<Option<String>>;
    fn save(&self, token: &str) -> Result<()>;
    fn delete(&self) -> Result<()>;
}

/// Keeps the token in `~/.issuesync/token`
pub struct FileTokenStorage {
    path: PathBuf,
}

impl FileTokenStorage {
    pub fn new() -> Result<Self> {
        Ok(Self::at(app_dir()?.join("token")))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        FileTokenStorage { path: path.into() }
    }
}

impl TokenStorage for FileTokenStorage {
    fn load(&self) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path).context("Failed to read token file")?;
        let token = content.trim();
        Ok((!token.is_empty()).then(|| token.to_string()))
    }

    fn save(&self, token: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create storage directory")?;
        }
        fs::write(&self.path, token.trim()).context("Failed to write token file")?;
        Ok(())
    }

    fn delete(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path).context("Failed to delete token file")?;
        }
        Ok(())
    }
}

/// Durable keyed storage for cache entries.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<CacheEntry>, SyncError>;
    async fn write(&self, key: &str, entry: &CacheEntry) -> Result<(), SyncError>;
    async fn erase(&self, key: &str) -> Result<(), SyncError>;
}

/// One JSON document per repository under `~/.issuesync/cache/`.
pub struct FileCacheStorage {
    dir: PathBuf,
}

impl FileCacheStorage {
    pub fn new() -> Result<Self> {
        Ok(Self::in_dir(app_dir()?.join("cache")))
    }

    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        FileCacheStorage { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| match c {
                '/' => "__".to_string(),
                c if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') => c.to_string(),
                _ => "_".to_string(),
            })
            .collect();
        self.dir.join(format!("{file}.json"))
    }
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

#[async_trait]
impl CacheStorage for FileCacheStorage {
    async fn read(&self, key: &str) -> Result<Option<CacheEntry>, SyncError> {
        let path = self.path_for(key);
        if !exists(&path).await {
            return Ok(None);
        }
        let content = tokio::fs::read(&path).await.map_err(SyncError::storage)?;
        match serde_json::from_slice::<CacheEntry>(&content) {
            Ok(entry) => Ok(Some(entry)),
            Err(err) => {
                // An unreadable entry is treated like a missing one; the next fetch overwrites it.
                tracing::warn!(path = %path.display(), error = %err, "ignoring corrupt cache file");
                Ok(None)
            }
        }
    }

    async fn write(&self, key: &str, entry: &CacheEntry) -> Result<(), SyncError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(SyncError::storage)?;
        let path = self.path_for(key);
        let content = serde_json::to_vec(entry).map_err(SyncError::storage)?;
        // Write to a sibling file first so readers never see a half-written entry.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(SyncError::storage)?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(SyncError::storage)?;
        Ok(())
    }

    async fn erase(&self, key: &str) -> Result<(), SyncError> {
        let path = self.path_for(key);
        if exists(&path).await {
            tokio::fs::remove_file(&path)
                .await
                .map_err(SyncError::storage)?;
        }
        Ok(())
    }
}

/// Process-local storage, for tests and one-shot runs.
#[derive(Default)]
pub struct MemoryCacheStorage {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn read(&self, key: &str) -> Result<Option<CacheEntry>, SyncError> {
        let entries = self.entries.lock().map_err(SyncError::storage)?;
        Ok(entries.get(key).cloned())
    }

    async fn write(&self, key: &str, entry: &CacheEntry) -> Result<(), SyncError> {
        let mut entries = self.entries.lock().map_err(SyncError::storage)?;
        entries.insert(key.to_string(), entry.clone());
        Ok(())
    }

    async fn erase(&self, key: &str) -> Result<(), SyncError> {
        let mut entries = self.entries.lock().map_err(SyncError::storage)?;
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::issues::{IssueRecord, IssueState, ItemNumber};

    fn entry(key: &str) -> CacheEntry {
        CacheEntry {
            repository_key: key.to_string(),
            fetched_at: chrono::Utc::now(),
            requested_at: chrono::Utc::now(),
            issues: vec![IssueRecord::new(
                ItemNumber::Remote(1),
                "One",
                "- [ ] a",
                IssueState::Open,
            )],
            pull_requests: vec![],
        }
    }

    #[test]
    fn test_token_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileTokenStorage::at(dir.path().join("nested").join("token"));

        assert_eq!(storage.load().unwrap(), None);
        storage.save("gho_abc\n").unwrap();
        assert_eq!(storage.load().unwrap(), Some("gho_abc".to_string()));
        storage.delete().unwrap();
        assert_eq!(storage.load().unwrap(), None);
        storage.delete().unwrap();
    }

    #[tokio::test]
    async fn test_file_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileCacheStorage::in_dir(dir.path());
        let stored = entry("octo/widgets");

        assert!(storage.read("octo/widgets").await.unwrap().is_none());
        storage.write("octo/widgets", &stored).await.unwrap();

        let loaded = storage.read("octo/widgets").await.unwrap().unwrap();
        assert_eq!(loaded, stored);
        assert!(dir.path().join("octo__widgets.json").exists());

        storage.erase("octo/widgets").await.unwrap();
        assert!(storage.read("octo/widgets").await.unwrap().is_none());
        storage.erase("octo/widgets").await.unwrap();
    }

    #[tokio::test]
    async fn test_file_cache_ignores_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("o__r.json"), b"{not json").unwrap();
        let storage = FileCacheStorage::in_dir(dir.path());

        assert!(storage.read("o/r").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_cache_keys_are_independent() {
        let storage = MemoryCacheStorage::new();
        storage.write("a/b", &entry("a/b")).await.unwrap();

        assert!(storage.read("a/b").await.unwrap().is_some());
        assert!(storage.read("c/d").await.unwrap().is_none());
        storage.erase("a/b").await.unwrap();
        assert!(storage.read("a/b").await.unwrap().is_none());
    }
}
