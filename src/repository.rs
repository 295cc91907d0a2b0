use crate::error::{SyncError, UnresolvableReason};
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;

/// A GitHub repository, `owner/repo`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
}

impl RepoRef {
    pub fn new(owner: &str, repo: &str) -> Self {
        RepoRef {
            owner: owner.to_string(),
            repo: repo.to_string(),
        }
    }

    /// Parses `owner/repo`.
    pub fn parse_slug(slug: &str) -> Option<Self> {
        let (owner, repo) = slug.trim().split_once('/')?;
        if owner.is_empty() || repo.is_empty() || repo.contains('/') {
            return None;
        }
        Some(RepoRef::new(owner, repo))
    }

    /// Key the cache entry for this repository is stored under.
    pub fn key(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// Extracts `owner/repo` from a GitHub remote URL.
///
/// Accepts `https://github.com/o/r(.git)`, `git@github.com:o/r(.git)` and
/// `ssh://git@github.com/o/r(.git)`.
pub fn parse_remote_url(url: &str) -> Option<RepoRef> {
    let url = url.trim();
    let path = if let Some(rest) = url.strip_prefix("git@") {
        rest.split_once(':')?.1
    } else {
        let (_, rest) = url.split_once("://")?;
        let (_, path) = rest.split_once('/')?;
        path
    };
    let path = path.trim_end_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    RepoRef::parse_slug(path)
}

/// Finds out which repository the current workspace belongs to.
#[async_trait]
pub trait RepositoryResolver: Send + Sync {
    async fn resolve(&self) -> Result<RepoRef, SyncError>;
}

/// Always answers with the configured repository.
pub struct FixedRepository(pub RepoRef);

#[async_trait]
impl RepositoryResolver for FixedRepository {
    async fn resolve(&self) -> Result<RepoRef, SyncError> {
        Ok(self.0.clone())
    }
}

/// Reads the `origin` remote of the git checkout at `workspace`.
pub struct GitRemoteResolver {
    workspace: Option<PathBuf>,
}

impl GitRemoteResolver {
    pub fn new(workspace: Option<PathBuf>) -> Self {
        GitRemoteResolver { workspace }
    }
}

#[async_trait]
impl RepositoryResolver for GitRemoteResolver {
    async fn resolve(&self) -> Result<RepoRef, SyncError> {
        let workspace = self
            .workspace
            .as_ref()
            .filter(|dir| dir.is_dir())
            .ok_or(UnresolvableReason::NoWorkspace)?;

        let output = tokio::process::Command::new("git")
            .arg("-C")
            .arg(workspace)
            .args(["remote", "get-url", "origin"])
            .output()
            .await
            .map_err(|err| {
                tracing::error!(error = %err, "failed to run git");
                UnresolvableReason::NoRemote
            })?;

        if !output.status.success() {
            tracing::debug!(
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "git remote lookup failed"
            );
            return Err(UnresolvableReason::NoRemote.into());
        }

        let url = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if url.is_empty() {
            return Err(UnresolvableReason::NoRemote.into());
        }
        parse_remote_url(&url).ok_or_else(|| UnresolvableReason::UnparseableRemote(url).into())
    }
}
