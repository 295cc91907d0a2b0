use thiserror::Error;

/// Why a repository could not be identified from the workspace.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnresolvableReason {
    #[error("no workspace is open")]
    NoWorkspace,
    #[error("the workspace has no `origin` remote")]
    NoRemote,
    #[error("cannot parse remote URL `{0}`")]
    UnparseableRemote(String),
}

/// Errors raised by the synchronization core.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("repository unresolvable: {0}")]
    RepositoryUnresolvable(#[from] UnresolvableReason),

    #[error("failed to fetch items: {0}")]
    RemoteFetchFailed(String),

    #[error("failed to update #{number}: {reason}")]
    RemoteUpdateFailed { number: String, reason: String },

    #[error("not initialized: authenticate before calling the remote")]
    NotInitialized,

    #[error("item {0} not found")]
    ItemNotFound(String),

    #[error("cache storage error: {0}")]
    Storage(String),
}

impl SyncError {
    pub fn fetch(err: impl std::fmt::Display) -> Self {
        SyncError::RemoteFetchFailed(err.to_string())
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        SyncError::Storage(err.to_string())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
