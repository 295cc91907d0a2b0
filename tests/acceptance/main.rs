use cucumber::World;
use issuesync::coordinator::RefreshCoordinator;
use issuesync::error::SyncError;
use issuesync::github::memory::InMemoryIssueSource;
use issuesync::node::IssueTree;
use issuesync::storage::MemoryCacheStorage;
use std::fmt;
use std::sync::Arc;

#[derive(Default, World)]
pub struct SyncWorld {
    pub source: Arc<InMemoryIssueSource>,
    pub storage: Arc<MemoryCacheStorage>,
    pub signed_in: bool,
    pub coordinator: Option<Arc<RefreshCoordinator>>,
    pub tree: IssueTree,
    pub listing: Vec<String>,
    pub last_error: Option<SyncError>,
}

impl fmt::Debug for SyncWorld {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncWorld")
            .field("signed_in", &self.signed_in)
            .field("listing", &self.listing)
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}

#[tokio::main]
async fn main() {
    SyncWorld::run("features").await;
}

mod steps;
