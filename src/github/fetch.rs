use crate::github::client::IssueSource;
use crate::github::issues::{IssueRecord, IssueState, partition_items};
use crate::repository::RepoRef;
use anyhow::Result;

/// Largest page the issues API serves.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Issues and pull requests of one repository, open and closed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub issues: Vec<IssueRecord>,
    pub pull_requests: Vec<IssueRecord>,
}

/// Reads every page of items in `state`.
///
/// Stops at the first empty page or at a page shorter than `per_page`. Page
/// length is what the remote sent, so items skipped while parsing do not end
/// the listing early.
pub async fn fetch_all_pages(
    source: &dyn IssueSource,
    token: &str,
    repo: &RepoRef,
    state: IssueState,
    per_page: u32,
) -> Result<Vec<IssueRecord>> {
    let per_page = per_page.clamp(1, MAX_PAGE_SIZE);
    let mut all_items = Vec::new();
    let mut page = 1;

    loop {
        let items = source.list_items(token, repo, state, page, per_page).await?;
        let last_page = items.raw_len < per_page as usize;
        all_items.extend(items.records);
        if last_page {
            break;
        }
        page += 1;
    }

    tracing::debug!(%repo, state = state.as_str(), pages = page, items = all_items.len(), "fetched items");
    Ok(all_items)
}

/// Fetches the complete open and closed sets and splits them into issues and
/// pull requests.
pub async fn fetch_snapshot(
    source: &dyn IssueSource,
    token: &str,
    repo: &RepoRef,
    per_page: u32,
) -> Result<Snapshot> {
    let mut items = fetch_all_pages(source, token, repo, IssueState::Open, per_page).await?;
    items.extend(fetch_all_pages(source, token, repo, IssueState::Closed, per_page).await?);
    let (issues, pull_requests) = partition_items(items);
    Ok(Snapshot {
        issues,
        pull_requests,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::client::Page;
    use crate::github::issues::ItemPatch;
    use crate::github::memory::InMemoryIssueSource;
    use async_trait::async_trait;

    /// Serves full pages but loses the first record of each while parsing.
    struct MalformedFirstItem(InMemoryIssueSource);

    #[async_trait]
    impl IssueSource for MalformedFirstItem {
        async fn list_items(
            &self,
            token: &str,
            repo: &RepoRef,
            state: IssueState,
            page: u32,
            per_page: u32,
        ) -> Result<Page> {
            let mut served = self.0.list_items(token, repo, state, page, per_page).await?;
            if !served.records.is_empty() {
                served.records.remove(0);
            }
            Ok(served)
        }

        async fn update_item(
            &self,
            token: &str,
            repo: &RepoRef,
            number: u64,
            patch: &ItemPatch,
        ) -> Result<IssueRecord> {
            self.0.update_item(token, repo, number, patch).await
        }
    }

    fn repo() -> RepoRef {
        RepoRef::new("user", "repo")
    }

    #[tokio::test]
    async fn test_fetch_single_page() {
        let source = InMemoryIssueSource::new();
        source.add_issue(&repo(), 123, "Test issue", "", IssueState::Open);

        let items = fetch_all_pages(&source, "token", &repo(), IssueState::Open, 100)
            .await
            .unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].number.remote(), 123);
        assert_eq!(source.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_fetch_multiple_pages() {
        let source = InMemoryIssueSource::new();
        for number in 1..=5 {
            source.add_issue(&repo(), number, "Issue", "", IssueState::Open);
        }

        let items = fetch_all_pages(&source, "token", &repo(), IssueState::Open, 2)
            .await
            .unwrap();

        assert_eq!(
            items.iter().map(|i| i.number.remote()).collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 5]
        );
        assert_eq!(source.list_calls(), 3);
    }

    #[tokio::test]
    async fn test_fetch_exact_multiple_needs_trailing_empty_page() {
        let source = InMemoryIssueSource::new();
        for number in 1..=4 {
            source.add_issue(&repo(), number, "Issue", "", IssueState::Open);
        }

        let items = fetch_all_pages(&source, "token", &repo(), IssueState::Open, 2)
            .await
            .unwrap();

        assert_eq!(items.len(), 4);
        assert_eq!(source.list_calls(), 3);
    }

    #[tokio::test]
    async fn test_unparsable_item_does_not_end_paging() {
        let inner = InMemoryIssueSource::new();
        for number in 1..=5 {
            inner.add_issue(&repo(), number, "Issue", "", IssueState::Open);
        }
        let source = MalformedFirstItem(inner);

        let items = fetch_all_pages(&source, "token", &repo(), IssueState::Open, 2)
            .await
            .unwrap();

        assert_eq!(
            items.iter().map(|i| i.number.remote()).collect::<Vec<_>>(),
            vec![2, 4]
        );
        assert_eq!(source.0.list_calls(), 3);
    }

    #[tokio::test]
    async fn test_fetch_empty_repository() {
        let source = InMemoryIssueSource::new();

        let snapshot = fetch_snapshot(&source, "token", &repo(), 100).await.unwrap();

        assert_eq!(snapshot, Snapshot::default());
    }

    #[tokio::test]
    async fn test_fetch_snapshot_covers_both_states_and_partitions() {
        let source = InMemoryIssueSource::new();
        source.add_issue(&repo(), 1, "Open issue", "", IssueState::Open);
        source.add_issue(&repo(), 2, "Closed issue", "", IssueState::Closed);
        source.add_pull_request(&repo(), 3, "Open PR", "", IssueState::Open);
        source.add_pull_request(&repo(), 4, "Merged PR", "", IssueState::Closed);

        let snapshot = fetch_snapshot(&source, "token", &repo(), 100).await.unwrap();

        assert_eq!(
            snapshot.issues.iter().map(|i| i.number.remote()).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(
            snapshot
                .pull_requests
                .iter()
                .map(|i| i.number.remote())
                .collect::<Vec<_>>(),
            vec![3, 4]
        );
    }

    #[tokio::test]
    async fn test_fetch_error_propagates() {
        let source = InMemoryIssueSource::new();
        source.fail_fetches(true);

        let result = fetch_snapshot(&source, "token", &repo(), 100).await;

        assert!(result.unwrap_err().to_string().contains("unreachable"));
    }
}
