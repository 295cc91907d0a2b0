use crate::github::issues::{IssueRecord, IssueState, ItemPatch, parse_records};
use crate::repository::RepoRef;
use anyhow::{Context, Result};
use async_trait::async_trait;

mod endpoints {
    pub const API: &str = "https://api.github.com";
}

const USER_AGENT: &str = "issuesync-cli";

/// One page of items as served by the remote.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub records: Vec<IssueRecord>,
    /// Items the remote sent, including ones that did not parse.
    pub raw_len: usize,
}

impl From<Vec<IssueRecord>> for Page {
    fn from(records: Vec<IssueRecord>) -> Self {
        Page {
            raw_len: records.len(),
            records,
        }
    }
}

/// Remote issue tracker the snapshot is fetched from and written back to.
#[async_trait]
pub trait IssueSource: Send + Sync {
    /// One page (1-based) of issues and pull requests in `state`.
    async fn list_items(
        &self,
        token: &str,
        repo: &RepoRef,
        state: IssueState,
        page: u32,
        per_page: u32,
    ) -> Result<Page>;

    /// Applies `patch` to the issue or pull request `number`.
    async fn update_item(
        &self,
        token: &str,
        repo: &RepoRef,
        number: u64,
        patch: &ItemPatch,
    ) -> Result<IssueRecord>;
}

/// GitHub REST issues API.
pub struct GitHubIssueSource {
    client: reqwest::Client,
    base_url: String,
}

impl GitHubIssueSource {
    pub fn new() -> Result<Self> {
        Self::with_base_url(endpoints::API)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(GitHubIssueSource {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn issues_url(&self, repo: &RepoRef) -> String {
        format!("{}/repos/{}/{}/issues", self.base_url, repo.owner, repo.repo)
    }
}

#[async_trait]
impl IssueSource for GitHubIssueSource {
    async fn list_items(
        &self,
        token: &str,
        repo: &RepoRef,
        state: IssueState,
        page: u32,
        per_page: u32,
    ) -> Result<Page> {
        let response = self
            .client
            .get(self.issues_url(repo))
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .query(&[
                ("state", state.as_str().to_string()),
                ("page", page.to_string()),
                ("per_page", per_page.to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "Failed to list {} items of {repo}: HTTP {status} {body}",
                state.as_str()
            ));
        }

        let items = response
            .json::<Vec<serde_json::Value>>()
            .await
            .context("Invalid issue list response")?;
        let raw_len = items.len();
        Ok(Page {
            records: parse_records(items),
            raw_len,
        })
    }

    async fn update_item(
        &self,
        token: &str,
        repo: &RepoRef,
        number: u64,
        patch: &ItemPatch,
    ) -> Result<IssueRecord> {
        let response = self
            .client
            .patch(format!("{}/{number}", self.issues_url(repo)))
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .json(patch)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "Failed to update #{number} of {repo}: HTTP {status} {body}"
            ));
        }

        let record = response
            .json::<IssueRecord>()
            .await
            .context("Invalid issue update response")?;
        Ok(record)
    }
}
