use crate::error::SyncError;
use crate::storage::TokenStorage;
use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

mod endpoints {
    pub const DEVICE_CODE: &str = "https://github.com/login/device/code";
    pub const ACCESS_TOKEN: &str = "https://github.com/login/oauth/access_token";
}

/// Scopes needed to read and edit issues.
pub const SCOPES: &[&str] = &["repo"];

/// Environment variable checked before the stored token.
pub const TOKEN_ENV: &str = "GITHUB_TOKEN";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    pub scopes: Vec<String>,
}

/// Hands out access tokens for the remote source.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn get_session(&self, scopes: &[&str]) -> Result<Session, SyncError>;
}

fn session(token: String, scopes: &[&str]) -> Session {
    Session {
        access_token: token,
        scopes: scopes.iter().map(|s| s.to_string()).collect(),
    }
}

/// Uses `GITHUB_TOKEN` when set, otherwise the token saved by `login`.
pub struct StoredTokenProvider {
    storage: Arc<dyn TokenStorage>,
}

impl StoredTokenProvider {
    pub fn new(storage: Arc<dyn TokenStorage>) -> Self {
        StoredTokenProvider { storage }
    }
}

#[async_trait]
impl AuthProvider for StoredTokenProvider {
    async fn get_session(&self, scopes: &[&str]) -> Result<Session, SyncError> {
        if let Some(token) = std::env::var(TOKEN_ENV).ok().filter(|t| !t.trim().is_empty()) {
            tracing::debug!("using token from {TOKEN_ENV}");
            return Ok(session(token.trim().to_string(), scopes));
        }
        match self.storage.load() {
            Ok(Some(token)) => Ok(session(token, scopes)),
            Ok(None) => Err(SyncError::AuthenticationFailed(
                "No token found. Please run `login` first.".to_string(),
            )),
            Err(err) => Err(SyncError::AuthenticationFailed(format!("{err:#}"))),
        }
    }
}

/// Fixed token, or a fixed refusal when `None`.
pub struct StaticTokenProvider(pub Option<String>);

#[async_trait]
impl AuthProvider for StaticTokenProvider {
    async fn get_session(&self, scopes: &[&str]) -> Result<Session, SyncError> {
        self.0
            .clone()
            .map(|token| session(token, scopes))
            .ok_or_else(|| SyncError::AuthenticationFailed("sign-in declined".to_string()))
    }
}

/// Response from device code request
#[derive(Deserialize, Debug)]
pub struct DeviceCodeResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub expires_in: u64,
    pub interval: u64,
}

/// Response from access token request
#[derive(Deserialize, Debug, Default)]
pub struct AccessTokenResponse {
    pub access_token: Option<String>,
    pub scope: Option<String>,
    pub error: Option<String>,
    pub interval: Option<u64>,
}

/// What to do after one access token poll.
#[derive(Debug, PartialEq)]
pub enum PollStep {
    Authorized(String),
    /// Keep polling at the current pace.
    Pending,
    /// Keep polling, waiting this many seconds between polls.
    SlowDown(u64),
    Failed(String),
}

pub fn next_poll_step(response: &AccessTokenResponse) -> PollStep {
    if let Some(token) = &response.access_token {
        return PollStep::Authorized(token.clone());
    }
    match response.error.as_deref() {
        Some("authorization_pending") => PollStep::Pending,
        Some("slow_down") => PollStep::SlowDown(response.interval.unwrap_or(5)),
        Some("expired_token") => {
            PollStep::Failed("The device code has expired. Please run `login` again.".to_string())
        }
        Some("access_denied") => PollStep::Failed("Login cancelled by user.".to_string()),
        Some(other) => PollStep::Failed(format!("Unknown error: {other}")),
        None => PollStep::Failed("Invalid response from GitHub API".to_string()),
    }
}

/// GitHub OAuth device flow used by `login`.
pub struct DeviceFlow {
    client: reqwest::Client,
    client_id: String,
}

impl DeviceFlow {
    pub fn new(client_id: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(DeviceFlow {
            client,
            client_id: client_id.to_string(),
        })
    }

    pub async fn request_code(&self) -> anyhow::Result<DeviceCodeResponse> {
        let scope = SCOPES.join(" ");
        let response = self
            .client
            .post(endpoints::DEVICE_CODE)
            .query(&[("client_id", self.client_id.as_str()), ("scope", scope.as_str())])
            .header("Accept", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("Failed to get device code: HTTP {}", response.status());
        }
        Ok(response.json::<DeviceCodeResponse>().await?)
    }

    pub async fn wait_for_token(
        &self,
        code: &DeviceCodeResponse,
        timeout: Duration,
    ) -> anyhow::Result<String> {
        let started = Instant::now();
        let mut interval = Duration::from_secs(code.interval);

        loop {
            if started.elapsed() > timeout {
                anyhow::bail!(
                    "Authentication timed out after {} seconds. Please try `login` again.",
                    timeout.as_secs()
                );
            }

            let response = self
                .client
                .post(endpoints::ACCESS_TOKEN)
                .header("Accept", "application/json")
                .query(&[
                    ("client_id", self.client_id.as_str()),
                    ("device_code", code.device_code.as_str()),
                    ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
                ])
                .send()
                .await?;

            if !response.status().is_success() {
                anyhow::bail!("API request error: {}", response.status());
            }

            match next_poll_step(&response.json::<AccessTokenResponse>().await?) {
                PollStep::Authorized(token) => return Ok(token),
                PollStep::Pending => {}
                PollStep::SlowDown(seconds) => interval = Duration::from_secs(seconds),
                PollStep::Failed(message) => anyhow::bail!(message),
            }

            tokio::time::sleep(interval).await;
        }
    }
}
