use crate::auth::{self, AuthProvider, DeviceFlow, StoredTokenProvider};
use crate::cache::CacheStore;
use crate::cli::parser::{self, Command};
use crate::config::Settings;
use crate::coordinator::RefreshCoordinator;
use crate::error::SyncError;
use crate::github::client::{GitHubIssueSource, IssueSource};
use crate::github::fetch::Snapshot;
use crate::node::IssueTree;
use crate::output;
use crate::repository::{FixedRepository, GitRemoteResolver, RepositoryResolver};
use crate::storage::{FileCacheStorage, FileTokenStorage, TokenStorage};
use anyhow::Context;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

const CLIENT_ID: &str = std::env!("GITHUB_CLIENT_ID");
const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Everything a command needs from the outside world.
pub struct Services {
    pub settings: Settings,
    pub source: Arc<dyn IssueSource>,
    pub resolver: Arc<dyn RepositoryResolver>,
    pub cache: CacheStore,
    pub tokens: Arc<dyn TokenStorage>,
    pub auth: Arc<dyn AuthProvider>,
}

impl Services {
    /// GitHub, `~/.issuesync` and the repository of the current directory.
    pub fn from_environment() -> anyhow::Result<Self> {
        let cwd = std::env::current_dir().context("Failed to get current directory")?;
        let home = std::env::var_os("HOME").map(PathBuf::from);
        let settings = Settings::load(home.as_deref(), &cwd)?;

        let resolver: Arc<dyn RepositoryResolver> = match &settings.repository {
            Some(repo) => Arc::new(FixedRepository(repo.clone())),
            None => Arc::new(GitRemoteResolver::new(Some(cwd))),
        };
        let tokens: Arc<dyn TokenStorage> = Arc::new(FileTokenStorage::new()?);

        Ok(Services {
            settings,
            source: Arc::new(GitHubIssueSource::new()?),
            resolver,
            cache: CacheStore::new(Arc::new(FileCacheStorage::new()?)),
            auth: Arc::new(StoredTokenProvider::new(tokens.clone())),
            tokens,
        })
    }

    fn coordinator(&self) -> Arc<RefreshCoordinator> {
        RefreshCoordinator::new(
            self.source.clone(),
            self.auth.clone(),
            self.resolver.clone(),
            self.cache.clone(),
            &self.settings,
        )
    }
}

pub async fn run(
    args: Vec<String>,
    stdout_additional: Option<&mut dyn Write>,
    poll_timeout: Option<Duration>,
) -> anyhow::Result<()> {
    let command = parser::parse_args(&args);
    match command {
        Command::Help | Command::Unknown(_) => {
            // Usable outside a repository and without a home directory.
            let mut out = stdout_additional;
            print_usage(&command, &mut out)
        }
        command => {
            let services = Services::from_environment()?;
            execute(command, &services, stdout_additional, poll_timeout).await
        }
    }
}

fn print_usage(command: &Command, out: &mut Option<&mut dyn Write>) -> anyhow::Result<()> {
    if let Command::Unknown(message) = command {
        output::println(&format!("Unknown command: {message}"), out)?;
        output::println("Use `issuesync help` for usage.", out)?;
    } else {
        output::println(parser::USAGE, out)?;
    }
    Ok(())
}

fn print_snapshot(snapshot: &Snapshot, out: &mut Option<&mut dyn Write>) -> anyhow::Result<()> {
    let tree = IssueTree::from_snapshot(&snapshot.issues, &snapshot.pull_requests);
    if tree.is_empty() {
        output::println("No issues or pull requests.", out)?;
    }
    for line in output::render_tree(&tree) {
        output::println(&line, out)?;
    }
    Ok(())
}

/// Signs in, but keeps going on cached data when that fails.
async fn initialize_for_reading(
    coordinator: &RefreshCoordinator,
    out: &mut Option<&mut dyn Write>,
) -> anyhow::Result<()> {
    match coordinator.initialize().await {
        Ok(_) => Ok(()),
        Err(SyncError::AuthenticationFailed(reason)) => {
            output::println(&format!("Not signed in ({reason}). Showing cached data."), out)?;
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

/// Runs one parsed command against `services`.
pub async fn execute(
    command: Command,
    services: &Services,
    mut stdout_additional: Option<&mut dyn Write>,
    poll_timeout: Option<Duration>,
) -> anyhow::Result<()> {
    let out = &mut stdout_additional;
    match command {
        Command::List => {
            let coordinator = services.coordinator();
            initialize_for_reading(&coordinator, out).await?;
            let snapshot = coordinator.get_cached_or_fetch().await?;
            print_snapshot(&snapshot, out)?;
            coordinator.shutdown().await;
        }
        Command::Watch => {
            let coordinator = services.coordinator();
            coordinator.initialize().await?;
            let mut updates = coordinator.subscribe();
            let snapshot = coordinator.load_cache_and_fetch().await?;
            print_snapshot(&snapshot, out)?;
            coordinator.start_periodic_refresh();

            loop {
                tokio::select! {
                    update = updates.recv() => match update {
                        Ok(update) => {
                            output::println(&format!("-- updated {}", update.repository_key), out)?;
                            print_snapshot(
                                &Snapshot {
                                    issues: update.issues,
                                    pull_requests: update.pull_requests,
                                },
                                out,
                            )?;
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::debug!(skipped, "skipped stale updates");
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            coordinator.shutdown().await;
        }
        Command::Refresh => {
            let coordinator = services.coordinator();
            coordinator.initialize().await?;
            let snapshot = coordinator.refresh().await?;
            print_snapshot(&snapshot, out)?;
        }
        Command::Clear => {
            let coordinator = services.coordinator();
            let repo = coordinator.repository().await?;
            coordinator.clear_cache().await?;
            output::println(&format!("Cleared cached data for {repo}"), out)?;
        }
        Command::Toggle { number } => {
            let coordinator = services.coordinator();
            coordinator.initialize().await?;
            let snapshot = coordinator.get_cached_or_fetch().await?;
            let mut tree = IssueTree::from_snapshot(&snapshot.issues, &snapshot.pull_requests);
            let id = tree
                .find(&number)
                .ok_or_else(|| SyncError::ItemNotFound(number.to_string()))?;

            let toggled = coordinator.toggle(&mut tree, id).await;
            coordinator.shutdown().await;
            if let Some(checked) = toggled? {
                let mark = if checked { 'x' } else { ' ' };
                let node = tree.get(id);
                output::println(&format!("[{mark}] {number} {}", node.record.title), out)?;
            }
        }
        Command::Rename { number, title } => {
            let coordinator = services.coordinator();
            coordinator.initialize().await?;
            coordinator.get_cached_or_fetch().await?;
            let renamed = coordinator.update_title(number, &title).await;
            coordinator.shutdown().await;
            let record = renamed?;
            output::println(&format!("Renamed {number} ({})", record.title), out)?;
        }
        Command::Login => {
            let flow = DeviceFlow::new(CLIENT_ID)?;
            let code = flow.request_code().await.context("Failed to get device code")?;

            output::println(&format!("Please visit: {}", code.verification_uri), out)?;
            output::println(&format!("and enter code: {}", code.user_code), out)?;

            let timeout = poll_timeout.unwrap_or(DEFAULT_POLL_TIMEOUT);
            let token = flow
                .wait_for_token(&code, timeout)
                .await
                .context("Failed to poll for access token")?;

            services.tokens.save(&token).context("Failed to save token")?;
            tracing::info!(scopes = ?auth::SCOPES, "signed in");
            output::println("✓ Authentication complete", out)?;
        }
        Command::Logout => {
            services.tokens.delete().context("Failed to remove token")?;
            output::println("Signed out", out)?;
        }
        command @ (Command::Help | Command::Unknown(_)) => print_usage(&command, out)?,
    }
    Ok(())
}
