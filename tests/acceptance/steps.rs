use crate::SyncWorld;
use chrono::{Duration, Utc};
use cucumber::gherkin::Step;
use cucumber::{given, then, when};
use issuesync::auth::StaticTokenProvider;
use issuesync::cache::{CacheEntry, CacheStore};
use issuesync::config::Settings;
use issuesync::coordinator::RefreshCoordinator;
use issuesync::github::issues::{IssueRecord, IssueState, ItemNumber};
use issuesync::node::{IssueTree, NodeKind};
use issuesync::output;
use issuesync::repository::{FixedRepository, RepoRef};
use issuesync::storage::CacheStorage;
use std::sync::Arc;

fn repo() -> RepoRef {
    RepoRef::new("octo", "widgets")
}

fn state(name: &str) -> IssueState {
    match name {
        "closed" => IssueState::Closed,
        _ => IssueState::Open,
    }
}

/// Docstring with surrounding blank lines and common indentation removed.
fn docstring(step: &Step) -> String {
    let text = step
        .docstring
        .as_deref()
        .expect("Expected a docstring")
        .trim_matches('\n');
    let indent = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0);
    text.lines()
        .map(|line| line.get(indent..).unwrap_or("").trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

fn coordinator(world: &mut SyncWorld) -> Arc<RefreshCoordinator> {
    world
        .coordinator
        .get_or_insert_with(|| {
            let token = world.signed_in.then(|| "acceptance-token".to_string());
            RefreshCoordinator::new(
                world.source.clone(),
                Arc::new(StaticTokenProvider(token)),
                Arc::new(FixedRepository(repo())),
                CacheStore::new(world.storage.clone()),
                &Settings::default(),
            )
        })
        .clone()
}

async fn cached_titles(world: &SyncWorld) -> Vec<String> {
    world
        .storage
        .read(&repo().key())
        .await
        .expect("cache readable")
        .map(|entry| entry.issues.into_iter().map(|issue| issue.title).collect())
        .unwrap_or_default()
}

#[given(regex = r#"^the remote has an? (open|closed) issue #(\d+) "(.*)"$"#)]
async fn remote_issue(world: &mut SyncWorld, issue_state: String, number: u64, title: String) {
    world
        .source
        .add_issue(&repo(), number, &title, "", state(&issue_state));
}

#[given(regex = r#"^the remote has an? (open|closed) issue #(\d+) "(.*)" with body:$"#)]
async fn remote_issue_with_body(
    world: &mut SyncWorld,
    step: &Step,
    issue_state: String,
    number: u64,
    title: String,
) {
    world
        .source
        .add_issue(&repo(), number, &title, &docstring(step), state(&issue_state));
}

#[given(regex = r#"^the remote has an? (open|closed) pull request #(\d+) "(.*)" with body:$"#)]
async fn remote_pull_request(
    world: &mut SyncWorld,
    step: &Step,
    pr_state: String,
    number: u64,
    title: String,
) {
    world
        .source
        .add_pull_request(&repo(), number, &title, &docstring(step), state(&pr_state));
}

#[given("the remote is unreachable")]
async fn remote_unreachable(world: &mut SyncWorld) {
    world.source.fail_fetches(true);
}

#[given("the remote rejects updates")]
async fn remote_rejects_updates(world: &mut SyncWorld) {
    world.source.fail_updates(true);
}

#[given(regex = r#"^the cache holds issue #(\d+) "(.*)" written (\d+) minutes ago$"#)]
async fn cache_holds_issue(world: &mut SyncWorld, number: u64, title: String, minutes: i64) {
    let written = Utc::now() - Duration::minutes(minutes);
    let entry = CacheEntry {
        repository_key: repo().key(),
        fetched_at: written,
        requested_at: written,
        issues: vec![IssueRecord::new(
            ItemNumber::Remote(number),
            &title,
            "",
            IssueState::Open,
        )],
        pull_requests: vec![],
    };
    world
        .storage
        .write(&repo().key(), &entry)
        .await
        .expect("cache writable");
}

#[given("the user is signed in")]
async fn signed_in(world: &mut SyncWorld) {
    world.signed_in = true;
    let coordinator = coordinator(world);
    coordinator.initialize().await.expect("sign-in succeeds");
}

#[given("the user is not signed in")]
async fn not_signed_in(world: &mut SyncWorld) {
    world.signed_in = false;
    let coordinator = coordinator(world);
    world.last_error = coordinator.initialize().await.err();
}

#[when("the issues are listed")]
async fn list_issues(world: &mut SyncWorld) {
    let coordinator = coordinator(world);
    let snapshot = coordinator
        .get_cached_or_fetch()
        .await
        .expect("listing succeeds");
    world.tree = IssueTree::from_snapshot(&snapshot.issues, &snapshot.pull_requests);
    world.listing = output::render_tree(&world.tree);
}

#[when("background work has finished")]
async fn background_finished(world: &mut SyncWorld) {
    coordinator(world).shutdown().await;
}

#[when("the cache is cleared")]
async fn clear_cache(world: &mut SyncWorld) {
    coordinator(world)
        .clear_cache()
        .await
        .expect("cache cleared");
}

#[when(regex = r"^the user toggles item ([\d.]+)$")]
async fn toggle_item(world: &mut SyncWorld, number: String) {
    let coordinator = coordinator(world);
    let number: ItemNumber = number.parse().expect("valid item number");
    let id = world.tree.find(&number).expect("item is listed");
    world.last_error = coordinator.toggle(&mut world.tree, id).await.err();
    world.listing = output::render_tree(&world.tree);
}

#[when(regex = r#"^the user renames item ([\d.]+) to "(.*)"$"#)]
async fn rename_item(world: &mut SyncWorld, number: String, title: String) {
    let coordinator = coordinator(world);
    let number: ItemNumber = number.parse().expect("valid item number");
    world.last_error = coordinator.update_title(number, &title).await.err();
}

#[then(regex = r#"^the listing is:$"#)]
async fn listing_is(world: &mut SyncWorld, step: &Step) {
    let expected: Vec<String> = docstring(step).lines().map(str::to_string).collect();
    assert_eq!(world.listing, expected);
}

#[then("the listing is empty")]
async fn listing_is_empty(world: &mut SyncWorld) {
    assert!(world.listing.is_empty(), "{:?}", world.listing);
}

#[then(regex = r#"^the cache holds "(.*)"$"#)]
async fn cache_holds(world: &mut SyncWorld, title: String) {
    assert_eq!(cached_titles(world).await, vec![title]);
}

#[then("the cache is empty")]
async fn cache_is_empty(world: &mut SyncWorld) {
    let entry = world.storage.read(&repo().key()).await.expect("cache readable");
    assert!(entry.is_none(), "{entry:?}");
}

#[then(regex = r"^the remote was asked for items (\d+) times?$")]
async fn remote_calls(world: &mut SyncWorld, calls: usize) {
    assert_eq!(world.source.list_calls(), calls);
}

#[then(regex = r"^no node has children$")]
async fn no_children(world: &mut SyncWorld) {
    for root in world.tree.roots() {
        assert!(world.tree.children(*root).is_empty());
        assert_eq!(world.tree.get(*root).progress_percent, None);
    }
    let progress_nodes = world
        .tree
        .roots()
        .iter()
        .flat_map(|root| world.tree.children(*root))
        .filter(|id| world.tree.get(**id).kind == NodeKind::ProgressIndicator)
        .count();
    assert_eq!(progress_nodes, 0);
}

#[then(regex = r#"^the remote body of issue #(\d+) is:$"#)]
async fn remote_body(world: &mut SyncWorld, step: &Step, number: u64) {
    let item = world.source.item(&repo(), number).expect("item exists");
    assert_eq!(item.body, docstring(step));
}

#[then(regex = r#"^the remote title of issue #(\d+) is "(.*)"$"#)]
async fn remote_title(world: &mut SyncWorld, number: u64, title: String) {
    let item = world.source.item(&repo(), number).expect("item exists");
    assert_eq!(item.title, title);
}

#[then("the update fails")]
async fn update_fails(world: &mut SyncWorld) {
    assert!(world.last_error.is_some());
}

#[then(regex = r"^the operation fails with (.+)$")]
async fn operation_fails_with(world: &mut SyncWorld, kind: String) {
    let error = world.last_error.as_ref().expect("an error was recorded");
    let name = format!("{error:?}");
    assert!(name.starts_with(&kind), "{name}");
}
