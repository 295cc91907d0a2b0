use crate::github::fetch::MAX_PAGE_SIZE;
use crate::repository::RepoRef;
use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Configuration keys enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    Repository,
    PageSize,
    StaleAfterMinutes,
    RefreshIntervalMinutes,
}

impl ConfigKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKey::Repository => "repository",
            ConfigKey::PageSize => "page_size",
            ConfigKey::StaleAfterMinutes => "stale_after_minutes",
            ConfigKey::RefreshIntervalMinutes => "refresh_interval_minutes",
        }
    }

    pub fn all() -> &'static [ConfigKey] {
        &[
            ConfigKey::Repository,
            ConfigKey::PageSize,
            ConfigKey::StaleAfterMinutes,
            ConfigKey::RefreshIntervalMinutes,
        ]
    }
}

/// Directory name for configuration, both in `$HOME` and in the project.
pub const CONFIG_DIR: &str = ".issuesync";
pub const CONFIG_FILENAME: &str = "config.json";

/// Parses a JSON configuration object into a map of known keys.
///
/// - Empty or whitespace-only content yields an empty map.
/// - Unknown keys are skipped.
/// - Anything but a JSON object is an error.
pub fn parse_config(content: &[u8]) -> Result<HashMap<ConfigKey, Value>> {
    if content.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(HashMap::new());
    }

    let value: Value = serde_json::from_slice(content).context("Failed to parse config JSON")?;

    let Value::Object(map) = value else {
        anyhow::bail!("Config must be a JSON object");
    };

    Ok(ConfigKey::all()
        .iter()
        .filter_map(|key| map.get(key.as_str()).map(|val| (*key, val.clone())))
        .collect())
}

/// Returns `base_config` with every key of `updates` laid over it.
pub fn update_config(
    base_config: &HashMap<ConfigKey, Value>,
    updates: &HashMap<ConfigKey, Value>,
) -> HashMap<ConfigKey, Value> {
    let mut new_config = base_config.clone();
    for (key, value) in updates {
        new_config.insert(*key, value.clone());
    }
    new_config
}

fn read_config_file(path: &Path) -> Result<HashMap<ConfigKey, Value>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let content =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    parse_config(&content).with_context(|| format!("Invalid config file {}", path.display()))
}

/// Effective settings after defaults, user config and project config.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Overrides detection from the git remote.
    pub repository: Option<RepoRef>,
    pub page_size: u32,
    pub stale_after: Duration,
    pub refresh_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            repository: None,
            page_size: MAX_PAGE_SIZE,
            stale_after: Duration::from_secs(15 * 60),
            refresh_interval: Duration::from_secs(30 * 60),
        }
    }
}

/// Largest accepted value of the `*_minutes` keys: one week.
pub const MAX_MINUTES: u64 = 7 * 24 * 60;

fn minutes(key: ConfigKey, value: &Value) -> Result<Duration> {
    match value.as_u64() {
        Some(minutes) if (1..=MAX_MINUTES).contains(&minutes) => {
            Ok(Duration::from_secs(minutes * 60))
        }
        _ => anyhow::bail!(
            "`{}` must be between 1 and {MAX_MINUTES} minutes",
            key.as_str()
        ),
    }
}

impl Settings {
    pub fn from_config(config: &HashMap<ConfigKey, Value>) -> Result<Self> {
        let mut settings = Settings::default();
        for (key, value) in config {
            match key {
                ConfigKey::Repository => {
                    let slug = value.as_str().unwrap_or_default();
                    settings.repository = Some(RepoRef::parse_slug(slug).with_context(|| {
                        format!("Invalid repository `{value}`. Please use <owner>/<repo>.")
                    })?);
                }
                ConfigKey::PageSize => {
                    settings.page_size = value
                        .as_u64()
                        .filter(|size| (1..=u64::from(MAX_PAGE_SIZE)).contains(size))
                        .with_context(|| {
                            format!("`page_size` must be between 1 and {MAX_PAGE_SIZE}")
                        })? as u32;
                }
                ConfigKey::StaleAfterMinutes => settings.stale_after = minutes(*key, value)?,
                ConfigKey::RefreshIntervalMinutes => {
                    settings.refresh_interval = minutes(*key, value)?
                }
            }
        }
        Ok(settings)
    }

    /// Loads `~/.issuesync/config.json`, then `<project>/.issuesync/config.json` over it.
    pub fn load(home: Option<&Path>, project: &Path) -> Result<Self> {
        let user = match home {
            Some(home) => read_config_file(&home.join(CONFIG_DIR).join(CONFIG_FILENAME))?,
            None => HashMap::new(),
        };
        let project = read_config_file(&project.join(CONFIG_DIR).join(CONFIG_FILENAME))?;
        Settings::from_config(&update_config(&user, &project))
    }
}
