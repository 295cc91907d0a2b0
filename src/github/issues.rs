use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of an item in the tree.
///
/// Remote issues and pull requests carry their GitHub number. Sub-items
/// synthesized from a checklist are addressed as `{parent}.{index}` with a
/// 1-based index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawNumber", into = "RawNumber")]
pub enum ItemNumber {
    Remote(u64),
    SubItem { parent: u64, index: usize },
}

impl ItemNumber {
    /// Number of the remote item this number belongs to.
    pub fn remote(&self) -> u64 {
        match self {
            ItemNumber::Remote(number) => *number,
            ItemNumber::SubItem { parent, .. } => *parent,
        }
    }
}

impl fmt::Display for ItemNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemNumber::Remote(number) => write!(f, "{number}"),
            ItemNumber::SubItem { parent, index } => write!(f, "{parent}.{index}"),
        }
    }
}

impl FromStr for ItemNumber {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().trim_start_matches('#');
        let invalid = || format!("Invalid item number `{s}`. Use <number> or <number>.<index>.");
        match s.split_once('.') {
            None => s.parse::<u64>().map(ItemNumber::Remote).map_err(|_| invalid()),
            Some((parent, index)) => {
                let parent = parent.parse::<u64>().map_err(|_| invalid())?;
                let index = index.parse::<usize>().map_err(|_| invalid())?;
                if index == 0 {
                    return Err(invalid());
                }
                Ok(ItemNumber::SubItem { parent, index })
            }
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawNumber {
    Int(u64),
    Text(String),
}

impl TryFrom<RawNumber> for ItemNumber {
    type Error = String;

    fn try_from(raw: RawNumber) -> Result<Self, Self::Error> {
        match raw {
            RawNumber::Int(number) => Ok(ItemNumber::Remote(number)),
            RawNumber::Text(text) => text.parse(),
        }
    }
}

impl From<ItemNumber> for RawNumber {
    fn from(number: ItemNumber) -> Self {
        match number {
            ItemNumber::Remote(number) => RawNumber::Int(number),
            sub @ ItemNumber::SubItem { .. } => RawNumber::Text(sub.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Open,
    Closed,
}

impl IssueState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueState::Open => "open",
            IssueState::Closed => "closed",
        }
    }

    pub fn from_checked(checked: bool) -> Self {
        if checked {
            IssueState::Closed
        } else {
            IssueState::Open
        }
    }
}

/// One issue or pull request as returned by the issues API.
///
/// Only the fields the tree relies on are typed; everything else the API
/// returns is kept in `extra` and written back to the cache untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueRecord {
    pub number: ItemNumber,
    pub title: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub body: String,
    pub state: IssueState,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl IssueRecord {
    pub fn new(number: ItemNumber, title: &str, body: &str, state: IssueState) -> Self {
        IssueRecord {
            number,
            title: title.to_string(),
            body: body.to_string(),
            state,
            extra: serde_json::Map::new(),
        }
    }

    /// The issues API lists pull requests too; they carry a non-null `pull_request` object.
    pub fn is_pull_request(&self) -> bool {
        self.extra
            .get("pull_request")
            .is_some_and(|value| !value.is_null())
    }
}

/// Fields to change on a remote item. `None` leaves the field as is.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ItemPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl ItemPatch {
    pub fn title(title: &str) -> Self {
        ItemPatch {
            title: Some(title.to_string()),
            ..Default::default()
        }
    }

    pub fn body(body: &str) -> Self {
        ItemPatch {
            body: Some(body.to_string()),
            ..Default::default()
        }
    }

    pub fn apply(&self, record: &mut IssueRecord) {
        if let Some(title) = &self.title {
            record.title = title.clone();
        }
        if let Some(body) = &self.body {
            record.body = body.clone();
        }
    }
}

/// Converts one page of raw API items into records.
///
/// Items that do not deserialize (missing number, unknown state, ...) are
/// skipped instead of failing the whole page.
pub fn parse_records(items: Vec<serde_json::Value>) -> Vec<IssueRecord> {
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<IssueRecord>(item) {
            Ok(record) if matches!(record.number, ItemNumber::Remote(_)) => Some(record),
            Ok(record) => {
                tracing::warn!(number = %record.number, "skipping item with composite number");
                None
            }
            Err(err) => {
                tracing::warn!(error = %err, "skipping malformed item");
                None
            }
        })
        .collect()
}

/// Splits records into `(issues, pull_requests)`, preserving order.
pub fn partition_items(records: Vec<IssueRecord>) -> (Vec<IssueRecord>, Vec<IssueRecord>) {
    let (pull_requests, issues): (Vec<_>, Vec<_>) =
        records.into_iter().partition(IssueRecord::is_pull_request);
    (issues, pull_requests)
}
