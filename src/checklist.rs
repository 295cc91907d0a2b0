use regex::Regex;
use std::sync::LazyLock;

/// `- [ ] text`, `* [x] text`, `1. [ ] text`, with optional leading indentation.
/// Only a lowercase `x` counts as checked.
static CHECKLIST_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<indent>[ \t]*)(?:[-*+]|\d+[.)])[ \t]+\[(?P<mark>[ x])\](?:[ \t]+(?P<text>.*))?$")
        .expect("checklist pattern is valid")
});

/// One checkbox line found in an issue body.
#[derive(Debug, Clone, PartialEq)]
pub struct ChecklistItem {
    /// Leading whitespace characters before the list marker.
    pub indent: usize,
    pub checked: bool,
    pub text: String,
    /// 0-based line number in the body.
    pub line: usize,
}

/// Byte offsets of one matched line inside the body.
struct LineMatch {
    item: ChecklistItem,
    mark: usize,
    text_start: usize,
    text_end: usize,
    /// False when nothing, not even a space, follows the checkbox.
    separated: bool,
}

fn strip_line_ending(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

fn matches(body: &str) -> impl Iterator<Item = LineMatch> + '_ {
    let mut offset = 0;
    body.split_inclusive('\n')
        .enumerate()
        .filter_map(move |(line_no, raw)| {
            let start = offset;
            offset += raw.len();
            let line = strip_line_ending(raw);
            let caps = CHECKLIST_LINE.captures(line)?;
            let mark = caps.name("mark")?;
            let (text_start, text_end, text, separated) = match caps.name("text") {
                Some(text) => (start + text.start(), start + text.end(), text.as_str(), true),
                None => (start + mark.end() + 1, start + mark.end() + 1, "", false),
            };
            Some(LineMatch {
                item: ChecklistItem {
                    indent: caps.name("indent").map_or(0, |m| m.as_str().chars().count()),
                    checked: mark.as_str() == "x",
                    text: text.trim_end().to_string(),
                    line: line_no,
                },
                mark: start + mark.start(),
                text_start,
                text_end,
                separated,
            })
        })
}

/// Extracts the checklist items of `body` in line order.
///
/// Lines that are not checklist items are ignored, so a body without any
/// checklist yields an empty list.
pub fn parse_checklist(body: &str) -> Vec<ChecklistItem> {
    matches(body).map(|m| m.item).collect()
}

/// Returns `body` with the checkbox of the `index`-th checklist item set to
/// `checked`. Every other byte of the body is kept as is.
pub fn set_checked(body: &str, index: usize, checked: bool) -> Option<String> {
    let found = matches(body).nth(index)?;
    let mark = if checked { "x" } else { " " };
    let mut rewritten = String::with_capacity(body.len());
    rewritten.push_str(&body[..found.mark]);
    rewritten.push_str(mark);
    rewritten.push_str(&body[found.mark + 1..]);
    Some(rewritten)
}

/// Returns `body` with the text of the `index`-th checklist item replaced.
pub fn set_text(body: &str, index: usize, text: &str) -> Option<String> {
    let found = matches(body).nth(index)?;
    let text = text.trim().replace(['\r', '\n'], " ");
    let mut rewritten = String::with_capacity(body.len() + text.len());
    rewritten.push_str(&body[..found.text_start]);
    if !found.separated {
        rewritten.push(' ');
    }
    rewritten.push_str(&text);
    rewritten.push_str(&body[found.text_end..]);
    Some(rewritten)
}
