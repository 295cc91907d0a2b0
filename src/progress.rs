use crate::github::issues::{IssueRecord, IssueState};
use crate::node::{IssueNode, IssueTree, NodeId, NodeKind};

/// Completion percentage, or `None` when there is nothing to complete.
pub fn percentage(checked: usize, total: usize) -> Option<f64> {
    if total == 0 {
        return None;
    }
    Some(100.0 * checked as f64 / total as f64)
}

/// Recomputes `id`'s progress from its sub-items and keeps the synthesized
/// progress node in sync as its first child.
///
/// Running it again without changing the children leaves the tree as is.
pub fn recompute(tree: &mut IssueTree, id: NodeId) {
    let (total, checked) = tree.nodes[id.0]
        .children
        .iter()
        .map(|child| &tree.nodes[child.0])
        .filter(|child| child.is_sub_item)
        .fold((0, 0), |(total, checked), child| {
            (total + 1, checked + usize::from(child.checked))
        });
    let existing = tree.nodes[id.0]
        .children
        .iter()
        .position(|child| tree.nodes[child.0].kind == NodeKind::ProgressIndicator);

    let Some(percent) = percentage(checked, total) else {
        tree.nodes[id.0].progress_percent = None;
        if let Some(position) = existing {
            let progress = tree.nodes[id.0].children.remove(position);
            tree.nodes[progress.0].parent = None;
        }
        return;
    };

    tree.nodes[id.0].progress_percent = Some(percent);
    match existing {
        Some(0) => {
            let progress = tree.nodes[id.0].children[0];
            tree.nodes[progress.0].progress_percent = Some(percent);
        }
        Some(position) => {
            let progress = tree.nodes[id.0].children.remove(position);
            tree.nodes[progress.0].progress_percent = Some(percent);
            tree.nodes[id.0].children.insert(0, progress);
        }
        None => {
            let parent = &tree.nodes[id.0];
            let record = IssueRecord::new(parent.record.number, "Progress", "", IssueState::Open);
            let node = IssueNode {
                record,
                kind: NodeKind::ProgressIndicator,
                is_sub_item: false,
                checked: false,
                progress_percent: Some(percent),
                checklist_index: None,
                parent: Some(id),
                children: Vec::new(),
            };
            let progress = tree.push(node);
            tree.nodes[id.0].children.insert(0, progress);
        }
    }
}
