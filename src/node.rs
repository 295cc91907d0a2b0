use crate::checklist;
use crate::github::issues::{IssueRecord, IssueState, ItemNumber};
use crate::progress;

/// Index of a node inside an [`IssueTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Issue,
    PullRequest,
    ProgressIndicator,
}

#[derive(Debug, Clone)]
pub struct IssueNode {
    pub record: IssueRecord,
    pub kind: NodeKind,
    /// Synthesized from a checklist line of the parent's body.
    pub is_sub_item: bool,
    /// Only meaningful when `is_sub_item` is set.
    pub checked: bool,
    /// Set only while the node has sub-items.
    pub progress_percent: Option<f64>,
    /// Position among the parent body's checklist lines, for sub-items.
    pub checklist_index: Option<usize>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
}

impl IssueNode {
    fn root(record: IssueRecord, kind: NodeKind) -> Self {
        IssueNode {
            record,
            kind,
            is_sub_item: false,
            checked: false,
            progress_percent: None,
            checklist_index: None,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn number(&self) -> ItemNumber {
        self.record.number
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }
}

/// Arena holding every issue, pull request and synthesized node.
///
/// Nodes refer to each other by [`NodeId`]; a child's parent link never owns
/// the parent.
#[derive(Debug, Clone, Default)]
pub struct IssueTree {
    pub(crate) nodes: Vec<IssueNode>,
    roots: Vec<NodeId>,
}

impl IssueTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the tree for a fetched snapshot: issues first, then pull requests.
    pub fn from_snapshot(issues: &[IssueRecord], pull_requests: &[IssueRecord]) -> Self {
        let mut tree = IssueTree::new();
        for record in issues {
            tree.insert(record.clone(), NodeKind::Issue);
        }
        for record in pull_requests {
            tree.insert(record.clone(), NodeKind::PullRequest);
        }
        tree
    }

    /// Adds a root node for `record` with one child per checklist line in its
    /// body. Progress is computed before returning.
    pub fn insert(&mut self, record: IssueRecord, kind: NodeKind) -> NodeId {
        let id = self.push(IssueNode::root(record, kind));
        self.roots.push(id);
        self.attach_sub_items(id);
        id
    }

    pub(crate) fn push(&mut self, node: IssueNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    fn attach_sub_items(&mut self, id: NodeId) {
        let parent = &self.nodes[id.0];
        let parent_number = parent.record.number.remote();
        let kind = parent.kind;
        let items = checklist::parse_checklist(&parent.record.body);
        if items.is_empty() {
            return;
        }

        for (position, item) in items.into_iter().enumerate() {
            let number = ItemNumber::SubItem {
                parent: parent_number,
                index: position + 1,
            };
            let record = IssueRecord::new(
                number,
                &item.text,
                "",
                IssueState::from_checked(item.checked),
            );
            let child = self.push(IssueNode {
                is_sub_item: true,
                checked: item.checked,
                checklist_index: Some(position),
                parent: Some(id),
                ..IssueNode::root(record, kind)
            });
            self.nodes[id.0].children.push(child);
        }
        progress::recompute(self, id);
    }

    pub fn get(&self, id: NodeId) -> &IssueNode {
        &self.nodes[id.0]
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    /// Sub-item children of `id`, without the progress node.
    pub fn sub_items(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes[id.0]
            .children
            .iter()
            .copied()
            .filter(|child| self.nodes[child.0].is_sub_item)
    }

    /// Looks up an issue, pull request or sub-item by number.
    pub fn find(&self, number: &ItemNumber) -> Option<NodeId> {
        let root = self
            .roots
            .iter()
            .copied()
            .find(|root| self.nodes[root.0].record.number == ItemNumber::Remote(number.remote()))?;
        match number {
            ItemNumber::Remote(_) => Some(root),
            ItemNumber::SubItem { .. } => self
                .sub_items(root)
                .find(|child| self.nodes[child.0].record.number == *number),
        }
    }

    /// Flips a sub-item's checkbox and recomputes the parent's progress.
    ///
    /// Returns the new checked state, or `None` when `id` is not a sub-item.
    pub fn toggle(&mut self, id: NodeId) -> Option<bool> {
        let checked = !self.nodes.get(id.0).filter(|node| node.is_sub_item)?.checked;
        self.set_checked(id, checked);
        Some(checked)
    }

    pub(crate) fn set_checked(&mut self, id: NodeId, checked: bool) {
        let node = &mut self.nodes[id.0];
        node.checked = checked;
        node.record.state = IssueState::from_checked(checked);
        let parent = node.parent;
        if let Some(parent) = parent {
            progress::recompute(self, parent);
        }
    }

    /// Stores a body written back for `id` without re-parsing it.
    pub(crate) fn set_body(&mut self, id: NodeId, body: String) {
        self.nodes[id.0].record.body = body;
    }

    /// Replaces the body of a root node and rebuilds its sub-items from it.
    ///
    /// Ids of the previous sub-items stay valid but are detached from the tree.
    pub fn replace_body(&mut self, id: NodeId, body: &str) {
        let previous = std::mem::take(&mut self.nodes[id.0].children);
        for child in previous {
            self.nodes[child.0].parent = None;
        }
        self.nodes[id.0].progress_percent = None;
        self.nodes[id.0].record.body = body.to_string();
        self.attach_sub_items(id);
    }

    /// Every node reachable from the roots.
    pub fn len(&self) -> usize {
        self.roots
            .iter()
            .map(|root| 1 + self.nodes[root.0].children.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(number: u64, body: &str) -> IssueRecord {
        IssueRecord::new(ItemNumber::Remote(number), "Parent", body, IssueState::Open)
    }

    #[test]
    fn test_sub_items_get_composite_numbers_in_order() {
        let mut tree = IssueTree::new();
        let id = tree.insert(issue(42, "- [ ] a\n- [x] b\n- [ ] c"), NodeKind::Issue);

        let subs: Vec<_> = tree.sub_items(id).map(|c| tree.get(c)).collect();

        assert_eq!(subs.len(), 3);
        assert_eq!(
            subs.iter().map(|n| n.number().to_string()).collect::<Vec<_>>(),
            vec!["42.1", "42.2", "42.3"]
        );
        assert_eq!(subs[1].record.title, "b");
        assert_eq!(subs[1].record.state, IssueState::Closed);
        assert_eq!(subs[0].record.state, IssueState::Open);
        assert!(subs.iter().all(|n| n.is_sub_item && n.record.body.is_empty()));
        assert!(subs.iter().all(|n| n.parent() == Some(id)));
    }

    #[test]
    fn test_progress_node_is_first_child() {
        let mut tree = IssueTree::new();
        let id = tree.insert(issue(1, "- [x] a\n- [ ] b"), NodeKind::PullRequest);

        let first = tree.get(tree.children(id)[0]);

        assert_eq!(first.kind, NodeKind::ProgressIndicator);
        assert_eq!(first.progress_percent, Some(50.0));
        assert_eq!(tree.get(id).progress_percent, Some(50.0));
        assert_eq!(tree.children(id).len(), 3);
    }

    #[test]
    fn test_no_checklist_means_no_children() {
        let tree = IssueTree::from_snapshot(
            &[issue(1, "plain text"), issue(2, "")],
            &[issue(3, "- not a task")],
        );

        assert_eq!(tree.roots().len(), 3);
        for root in tree.roots() {
            assert!(tree.children(*root).is_empty());
            assert_eq!(tree.get(*root).progress_percent, None);
        }
        assert_eq!(tree.get(tree.roots()[2]).kind, NodeKind::PullRequest);
    }

    #[test]
    fn test_toggle_updates_parent_progress() {
        let mut tree = IssueTree::new();
        let id = tree.insert(issue(7, "- [ ] a\n- [ ] b\n- [ ] c\n- [x] d"), NodeKind::Issue);
        assert_eq!(tree.get(id).progress_percent, Some(25.0));

        let first = tree.sub_items(id).next().unwrap();
        assert_eq!(tree.toggle(first), Some(true));

        assert_eq!(tree.get(id).progress_percent, Some(50.0));
        assert_eq!(tree.get(tree.children(id)[0]).progress_percent, Some(50.0));
        assert_eq!(tree.get(first).record.state, IssueState::Closed);

        assert_eq!(tree.toggle(first), Some(false));
        assert_eq!(tree.get(id).progress_percent, Some(25.0));
    }

    #[test]
    fn test_toggle_non_sub_item_is_noop() {
        let mut tree = IssueTree::new();
        let id = tree.insert(issue(7, "- [ ] a"), NodeKind::Issue);
        let progress = tree.children(id)[0];

        assert_eq!(tree.toggle(id), None);
        assert_eq!(tree.toggle(progress), None);
        assert_eq!(tree.get(id).progress_percent, Some(0.0));
    }

    #[test]
    fn test_find_by_number() {
        let tree = IssueTree::from_snapshot(&[issue(3, "- [ ] a\n- [ ] b")], &[]);

        let sub = tree
            .find(&ItemNumber::SubItem { parent: 3, index: 2 })
            .unwrap();
        assert_eq!(tree.get(sub).record.title, "b");
        assert!(tree.find(&ItemNumber::Remote(3)).is_some());
        assert!(tree.find(&ItemNumber::SubItem { parent: 3, index: 3 }).is_none());
        assert!(tree.find(&ItemNumber::Remote(4)).is_none());
    }

    #[test]
    fn test_replace_body_rebuilds_sub_items() {
        let mut tree = IssueTree::new();
        let id = tree.insert(issue(5, "- [ ] a"), NodeKind::Issue);
        let old = tree.sub_items(id).next().unwrap();

        tree.replace_body(id, "- [x] a\n- [x] b");

        assert_eq!(tree.sub_items(id).count(), 2);
        assert_eq!(tree.get(id).progress_percent, Some(100.0));
        assert_eq!(tree.parent(old), None);

        tree.replace_body(id, "no more tasks");
        assert!(tree.children(id).is_empty());
        assert_eq!(tree.get(id).progress_percent, None);
    }

    #[test]
    fn test_sub_item_numbers_stable_across_reparse() {
        let body = "- [ ] a\n- [x] b";
        let first = IssueTree::from_snapshot(&[issue(9, body)], &[]);
        let second = IssueTree::from_snapshot(&[issue(9, body)], &[]);

        let numbers = |tree: &IssueTree| {
            tree.sub_items(tree.roots()[0])
                .map(|c| (tree.get(c).number(), tree.get(c).record.title.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(numbers(&first), numbers(&second));
    }
}
