use crate::markdown;
use crate::node::{IssueTree, NodeId, NodeKind};
use std::io::{self, Write};

/// Writes `message` to stdout and, when given, to `writer` as well.
pub fn println(message: &str, writer: &mut Option<&mut dyn Write>) -> io::Result<()> {
    if let Err(e) = writeln!(io::stdout(), "{message}") {
        tracing::warn!(error = %e, "failed to write to stdout");
    }

    if let Some(w) = writer {
        writeln!(w, "{message}")?;
    }

    Ok(())
}

fn percent(value: f64) -> String {
    format!("{}%", value.round() as i64)
}

fn render_node(tree: &IssueTree, id: NodeId, depth: usize, lines: &mut Vec<String>) {
    let node = tree.get(id);
    let indent = "  ".repeat(depth);
    let title = markdown::to_plain_text(&node.record.title);

    let line = match node.kind {
        NodeKind::ProgressIndicator => {
            format!("{indent}{}", percent(node.progress_percent.unwrap_or(0.0)))
        }
        _ if node.is_sub_item => {
            let mark = if node.checked { 'x' } else { ' ' };
            format!("{indent}[{mark}] {} {title}", node.number())
        }
        kind => {
            let prefix = if kind == NodeKind::PullRequest { "PR " } else { "" };
            let mut line = format!(
                "{indent}{prefix}#{} {title} [{}]",
                node.number(),
                node.record.state.as_str()
            );
            if let Some(value) = node.progress_percent {
                line.push_str(&format!(" ({})", percent(value)));
            }
            line
        }
    };
    lines.push(line);

    for child in tree.children(id) {
        render_node(tree, *child, depth + 1, lines);
    }
}

/// One line per node, children indented under their parent.
pub fn render_tree(tree: &IssueTree) -> Vec<String> {
    let mut lines = Vec::new();
    for root in tree.roots() {
        render_node(tree, *root, 0, &mut lines);
    }
    lines
}
