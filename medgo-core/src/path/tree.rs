//! Drill-down tree over the chronological start sequence.

use super::{chronological_starts, NodeKind};
use crate::models::PathEvent;
use serde::Serialize;

pub const ROOT_ID: &str = "__root__";
pub const DEFAULT_ROOT_LABEL: &str = "LangGraph";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathTreeNode {
    pub id: String,
    pub label: String,
    pub kind: NodeKind,
    pub start_count: u32,
    pub run_ids: Vec<String>,
    pub children: Vec<PathTreeNode>,
}

impl PathTreeNode {
    fn new(id: &str, label: &str, kind: NodeKind) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            kind,
            start_count: 0,
            run_ids: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Longest root-to-leaf edge count.
    pub fn depth(&self) -> usize {
        self.children
            .iter()
            .map(|c| c.depth() + 1)
            .max()
            .unwrap_or(0)
    }
}

/// Each start event finds or creates a child of the cursor by node name,
/// bumps its `start_count`, and becomes the new cursor.
pub fn build_path_tree(events: &[PathEvent], root_label: Option<&str>) -> PathTreeNode {
    let mut root = PathTreeNode::new(
        ROOT_ID,
        root_label.unwrap_or(DEFAULT_ROOT_LABEL),
        NodeKind::Node,
    );

    let mut cursor = &mut root;
    for evt in chronological_starts(events) {
        let Some(name) = evt.node_name() else { continue };

        let pos = match cursor.children.iter().position(|c| c.id == name) {
            Some(pos) => pos,
            None => {
                cursor
                    .children
                    .push(PathTreeNode::new(name, name, NodeKind::classify(name)));
                cursor.children.len() - 1
            }
        };

        let child = &mut cursor.children[pos];
        child.start_count += 1;
        if let Some(run_id) = &evt.run_id {
            if !child.run_ids.contains(run_id) {
                child.run_ids.push(run_id.clone());
            }
        }
        cursor = child;
    }

    root
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::start;
    use super::*;

    #[test]
    fn test_builds_single_chain() {
        let events = vec![
            start("context_build", "2024-05-01T10:00:02Z"),
            start("router", "2024-05-01T10:00:01Z"),
            start("llm_answer", "2024-05-01T10:00:03Z"),
        ];
        let root = build_path_tree(&events, None);

        assert_eq!(root.id, ROOT_ID);
        assert_eq!(root.label, DEFAULT_ROOT_LABEL);
        assert_eq!(root.depth(), 3);
        let first = &root.children[0];
        assert_eq!(first.id, "router");
        assert_eq!(first.children[0].id, "context_build");
        assert_eq!(first.children[0].children[0].kind, NodeKind::Llm);
    }

    #[test]
    fn test_repeated_name_nests_under_cursor() {
        let events = vec![
            start("router", "2024-05-01T10:00:01Z"),
            start("router", "2024-05-01T10:00:02Z"),
        ];
        let root = build_path_tree(&events, Some("Trace"));
        assert_eq!(root.label, "Trace");
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].start_count, 1);
        assert_eq!(root.children[0].children[0].id, "router");
        assert_eq!(root.depth(), 2);
    }

    #[test]
    fn test_empty_events_give_bare_root() {
        let root = build_path_tree(&[], None);
        assert!(root.children.is_empty());
        assert_eq!(root.start_count, 0);
    }
}
