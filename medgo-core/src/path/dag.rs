//! Node-name graph over the chronological start sequence.

use super::{chronological_starts, NodeKind};
use crate::models::PathEvent;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

pub const EDGE_LABEL: &str = "next";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DagNode {
    pub id: String,
    pub label: String,
    pub kind: NodeKind,
    pub run_ids: Vec<String>,
    /// `extra` of the first start event for this node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DagEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PathDag {
    /// In first-visit order.
    pub nodes: Vec<DagNode>,
    /// In first-traversal order.
    pub edges: Vec<DagEdge>,
}

impl PathDag {
    /// Node ids in first-visit order.
    pub fn chain(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.id.as_str()).collect()
    }

    pub fn node(&self, id: &str) -> Option<&DagNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// One node per distinct name; an edge for each change of node between
/// consecutive start events. Consecutive repeats collapse into the node.
pub fn build_dag(events: &[PathEvent]) -> PathDag {
    let mut dag = PathDag::default();
    let mut node_index: HashMap<String, usize> = HashMap::new();
    let mut edge_ids: HashSet<String> = HashSet::new();
    let mut prev: Option<String> = None;

    for evt in chronological_starts(events) {
        let Some(name) = evt.node_name() else { continue };

        let idx = *node_index.entry(name.to_string()).or_insert_with(|| {
            dag.nodes.push(DagNode {
                id: name.to_string(),
                label: name.to_string(),
                kind: NodeKind::classify(name),
                run_ids: Vec::new(),
                meta: evt.extra.clone(),
            });
            dag.nodes.len() - 1
        });
        if let Some(run_id) = &evt.run_id {
            let run_ids = &mut dag.nodes[idx].run_ids;
            if !run_ids.contains(run_id) {
                run_ids.push(run_id.clone());
            }
        }

        if let Some(prev) = prev.as_deref().filter(|p| *p != name) {
            let id = format!("{}->{}", prev, name);
            if edge_ids.insert(id.clone()) {
                dag.edges.push(DagEdge {
                    id,
                    source: prev.to_string(),
                    target: name.to_string(),
                    label: EDGE_LABEL.to_string(),
                });
            }
        }
        prev = Some(name.to_string());
    }

    dag
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::{event, start};
    use super::*;

    #[test]
    fn test_router_context_router() {
        let events = vec![
            start("router", "2024-05-01T10:00:01Z"),
            start("context_build", "2024-05-01T10:00:02Z"),
            start("router", "2024-05-01T10:00:03Z"),
        ];
        let dag = build_dag(&events);

        assert_eq!(dag.chain(), vec!["router", "context_build"]);
        let edges: Vec<_> = dag.edges.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(edges, vec!["router->context_build", "context_build->router"]);
        assert!(dag.edges.iter().all(|e| e.label == "next"));
        assert_eq!(dag.node("router").unwrap().kind, NodeKind::Router);
        assert_eq!(dag.node("context_build").unwrap().kind, NodeKind::Context);
    }

    #[test]
    fn test_no_self_loops() {
        let events = vec![
            start("llm", "2024-05-01T10:00:01Z"),
            start("llm", "2024-05-01T10:00:02Z"),
            start("tool", "2024-05-01T10:00:03Z"),
            start("tool", "2024-05-01T10:00:04Z"),
            start("llm", "2024-05-01T10:00:05Z"),
        ];
        let dag = build_dag(&events);
        assert!(dag.edges.iter().all(|e| e.source != e.target));
        assert_eq!(dag.nodes.len(), 2);
        assert_eq!(dag.edges.len(), 2);
    }

    #[test]
    fn test_uses_timestamps_not_arrival() {
        let events = vec![
            start("answer", "2024-05-01T10:00:03Z"),
            event("router", "on_chain_end", Some("2024-05-01T10:00:09Z"), None),
            start("router", "2024-05-01T10:00:01Z"),
        ];
        let dag = build_dag(&events);
        assert_eq!(dag.chain(), vec!["router", "answer"]);
        assert_eq!(dag.edges[0].id, "router->answer");
    }

    #[test]
    fn test_run_ids_are_distinct() {
        let events = vec![
            event("router", "on_chain_start", Some("2024-05-01T10:00:01Z"), Some("r1")),
            event("router", "on_chain_start", Some("2024-05-01T10:00:02Z"), Some("r1")),
            event("router", "on_chain_start", Some("2024-05-01T10:00:03Z"), Some("r2")),
        ];
        let dag = build_dag(&events);
        assert_eq!(dag.nodes[0].run_ids, vec!["r1", "r2"]);
        assert!(dag.edges.is_empty());
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(build_dag(&[]), PathDag::default());
    }
}
