//! Execution path views derived from path events.
//!
//! - [`runs`]: per `(run_id, node)` aggregation with start/end bounds
//! - [`dag`]: node-name graph over the chronological start sequence
//! - [`tree`]: drill-down chain over the same sequence
//!
//! The backend sends no parent/child linkage, only a flat chronological
//! sequence, so both graph views are linearizations of that sequence.

pub mod dag;
pub mod runs;
pub mod tree;

pub use dag::{build_dag, DagEdge, DagNode, PathDag};
pub use runs::{aggregate_node_runs, NodeRun, NodeRunAggregator};
pub use tree::{build_path_tree, PathTreeNode, DEFAULT_ROOT_LABEL, ROOT_ID};

use crate::models::PathEvent;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Presentation hint derived from the node name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Router,
    Llm,
    Context,
    Node,
}

impl NodeKind {
    pub fn classify(name: &str) -> Self {
        if name.contains("route") || name.contains("routing") {
            NodeKind::Router
        } else if name.contains("llm") {
            NodeKind::Llm
        } else if name.contains("context") {
            NodeKind::Context
        } else {
            NodeKind::Node
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Router => "router",
            NodeKind::Llm => "llm",
            NodeKind::Context => "context",
            NodeKind::Node => "node",
        }
    }
}

/// Timestamp ordering with missing values last.
pub(crate) fn cmp_ts(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Start events with a node name, stably sorted by `ts`.
pub(crate) fn chronological_starts(events: &[PathEvent]) -> Vec<&PathEvent> {
    let mut starts: Vec<&PathEvent> = events
        .iter()
        .filter(|e| e.is_start() && e.node_name().is_some())
        .collect();
    starts.sort_by(|a, b| cmp_ts(a.ts.as_deref(), b.ts.as_deref()));
    starts
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::models::PathEvent;
    use serde_json::json;

    pub fn event(node: &str, edge: &str, ts: Option<&str>, run_id: Option<&str>) -> PathEvent {
        let mut value = json!({"node": node, "edge": edge, "graph": "medgo"});
        if let Some(ts) = ts {
            value["ts"] = json!(ts);
        }
        if let Some(run_id) = run_id {
            value["run_id"] = json!(run_id);
        }
        PathEvent::from_value(&value).unwrap()
    }

    pub fn start(node: &str, ts: &str) -> PathEvent {
        event(node, "on_chain_start", Some(ts), None)
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_classify_kinds() {
        assert_eq!(NodeKind::classify("router"), NodeKind::Router);
        assert_eq!(NodeKind::classify("intent_routing"), NodeKind::Router);
        assert_eq!(NodeKind::classify("call_llm"), NodeKind::Llm);
        assert_eq!(NodeKind::classify("context_build"), NodeKind::Context);
        assert_eq!(NodeKind::classify("answer"), NodeKind::Node);
        assert_eq!(NodeKind::classify("llm_context").as_str(), "llm");
    }

    #[test]
    fn test_chronological_starts_puts_untimed_last() {
        let events = vec![
            event("late", "on_chain_start", None, None),
            start("b", "2024-01-01T00:00:02Z"),
            event("b", "on_chain_end", Some("2024-01-01T00:00:03Z"), None),
            start("a", "2024-01-01T00:00:01Z"),
            start("", "2024-01-01T00:00:00Z"),
        ];
        let names: Vec<_> = chronological_starts(&events)
            .iter()
            .filter_map(|e| e.node_name())
            .collect();
        assert_eq!(names, vec!["a", "b", "late"]);
    }
}
