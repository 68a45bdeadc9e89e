//! Node run aggregation.

use super::cmp_ts;
use crate::models::PathEvent;
use chrono::DateTime;
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// Node name used when an event carries none.
pub const UNKNOWN_NODE: &str = "unknown_node";

/// Aggregated view of one node invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeRun {
    pub run_id: String,
    pub node: String,
    pub agent: Option<String>,
    pub graph: Option<String>,
    /// Earliest start-edge timestamp.
    pub start_time: Option<String>,
    /// Latest end-edge timestamp.
    pub end_time: Option<String>,
    pub duration_ms: Option<i64>,
    pub has_stream: bool,
    /// Events of this run in timestamp order.
    pub raw_events: Vec<PathEvent>,
}

impl NodeRun {
    fn new(run_id: String, node: String) -> Self {
        Self {
            run_id,
            node,
            agent: None,
            graph: None,
            start_time: None,
            end_time: None,
            duration_ms: None,
            has_stream: false,
            raw_events: Vec::new(),
        }
    }

    fn absorb(&mut self, evt: &PathEvent) {
        if let Some(ts) = evt.ts.as_deref() {
            if evt.is_start() && self.start_time.as_deref().map_or(true, |cur| ts < cur) {
                self.start_time = Some(ts.to_string());
            }
            if evt.is_end() && self.end_time.as_deref().map_or(true, |cur| ts > cur) {
                self.end_time = Some(ts.to_string());
            }
        }
        if evt.is_stream() {
            self.has_stream = true;
        }

        let fingerprint = evt.fingerprint();
        let pos = self.raw_events.partition_point(|e| {
            cmp_ts(e.ts.as_deref(), evt.ts.as_deref())
                .then_with(|| e.fingerprint().cmp(&fingerprint))
                == Ordering::Less
        });
        self.raw_events.insert(pos, evt.clone());

        // Copied from the earliest event that has them.
        self.graph = self.raw_events.iter().find_map(|e| e.graph.clone());
        self.agent = self.raw_events.iter().find_map(|e| {
            e.extra
                .as_ref()
                .and_then(|x| x.get("agent"))
                .and_then(Value::as_str)
                .map(str::to_string)
        });
        self.duration_ms = duration_ms(self.start_time.as_deref(), self.end_time.as_deref());
    }

    fn rank(&self) -> u8 {
        match (&self.start_time, &self.end_time) {
            (Some(_), _) => 0,
            (None, Some(_)) => 1,
            (None, None) => 2,
        }
    }
}

fn duration_ms(start: Option<&str>, end: Option<&str>) -> Option<i64> {
    let start = DateTime::parse_from_rfc3339(start?).ok()?;
    let end = DateTime::parse_from_rfc3339(end?).ok()?;
    Some((end - start).num_milliseconds())
}

/// Incremental `(run_id, node)` aggregation.
///
/// Events without a `run_id` get a synthetic one, `run_{ordinal}_{node}`,
/// where the ordinal counts accepted events. An event identical to one
/// already accepted is ignored.
#[derive(Debug, Default)]
pub struct NodeRunAggregator {
    runs: Vec<NodeRun>,
    index: HashMap<(String, String), usize>,
    seen: HashSet<String>,
    ordinal: usize,
}

impl NodeRunAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the event was a re-delivery.
    pub fn push(&mut self, evt: &PathEvent) -> bool {
        if !self.seen.insert(evt.fingerprint()) {
            return false;
        }
        let ordinal = self.ordinal;
        self.ordinal += 1;

        let node = evt.node_name().unwrap_or(UNKNOWN_NODE).to_string();
        let run_id = evt
            .run_id
            .clone()
            .unwrap_or_else(|| format!("run_{}_{}", ordinal, node));

        let key = (run_id, node);
        let idx = match self.index.get(&key) {
            Some(idx) => *idx,
            None => {
                self.runs.push(NodeRun::new(key.0.clone(), key.1.clone()));
                self.index.insert(key, self.runs.len() - 1);
                self.runs.len() - 1
            }
        };
        self.runs[idx].absorb(evt);
        true
    }

    pub fn extend<'a>(&mut self, events: impl IntoIterator<Item = &'a PathEvent>) {
        for evt in events {
            self.push(evt);
        }
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Runs with a start time first (ascending), then end-only runs
    /// (ascending end), then runs with neither in first-seen order.
    pub fn runs(&self) -> Vec<NodeRun> {
        let mut sorted: Vec<&NodeRun> = self.runs.iter().collect();
        sorted.sort_by(|a, b| {
            a.rank().cmp(&b.rank()).then_with(|| match a.rank() {
                0 => a.start_time.cmp(&b.start_time),
                1 => a.end_time.cmp(&b.end_time),
                _ => Ordering::Equal,
            })
        });
        sorted.into_iter().cloned().collect()
    }
}

pub fn aggregate_node_runs(events: &[PathEvent]) -> Vec<NodeRun> {
    let mut agg = NodeRunAggregator::new();
    agg.extend(events);
    agg.runs()
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::event;
    use super::*;

    fn sample() -> Vec<PathEvent> {
        vec![
            event("router", "on_chain_start", Some("2024-05-01T10:00:00.100Z"), Some("r1")),
            event("router", "on_chain_start", Some("2024-05-01T10:00:00.050Z"), Some("r1")),
            event("router", "on_chain_end", Some("2024-05-01T10:00:00.400Z"), Some("r1")),
            event("router", "on_chain_end", Some("2024-05-01T10:00:00.300Z"), Some("r1")),
            event("llm_call", "on_chain_start", Some("2024-05-01T10:00:00.500Z"), Some("r2")),
            event("llm_call", "on_chain_stream", Some("2024-05-01T10:00:00.600Z"), Some("r2")),
            event("llm_call", "on_chain_end", Some("2024-05-01T10:00:01.500Z"), Some("r2")),
            event("cleanup", "on_chain_end", Some("2024-05-01T10:00:02.000Z"), Some("r3")),
        ]
    }

    #[test]
    fn test_bounds_use_min_start_and_max_end() {
        let runs = aggregate_node_runs(&sample());
        let router = &runs[0];
        assert_eq!(router.node, "router");
        assert_eq!(router.start_time.as_deref(), Some("2024-05-01T10:00:00.050Z"));
        assert_eq!(router.end_time.as_deref(), Some("2024-05-01T10:00:00.400Z"));
        assert_eq!(router.duration_ms, Some(350));
        assert_eq!(router.raw_events.len(), 4);
        assert_eq!(router.graph.as_deref(), Some("medgo"));

        assert!(runs[1].has_stream);
        assert_eq!(runs[1].duration_ms, Some(1000));
        assert_eq!(runs[2].node, "cleanup");
        assert_eq!(runs[2].duration_ms, None);
    }

    #[test]
    fn test_arrival_order_does_not_matter() {
        let events = sample();
        let expected = aggregate_node_runs(&events);

        let mut reversed = events.clone();
        reversed.reverse();
        assert_eq!(aggregate_node_runs(&reversed), expected);

        // every rotation
        for shift in 1..events.len() {
            let mut rotated = events.clone();
            rotated.rotate_left(shift);
            assert_eq!(aggregate_node_runs(&rotated), expected, "rotation {}", shift);
        }
    }

    #[test]
    fn test_resubmission_is_ignored() {
        let events = sample();
        let mut agg = NodeRunAggregator::new();
        agg.extend(&events);
        let before = agg.runs();

        assert!(!agg.push(&events[0]));
        agg.extend(&events);
        assert_eq!(agg.runs(), before);

        // also without run ids
        let loose = event("answer", "on_chain_start", Some("2024-05-01T10:00:03Z"), None);
        assert!(agg.push(&loose));
        assert!(!agg.push(&loose));
        assert_eq!(agg.len(), before.len() + 1);
    }

    #[test]
    fn test_synthetic_keys_and_unknown_node() {
        let events = vec![
            event("a", "on_chain_start", None, None),
            PathEvent::from_value(&serde_json::json!({"edge": "on_chain_start"})).unwrap(),
            event("a", "on_chain_end", None, None),
        ];
        let runs = aggregate_node_runs(&events);
        let ids: Vec<_> = runs.iter().map(|r| r.run_id.as_str()).collect();
        assert_eq!(ids, vec!["run_0_a", "run_1_unknown_node", "run_2_a"]);
        assert_eq!(runs[1].node, UNKNOWN_NODE);
    }

    #[test]
    fn test_sort_ranks() {
        let events = vec![
            event("none", "on_chain_stream", None, Some("n")),
            event("end_b", "on_chain_end", Some("2024-01-01T00:00:09Z"), Some("e2")),
            event("end_a", "on_chain_end", Some("2024-01-01T00:00:08Z"), Some("e1")),
            event("start_b", "on_chain_start", Some("2024-01-01T00:00:05Z"), Some("s2")),
            event("start_a", "on_chain_start", Some("2024-01-01T00:00:01Z"), Some("s1")),
        ];
        let order: Vec<_> = aggregate_node_runs(&events)
            .into_iter()
            .map(|r| r.node)
            .collect();
        assert_eq!(order, vec!["start_a", "start_b", "end_a", "end_b", "none"]);
    }

    #[test]
    fn test_agent_comes_from_extra() {
        let evt = PathEvent::from_value(&serde_json::json!({
            "run_id": "r", "node": "triage", "edge": "on_chain_start",
            "extra": {"agent": "nurse"}
        }))
        .unwrap();
        let runs = aggregate_node_runs(&[evt]);
        assert_eq!(runs[0].agent.as_deref(), Some("nurse"));
    }
}
