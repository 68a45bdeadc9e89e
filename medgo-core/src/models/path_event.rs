use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle marker carried by a path event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Edge {
    ChainStart,
    ChainEnd,
    ChainStream,
    Other(String),
}

impl Edge {
    pub fn as_str(&self) -> &str {
        match self {
            Edge::ChainStart => "on_chain_start",
            Edge::ChainEnd => "on_chain_end",
            Edge::ChainStream => "on_chain_stream",
            Edge::Other(s) => s,
        }
    }
}

impl From<String> for Edge {
    fn from(s: String) -> Self {
        match s.as_str() {
            "on_chain_start" => Edge::ChainStart,
            "on_chain_end" => Edge::ChainEnd,
            "on_chain_stream" => Edge::ChainStream,
            _ => Edge::Other(s),
        }
    }
}

impl From<Edge> for String {
    fn from(e: Edge) -> Self {
        match e {
            Edge::Other(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

/// One entry/exit/stream marker of an execution node in the backend graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge: Option<Edge>,
    /// ISO-8601 timestamp; compared lexicographically.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
}

impl PathEvent {
    /// Validate and normalize an untyped payload.
    ///
    /// Non-object input is rejected. Fields of the wrong type are treated as
    /// absent; `ts` falls back to `timestamp`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let string = |key: &str| {
            obj.get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        Some(Self {
            graph: string("graph"),
            run_id: string("run_id").filter(|s| !s.is_empty()),
            node: string("node"),
            edge: string("edge").map(Edge::from),
            ts: string("ts").or_else(|| string("timestamp")),
            extra: obj.get("extra").and_then(Value::as_object).cloned(),
            conversation_id: string("conversation_id"),
            session_id: string("session_id"),
            turn_id: string("turn_id"),
        })
    }

    /// Node name if present and non-empty.
    pub fn node_name(&self) -> Option<&str> {
        self.node.as_deref().filter(|n| !n.is_empty())
    }

    pub fn is_start(&self) -> bool {
        self.edge == Some(Edge::ChainStart)
    }

    pub fn is_end(&self) -> bool {
        self.edge == Some(Edge::ChainEnd)
    }

    pub fn is_stream(&self) -> bool {
        self.edge == Some(Edge::ChainStream)
    }

    /// Canonical text form used to recognise re-delivered events.
    pub fn fingerprint(&self) -> String {
        // Map is BTreeMap-backed, so key order is stable.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Response of the path replay query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathReplay {
    pub turn_id: Option<String>,
    pub count: usize,
    pub events: Vec<PathEvent>,
}

impl PathReplay {
    /// Normalize the raw replay body; malformed events are dropped.
    pub fn from_value(value: &Value) -> Self {
        let events: Vec<PathEvent> = value
            .get("events")
            .and_then(Value::as_array)
            .map(|raw| raw.iter().filter_map(PathEvent::from_value).collect())
            .unwrap_or_default();

        Self {
            turn_id: value
                .get("turn_id")
                .and_then(Value::as_str)
                .map(str::to_string),
            count: value
                .get("count")
                .and_then(Value::as_u64)
                .map(|c| c as usize)
                .unwrap_or(events.len()),
            events,
        }
    }
}
