//! Path replay query for one finished turn.

use crate::backend::{check_status, BackendClient};
use crate::error::TransportError;
use medgo_core::models::PathReplay;
use reqwest::header::ACCEPT;
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayQuery {
    pub turn_id: String,
    pub conversation_id: Option<String>,
    pub session_id: Option<String>,
    pub max_lines: Option<u32>,
}

impl ReplayQuery {
    pub fn new(turn_id: impl Into<String>) -> Self {
        Self {
            turn_id: turn_id.into(),
            ..Self::default()
        }
    }

    fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("turn_id", self.turn_id.clone())];
        if let Some(id) = &self.conversation_id {
            params.push(("conversation_id", id.clone()));
        }
        if let Some(id) = &self.session_id {
            params.push(("session_id", id.clone()));
        }
        if let Some(n) = self.max_lines {
            params.push(("max_lines", n.to_string()));
        }
        params
    }
}

impl BackendClient {
    /// Recorded path events of a turn. Malformed events are dropped.
    pub async fn path_replay(&self, query: &ReplayQuery) -> Result<PathReplay, TransportError> {
        let response = self
            .client
            .get(self.url(&self.config.path_replay_path))
            .header(ACCEPT, "application/json")
            .query(&query.params())
            .timeout(self.request_timeout())
            .send()
            .await?;
        let body: Value = check_status(response).await?.json().await?;
        if !body.is_object() {
            return Err(TransportError::Decode(
                "path replay body is not an object".to_string(),
            ));
        }

        let replay = PathReplay::from_value(&body);
        tracing::debug!(turn_id = %query.turn_id, events = replay.events.len(), "Fetched path replay");
        Ok(replay)
    }
}
