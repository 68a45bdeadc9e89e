//! Next-step suggestions for a finished reply.

use crate::backend::{check_status, BackendClient};
use crate::error::TransportError;
use async_trait::async_trait;
use medgo_core::models::UpstreamMessage;
use serde::Serialize;
use serde_json::Value;

#[async_trait]
pub trait NextActionSource: Send + Sync {
    /// Suggested follow-ups for the conversation so far.
    async fn next_actions(&self, history: &[UpstreamMessage]) -> Result<Vec<String>, TransportError>;
}

#[derive(Serialize)]
struct NextActionsRequest<'a> {
    messages: &'a [UpstreamMessage],
}

/// Accepts `{actions: [...]}` or a bare array; keeps non-empty strings.
fn parse_actions(body: &Value) -> Result<Vec<String>, TransportError> {
    let raw = body
        .as_array()
        .or_else(|| body.get("actions").and_then(Value::as_array))
        .ok_or_else(|| TransportError::Decode("no actions in response".to_string()))?;

    Ok(raw
        .iter()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}

#[async_trait]
impl NextActionSource for BackendClient {
    async fn next_actions(&self, history: &[UpstreamMessage]) -> Result<Vec<String>, TransportError> {
        let response = self
            .client
            .post(self.url(&self.config.next_actions_path))
            .json(&NextActionsRequest { messages: history })
            .timeout(self.request_timeout())
            .send()
            .await?;
        let body: Value = check_status(response).await?.json().await?;
        parse_actions(&body)
    }
}
