use super::path_event::PathEvent;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    #[default]
    Normal,
    Streaming,
    Error,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_actions: Option<Vec<String>>,
    #[serde(default)]
    pub status: MessageStatus,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// Path events collected while this turn streamed (best-effort).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path_events: Vec<PathEvent>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>, created_at: i64) -> Self {
        Self::new(Role::User, content.into(), MessageStatus::Normal, created_at)
    }

    pub fn assistant(content: impl Into<String>, created_at: i64) -> Self {
        Self::new(Role::Assistant, content.into(), MessageStatus::Normal, created_at)
    }

    /// Empty assistant message that is open for appends.
    pub fn streaming_assistant(created_at: i64) -> Self {
        Self::new(Role::Assistant, String::new(), MessageStatus::Streaming, created_at)
    }

    fn new(role: Role, content: String, status: MessageStatus, created_at: i64) -> Self {
        Self {
            role,
            content,
            reasoning: None,
            next_actions: None,
            status,
            created_at,
            turn_id: None,
            session_id: None,
            conversation_id: None,
            path_events: Vec::new(),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.status == MessageStatus::Streaming
    }
}

/// OpenAI-compatible history entry sent upstream with each request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamMessage {
    pub role: Role,
    pub content: String,
}
