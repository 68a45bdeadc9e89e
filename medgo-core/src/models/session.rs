use super::message::{ChatMessage, Role, UpstreamMessage};
use serde::{Deserialize, Serialize};

pub const DEFAULT_SESSION_TITLE: &str = "New conversation";

/// Max title length in characters before the ellipsis.
const TITLE_MAX_CHARS: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub id: String,
    pub title: String,
    pub last_activity: i64,
    pub message_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub conversation_id: String,
    pub session_id: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub upstream_messages: Vec<UpstreamMessage>,
    #[serde(default)]
    pub active_trace_id: Option<String>,
}

impl SessionSnapshot {
    pub fn empty(session_id: &str, conversation_id: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            session_id: session_id.to_string(),
            messages: Vec::new(),
            upstream_messages: Vec::new(),
            active_trace_id: None,
        }
    }

    pub fn first_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

/// Title from the first user message: trimmed, cut to 32 characters plus
/// `...`, or the default title when there is none.
pub fn derive_title(messages: &[ChatMessage]) -> String {
    let content = messages
        .iter()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.trim())
        .unwrap_or_default();

    if content.is_empty() {
        return DEFAULT_SESSION_TITLE.to_string();
    }
    if content.chars().count() <= TITLE_MAX_CHARS {
        return content.to_string();
    }
    let cut: String = content.chars().take(TITLE_MAX_CHARS).collect();
    format!("{}...", cut)
}
