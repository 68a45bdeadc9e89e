//! Streaming chat request.

use crate::backend::{check_status, BackendClient};
use crate::error::TransportError;
use futures::{Stream, TryStreamExt};
use medgo_core::models::UpstreamMessage;
use medgo_core::sse::chat_events;
use medgo_core::{ChatEvent, MedgoError};
use reqwest::header::ACCEPT;
use serde::Serialize;
use std::pin::Pin;
use tokio_util::io::StreamReader;

pub type ChatEventStream = Pin<Box<dyn Stream<Item = Result<ChatEvent, MedgoError>> + Send>>;

/// Body of the chat POST.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub user: String,
    pub stream: bool,
    pub messages: Vec<UpstreamMessage>,
    pub conversation_id: String,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

impl BackendClient {
    /// Open the event stream for one reply.
    ///
    /// Non-2xx responses fail here, before any event is read. The returned
    /// stream ends when the server closes the connection; dropping it closes
    /// the connection.
    pub async fn stream_chat(&self, request: &ChatRequest) -> Result<ChatEventStream, TransportError> {
        let url = self.url(&self.config.chat_path);
        tracing::debug!(
            url = %url,
            history = request.messages.len(),
            session_id = %request.session_id,
            "Opening chat stream"
        );

        let response = self
            .client
            .post(&url)
            .header(ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await?;
        let response = check_status(response).await?;
        if response.content_length() == Some(0) {
            return Err(TransportError::NoBody);
        }

        let body = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        Ok(Box::pin(chat_events(StreamReader::new(Box::pin(body)))))
    }
}
