//! Server-sent event decoding.
//!
//! Two layers:
//! - [`SseCodec`]: a `tokio_util` [`Decoder`] turning bytes into [`SseFrame`]s.
//!   Partial lines are kept in the read buffer across chunk boundaries, so the
//!   frame sequence does not depend on how the transport split the body.
//! - [`ChatEvent::from_frame`]: validates a frame's JSON payload and maps it to
//!   a typed event. Anything that does not validate is dropped here and never
//!   reaches the transcript.

use crate::error::MedgoError;
use crate::models::PathEvent;
use bytes::BytesMut;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio_util::codec::{Decoder, FramedRead};

/// Terminal sentinel sent by OpenAI-compatible backends.
pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data_lines: Vec<String>,
}

impl SseFrame {
    /// Data lines joined with `\n`, as the SSE format defines.
    pub fn data(&self) -> String {
        self.data_lines.join("\n")
    }

    pub fn is_done(&self) -> bool {
        self.data().trim() == DONE_SENTINEL
    }
}

/// Incremental SSE frame decoder.
#[derive(Debug, Default)]
pub struct SseCodec {
    event: Option<String>,
    data_lines: Vec<String>,
}

impl SseCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one complete line (without terminator). Returns a frame when the
    /// line is the blank separator closing a non-empty frame.
    fn feed_line(&mut self, line: &[u8]) -> Option<SseFrame> {
        if line.is_empty() {
            return self.flush();
        }

        let line = String::from_utf8_lossy(line);
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line.as_ref(), ""),
        };

        match field {
            "event" => self.event = Some(value.trim().to_string()),
            "data" => self.data_lines.push(value.trim_end().to_string()),
            // id / retry / unknown fields carry nothing we use
            _ => {}
        }
        None
    }

    fn flush(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        let data_lines = std::mem::take(&mut self.data_lines);
        if event.is_none() && data_lines.is_empty() {
            return None;
        }
        Some(SseFrame { event, data_lines })
    }
}

impl Decoder for SseCodec {
    type Item = SseFrame;
    type Error = MedgoError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<SseFrame>, MedgoError> {
        while let Some(pos) = src.iter().position(|b| *b == b'\n') {
            let raw = src.split_to(pos + 1);
            let line = &raw[..pos];
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if let Some(frame) = self.feed_line(line) {
                return Ok(Some(frame));
            }
        }
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<SseFrame>, MedgoError> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if !src.is_empty() {
            let rest = src.split();
            let line = rest.strip_suffix(b"\r").unwrap_or(&rest[..]);
            if let Some(frame) = self.feed_line(line) {
                return Ok(Some(frame));
            }
        }
        Ok(self.flush())
    }
}

// ============================================================================
// Typed events
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RouteInfo {
    pub conversation_id: Option<String>,
    pub session_id: Option<String>,
    pub turn_id: Option<String>,
    pub agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// Incremental model output. At least one side is non-empty.
    Delta {
        content: Option<String>,
        reasoning: Option<String>,
    },
    Path(PathEvent),
    Route(RouteInfo),
    /// Error reported in-band by the backend.
    Error { code: Option<String>, message: String },
}

impl ChatEvent {
    /// Decode every payload carried by a frame.
    ///
    /// Normally a frame holds one JSON document spread over its data lines.
    /// When the joined text does not parse and the frame has several data
    /// lines, each line is tried on its own (backends that omit the blank
    /// separator between `data:` lines).
    pub fn from_frame(frame: &SseFrame) -> Vec<ChatEvent> {
        if frame.data_lines.is_empty() || frame.is_done() {
            return vec![];
        }

        let event_name = frame.event.as_deref();
        match serde_json::from_str::<Value>(&frame.data()) {
            Ok(payload) => Self::from_payload(event_name, &payload).into_iter().collect(),
            Err(_) if frame.data_lines.len() > 1 => frame
                .data_lines
                .iter()
                .filter(|line| line.trim() != DONE_SENTINEL)
                .filter_map(|line| serde_json::from_str::<Value>(line).ok())
                .filter_map(|payload| Self::from_payload(event_name, &payload))
                .collect(),
            Err(e) => {
                tracing::debug!(error = %e, "Dropping malformed SSE frame");
                vec![]
            }
        }
    }

    fn from_payload(event_name: Option<&str>, payload: &Value) -> Option<ChatEvent> {
        let tag = event_name
            .filter(|name| !name.is_empty() && *name != "message")
            .or_else(|| payload.get("event").and_then(Value::as_str));

        match tag {
            Some("langgraph_path") => PathEvent::from_value(payload).map(ChatEvent::Path),
            Some("route") => Some(ChatEvent::Route(RouteInfo {
                conversation_id: str_field(payload, "conversation_id"),
                session_id: str_field(payload, "session_id"),
                turn_id: str_field(payload, "turn_id"),
                agent: str_field(payload, "agent"),
            })),
            Some("error") => Some(ChatEvent::Error {
                code: str_field(payload, "code"),
                message: str_field(payload, "message")
                    .unwrap_or_else(|| "stream error".to_string()),
            }),
            _ => Self::delta_from_payload(payload),
        }
    }

    fn delta_from_payload(payload: &Value) -> Option<ChatEvent> {
        let delta = payload.get("choices")?.get(0)?.get("delta")?;
        let content = str_field(delta, "content").filter(|s| !s.is_empty());
        let reasoning = str_field(delta, "reasoning")
            .filter(|s| !s.is_empty())
            .or_else(|| str_field(delta, "reasoning_content").filter(|s| !s.is_empty()));

        if content.is_none() && reasoning.is_none() {
            return None;
        }
        Some(ChatEvent::Delta { content, reasoning })
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Decode an SSE byte source into typed chat events.
///
/// I/O errors are yielded as items; decode failures never are.
pub fn chat_events<R>(reader: R) -> impl Stream<Item = Result<ChatEvent, MedgoError>>
where
    R: AsyncRead + Unpin,
{
    FramedRead::new(reader, SseCodec::new()).flat_map(|frame| {
        let items: Vec<Result<ChatEvent, MedgoError>> = match frame {
            Ok(frame) => ChatEvent::from_frame(&frame).into_iter().map(Ok).collect(),
            Err(e) => vec![Err(e)],
        };
        futures::stream::iter(items)
    })
}

// ============================================================================
// TESTS
// ============================================================================
