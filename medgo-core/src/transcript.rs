//! Transcript assembly.
//!
//! [`TranscriptAssembler`] is the only writer of the streaming state. A turn
//! is opened with [`TranscriptAssembler::begin_turn`], which hands out a
//! [`StreamTicket`]; every later mutation presents that ticket and is dropped
//! when it no longer names the open turn. That keeps late continuations from
//! an aborted stream away from the next reply.

use crate::error::{MedgoError, Result};
use crate::models::{
    ChatMessage, MessageStatus, PathEvent, Role, SessionSnapshot, UpstreamMessage,
};
use crate::sse::{ChatEvent, RouteInfo};
use std::sync::atomic::{AtomicU64, Ordering};

/// Note appended to a reply whose stream failed.
pub const FAILURE_NOTE: &str = "\n\n(request failed, send the message again to retry)";

/// Note appended to a reply that was stopped before completion.
pub const STOPPED_NOTE: &str = "\n\n(generation stopped)";

/// Default number of upstream history entries sent with a request.
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Source of ticket numbers, shared by every assembler in the process so a
/// ticket from a replaced transcript never matches a turn of the new one.
static NEXT_TURN: AtomicU64 = AtomicU64::new(1);

/// Identifies one streamed reply. Unique for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamTicket {
    turn: u64,
}

impl StreamTicket {
    pub fn turn(&self) -> u64 {
        self.turn
    }
}

#[derive(Debug, Clone, Copy)]
struct TurnSlot {
    ticket: StreamTicket,
    index: usize,
}

#[derive(Debug, Default)]
pub struct TranscriptAssembler {
    messages: Vec<ChatMessage>,
    upstream: Vec<UpstreamMessage>,
    open: Option<TurnSlot>,
    last_completed: Option<TurnSlot>,
}

impl TranscriptAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted state. A message persisted mid-stream is
    /// marked stopped; nothing is open after a restore.
    pub fn restore(mut messages: Vec<ChatMessage>, upstream: Vec<UpstreamMessage>) -> Self {
        for msg in messages.iter_mut().filter(|m| m.is_streaming()) {
            msg.status = MessageStatus::Stopped;
        }
        Self {
            messages,
            upstream,
            ..Self::default()
        }
    }

    pub fn from_snapshot(snapshot: &SessionSnapshot) -> Self {
        Self::restore(snapshot.messages.clone(), snapshot.upstream_messages.clone())
    }

    /// `base` with its messages and upstream history replaced by ours.
    pub fn snapshot(&self, base: &SessionSnapshot) -> SessionSnapshot {
        SessionSnapshot {
            messages: self.messages.clone(),
            upstream_messages: self.upstream.clone(),
            ..base.clone()
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_streaming(&self) -> bool {
        self.open.is_some()
    }

    pub fn open_ticket(&self) -> Option<StreamTicket> {
        self.open.map(|slot| slot.ticket)
    }

    /// All upstream history.
    pub fn upstream(&self) -> &[UpstreamMessage] {
        &self.upstream
    }

    /// The last `max` upstream entries.
    pub fn upstream_messages(&self, max: usize) -> &[UpstreamMessage] {
        let start = self.upstream.len().saturating_sub(max);
        &self.upstream[start..]
    }

    /// Append the user message and an empty streaming reply.
    ///
    /// Rejected while another reply is open, before anything is sent.
    pub fn begin_turn(&mut self, text: &str, now_ms: i64) -> Result<StreamTicket> {
        if self.open.is_some() {
            return Err(MedgoError::StreamBusy);
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(MedgoError::EmptyMessage);
        }

        self.messages.push(ChatMessage::user(text, now_ms));
        self.upstream.push(UpstreamMessage {
            role: Role::User,
            content: text.to_string(),
        });
        self.messages.push(ChatMessage::streaming_assistant(now_ms));

        let ticket = StreamTicket {
            turn: NEXT_TURN.fetch_add(1, Ordering::Relaxed),
        };
        self.open = Some(TurnSlot {
            ticket,
            index: self.messages.len() - 1,
        });
        tracing::debug!(turn = ticket.turn, "Opened assistant reply");
        Ok(ticket)
    }

    fn open_message(&mut self, ticket: StreamTicket) -> Option<&mut ChatMessage> {
        match self.open {
            Some(slot) if slot.ticket == ticket => self.messages.get_mut(slot.index),
            _ => {
                tracing::debug!(turn = ticket.turn, "Dropping update for a stale stream");
                None
            }
        }
    }

    pub fn on_content(&mut self, ticket: StreamTicket, delta: &str) -> bool {
        match self.open_message(ticket) {
            Some(msg) => {
                msg.content.push_str(delta);
                true
            }
            None => false,
        }
    }

    pub fn on_reasoning(&mut self, ticket: StreamTicket, delta: &str) -> bool {
        match self.open_message(ticket) {
            Some(msg) => {
                msg.reasoning.get_or_insert_with(String::new).push_str(delta);
                true
            }
            None => false,
        }
    }

    /// Attach a path event to the open reply; re-delivered events are ignored.
    pub fn on_path_event(&mut self, ticket: StreamTicket, event: PathEvent) -> bool {
        match self.open_message(ticket) {
            Some(msg) => {
                if !msg.path_events.contains(&event) {
                    msg.path_events.push(event);
                }
                true
            }
            None => false,
        }
    }

    pub fn on_route(&mut self, ticket: StreamTicket, route: &RouteInfo) -> bool {
        match self.open_message(ticket) {
            Some(msg) => {
                if route.turn_id.is_some() {
                    msg.turn_id = route.turn_id.clone();
                }
                if route.session_id.is_some() {
                    msg.session_id = route.session_id.clone();
                }
                if route.conversation_id.is_some() {
                    msg.conversation_id = route.conversation_id.clone();
                }
                true
            }
            None => false,
        }
    }

    /// Dispatch a decoded stream event. Backend-reported errors end the turn.
    pub fn apply(&mut self, ticket: StreamTicket, event: ChatEvent) -> bool {
        match event {
            ChatEvent::Delta { content, reasoning } => {
                let mut applied = true;
                if let Some(c) = content {
                    applied &= self.on_content(ticket, &c);
                }
                if let Some(r) = reasoning {
                    applied &= self.on_reasoning(ticket, &r);
                }
                applied
            }
            ChatEvent::Path(evt) => self.on_path_event(ticket, evt),
            ChatEvent::Route(route) => self.on_route(ticket, &route),
            ChatEvent::Error { message, .. } => self.on_error(ticket, &message),
        }
    }

    /// Finalize the open reply. Returns the finished message so the caller
    /// can request next-step suggestions for it.
    pub fn on_complete(&mut self, ticket: StreamTicket) -> Option<ChatMessage> {
        let slot = self.open.filter(|slot| slot.ticket == ticket)?;
        self.open = None;
        self.last_completed = Some(slot);

        let msg = self.messages.get_mut(slot.index)?;
        msg.status = MessageStatus::Normal;
        let finished = msg.clone();
        self.upstream.push(UpstreamMessage {
            role: Role::Assistant,
            content: finished.content.clone(),
        });
        tracing::debug!(turn = ticket.turn, chars = finished.content.len(), "Reply complete");
        Some(finished)
    }

    /// Close the open reply with a visible failure note.
    pub fn on_error(&mut self, ticket: StreamTicket, reason: &str) -> bool {
        let Some(slot) = self.open.filter(|slot| slot.ticket == ticket) else {
            return false;
        };
        self.open = None;
        if let Some(msg) = self.messages.get_mut(slot.index) {
            msg.content.push_str(FAILURE_NOTE);
            msg.status = MessageStatus::Error;
        }
        tracing::warn!(turn = ticket.turn, reason = %reason, "Reply failed");
        true
    }

    /// Stop whatever reply is open. Partial text is kept in the upstream
    /// history when there is any.
    pub fn abort(&mut self) -> Option<StreamTicket> {
        let slot = self.open.take()?;
        if let Some(msg) = self.messages.get_mut(slot.index) {
            let partial = msg.content.trim().to_string();
            msg.content.push_str(STOPPED_NOTE);
            msg.status = MessageStatus::Stopped;
            if !partial.is_empty() {
                self.upstream.push(UpstreamMessage {
                    role: Role::Assistant,
                    content: partial,
                });
            }
        }
        tracing::debug!(turn = slot.ticket.turn, "Reply stopped");
        Some(slot.ticket)
    }

    /// Attach suggestions to the reply finished under `ticket`, provided it
    /// is still the latest reply.
    pub fn set_next_actions(&mut self, ticket: StreamTicket, actions: Vec<String>) -> bool {
        let Some(slot) = self.last_completed.filter(|slot| slot.ticket == ticket) else {
            return false;
        };
        if self.open.is_some() || slot.index + 1 != self.messages.len() {
            return false;
        }
        match self.messages.get_mut(slot.index) {
            Some(msg) if msg.role == Role::Assistant => {
                msg.next_actions = Some(actions);
                true
            }
            _ => false,
        }
    }

    pub fn clear(&mut self) {
        self.abort();
        self.messages.clear();
        self.upstream.clear();
        self.last_completed = None;
    }
}
