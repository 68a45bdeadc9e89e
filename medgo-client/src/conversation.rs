//! Conversation driver.
//!
//! [`ConversationDriver`] owns one transcript, a handle to the session store
//! and the backend client. It enforces the cancellation rules: a stop, a
//! session switch or a delete cancels the open stream before anything else
//! changes, and updates carrying a stale ticket are dropped by the
//! transcript.
//!
//! Locks are only taken inside [`ConversationDriver::with_state`], never
//! across an await.

use crate::backend::BackendClient;
use crate::chat::ChatRequest;
use crate::notice::ErrorNotice;
use crate::suggest::NextActionSource;
use futures::StreamExt;
use medgo_core::config::ChatConfig;
use medgo_core::models::{ChatMessage, SessionMetadata, SessionSnapshot};
use medgo_core::session::{ReusableSessionCache, SessionStore};
use medgo_core::{ChatEvent, Clock, MedgoError, StreamTicket, SystemClock, TranscriptAssembler};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

/// How a send ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    Completed(ChatMessage),
    /// The reply carries a failure note; the notice is for the user.
    Failed(ErrorNotice),
    /// Stopped by the user or by a session change.
    Stopped,
}

struct DriverState {
    transcript: TranscriptAssembler,
    /// Ids and trace pointer of the active session.
    session: SessionSnapshot,
    open: Option<(StreamTicket, CancellationToken)>,
}

/// Closes the turn when `send` is dropped before it finishes, so an abandoned
/// future cannot leave the transcript streaming. A no-op once the turn has
/// completed, failed or been stopped.
struct OpenTurnGuard<'a> {
    driver: &'a ConversationDriver,
    ticket: StreamTicket,
}

impl Drop for OpenTurnGuard<'_> {
    fn drop(&mut self) {
        let ticket = self.ticket;
        let abandoned = self.driver.with_state(|s| {
            if s.open.as_ref().is_some_and(|(t, _)| *t == ticket) {
                if let Some((_, cancel)) = s.open.take() {
                    cancel.cancel();
                }
            }
            s.transcript.open_ticket() == Some(ticket) && s.transcript.abort().is_some()
        });
        if abandoned {
            tracing::debug!(turn = ticket.turn(), "Send dropped mid-reply, turn stopped");
        }
    }
}

pub struct ConversationDriver {
    backend: BackendClient,
    store: Arc<SessionStore>,
    chat: ChatConfig,
    suggester: Option<Arc<dyn NextActionSource>>,
    reuse: Option<ReusableSessionCache>,
    clock: Arc<dyn Clock>,
    state: Mutex<DriverState>,
}

impl ConversationDriver {
    /// Start on the store's active session.
    pub async fn open(backend: BackendClient, store: Arc<SessionStore>, chat: ChatConfig) -> Self {
        let session = store.active_snapshot().await;
        let transcript = TranscriptAssembler::from_snapshot(&session);
        Self {
            backend,
            store,
            chat,
            suggester: None,
            reuse: None,
            clock: Arc::new(SystemClock),
            state: Mutex::new(DriverState {
                transcript,
                session,
                open: None,
            }),
        }
    }

    pub fn with_suggester(mut self, suggester: Arc<dyn NextActionSource>) -> Self {
        self.suggester = Some(suggester);
        self
    }

    pub fn with_reuse_cache(mut self, cache: ReusableSessionCache) -> Self {
        self.reuse = Some(cache);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn lock(&self) -> MutexGuard<'_, DriverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut DriverState) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.with_state(|s| s.transcript.messages().to_vec())
    }

    pub fn is_streaming(&self) -> bool {
        self.with_state(|s| s.transcript.is_streaming())
    }

    pub fn active_session_id(&self) -> String {
        self.with_state(|s| s.session.session_id.clone())
    }

    /// Current state as the store would persist it.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.with_state(|s| s.transcript.snapshot(&s.session))
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Switch to the session in the reusable slot if it is still valid and
    /// known. Returns the id switched to.
    pub async fn resume_reusable(&self) -> Result<Option<String>, MedgoError> {
        let Some(id) = self.reuse.as_ref().and_then(ReusableSessionCache::get) else {
            return Ok(None);
        };
        if !self.store.contains(&id).await {
            tracing::debug!(session_id = %id, "Reusable session no longer exists");
            return Ok(None);
        }
        if id != self.active_session_id() {
            self.switch_session(&id).await?;
        }
        Ok(Some(id))
    }

    /// Send `text` and stream the reply into the transcript.
    ///
    /// `on_event` sees every event applied to the reply, for live display.
    /// A reply already streaming or empty input is rejected before any
    /// request is made.
    pub async fn send<F>(&self, text: &str, mut on_event: F) -> Result<SendOutcome, MedgoError>
    where
        F: FnMut(&ChatEvent) + Send,
    {
        let cancel = CancellationToken::new();
        let (ticket, request) = self.with_state(|s| {
            let ticket = s.transcript.begin_turn(text, self.clock.now_ms())?;
            s.open = Some((ticket, cancel.clone()));
            let request = ChatRequest {
                user: text.trim().to_string(),
                stream: true,
                messages: s.transcript.upstream_messages(self.chat.history_limit).to_vec(),
                conversation_id: s.session.conversation_id.clone(),
                session_id: s.session.session_id.clone(),
                user_id: self.chat.user_id.clone(),
                app_id: self.chat.app_id.clone(),
                system: self.chat.system_prompt.clone(),
            };
            Ok::<_, MedgoError>((ticket, request))
        })?;
        let _guard = OpenTurnGuard {
            driver: self,
            ticket,
        };
        tracing::info!(turn = ticket.turn(), session_id = %request.session_id, "Sending message");

        let opened = tokio::select! {
            _ = cancel.cancelled() => return Ok(SendOutcome::Stopped),
            opened = self.backend.stream_chat(&request) => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                let notice = ErrorNotice::from_transport(&e);
                self.with_state(|s| s.transcript.on_error(ticket, &e.to_string()));
                return self.finish_failed(ticket, notice).await;
            }
        };

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Ok(SendOutcome::Stopped),
                next = stream.next() => next,
            };

            match next {
                Some(Ok(event)) => {
                    let backend_error = match &event {
                        ChatEvent::Error { code, message } => {
                            Some(ErrorNotice::from_backend(code.as_deref(), message))
                        }
                        _ => None,
                    };
                    on_event(&event);
                    let applied = self.with_state(|s| s.transcript.apply(ticket, event));
                    if !applied {
                        tracing::debug!(turn = ticket.turn(), "Stream no longer current, closing");
                        return Ok(SendOutcome::Stopped);
                    }
                    if let Some(notice) = backend_error {
                        return self.finish_failed(ticket, notice).await;
                    }
                }
                Some(Err(e)) => {
                    let notice = ErrorNotice::from_stream(&e);
                    self.with_state(|s| s.transcript.on_error(ticket, &e.to_string()));
                    return self.finish_failed(ticket, notice).await;
                }
                None => break,
            }
        }
        drop(stream);

        let finished = self.with_state(|s| {
            let finished = s.transcript.on_complete(ticket);
            if s.open.as_ref().is_some_and(|(t, _)| *t == ticket) {
                s.open = None;
            }
            if let Some(turn_id) = finished.as_ref().and_then(|m| m.turn_id.clone()) {
                s.session.active_trace_id = Some(turn_id);
            }
            finished
        });
        let Some(message) = finished else {
            return Ok(SendOutcome::Stopped);
        };
        self.persist().await;

        if self.chat.suggest_next_actions {
            self.suggest(ticket).await;
        }
        Ok(SendOutcome::Completed(message))
    }

    async fn finish_failed(
        &self,
        ticket: StreamTicket,
        notice: ErrorNotice,
    ) -> Result<SendOutcome, MedgoError> {
        tracing::warn!(turn = ticket.turn(), title = %notice.title, message = %notice.message, "Reply failed");
        self.with_state(|s| {
            if s.open.as_ref().is_some_and(|(t, _)| *t == ticket) {
                s.open = None;
            }
        });
        self.persist().await;
        Ok(SendOutcome::Failed(notice))
    }

    /// Best effort; failures are logged and ignored.
    async fn suggest(&self, ticket: StreamTicket) {
        let Some(suggester) = self.suggester.clone() else {
            return;
        };
        let history = self.with_state(|s| s.transcript.upstream().to_vec());
        match suggester.next_actions(&history).await {
            Ok(actions) if !actions.is_empty() => {
                let applied = self.with_state(|s| s.transcript.set_next_actions(ticket, actions));
                if applied {
                    self.persist().await;
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Next-action suggestions unavailable"),
        }
    }

    /// Stop the open reply, if any, and persist what it produced.
    pub async fn abort(&self) -> Option<StreamTicket> {
        let stopped = self.with_state(|s| {
            if let Some((_, cancel)) = s.open.take() {
                cancel.cancel();
            }
            s.transcript.abort()
        });
        if let Some(ticket) = stopped {
            tracing::info!(turn = ticket.turn(), "Stopped reply");
            self.persist().await;
        }
        stopped
    }

    async fn persist(&self) {
        let snapshot = self.snapshot();
        match self.store.save_current_session(snapshot).await {
            Ok(meta) => {
                if let Some(cache) = &self.reuse {
                    if let Err(e) = cache.set(&meta.id) {
                        tracing::warn!(error = %e, "Failed to update reusable session");
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to save session"),
        }
    }

    fn load(&self, snapshot: SessionSnapshot) {
        self.with_state(|s| {
            s.transcript = TranscriptAssembler::from_snapshot(&snapshot);
            s.session = snapshot;
            s.open = None;
        });
    }

    pub async fn switch_session(&self, session_id: &str) -> Result<SessionSnapshot, MedgoError> {
        self.abort().await;
        self.persist().await;
        let snapshot = self.store.switch_session(session_id).await?;
        self.load(snapshot.clone());
        if let Some(cache) = &self.reuse {
            cache.set(session_id)?;
        }
        Ok(snapshot)
    }

    pub async fn new_session(&self) -> Result<SessionSnapshot, MedgoError> {
        self.abort().await;
        self.persist().await;
        let snapshot = self.store.create_session(None).await?;
        self.load(snapshot.clone());
        Ok(snapshot)
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<SessionSnapshot, MedgoError> {
        if self.active_session_id() == session_id {
            self.abort().await;
        }
        let snapshot = self.store.delete_session(session_id).await?;
        if snapshot.session_id != self.active_session_id() {
            self.load(snapshot.clone());
        }
        Ok(snapshot)
    }

    pub async fn list_sessions(&self) -> Vec<SessionMetadata> {
        self.store.list_sessions().await
    }
}
