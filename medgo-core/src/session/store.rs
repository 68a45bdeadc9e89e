//! Session registry and snapshot persistence.
//!
//! [`SessionStore`] owns the mapping from session id to snapshot. The
//! registry and the active snapshot live behind one `RwLock`; every mutation
//! runs under the write lock and persists before releasing it. Persistence
//! goes through the synchronous [`KvStore`] inside that lock; see `kv` for
//! why the file backend blocks there.
//!
//! Storage reads degrade instead of failing: a missing or corrupt snapshot
//! loads as a fresh one, a corrupt registry loads as empty.

use super::keys::{CURRENT_SESSION, POINTER_NS, REGISTRY_NS, SESSIONS, SNAPSHOTS_NS};
use crate::clock::Clock;
use crate::error::{MedgoError, Result};
use crate::kv::KvStore;
use crate::models::{derive_title, SessionMetadata, SessionSnapshot, DEFAULT_SESSION_TITLE};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

struct StoreState {
    registry: Vec<SessionMetadata>,
    active: SessionSnapshot,
}

pub struct SessionStore {
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    state: RwLock<StoreState>,
}

impl SessionStore {
    /// Initialise from storage.
    ///
    /// Seeds a fresh session when the registry is empty. When the current
    /// pointer is missing or names an unknown session, the most recently
    /// active session becomes current.
    pub fn load(kv: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Result<Self> {
        let mut registry: Vec<SessionMetadata> =
            read_json(kv.as_ref(), REGISTRY_NS, SESSIONS).unwrap_or_default();
        sort_by_recency(&mut registry);

        let pointer = read_raw(kv.as_ref(), POINTER_NS, CURRENT_SESSION);
        let current = pointer
            .filter(|id| registry.iter().any(|m| &m.id == id))
            .or_else(|| registry.first().map(|m| m.id.clone()));

        let active = match current {
            Some(id) => load_snapshot(kv.as_ref(), &id),
            None => {
                let meta = new_metadata(clock.now_ms());
                let active = SessionSnapshot::empty(&meta.id, &Uuid::new_v4().to_string());
                registry.push(meta);
                tracing::info!("Session registry empty, seeded a new session");
                active
            }
        };

        let state = StoreState { registry, active };
        persist(kv.as_ref(), &state)?;
        tracing::info!(
            sessions = state.registry.len(),
            active = %state.active.session_id,
            "Session store loaded"
        );
        Ok(Self {
            kv,
            clock,
            state: RwLock::new(state),
        })
    }

    pub async fn active_session_id(&self) -> String {
        self.state.read().await.active.session_id.clone()
    }

    pub async fn active_snapshot(&self) -> SessionSnapshot {
        self.state.read().await.active.clone()
    }

    pub async fn is_active(&self, session_id: &str) -> bool {
        self.state.read().await.active.session_id == session_id
    }

    pub async fn contains(&self, session_id: &str) -> bool {
        self.state
            .read()
            .await
            .registry
            .iter()
            .any(|m| m.id == session_id)
    }

    /// Active session first, the rest by last activity, newest first.
    pub async fn list_sessions(&self) -> Vec<SessionMetadata> {
        let state = self.state.read().await;
        let mut list = state.registry.clone();
        sort_by_recency(&mut list);
        if let Some(pos) = list.iter().position(|m| m.id == state.active.session_id) {
            let active = list.remove(pos);
            list.insert(0, active);
        }
        list
    }

    /// Allocate a new session with an empty snapshot and make it active.
    /// The outgoing snapshot is persisted first.
    pub async fn create_session(&self, conversation_id: Option<String>) -> Result<SessionSnapshot> {
        let mut state = self.state.write().await;
        self.write_snapshot(&state.active)?;

        let meta = new_metadata(self.clock.now_ms());
        let conversation_id = conversation_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        state.active = SessionSnapshot::empty(&meta.id, &conversation_id);
        tracing::info!(session_id = %meta.id, conversation_id = %conversation_id, "Created session");
        state.registry.push(meta);

        self.persist(&state)?;
        Ok(state.active.clone())
    }

    /// Persist the outgoing snapshot, then activate `session_id`. A session
    /// with no stored snapshot starts fresh.
    pub async fn switch_session(&self, session_id: &str) -> Result<SessionSnapshot> {
        let mut state = self.state.write().await;
        if !state.registry.iter().any(|m| m.id == session_id) {
            return Err(MedgoError::UnknownSession(session_id.to_string()));
        }
        if state.active.session_id == session_id {
            return Ok(state.active.clone());
        }

        self.write_snapshot(&state.active)?;
        state.active = load_snapshot(self.kv.as_ref(), session_id);
        self.persist(&state)?;
        tracing::info!(session_id = %session_id, "Switched session");
        Ok(state.active.clone())
    }

    /// Store `snapshot` as the active session's state and refresh its
    /// metadata (message count, last activity, title).
    pub async fn save_current_session(&self, snapshot: SessionSnapshot) -> Result<SessionMetadata> {
        let mut state = self.state.write().await;
        if snapshot.session_id != state.active.session_id {
            return Err(MedgoError::InactiveSnapshot {
                snapshot: snapshot.session_id,
                active: state.active.session_id.clone(),
            });
        }

        let now = self.clock.now_ms();
        let meta = SessionMetadata {
            id: snapshot.session_id.clone(),
            title: derive_title(&snapshot.messages),
            last_activity: now,
            message_count: snapshot.messages.len(),
            first_message: snapshot.first_user_message().map(str::to_string),
        };
        match state.registry.iter_mut().find(|m| m.id == meta.id) {
            Some(slot) => *slot = meta.clone(),
            None => state.registry.push(meta.clone()),
        }
        state.active = snapshot;

        self.write_snapshot(&state.active)?;
        self.persist(&state)?;
        tracing::debug!(session_id = %meta.id, messages = meta.message_count, "Saved session");
        Ok(meta)
    }

    /// Remove metadata and snapshot. Deleting the active session activates
    /// the most recently active remaining one, or a new session when none
    /// remain. Returns the snapshot active afterwards.
    pub async fn delete_session(&self, session_id: &str) -> Result<SessionSnapshot> {
        let mut state = self.state.write().await;
        let Some(pos) = state.registry.iter().position(|m| m.id == session_id) else {
            return Err(MedgoError::UnknownSession(session_id.to_string()));
        };
        state.registry.remove(pos);
        self.kv.delete(SNAPSHOTS_NS, session_id)?;

        if state.active.session_id == session_id {
            let fallback = state
                .registry
                .iter()
                .max_by(|a, b| a.last_activity.cmp(&b.last_activity).then_with(|| b.id.cmp(&a.id)))
                .map(|m| m.id.clone());
            state.active = match fallback {
                Some(id) => load_snapshot(self.kv.as_ref(), &id),
                None => {
                    let meta = new_metadata(self.clock.now_ms());
                    let fresh = SessionSnapshot::empty(&meta.id, &Uuid::new_v4().to_string());
                    state.registry.push(meta);
                    fresh
                }
            };
            tracing::info!(
                deleted = %session_id,
                active = %state.active.session_id,
                "Deleted active session, fell back"
            );
        } else {
            tracing::info!(deleted = %session_id, "Deleted session");
        }

        self.persist(&state)?;
        Ok(state.active.clone())
    }

    fn write_snapshot(&self, snapshot: &SessionSnapshot) -> Result<()> {
        let value = serde_json::to_string(snapshot)?;
        self.kv.set(SNAPSHOTS_NS, &snapshot.session_id, &value)
    }

    fn persist(&self, state: &StoreState) -> Result<()> {
        persist(self.kv.as_ref(), state)
    }
}

fn persist(kv: &dyn KvStore, state: &StoreState) -> Result<()> {
    let registry = serde_json::to_string(&state.registry)?;
    kv.set(REGISTRY_NS, SESSIONS, &registry)?;
    kv.set(POINTER_NS, CURRENT_SESSION, &state.active.session_id)?;
    Ok(())
}

fn new_metadata(now_ms: i64) -> SessionMetadata {
    SessionMetadata {
        id: Uuid::new_v4().to_string(),
        title: DEFAULT_SESSION_TITLE.to_string(),
        last_activity: now_ms,
        message_count: 0,
        first_message: None,
    }
}

fn sort_by_recency(list: &mut [SessionMetadata]) {
    list.sort_by(|a, b| {
        b.last_activity
            .cmp(&a.last_activity)
            .then_with(|| a.id.cmp(&b.id))
    });
}

fn read_raw(kv: &dyn KvStore, namespace: &str, key: &str) -> Option<String> {
    match kv.get(namespace, key) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(namespace, key, error = %e, "Storage read failed, treating as absent");
            None
        }
    }
}

fn read_json<T: DeserializeOwned>(kv: &dyn KvStore, namespace: &str, key: &str) -> Option<T> {
    let raw = read_raw(kv, namespace, key)?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(namespace, key, error = %e, "Corrupt entry, treating as absent");
            None
        }
    }
}

fn load_snapshot(kv: &dyn KvStore, session_id: &str) -> SessionSnapshot {
    match read_json::<SessionSnapshot>(kv, SNAPSHOTS_NS, session_id) {
        Some(mut snapshot) => {
            snapshot.session_id = session_id.to_string();
            snapshot
        }
        None => SessionSnapshot::empty(session_id, &Uuid::new_v4().to_string()),
    }
}
