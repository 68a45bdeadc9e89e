//! Session registry, snapshots and the reusable session-id slot.

pub mod reuse;
pub mod store;

pub use reuse::{ReusableSessionCache, DEFAULT_REUSE_TTL};
pub use store::SessionStore;

/// Key namespaces used in the [`KvStore`](crate::kv::KvStore).
pub mod keys {
    pub const POINTER_NS: &str = "pointer";
    pub const REGISTRY_NS: &str = "registry";
    pub const SNAPSHOTS_NS: &str = "snapshots";

    pub const CURRENT_SESSION: &str = "current_session";
    pub const REUSABLE_SESSION: &str = "reusable_session";
    pub const SESSIONS: &str = "sessions";
}
