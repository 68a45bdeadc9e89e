//! Single-slot cache for quick reconnection to a recent session.
//!
//! Every write goes to two tiers: a short-lived store (process memory) and a
//! long-lived one (disk), so a restart within the TTL finds the id again. A
//! read past the TTL clears both tiers and reports nothing.

use super::keys::{POINTER_NS, REUSABLE_SESSION};
use crate::clock::Clock;
use crate::error::Result;
use crate::kv::KvStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_REUSE_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ReusableEntry {
    id: String,
    saved_at_ms: i64,
}

pub struct ReusableSessionCache {
    short_lived: Arc<dyn KvStore>,
    long_lived: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    ttl_ms: i64,
}

impl ReusableSessionCache {
    pub fn new(
        short_lived: Arc<dyn KvStore>,
        long_lived: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            short_lived,
            long_lived,
            clock,
            ttl_ms: DEFAULT_REUSE_TTL.as_millis() as i64,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_ms = ttl.as_millis() as i64;
        self
    }

    /// The cached id if it is still inside the TTL window.
    pub fn get(&self) -> Option<String> {
        let entry = read_entry(self.short_lived.as_ref())
            .or_else(|| read_entry(self.long_lived.as_ref()))?;

        let age = self.clock.now_ms() - entry.saved_at_ms;
        if age > self.ttl_ms {
            tracing::debug!(session_id = %entry.id, age_ms = age, "Reusable session expired");
            self.clear();
            return None;
        }
        Some(entry.id)
    }

    pub fn set(&self, session_id: &str) -> Result<()> {
        let entry = ReusableEntry {
            id: session_id.to_string(),
            saved_at_ms: self.clock.now_ms(),
        };
        let value = serde_json::to_string(&entry)?;
        self.short_lived.set(POINTER_NS, REUSABLE_SESSION, &value)?;
        self.long_lived.set(POINTER_NS, REUSABLE_SESSION, &value)?;
        Ok(())
    }

    pub fn clear(&self) {
        for tier in [&self.short_lived, &self.long_lived] {
            if let Err(e) = tier.delete(POINTER_NS, REUSABLE_SESSION) {
                tracing::warn!(error = %e, "Failed to clear reusable session entry");
            }
        }
    }
}

fn read_entry(store: &dyn KvStore) -> Option<ReusableEntry> {
    let raw = match store.get(POINTER_NS, REUSABLE_SESSION) {
        Ok(raw) => raw?,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read reusable session entry");
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(entry) => Some(entry),
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring corrupt reusable session entry");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::kv::MemoryKvStore;

    fn cache() -> (ReusableSessionCache, Arc<MemoryKvStore>, Arc<MemoryKvStore>, Arc<ManualClock>) {
        let short = Arc::new(MemoryKvStore::new());
        let long = Arc::new(MemoryKvStore::new());
        let clock = Arc::new(ManualClock::new(1_000_000));
        let cache = ReusableSessionCache::new(short.clone(), long.clone(), clock.clone());
        (cache, short, long, clock)
    }

    #[test]
    fn test_valid_entry_is_returned() {
        let (cache, _, _, clock) = cache();
        cache.set("s1").unwrap();
        clock.advance_ms(29 * 60 * 1000);
        assert_eq!(cache.get().as_deref(), Some("s1"));
    }

    #[test]
    fn test_expired_entry_is_cleared_from_both_tiers() {
        let (cache, short, long, clock) = cache();
        cache.set("s1").unwrap();
        clock.advance_ms(30 * 60 * 1000 + 1);

        assert_eq!(cache.get(), None);
        assert!(short.get(POINTER_NS, REUSABLE_SESSION).unwrap().is_none());
        assert!(long.get(POINTER_NS, REUSABLE_SESSION).unwrap().is_none());
    }

    #[test]
    fn test_long_lived_tier_survives_restart() {
        let (cache, _, long, clock) = cache();
        cache.set("s1").unwrap();

        // fresh process: empty memory tier, same disk tier
        let restarted = ReusableSessionCache::new(Arc::new(MemoryKvStore::new()), long, clock.clone());
        clock.advance_ms(60_000);
        assert_eq!(restarted.get().as_deref(), Some("s1"));
    }

    #[test]
    fn test_custom_ttl_and_corrupt_entry() {
        let (cache, short, _, clock) = cache();
        let cache = cache.with_ttl(Duration::from_secs(10));
        cache.set("s1").unwrap();
        clock.advance_ms(11_000);
        assert_eq!(cache.get(), None);

        short.set(POINTER_NS, REUSABLE_SESSION, "{not json").unwrap();
        assert_eq!(cache.get(), None);
    }
}
