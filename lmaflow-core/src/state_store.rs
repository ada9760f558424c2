//! Short-lived values handed out against single-use tokens.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;
use uuid::Uuid;

/// Source of the current time.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

struct Entry<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

/// Values stored under random tokens that expire after a fixed time to live.
///
/// Every token can be taken once; expired entries are never returned.
pub struct ExpiringStateStore<V> {
    ttl: TimeDelta,
    clock: Clock,
    entries: Mutex<HashMap<Uuid, Entry<V>>>,
}

impl<V> ExpiringStateStore<V> {
    /// Store with the given time to live, using the system clock.
    #[must_use]
    pub fn new(ttl: TimeDelta) -> Self {
        Self::with_clock(ttl, Arc::new(Utc::now))
    }

    /// Store with the given time to live and clock.
    #[must_use]
    pub fn with_clock(ttl: TimeDelta, clock: Clock) -> Self {
        Self {
            ttl,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<Uuid, Entry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Keep `value` and return the token it can be taken with.
    pub fn issue(&self, value: V) -> Uuid {
        let token = Uuid::new_v4();
        let expires_at = (self.clock)() + self.ttl;
        self.entries().insert(token, Entry { value, expires_at });
        token
    }

    /// Remove and return the value of `token`, unless it expired.
    pub fn take(&self, token: Uuid) -> Option<V> {
        let entry = self.entries().remove(&token)?;
        if entry.expires_at <= (self.clock)() {
            debug!(%token, "state token expired");
            return None;
        }
        Some(entry.value)
    }

    /// Drop every expired entry and return how many were removed.
    pub fn evict_expired(&self) -> usize {
        let now = (self.clock)();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_token, entry| entry.expires_at > now);
        before - entries.len()
    }
}
