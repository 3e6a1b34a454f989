//! In-process coordination store.
//!
//! Shares state only between clones of the same value, so it coordinates
//! tasks and threads of one process. Expiry is evaluated lazily against the
//! injected clock, which makes TTL behaviour fully deterministic in tests.

use crate::clock::{Clock, SystemClock};
use crate::error::{ThrottlerError, ThrottlerResult};
use crate::store::{CoordinationStore, Marker};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct InMemoryStore {
    entries: Arc<Mutex<HashMap<String, Marker>>>,
    clock: Arc<dyn Clock>,
    available: Arc<AtomicBool>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            clock,
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate the store going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Whether `key` currently exists and has not expired.
    pub fn contains_live(&self, key: &str) -> bool {
        let now = self.clock.now_millis();
        self.entries
            .lock()
            .map(|entries| entries.get(key).is_some_and(|m| m.is_live(now)))
            .unwrap_or(false)
    }

    /// Number of live keys, expired entries excluded.
    pub fn live_len(&self) -> usize {
        let now = self.clock.now_millis();
        self.entries
            .lock()
            .map(|entries| entries.values().filter(|m| m.is_live(now)).count())
            .unwrap_or(0)
    }

    fn entries(&self) -> ThrottlerResult<MutexGuard<'_, HashMap<String, Marker>>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(ThrottlerError::StoreUnavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }

        let mut entries = self
            .entries
            .lock()
            .map_err(|_| ThrottlerError::Internal("Failed to acquire store lock".into()))?;

        let now = self.clock.now_millis();
        entries.retain(|_, marker| marker.is_live(now));
        Ok(entries)
    }
}

#[async_trait]
impl CoordinationStore for InMemoryStore {
    async fn try_acquire_as(&self, key: &str, owner: &str, ttl: Duration) -> ThrottlerResult<bool> {
        let mut entries = self.entries()?;
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Marker::new(self.clock.now_millis(), ttl).with_value(owner),
        );
        Ok(true)
    }

    async fn release(&self, key: &str) -> ThrottlerResult<()> {
        self.entries()?.remove(key);
        Ok(())
    }

    async fn release_if_owner(&self, key: &str, owner: &str) -> ThrottlerResult<bool> {
        let mut entries = self.entries()?;
        if entries.get(key).is_some_and(|marker| marker.value == owner) {
            entries.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn count_by_prefix(&self, prefix: &str) -> ThrottlerResult<u64> {
        let entries = self.entries()?;
        Ok(entries.keys().filter(|k| k.starts_with(prefix)).count() as u64)
    }

    async fn mark_expiring(&self, key: &str, ttl: Duration) -> ThrottlerResult<()> {
        let mut entries = self.entries()?;
        entries.insert(key.to_string(), Marker::new(self.clock.now_millis(), ttl));
        Ok(())
    }

    async fn ping(&self) -> ThrottlerResult<()> {
        self.entries().map(|_| ())
    }
}
