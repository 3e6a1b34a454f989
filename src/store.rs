//! Store-agnostic coordination primitives.
//!
//! Every process that fetches through the same set of endpoints talks to the
//! same store. The store is the only shared state: implementations keep no
//! local bookkeeping between calls, and all atomicity comes from the backend
//! itself.

use crate::error::ThrottlerResult;
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Atomically create `key` with the given TTL if it is not already live.
    ///
    /// Returns `Ok(false)` when another holder owns the key.
    async fn try_acquire(&self, key: &str, ttl: Duration) -> ThrottlerResult<bool> {
        self.try_acquire_as(key, "", ttl).await
    }

    /// Like `try_acquire`, recording `owner` as the key's value so that only
    /// the same owner can later remove it with `release_if_owner`.
    async fn try_acquire_as(&self, key: &str, owner: &str, ttl: Duration) -> ThrottlerResult<bool>;

    /// Delete `key`. Deleting a missing or expired key is not an error.
    async fn release(&self, key: &str) -> ThrottlerResult<()>;

    /// Delete `key` only while it still holds `owner`. Returns whether it was
    /// deleted; a key that expired and was re-acquired by someone else is
    /// left alone.
    async fn release_if_owner(&self, key: &str, owner: &str) -> ThrottlerResult<bool>;

    /// Number of live keys starting with `prefix`.
    async fn count_by_prefix(&self, prefix: &str) -> ThrottlerResult<u64>;

    /// Create (or overwrite) an expiring marker.
    async fn mark_expiring(&self, key: &str, ttl: Duration) -> ThrottlerResult<()>;

    /// Round-trip to the store, used by health checks.
    async fn ping(&self) -> ThrottlerResult<()> {
        self.count_by_prefix(crate::keys::GLOBAL_LOCK_KEY).await.map(|_| ())
    }
}

/// A stored key with an explicit lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub created_at: u64,
    pub ttl: Duration,
    pub value: String,
}

impl Marker {
    pub fn new(created_at: u64, ttl: Duration) -> Self {
        Self {
            created_at,
            ttl,
            value: String::new(),
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = value.into();
        self
    }

    pub fn expires_at(&self) -> u64 {
        self.created_at.saturating_add(self.ttl.as_millis() as u64)
    }

    /// Liveness depends only on the supplied time.
    pub fn is_live(&self, now_millis: u64) -> bool {
        now_millis < self.expires_at()
    }
}
