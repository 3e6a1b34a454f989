//! Cross-process admission control over a fixed set of endpoints.
//!
//! Selection is serialized through a single short-lived lock in the shared
//! store. While holding it a caller counts the live usage markers of each
//! endpoint in preference order, picks the first one with room, writes its
//! markers and lets go. The lock is never held across the upstream request.

use crate::clock::{Clock, SystemClock};
use crate::endpoint::{Endpoint, EndpointSet, QuotaBoundary};
use crate::error::ThrottlerResult;
use crate::keys;
use crate::store::CoordinationStore;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Lifetime of usage and reservation markers. Slightly longer than the
/// 60 second quota window so a marker never disappears early.
pub const DEFAULT_MARKER_TTL: Duration = Duration::from_secs(61);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionSettings {
    pub marker_ttl: Duration,
    pub lock_ttl: Duration,
    pub boundary: QuotaBoundary,
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        Self {
            marker_ttl: DEFAULT_MARKER_TTL,
            lock_ttl: DEFAULT_MARKER_TTL,
            boundary: QuotaBoundary::Inclusive,
        }
    }
}

/// One reserved slot on one endpoint, owned by a single in-flight request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionToken {
    endpoint: Endpoint,
    suffix: String,
    created_at: u64,
}

impl AdmissionToken {
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Creation time in milliseconds since the Unix epoch.
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn usage_key(&self) -> String {
        keys::usage_key(self.endpoint.base(), &self.suffix)
    }

    pub fn reservation_key(&self) -> String {
        keys::reservation_key(self.endpoint.base(), &self.suffix)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Another caller holds the selection lock.
    TotalBlockage,
    /// No endpoint has room left in the current window.
    AllEndpointsSaturated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Granted(AdmissionToken),
    Rejected(Rejection),
}

/// Live usage of one endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointUsage {
    pub endpoint: String,
    pub quota: u32,
    pub live: u64,
}

pub struct AdmissionController {
    store: Arc<dyn CoordinationStore>,
    endpoints: EndpointSet,
    settings: AdmissionSettings,
    clock: Arc<dyn Clock>,
}

impl AdmissionController {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        endpoints: EndpointSet,
        settings: AdmissionSettings,
    ) -> Self {
        Self::with_clock(store, endpoints, settings, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn CoordinationStore>,
        endpoints: EndpointSet,
        settings: AdmissionSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            endpoints,
            settings,
            clock,
        }
    }

    pub fn endpoints(&self) -> &EndpointSet {
        &self.endpoints
    }

    pub fn settings(&self) -> &AdmissionSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn CoordinationStore> {
        &self.store
    }

    /// Reserve a slot on the first endpoint with room.
    ///
    /// Returns immediately with `Rejected(TotalBlockage)` if another caller is
    /// mid-selection; this never waits for the lock.
    pub async fn reserve(&self) -> ThrottlerResult<Admission> {
        let owner = keys::new_suffix();
        if !self
            .store
            .try_acquire_as(keys::GLOBAL_LOCK_KEY, &owner, self.settings.lock_ttl)
            .await?
        {
            debug!(target: "mirror_throttler::admission", "Selection lock busy");
            return Ok(Admission::Rejected(Rejection::TotalBlockage));
        }

        let selected = self.select_and_mark().await;
        let unlocked = self
            .store
            .release_if_owner(keys::GLOBAL_LOCK_KEY, &owner)
            .await
            .map(|released| {
                if !released {
                    warn!(
                        target: "mirror_throttler::admission",
                        lock_ttl_ms = self.settings.lock_ttl.as_millis() as u64,
                        "Selection outlived the lock TTL; lock now belongs to another caller"
                    );
                }
            });

        match (selected, unlocked) {
            (Ok(admission), Ok(())) => Ok(admission),
            (Ok(admission), Err(err)) => {
                warn!(
                    target: "mirror_throttler::admission",
                    error = %err,
                    "Failed to release selection lock; it will expire on its own"
                );
                if let Admission::Granted(token) = &admission {
                    let _ = self.store.release(&token.reservation_key()).await;
                }
                Err(err)
            }
            (Err(err), unlocked) => {
                if let Err(unlock_err) = unlocked {
                    warn!(
                        target: "mirror_throttler::admission",
                        error = %unlock_err,
                        "Failed to release selection lock after store error"
                    );
                }
                Err(err)
            }
        }
    }

    async fn select_and_mark(&self) -> ThrottlerResult<Admission> {
        let mut chosen = None;
        for endpoint in &self.endpoints {
            let live = self
                .store
                .count_by_prefix(&keys::usage_prefix(endpoint.base()))
                .await?;

            if self.settings.boundary.admits(live, endpoint.quota()) {
                debug!(
                    target: "mirror_throttler::admission",
                    endpoint = %endpoint.base(),
                    live,
                    quota = endpoint.quota(),
                    "Endpoint selected"
                );
                chosen = Some(endpoint);
                break;
            }
        }

        let Some(endpoint) = chosen else {
            debug!(target: "mirror_throttler::admission", "All endpoints saturated");
            return Ok(Admission::Rejected(Rejection::AllEndpointsSaturated));
        };

        let token = AdmissionToken {
            endpoint: endpoint.clone(),
            suffix: keys::new_suffix(),
            created_at: self.clock.now_millis(),
        };

        let ttl = self.settings.marker_ttl;
        self.store.mark_expiring(&token.usage_key(), ttl).await?;
        self.store.mark_expiring(&token.reservation_key(), ttl).await?;

        Ok(Admission::Granted(token))
    }

    /// Drop the reservation marker of a finished request.
    ///
    /// The usage marker stays until it expires so the window count still
    /// reflects the request. Releasing twice, or after expiry, is a no-op.
    pub async fn release(&self, token: &AdmissionToken) -> ThrottlerResult<()> {
        self.store.release(&token.reservation_key()).await
    }

    /// Live usage per endpoint, without taking the selection lock.
    pub async fn usage(&self) -> ThrottlerResult<Vec<EndpointUsage>> {
        let mut usage = Vec::with_capacity(self.endpoints.len());
        for endpoint in &self.endpoints {
            let live = self
                .store
                .count_by_prefix(&keys::usage_prefix(endpoint.base()))
                .await?;
            usage.push(EndpointUsage {
                endpoint: endpoint.base().to_string(),
                quota: endpoint.quota(),
                live,
            });
        }
        Ok(usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::ThrottlerError;
    use crate::memory_store::InMemoryStore;

    fn controller(
        endpoints: Vec<Endpoint>,
        boundary: QuotaBoundary,
    ) -> (AdmissionController, InMemoryStore, ManualClock) {
        let clock = ManualClock::new(1_000_000);
        let store = InMemoryStore::with_clock(Arc::new(clock.clone()));
        let settings = AdmissionSettings {
            boundary,
            ..AdmissionSettings::default()
        };
        let controller = AdmissionController::with_clock(
            Arc::new(store.clone()),
            EndpointSet::new(endpoints),
            settings,
            Arc::new(clock.clone()),
        );
        (controller, store, clock)
    }

    fn granted(admission: Admission) -> AdmissionToken {
        match admission {
            Admission::Granted(token) => token,
            other => panic!("expected a grant, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reserve_writes_both_markers_and_releases_lock() {
        let (controller, store, clock) =
            controller(vec![Endpoint::new("https://a.com")], QuotaBoundary::Inclusive);

        let token = granted(controller.reserve().await.unwrap());
        assert_eq!(token.endpoint().base(), "https://a.com");
        assert_eq!(token.created_at(), clock.now_millis());
        assert!(store.contains_live(&token.usage_key()));
        assert!(store.contains_live(&token.reservation_key()));
        assert!(!store.contains_live(keys::GLOBAL_LOCK_KEY));
    }

    #[tokio::test]
    async fn test_release_keeps_usage_marker() {
        let (controller, store, _) =
            controller(vec![Endpoint::new("https://a.com")], QuotaBoundary::Inclusive);

        let token = granted(controller.reserve().await.unwrap());
        controller.release(&token).await.unwrap();

        assert!(!store.contains_live(&token.reservation_key()));
        assert!(store.contains_live(&token.usage_key()));
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let (controller, store, clock) =
            controller(vec![Endpoint::new("https://a.com")], QuotaBoundary::Inclusive);

        let token = granted(controller.reserve().await.unwrap());
        controller.release(&token).await.unwrap();
        let after_first = store.live_len();
        controller.release(&token).await.unwrap();
        assert_eq!(store.live_len(), after_first);

        let late = granted(controller.reserve().await.unwrap());
        clock.advance(Duration::from_secs(120));
        assert!(controller.release(&late).await.is_ok());
        assert_eq!(store.live_len(), 0);
    }

    #[tokio::test]
    async fn test_busy_lock_is_total_blockage() {
        let (controller, store, _) =
            controller(vec![Endpoint::new("https://a.com")], QuotaBoundary::Inclusive);

        store
            .try_acquire(keys::GLOBAL_LOCK_KEY, Duration::from_secs(61))
            .await
            .unwrap();

        assert_eq!(
            controller.reserve().await.unwrap(),
            Admission::Rejected(Rejection::TotalBlockage)
        );
        // Rejection must not touch someone else's lock.
        assert!(store.contains_live(keys::GLOBAL_LOCK_KEY));
    }

    #[tokio::test]
    async fn test_abandoned_lock_heals_after_ttl() {
        let (controller, store, clock) =
            controller(vec![Endpoint::new("https://a.com")], QuotaBoundary::Inclusive);

        store
            .try_acquire(keys::GLOBAL_LOCK_KEY, Duration::from_secs(61))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(61));

        granted(controller.reserve().await.unwrap());
    }

    /// Lets a selection stall past the lock TTL, after which a second
    /// caller takes the lock over.
    struct StallingStore {
        inner: InMemoryStore,
        clock: ManualClock,
        lock_ttl: Duration,
        stalled: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl CoordinationStore for StallingStore {
        async fn try_acquire_as(&self, key: &str, owner: &str, ttl: Duration) -> ThrottlerResult<bool> {
            self.inner.try_acquire_as(key, owner, ttl).await
        }

        async fn release(&self, key: &str) -> ThrottlerResult<()> {
            self.inner.release(key).await
        }

        async fn release_if_owner(&self, key: &str, owner: &str) -> ThrottlerResult<bool> {
            self.inner.release_if_owner(key, owner).await
        }

        async fn count_by_prefix(&self, prefix: &str) -> ThrottlerResult<u64> {
            if !self.stalled.swap(true, std::sync::atomic::Ordering::SeqCst) {
                self.clock.advance(self.lock_ttl);
                let taken = self
                    .inner
                    .try_acquire_as(keys::GLOBAL_LOCK_KEY, "late-arrival", self.lock_ttl)
                    .await?;
                assert!(taken, "expired lock should be free for the next caller");
            }
            self.inner.count_by_prefix(prefix).await
        }

        async fn mark_expiring(&self, key: &str, ttl: Duration) -> ThrottlerResult<()> {
            self.inner.mark_expiring(key, ttl).await
        }
    }

    #[tokio::test]
    async fn test_stalled_selector_leaves_new_holders_lock_alone() {
        let clock = ManualClock::new(1_000_000);
        let inner = InMemoryStore::with_clock(Arc::new(clock.clone()));
        let settings = AdmissionSettings::default();
        let store = StallingStore {
            inner: inner.clone(),
            clock: clock.clone(),
            lock_ttl: settings.lock_ttl,
            stalled: std::sync::atomic::AtomicBool::new(false),
        };
        let controller = AdmissionController::with_clock(
            Arc::new(store),
            EndpointSet::new(vec![Endpoint::new("https://a.com")]),
            settings,
            Arc::new(clock),
        );

        granted(controller.reserve().await.unwrap());

        // The late arrival still holds its lock, so the next caller is blocked.
        assert!(inner.contains_live(keys::GLOBAL_LOCK_KEY));
        assert!(inner
            .release_if_owner(keys::GLOBAL_LOCK_KEY, "late-arrival")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_strict_boundary_prefers_primary_then_mirror() {
        let (controller, _, _) = controller(
            vec![
                Endpoint::with_quota("https://a.com", 1),
                Endpoint::with_quota("https://b.com", 1),
            ],
            QuotaBoundary::Strict,
        );

        let first = granted(controller.reserve().await.unwrap());
        let second = granted(controller.reserve().await.unwrap());
        assert_eq!(first.endpoint().base(), "https://a.com");
        assert_eq!(second.endpoint().base(), "https://b.com");
        assert_eq!(
            controller.reserve().await.unwrap(),
            Admission::Rejected(Rejection::AllEndpointsSaturated)
        );
    }

    #[tokio::test]
    async fn test_inclusive_boundary_admits_one_over_quota() {
        let (controller, _, _) = controller(
            vec![
                Endpoint::with_quota("https://a.com", 1),
                Endpoint::with_quota("https://b.com", 1),
            ],
            QuotaBoundary::Inclusive,
        );

        let mut bases = Vec::new();
        for _ in 0..4 {
            let token = granted(controller.reserve().await.unwrap());
            bases.push(token.endpoint().base().to_string());
        }
        assert_eq!(
            bases,
            vec!["https://a.com", "https://a.com", "https://b.com", "https://b.com"]
        );
        assert_eq!(
            controller.reserve().await.unwrap(),
            Admission::Rejected(Rejection::AllEndpointsSaturated)
        );
    }

    #[tokio::test]
    async fn test_saturation_releases_lock() {
        let (controller, store, _) = controller(
            vec![Endpoint::with_quota("https://a.com", 1)],
            QuotaBoundary::Strict,
        );

        granted(controller.reserve().await.unwrap());
        assert_eq!(
            controller.reserve().await.unwrap(),
            Admission::Rejected(Rejection::AllEndpointsSaturated)
        );
        assert!(!store.contains_live(keys::GLOBAL_LOCK_KEY));
    }

    #[tokio::test]
    async fn test_window_rolls_over() {
        let (controller, _, clock) = controller(
            vec![Endpoint::with_quota("https://a.com", 2)],
            QuotaBoundary::Strict,
        );

        granted(controller.reserve().await.unwrap());
        granted(controller.reserve().await.unwrap());
        assert_eq!(
            controller.reserve().await.unwrap(),
            Admission::Rejected(Rejection::AllEndpointsSaturated)
        );

        clock.advance(DEFAULT_MARKER_TTL);
        granted(controller.reserve().await.unwrap());
    }

    #[tokio::test]
    async fn test_unavailable_store_propagates() {
        let (controller, store, _) =
            controller(vec![Endpoint::new("https://a.com")], QuotaBoundary::Inclusive);
        store.set_available(false);

        assert!(matches!(
            controller.reserve().await,
            Err(ThrottlerError::StoreUnavailable(_))
        ));
        assert!(matches!(
            controller.usage().await,
            Err(ThrottlerError::StoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_usage_snapshot() {
        let (controller, _, _) = controller(
            vec![
                Endpoint::with_quota("https://a.com", 1),
                Endpoint::with_quota("https://b.com", 3),
            ],
            QuotaBoundary::Strict,
        );

        granted(controller.reserve().await.unwrap());
        granted(controller.reserve().await.unwrap());

        let usage = controller.usage().await.unwrap();
        assert_eq!(usage.len(), 2);
        assert_eq!((usage[0].endpoint.as_str(), usage[0].live), ("https://a.com", 1));
        assert_eq!((usage[1].endpoint.as_str(), usage[1].live, usage[1].quota), ("https://b.com", 1, 3));
    }
}
