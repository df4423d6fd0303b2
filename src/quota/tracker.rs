//! Quota tracker.
//!
//! # Responsibilities
//! - Key counters by (tier, caller)
//! - Admit while the window count is within the tier ceiling
//! - Reject with a retry-after hint derived from the window boundary
//!
//! # Design Decisions
//! - The decision uses the count returned by the same atomic store call
//!   that incremented it, so concurrent checks never both slip through
//! - Rejected attempts still count toward the window

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use thiserror::Error;
use tokio::time::Instant;

use crate::observability::metrics;
use crate::quota::identity::CallerIdentity;
use crate::quota::store::{CounterStore, Hit, MemoryStore};
use crate::quota::tier::{QuotaTier, TierPolicy};

/// An admitted request and the quota left in its window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub tier: String,
    pub limit: u64,
    pub remaining: u64,
    pub reset_after: Duration,
}

/// A rejected request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("rate limit exceeded for tier '{tier}' (limit {limit}), retry after {retry_after:?}")]
pub struct RateLimited {
    pub tier: String,
    pub limit: u64,
    pub retry_after: Duration,
}

impl RateLimited {
    /// Retry hint in milliseconds, never zero.
    pub fn retry_after_ms(&self) -> u64 {
        (self.retry_after.as_millis() as u64).max(1)
    }

    /// Retry hint rounded up to whole seconds, for `Retry-After`.
    pub fn retry_after_secs(&self) -> u64 {
        self.retry_after_ms().div_ceil(1000)
    }
}

/// Tiered request quota enforcement.
pub struct QuotaTracker {
    policy: ArcSwap<TierPolicy>,
    shared: Option<Arc<dyn CounterStore>>,
    local: Arc<MemoryStore>,
}

impl QuotaTracker {
    /// Tracker backed only by process memory.
    pub fn new(policy: TierPolicy) -> Self {
        Self {
            policy: ArcSwap::from_pointee(policy),
            shared: None,
            local: Arc::new(MemoryStore::new()),
        }
    }

    /// Tracker backed by a shared store, with process memory as fallback.
    pub fn with_store(policy: TierPolicy, store: Arc<dyn CounterStore>) -> Self {
        Self {
            policy: ArcSwap::from_pointee(policy),
            shared: Some(store),
            local: Arc::new(MemoryStore::new()),
        }
    }

    /// Snapshot of the policy currently in effect.
    pub fn policy(&self) -> Arc<TierPolicy> {
        self.policy.load_full()
    }

    /// Replace the policy. Requests that already selected a tier keep it.
    pub fn set_policy(&self, policy: TierPolicy) {
        self.policy.store(Arc::new(policy));
        tracing::info!("Quota tier policy updated");
    }

    pub fn local_store(&self) -> Arc<MemoryStore> {
        self.local.clone()
    }

    /// Select the tier for this caller under the current policy and check it.
    pub async fn check_for(
        &self,
        identity: &CallerIdentity,
        endpoint: Option<&str>,
    ) -> Result<Admission, RateLimited> {
        let policy = self.policy.load_full();
        let tier = policy.select(identity, endpoint);
        self.check(identity, tier).await
    }

    /// Count one request against `tier` for `identity`.
    pub async fn check(
        &self,
        identity: &CallerIdentity,
        tier: &QuotaTier,
    ) -> Result<Admission, RateLimited> {
        let key = counter_key(identity, tier);
        let hit = self.hit(&key, tier.window()).await;

        if hit.count > tier.max {
            tracing::warn!(
                client = %identity,
                tier = %tier.name,
                count = hit.count,
                limit = tier.max,
                "Rate limit exceeded"
            );
            metrics::record_rate_limited(&tier.name);
            return Err(RateLimited {
                tier: tier.name.clone(),
                limit: tier.max,
                retry_after: hit.reset_after.max(Duration::from_millis(1)),
            });
        }

        Ok(Admission {
            tier: tier.name.clone(),
            limit: tier.max,
            remaining: tier.max - hit.count,
            reset_after: hit.reset_after,
        })
    }

    /// Clear the counter for a caller in one tier (operator override).
    pub async fn reset(&self, identity: &CallerIdentity, tier: &QuotaTier) {
        let key = counter_key(identity, tier);
        if let Some(store) = &self.shared {
            if let Err(e) = store.reset(&key).await {
                tracing::warn!(store = store.name(), error = %e, "Failed to reset shared quota counter");
            }
        }
        // The memory store never fails.
        let _ = self.local.reset(&key).await;
    }

    async fn hit(&self, key: &str, window: Duration) -> Hit {
        if let Some(store) = &self.shared {
            match store.hit(key, window).await {
                Ok(hit) => return hit,
                Err(e) => {
                    tracing::warn!(
                        store = store.name(),
                        error = %e,
                        "Shared quota store failed, falling back to local counters"
                    );
                    metrics::record_store_fallback(store.name());
                }
            }
        }
        self.local.hit_at(key, window, Instant::now())
    }
}

fn counter_key(identity: &CallerIdentity, tier: &QuotaTier) -> String {
    format!("{}:{}", tier.name, identity.key())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::store::StoreError;
    use async_trait::async_trait;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn caller() -> CallerIdentity {
        CallerIdentity::anonymous(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)))
    }

    fn small_policy() -> TierPolicy {
        TierPolicy::new(
            QuotaTier::new("public", 1_000, 3),
            QuotaTier::new("authenticated", 1_000, 5),
            QuotaTier::new("seller", 1_000, 10),
        )
    }

    struct BrokenStore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CounterStore for BrokenStore {
        async fn hit(&self, _key: &str, _window: Duration) -> Result<Hit, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn reset(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        fn name(&self) -> &'static str {
            "broken"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_admits_up_to_max_then_rejects() {
        let tracker = QuotaTracker::new(small_policy());

        for expected_remaining in [2, 1, 0] {
            let admission = tracker.check_for(&caller(), None).await.unwrap();
            assert_eq!(admission.remaining, expected_remaining);
        }

        let rejected = tracker.check_for(&caller(), None).await.unwrap_err();
        assert_eq!(rejected.tier, "public");
        assert_eq!(rejected.limit, 3);
        assert!(rejected.retry_after_ms() > 0);
        assert_eq!(rejected.retry_after_secs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_expiry_readmits() {
        let tracker = QuotaTracker::new(small_policy());
        for _ in 0..3 {
            tracker.check_for(&caller(), None).await.unwrap();
        }
        assert!(tracker.check_for(&caller(), None).await.is_err());

        tokio::time::advance(Duration::from_millis(1_000)).await;
        assert!(tracker.check_for(&caller(), None).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tiers_count_separately() {
        let policy = small_policy().with_endpoint("login", 1_000, 1);
        let tracker = QuotaTracker::new(policy);

        tracker.check_for(&caller(), Some("login")).await.unwrap();
        assert!(tracker.check_for(&caller(), Some("login")).await.is_err());
        // The public tier is untouched by login attempts.
        assert_eq!(tracker.check_for(&caller(), None).await.unwrap().remaining, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_store_failure_falls_back_to_local() {
        let broken = Arc::new(BrokenStore { calls: AtomicUsize::new(0) });
        let tracker = QuotaTracker::with_store(small_policy(), broken.clone());

        for _ in 0..3 {
            tracker.check_for(&caller(), None).await.unwrap();
        }
        assert!(tracker.check_for(&caller(), None).await.is_err());
        assert_eq!(broken.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_policy_swap_applies_to_new_checks() {
        let tracker = QuotaTracker::new(small_policy());
        tracker.check_for(&caller(), None).await.unwrap();

        let mut bigger = small_policy();
        bigger.public.max = 50;
        tracker.set_policy(bigger);

        let admission = tracker.check_for(&caller(), None).await.unwrap();
        assert_eq!(admission.limit, 50);
        assert_eq!(admission.remaining, 48);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_counter() {
        let tracker = QuotaTracker::new(small_policy());
        let policy = tracker.policy();
        for _ in 0..3 {
            tracker.check(&caller(), &policy.public).await.unwrap();
        }
        tracker.reset(&caller(), &policy.public).await;
        assert_eq!(tracker.check(&caller(), &policy.public).await.unwrap().remaining, 2);
    }
}
