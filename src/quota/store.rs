//! Counter stores.
//!
//! # Responsibilities
//! - Atomic read-and-increment of a keyed counter with window expiry
//! - Lazy expiry: an expired window is reset on the next hit
//! - Optional sweep of expired entries to bound memory

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::{self, Instant};

/// Counter state after one hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    /// Hits recorded in the current window, this one included.
    pub count: u64,
    /// Time until the current window ends.
    pub reset_after: Duration,
}

/// Error type for counter stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
    #[error("counter store returned an unexpected reply: {0}")]
    Protocol(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Atomic "read-and-increment with expiry" primitive.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Record one hit against `key` and return the updated window state.
    async fn hit(&self, key: &str, window: Duration) -> Result<Hit, StoreError>;

    /// Forget the counter for `key`.
    async fn reset(&self, key: &str) -> Result<(), StoreError>;

    /// Short name for logs and metrics.
    fn name(&self) -> &'static str;
}

#[derive(Debug)]
struct Window {
    count: u64,
    reset_at: Instant,
}

/// Process-local counter store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    windows: DashMap<String, Window>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a hit at `now`. The entry guard holds the shard lock, so the
    /// expiry check and the increment are one step.
    pub fn hit_at(&self, key: &str, window: Duration, now: Instant) -> Hit {
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| Window {
                count: 0,
                reset_at: now + window,
            });

        if entry.reset_at <= now {
            entry.count = 0;
            entry.reset_at = now + window;
        }
        entry.count += 1;

        Hit {
            count: entry.count,
            reset_after: entry.reset_at.saturating_duration_since(now),
        }
    }

    /// Drop every expired window. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, window| window.reset_at > now);
        before.saturating_sub(self.windows.len())
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Periodically purge expired windows until shutdown.
    pub async fn sweep(self: Arc<Self>, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.purge_expired();
                    if removed > 0 {
                        tracing::debug!(removed, remaining = self.len(), "Purged expired quota windows");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Quota sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn hit(&self, key: &str, window: Duration) -> Result<Hit, StoreError> {
        Ok(self.hit_at(key, window, Instant::now()))
    }

    async fn reset(&self, key: &str) -> Result<(), StoreError> {
        self.windows.remove(key);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
