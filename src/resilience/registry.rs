//! Named breaker registry.
//!
//! # Responsibilities
//! - Own exactly one state machine per operation name
//! - Fan breaker events out to the registered observers
//! - Expose stats and operator resets for every breaker
//!
//! # Design Decisions
//! - First registration's options win; a conflicting re-registration is
//!   logged, never applied
//! - Handles bind an operation to the shared state machine, so two call
//!   sites using one name share one failure budget

use std::future::Future;
use std::sync::{Arc, RwLock};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::resilience::circuit_breaker::{
    BreakerError, BreakerOptions, BreakerStats, CircuitBreaker, ObserverList,
};
use crate::resilience::events::BreakerObserver;

/// Process-wide set of circuit breakers.
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    defaults: BreakerOptions,
    observers: Arc<ObserverList>,
}

impl BreakerRegistry {
    pub fn new(defaults: BreakerOptions) -> Self {
        Self {
            breakers: DashMap::new(),
            defaults,
            observers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn defaults(&self) -> &BreakerOptions {
        &self.defaults
    }

    /// Notify `observer` of events from every breaker, existing and future.
    pub fn subscribe(&self, observer: Arc<dyn BreakerObserver>) {
        self.observers
            .write()
            .expect("breaker observers lock poisoned")
            .push(observer);
    }

    /// The breaker for `name`, created with `options` (or the registry
    /// defaults) on first use.
    pub fn get_or_create(&self, name: &str, options: Option<&BreakerOptions>) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            warn_on_conflict(existing.value(), options);
            return existing.value().clone();
        }

        match self.breakers.entry(name.to_string()) {
            Entry::Occupied(entry) => {
                warn_on_conflict(entry.get(), options);
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                let options = options.cloned().unwrap_or_else(|| self.defaults.clone());
                tracing::info!(
                    breaker = %name,
                    timeout_ms = options.timeout_ms,
                    error_threshold_percentage = options.error_threshold_percentage,
                    reset_timeout_ms = options.reset_timeout_ms,
                    "Circuit breaker registered"
                );
                let breaker = Arc::new(CircuitBreaker::with_observers(
                    name,
                    options,
                    self.observers.clone(),
                ));
                entry.insert(breaker.clone());
                breaker
            }
        }
    }

    /// Bind `operation` to the breaker named `name`.
    pub fn handle<Op>(&self, name: &str, operation: Op, options: Option<&BreakerOptions>) -> BreakerHandle<Op> {
        BreakerHandle {
            breaker: self.get_or_create(name, options),
            operation,
        }
    }

    /// Run `op` through the breaker named `name`.
    pub async fn execute<F, Fut, T, E>(&self, name: &str, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let breaker = self.get_or_create(name, None);
        breaker.call(op).await
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| b.value().clone())
    }

    pub fn stats(&self, name: &str) -> Option<BreakerStats> {
        self.get(name).map(|breaker| breaker.stats())
    }

    /// Stats for every breaker, sorted by name.
    pub fn all_stats(&self) -> Vec<BreakerStats> {
        let mut stats: Vec<BreakerStats> = self.snapshot().iter().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Force one breaker closed. Returns false if no breaker has that name.
    pub fn reset(&self, name: &str) -> bool {
        match self.get(name) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        for breaker in self.snapshot() {
            breaker.reset();
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Log final state and drop every breaker.
    pub fn shutdown(&self) {
        for stats in self.all_stats() {
            tracing::info!(
                breaker = %stats.name,
                state = stats.state.as_str(),
                fires = stats.stats.fires,
                failures = stats.stats.failures,
                "Disposing circuit breaker"
            );
        }
        self.breakers.clear();
    }

    // Clone out of the map so no shard lock is held while breakers emit.
    fn snapshot(&self) -> Vec<Arc<CircuitBreaker>> {
        self.breakers.iter().map(|e| e.value().clone()).collect()
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerOptions::default())
    }
}

fn warn_on_conflict(existing: &CircuitBreaker, requested: Option<&BreakerOptions>) {
    if let Some(requested) = requested {
        if requested != existing.options() {
            tracing::warn!(
                breaker = %existing.name(),
                kept = ?existing.options(),
                ignored = ?requested,
                "Circuit breaker already registered with different options; keeping the first"
            );
        }
    }
}

/// An operation bound to a shared breaker.
pub struct BreakerHandle<Op> {
    breaker: Arc<CircuitBreaker>,
    operation: Op,
}

impl<Op> BreakerHandle<Op> {
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Invoke the bound operation with `args` through the breaker.
    pub async fn fire<A, Fut, T, E>(&self, args: A) -> Result<T, BreakerError<E>>
    where
        Op: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.breaker.call(|| (self.operation)(args)).await
    }
}
