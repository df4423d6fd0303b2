//! Circuit breaker for a named upstream operation.
//!
//! # States
//! - Closed: calls pass through, outcomes are counted
//! - Open: calls fail fast without invoking the operation
//! - Half-Open: exactly one trial call is let through
//!
//! # Design Decisions
//! - Open → Half-Open is evaluated lazily when a call arrives or stats are
//!   read, so no timer task outlives the breaker
//! - The trial slot is released if the trial future is dropped unsettled
//! - Rejected calls count as rejects, not fires

use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use crate::resilience::events::{BreakerEvent, BreakerEventKind, BreakerObserver};
use crate::resilience::rolling::{RollingWindow, WindowCounts};

/// Observers shared between a registry and its breakers.
pub(crate) type ObserverList = RwLock<Vec<Arc<dyn BreakerObserver>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half-open",
        }
    }
}

/// Breaker tuning.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerOptions {
    /// Milliseconds before a pending call counts as failed. 0 disables.
    pub timeout_ms: u64,

    /// Failure percentage (0-100) over the rolling window that trips the breaker.
    pub error_threshold_percentage: f64,

    /// Milliseconds the breaker stays open before allowing a trial.
    pub reset_timeout_ms: u64,

    /// Informational; retries are the caller's responsibility.
    pub max_retries: u32,

    /// Minimum fired calls in the window before the threshold applies.
    pub volume_threshold: u64,

    pub rolling_window_ms: u64,

    pub rolling_buckets: u32,
}

impl Default for BreakerOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 3000,
            error_threshold_percentage: 50.0,
            reset_timeout_ms: 30_000,
            max_retries: 3,
            volume_threshold: 0,
            rolling_window_ms: 10_000,
            rolling_buckets: 10,
        }
    }
}

impl BreakerOptions {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn rolling_window(&self) -> Duration {
        Duration::from_millis(self.rolling_window_ms)
    }
}

/// Why a guarded call did not produce a value.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    #[error("circuit breaker '{name}' is open")]
    Open { name: String },

    #[error("operation '{name}' timed out after {after:?}")]
    Timeout { name: String, after: Duration },

    #[error("operation '{name}' failed: {source}")]
    Upstream {
        name: String,
        #[source]
        source: E,
    },
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerStats {
    pub name: String,
    pub state: BreakerState,
    pub stats: WindowCounts,
    pub is_closed: bool,
    pub is_open: bool,
    pub is_half_open: bool,
    /// Time left before a trial is allowed, while open.
    pub cooldown_remaining_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PermitKind {
    Normal,
    Trial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settled {
    Success,
    Failure,
    Timeout,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    window: RollingWindow,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

impl BreakerInner {
    /// Promote Open → HalfOpen once the cooldown has elapsed.
    fn promote(&mut self, now: Instant, reset_timeout: Duration) -> Option<BreakerEventKind> {
        if self.state != BreakerState::Open {
            return None;
        }
        match self.opened_at {
            Some(opened) if now.saturating_duration_since(opened) >= reset_timeout => {
                self.state = BreakerState::HalfOpen;
                self.trial_in_flight = false;
                Some(BreakerEventKind::HalfOpened)
            }
            _ => None,
        }
    }

    fn trip(&mut self, now: Instant) {
        self.state = BreakerState::Open;
        self.opened_at = Some(now);
        self.trial_in_flight = false;
    }

    fn close(&mut self) {
        self.state = BreakerState::Closed;
        self.opened_at = None;
        self.trial_in_flight = false;
        self.window.clear();
    }
}

/// A single circuit breaker.
pub struct CircuitBreaker {
    name: String,
    options: BreakerOptions,
    inner: Mutex<BreakerInner>,
    observers: Arc<ObserverList>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, options: BreakerOptions) -> Self {
        Self::with_observers(name, options, Arc::new(RwLock::new(Vec::new())))
    }

    pub(crate) fn with_observers(
        name: impl Into<String>,
        options: BreakerOptions,
        observers: Arc<ObserverList>,
    ) -> Self {
        let window = RollingWindow::new(options.rolling_window(), options.rolling_buckets);
        Self {
            name: name.into(),
            options,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                window,
                opened_at: None,
                trial_in_flight: false,
            }),
            observers,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &BreakerOptions {
        &self.options
    }

    /// Attach an observer to this breaker (and any sharing its list).
    pub fn subscribe(&self, observer: Arc<dyn BreakerObserver>) {
        self.observers
            .write()
            .expect("breaker observers lock poisoned")
            .push(observer);
    }

    /// Run `op` through the breaker.
    pub async fn call<F, Fut, T, E>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(mut permit) = self.acquire() else {
            return Err(BreakerError::Open {
                name: self.name.clone(),
            });
        };

        let result = match self.options.timeout() {
            Some(limit) => match tokio::time::timeout(limit, op()).await {
                Ok(result) => result.map_err(|source| self.upstream_error(source)),
                Err(_) => Err(BreakerError::Timeout {
                    name: self.name.clone(),
                    after: limit,
                }),
            },
            None => op().await.map_err(|source| self.upstream_error(source)),
        };

        permit.settle(match &result {
            Ok(_) => Settled::Success,
            Err(BreakerError::Timeout { .. }) => Settled::Timeout,
            Err(_) => Settled::Failure,
        });
        result
    }

    /// Run `op`, and on rejection, timeout, or failure return `fallback`'s value.
    pub async fn call_with_fallback<F, Fut, T, E, G, GFut>(&self, op: F, fallback: G) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        G: FnOnce(BreakerError<E>) -> GFut,
        GFut: Future<Output = T>,
    {
        match self.call(op).await {
            Ok(value) => value,
            Err(err) => {
                {
                    let mut inner = self.lock();
                    inner.window.record(Instant::now(), |c| c.fallbacks += 1);
                }
                self.emit(&[BreakerEventKind::FallbackInvoked]);
                fallback(err).await
            }
        }
    }

    pub fn state(&self) -> BreakerState {
        self.stats().state
    }

    /// Time until a trial is allowed, if the breaker is open.
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        let inner = self.lock();
        if inner.state != BreakerState::Open {
            return None;
        }
        inner.opened_at.map(|opened| {
            self.options
                .reset_timeout()
                .saturating_sub(Instant::now().saturating_duration_since(opened))
        })
    }

    pub fn stats(&self) -> BreakerStats {
        let now = Instant::now();
        let (snapshot, promoted) = {
            let mut inner = self.lock();
            let promoted = inner.promote(now, self.options.reset_timeout());
            let cooldown_remaining_ms = match (inner.state, inner.opened_at) {
                (BreakerState::Open, Some(opened)) => Some(
                    self.options
                        .reset_timeout()
                        .saturating_sub(now.saturating_duration_since(opened))
                        .as_millis() as u64,
                ),
                _ => None,
            };
            let snapshot = BreakerStats {
                name: self.name.clone(),
                state: inner.state,
                stats: inner.window.totals(now),
                is_closed: inner.state == BreakerState::Closed,
                is_open: inner.state == BreakerState::Open,
                is_half_open: inner.state == BreakerState::HalfOpen,
                cooldown_remaining_ms,
            };
            (snapshot, promoted)
        };
        if let Some(kind) = promoted {
            self.emit(&[kind]);
        }
        snapshot
    }

    /// Force the breaker closed and clear its counters.
    pub fn reset(&self) {
        let was = {
            let mut inner = self.lock();
            let was = inner.state;
            inner.close();
            was
        };
        tracing::info!(breaker = %self.name, previous = was.as_str(), "Circuit breaker reset");
        if was != BreakerState::Closed {
            self.emit(&[BreakerEventKind::Closed]);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().expect("circuit breaker mutex poisoned")
    }

    fn upstream_error<E>(&self, source: E) -> BreakerError<E> {
        BreakerError::Upstream {
            name: self.name.clone(),
            source,
        }
    }

    fn acquire(&self) -> Option<Permit<'_>> {
        let now = Instant::now();
        let (kind, promoted) = {
            let mut inner = self.lock();
            let promoted = inner.promote(now, self.options.reset_timeout());
            let kind = match inner.state {
                BreakerState::Closed => Some(PermitKind::Normal),
                BreakerState::HalfOpen if !inner.trial_in_flight => {
                    inner.trial_in_flight = true;
                    Some(PermitKind::Trial)
                }
                _ => None,
            };
            match kind {
                Some(_) => inner.window.record(now, |c| c.fires += 1),
                None => inner.window.record(now, |c| c.rejects += 1),
            }
            (kind, promoted)
        };

        if let Some(event) = promoted {
            self.emit(&[event]);
        }
        if kind.is_none() {
            tracing::debug!(breaker = %self.name, "Circuit breaker rejected call");
        }
        kind.map(|kind| Permit {
            breaker: self,
            kind,
            settled: false,
        })
    }

    fn settle(&self, kind: PermitKind, outcome: Settled) {
        let now = Instant::now();
        let event = {
            let mut inner = self.lock();
            inner.window.record(now, |c| match outcome {
                Settled::Success => c.successes += 1,
                Settled::Failure => c.failures += 1,
                Settled::Timeout => {
                    c.failures += 1;
                    c.timeouts += 1;
                }
            });

            let is_trial = kind == PermitKind::Trial && inner.state == BreakerState::HalfOpen;
            match (is_trial, outcome) {
                (true, Settled::Success) => {
                    inner.close();
                    Some(BreakerEventKind::Closed)
                }
                (true, _) => {
                    inner.trip(now);
                    Some(BreakerEventKind::Opened)
                }
                (false, Settled::Success) => None,
                (false, _) if inner.state == BreakerState::Closed => {
                    let totals = inner.window.totals(now);
                    let tripped = totals.fires >= self.options.volume_threshold
                        && totals.error_percentage() >= self.options.error_threshold_percentage;
                    if tripped {
                        inner.trip(now);
                        Some(BreakerEventKind::Opened)
                    } else {
                        None
                    }
                }
                (false, _) => None,
            }
        };

        if let Some(event) = event {
            self.emit(&[event]);
        }
    }

    fn release_trial(&self) {
        let mut inner = self.lock();
        if inner.state == BreakerState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }

    fn emit(&self, kinds: &[BreakerEventKind]) {
        let observers = self
            .observers
            .read()
            .expect("breaker observers lock poisoned")
            .clone();
        for kind in kinds {
            let event = BreakerEvent {
                breaker: self.name.clone(),
                kind: *kind,
            };
            for observer in &observers {
                observer.on_event(&event);
            }
        }
    }
}

/// Admission to run one call. Dropping an unsettled trial frees the slot.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    kind: PermitKind,
    settled: bool,
}

impl Permit<'_> {
    fn settle(&mut self, outcome: Settled) {
        self.settled = true;
        self.breaker.settle(self.kind, outcome);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.kind == PermitKind::Trial {
            self.breaker.release_trial();
        }
    }
}
