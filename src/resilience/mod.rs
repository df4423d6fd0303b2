//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Guarded call for operation "payments":
//!     → registry.rs (one CircuitBreaker per name, created on first use)
//!     → circuit_breaker.rs (admit / fail fast, enforce timeout, settle)
//!     → rolling.rs (bucketed fires/successes/failures over the window)
//!     → events.rs (opened / half-opened / closed / fallback-invoked)
//! ```
//!
//! # States
//! ```text
//! Closed → Open: failure percentage over the rolling window >= threshold
//! Open → Half-Open: reset timeout elapsed (checked on the next call or stats read)
//! Half-Open → Closed: the single trial call succeeds (window cleared)
//! Half-Open → Open: the trial fails or times out (cooldown restarts)
//! ```
//!
//! # Design Decisions
//! - The registry is an explicit object with a start/shutdown lifecycle
//! - Fail fast while open; the operation is never invoked
//! - A timed-out call is a failure even if the operation would finish later;
//!   the pending future is dropped
//! - Observers are notified after the state lock is released and cannot
//!   influence transitions
//! - Retries stay with the caller; `max_retries` is informational

pub mod circuit_breaker;
pub mod events;
pub mod registry;
pub mod rolling;

pub use circuit_breaker::{BreakerError, BreakerOptions, BreakerState, BreakerStats, CircuitBreaker};
pub use events::{BreakerEvent, BreakerEventKind, BreakerObserver, LoggingObserver, MetricsObserver};
pub use registry::{BreakerHandle, BreakerRegistry};
pub use rolling::{RollingWindow, WindowCounts};
