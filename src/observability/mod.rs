//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events, pretty or JSON)
//!     → metrics.rs (counters and histograms)
//!
//! Consumers:
//!     → stdout / log aggregation
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Request ID (tower-http) is attached to the request span
//! - Metric updates are fire-and-forget; with no recorder installed they
//!   are no-ops, so tests never need one
//! - Breaker events reach both sinks through observers

pub mod logging;
pub mod metrics;
