//! Request pipeline.
//!
//! # Data Flow
//! ```text
//! (operation, caller identity, raw payload)
//!     → quota tracker (tier by endpoint / caller class)   → RateLimited
//!     → markup stripping (optional)
//!     → schema validation                                 → ValidationFailed
//!     → circuit breaker for the operation                 → CircuitOpen
//!     → upstream call                                     → UpstreamFailure
//!     → Success(value)
//! ```
//!
//! # Design Decisions
//! - The pipeline owns no state beyond wiring; quota counters and breakers
//!   live in their registries
//! - Every rejection is a typed outcome; only wiring mistakes (unknown schema
//!   or tier names) are errors, and they surface at build time

pub mod guard;
pub mod outcome;

pub use guard::{GuardedOperation, Pipeline, PipelineBuilder, PipelineError};
pub use outcome::{BoxError, Guarded, Outcome, UpstreamCause};
