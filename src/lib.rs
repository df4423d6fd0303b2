//! FarmFresh guard.
//!
//! Protects the FarmFresh storefront API with three composable guards:
//! tiered request quotas, declarative payload validation, and named
//! circuit breakers around upstream calls.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!         │
//!         ▼
//!     ┌─────────┐   ┌────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────┐
//!     │  http   │──▶│ quota  │──▶│  validation  │──▶│  resilience  │──▶│ upstream │──▶ Storefront
//!     │ server  │   │ tiers  │   │ sanitize +   │   │   breaker    │   │  client  │
//!     └─────────┘   └────────┘   │   schema     │   └──────────────┘   └──────────┘
//!         ▲                      └──────────────┘
//!         │          pipeline: one Outcome per request
//!     Client Response (upstream body, or 429 / 400 / 503 JSON error)
//!
//!     Cross-cutting: config (+ hot reload), observability, lifecycle, admin
//! ```

// Core subsystems
pub mod config;
pub mod http;
pub mod pipeline;
pub mod upstream;

// Guards
pub mod quota;
pub mod resilience;
pub mod validation;

// Cross-cutting concerns
pub mod admin;
pub mod lifecycle;
pub mod observability;

pub use config::GuardConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use pipeline::{Guarded, Outcome, Pipeline};
