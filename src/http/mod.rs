//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, one route per guarded operation)
//!     → request.rs (request ID, caller identity, payload merge)
//!     → pipeline (quota → sanitize → validate → breaker → upstream)
//!     → response.rs (upstream response or JSON error, quota headers)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{MakeRequestUuid, X_REQUEST_ID, X_USER_ID, X_USER_SELLER};
pub use response::{guarded_response, ErrorBody};
pub use server::{AppState, HttpServer};
