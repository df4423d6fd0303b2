//! Upstream collaborators.
//!
//! # Responsibilities
//! - Define the call contract the pipeline guards
//! - Classify upstream outcomes for breaker accounting
//!
//! # Design Decisions
//! - 5xx responses and transport errors are failures
//! - 4xx responses are the caller's problem and count as successes; they are
//!   returned to the client unchanged

pub mod http;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use thiserror::Error;

use crate::validation::Normalized;

pub use self::http::HttpUpstream;

/// One guarded call to the storefront backend.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub operation: String,
    pub method: Method,
    /// Path as requested by the client, e.g. `/api/products/42`.
    pub path: String,
    pub payload: Normalized,
    /// Client request headers. Connection-scoped ones are dropped on forward.
    pub headers: HeaderMap,
    pub request_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub body: Bytes,
    pub content_type: Option<HeaderValue>,
}

impl UpstreamResponse {
    pub fn json(status: StatusCode, value: &serde_json::Value) -> Self {
        Self {
            status,
            body: Bytes::from(value.to_string()),
            content_type: Some(HeaderValue::from_static("application/json")),
        }
    }
}

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("invalid upstream request: {0}")]
    Request(String),

    #[error("upstream transport error: {0}")]
    Transport(String),

    #[error("upstream returned {status}")]
    Status { status: StatusCode, body: Bytes },

    #[error("failed to read upstream body: {0}")]
    Body(String),
}

/// A storefront backend reachable by request/response.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn call(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError>;
}
