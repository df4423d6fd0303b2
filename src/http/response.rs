//! Response construction.
//!
//! Maps a guarded outcome onto the wire: the upstream response on success,
//! otherwise a JSON error body with a stable `code`.

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::pipeline::{Guarded, Outcome, UpstreamCause};
use crate::quota::Admission;
use crate::upstream::UpstreamResponse;
use crate::validation::FieldError;

pub const RATELIMIT_LIMIT: &str = "ratelimit-limit";
pub const RATELIMIT_REMAINING: &str = "ratelimit-remaining";
pub const RATELIMIT_RESET: &str = "ratelimit-reset";

/// JSON body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub status: &'static str,
    pub message: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl ErrorBody {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: "error",
            message: message.into(),
            code,
            errors: None,
            retry_after_ms: None,
        }
    }
}

pub fn error_response(status: StatusCode, body: ErrorBody) -> Response {
    (status, Json(body)).into_response()
}

/// Render a guarded upstream call.
pub fn guarded_response(guarded: Guarded<UpstreamResponse>) -> Response {
    let Guarded { outcome, admission } = guarded;

    let mut response = match outcome {
        Outcome::Success(upstream) => upstream_response(upstream),
        Outcome::RateLimited(limited) => {
            let mut body = ErrorBody::new("RATE_LIMITED", "Too many requests, please try again later.");
            body.retry_after_ms = Some(limited.retry_after_ms());
            let mut response = error_response(StatusCode::TOO_MANY_REQUESTS, body);

            let headers = response.headers_mut();
            let secs = limited.retry_after_secs();
            headers.insert(header::RETRY_AFTER, HeaderValue::from(secs));
            headers.insert(RATELIMIT_LIMIT, HeaderValue::from(limited.limit));
            headers.insert(RATELIMIT_REMAINING, HeaderValue::from(0u64));
            headers.insert(RATELIMIT_RESET, HeaderValue::from(secs));
            response
        }
        Outcome::ValidationFailed { errors, .. } => {
            let mut body = ErrorBody::new("VALIDATION_ERROR", "Validation failed");
            body.errors = Some(errors);
            error_response(StatusCode::BAD_REQUEST, body)
        }
        Outcome::CircuitOpen { retry_after, .. } => {
            let mut body = ErrorBody::new(
                "CIRCUIT_OPEN",
                "Service temporarily unavailable, please try again later.",
            );
            body.retry_after_ms = retry_after.map(|d| d.as_millis() as u64);
            let mut response = error_response(StatusCode::SERVICE_UNAVAILABLE, body);
            if let Some(after) = retry_after {
                let secs = (after.as_millis() as u64).div_ceil(1000).max(1);
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(secs));
            }
            response
        }
        Outcome::UpstreamFailure { cause, .. } => {
            let code = match cause {
                UpstreamCause::Timeout { .. } => "UPSTREAM_TIMEOUT",
                UpstreamCause::Failed(_) => "UPSTREAM_FAILURE",
            };
            error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorBody::new(code, format!("Upstream request failed: {cause}")),
            )
        }
    };

    if let Some(admission) = admission {
        insert_quota_headers(response.headers_mut(), &admission);
    }
    response
}

fn upstream_response(upstream: UpstreamResponse) -> Response {
    let mut response = Response::new(Body::from(upstream.body));
    *response.status_mut() = upstream.status;
    if let Some(content_type) = upstream.content_type {
        response.headers_mut().insert(header::CONTENT_TYPE, content_type);
    }
    response
}

fn insert_quota_headers(headers: &mut HeaderMap, admission: &Admission) {
    let reset_secs = (admission.reset_after.as_millis() as u64).div_ceil(1000);
    headers.insert(RATELIMIT_LIMIT, HeaderValue::from(admission.limit));
    headers.insert(RATELIMIT_REMAINING, HeaderValue::from(admission.remaining));
    headers.insert(RATELIMIT_RESET, HeaderValue::from(reset_secs));
}
