//! Pipeline results.

use std::fmt;
use std::time::Duration;

use crate::quota::{Admission, RateLimited};
use crate::validation::FieldError;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Why the guarded operation itself failed.
#[derive(Debug)]
pub enum UpstreamCause {
    /// Did not settle within the breaker timeout.
    Timeout { after: Duration },
    /// Settled with an error.
    Failed(BoxError),
}

impl fmt::Display for UpstreamCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamCause::Timeout { after } => write!(f, "timed out after {}ms", after.as_millis()),
            UpstreamCause::Failed(source) => write!(f, "{source}"),
        }
    }
}

/// What happened to one guarded request.
#[derive(Debug)]
pub enum Outcome<T> {
    Success(T),
    RateLimited(RateLimited),
    ValidationFailed {
        schema: String,
        errors: Vec<FieldError>,
    },
    CircuitOpen {
        operation: String,
        breaker: String,
        retry_after: Option<Duration>,
    },
    UpstreamFailure {
        operation: String,
        cause: UpstreamCause,
    },
}

impl<T> Outcome<T> {
    pub fn kind(&self) -> &'static str {
        match self {
            Outcome::Success(_) => "success",
            Outcome::RateLimited(_) => "rate_limited",
            Outcome::ValidationFailed { .. } => "validation_failed",
            Outcome::CircuitOpen { .. } => "circuit_open",
            Outcome::UpstreamFailure { .. } => "upstream_failure",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn success(self) -> Option<T> {
        match self {
            Outcome::Success(value) => Some(value),
            _ => None,
        }
    }
}

/// An outcome plus the quota admission, when the request got past the quota.
#[derive(Debug)]
pub struct Guarded<T> {
    pub outcome: Outcome<T>,
    pub admission: Option<Admission>,
}
