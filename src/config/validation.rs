//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (operations reference existing endpoint tiers)
//! - Validate value ranges (windows > 0, thresholds within 0-100)
//! - Detect duplicate operation names
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is a pure function: GuardConfig → Result<(), Vec<ValidationError>>
//! - Schema names are checked when the pipeline is built, against the registry

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::{GuardConfig, TierConfig};
use crate::resilience::BreakerOptions;

const METHODS: &[&str] = &["GET", "HEAD", "POST", "PUT", "PATCH", "DELETE"];

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }

    match Url::parse(&config.upstream.base_url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        Ok(url) => errors.push(ValidationError::new(
            "upstream.base_url",
            format!("unsupported scheme '{}'", url.scheme()),
        )),
        Err(e) => errors.push(ValidationError::new("upstream.base_url", e.to_string())),
    }

    if let Some(redis_url) = &config.quota.redis_url {
        if Url::parse(redis_url).is_err() {
            errors.push(ValidationError::new("quota.redis_url", "not a valid URL"));
        }
    }

    check_tier("quota.public", &config.quota.public, &mut errors);
    check_tier("quota.authenticated", &config.quota.authenticated, &mut errors);
    check_tier("quota.seller", &config.quota.seller, &mut errors);
    for (name, tier) in &config.quota.endpoints {
        check_tier(&format!("quota.endpoints.{name}"), tier, &mut errors);
    }

    check_breaker("breaker", &config.breaker, &mut errors);

    let mut seen = HashSet::new();
    for (i, op) in config.operations.iter().enumerate() {
        let field = format!("operations[{i}]");
        if op.name.is_empty() {
            errors.push(ValidationError::new(format!("{field}.name"), "must not be empty"));
        } else if !seen.insert(op.name.as_str()) {
            errors.push(ValidationError::new(
                format!("{field}.name"),
                format!("duplicate operation '{}'", op.name),
            ));
        }
        if !METHODS.contains(&op.method.to_ascii_uppercase().as_str()) {
            errors.push(ValidationError::new(
                format!("{field}.method"),
                format!("unsupported method '{}'", op.method),
            ));
        }
        if !op.path.starts_with('/') {
            errors.push(ValidationError::new(format!("{field}.path"), "must start with '/'"));
        } else if op.path.starts_with("/admin") {
            errors.push(ValidationError::new(format!("{field}.path"), "'/admin' is reserved"));
        }
        if let Some(tier) = &op.endpoint_tier {
            if !config.quota.endpoints.contains_key(tier) {
                errors.push(ValidationError::new(
                    format!("{field}.endpoint_tier"),
                    format!("no endpoint tier named '{tier}'"),
                ));
            }
        }
        if let Some(breaker) = &op.breaker {
            check_breaker(&format!("{field}.breaker"), breaker, &mut errors);
        }
    }

    if config.security.max_body_size == 0 {
        errors.push(ValidationError::new("security.max_body_size", "must be greater than 0"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "not a socket address",
        ));
    }

    if config.admin.enabled && config.admin.api_key.trim().is_empty() {
        errors.push(ValidationError::new("admin.api_key", "required when admin is enabled"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_tier(field: &str, tier: &TierConfig, errors: &mut Vec<ValidationError>) {
    if tier.window_ms == 0 {
        errors.push(ValidationError::new(format!("{field}.window_ms"), "must be greater than 0"));
    }
    if tier.max == 0 {
        errors.push(ValidationError::new(format!("{field}.max"), "must be greater than 0"));
    }
}

fn check_breaker(field: &str, options: &BreakerOptions, errors: &mut Vec<ValidationError>) {
    if !(0.0..=100.0).contains(&options.error_threshold_percentage) {
        errors.push(ValidationError::new(
            format!("{field}.error_threshold_percentage"),
            "must be between 0 and 100",
        ));
    }
    if options.rolling_window_ms == 0 {
        errors.push(ValidationError::new(
            format!("{field}.rolling_window_ms"),
            "must be greater than 0",
        ));
    }
    if options.rolling_buckets == 0 {
        errors.push(ValidationError::new(
            format!("{field}.rolling_buckets"),
            "must be greater than 0",
        ));
    }
}
