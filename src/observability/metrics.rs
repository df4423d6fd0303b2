//! Metrics collection and exposition.
//!
//! # Metrics
//! - `guard_requests_total` (counter): requests by operation, outcome, status
//! - `guard_rate_limited_total` (counter): rejections by tier
//! - `guard_validation_failed_total` (counter): rejections by schema
//! - `guard_breaker_events_total` (counter): breaker transitions by breaker, event
//! - `guard_store_fallback_total` (counter): shared counter store errors
//! - `guard_upstream_duration_seconds` (histogram): upstream latency by operation

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => {
            describe();
            tracing::info!(address = %addr, "Prometheus metrics exporter started");
        }
        Err(e) => {
            tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter");
        }
    }
}

fn describe() {
    describe_counter!("guard_requests_total", "Guarded requests by operation and outcome");
    describe_counter!("guard_rate_limited_total", "Requests rejected by quota");
    describe_counter!("guard_validation_failed_total", "Requests rejected by schema validation");
    describe_counter!("guard_breaker_events_total", "Circuit breaker state transitions");
    describe_counter!("guard_store_fallback_total", "Counter store errors answered from memory");
    describe_histogram!("guard_upstream_duration_seconds", "Upstream call latency");
}

pub fn record_request(operation: &str, outcome: &'static str, status: u16) {
    counter!(
        "guard_requests_total",
        "operation" => operation.to_string(),
        "outcome" => outcome,
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_rate_limited(tier: &str) {
    counter!("guard_rate_limited_total", "tier" => tier.to_string()).increment(1);
}

pub fn record_validation_failed(schema: &str) {
    counter!("guard_validation_failed_total", "schema" => schema.to_string()).increment(1);
}

pub fn record_breaker_event(breaker: &str, event: &'static str) {
    counter!(
        "guard_breaker_events_total",
        "breaker" => breaker.to_string(),
        "event" => event
    )
    .increment(1);
}

pub fn record_store_fallback(store: &'static str) {
    counter!("guard_store_fallback_total", "store" => store).increment(1);
}

pub fn record_upstream(operation: &str, start: Instant) {
    histogram!(
        "guard_upstream_duration_seconds",
        "operation" => operation.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}
