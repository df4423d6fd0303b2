use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::http::response::{error_response, ErrorBody};
use crate::http::server::AppState;
use crate::quota::TierPolicy;
use crate::resilience::BreakerStats;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub operations: usize,
    pub breakers: usize,
    pub open_breakers: Vec<String>,
    pub quota_store: &'static str,
}

#[derive(Serialize)]
pub struct QuotaSummary {
    pub store: &'static str,
    pub local_windows: usize,
    pub policy: TierPolicy,
}

#[derive(Serialize)]
pub struct ResetSummary {
    pub reset: usize,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let breakers = state.pipeline.breakers();
    let stats = breakers.all_stats();
    let open_breakers = stats
        .iter()
        .filter(|s| !s.is_closed)
        .map(|s| s.name.clone())
        .collect::<Vec<_>>();
    let status = if open_breakers.is_empty() {
        "operational"
    } else {
        "degraded"
    };

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status,
        uptime_secs: state.started_at.elapsed().as_secs(),
        operations: state.pipeline.operations().len(),
        breakers: stats.len(),
        open_breakers,
        quota_store: state.quota_store,
    })
}

pub async fn get_breakers(State(state): State<AppState>) -> Json<Vec<BreakerStats>> {
    Json(state.pipeline.breakers().all_stats())
}

pub async fn get_breaker(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.pipeline.breakers().stats(&name) {
        Some(stats) => Json(stats).into_response(),
        None => breaker_not_found(&name),
    }
}

pub async fn reset_breaker(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let breakers = state.pipeline.breakers();
    if !breakers.reset(&name) {
        return breaker_not_found(&name);
    }
    tracing::info!(breaker = %name, "Circuit breaker reset by operator");
    match breakers.stats(&name) {
        Some(stats) => Json(stats).into_response(),
        None => breaker_not_found(&name),
    }
}

pub async fn reset_all_breakers(State(state): State<AppState>) -> Json<ResetSummary> {
    let breakers = state.pipeline.breakers();
    breakers.reset_all();
    tracing::info!(count = breakers.len(), "All circuit breakers reset by operator");
    Json(ResetSummary {
        reset: breakers.len(),
    })
}

pub async fn get_quota(State(state): State<AppState>) -> Json<QuotaSummary> {
    let quota = state.pipeline.quota();
    Json(QuotaSummary {
        store: state.quota_store,
        local_windows: quota.local_store().len(),
        policy: quota.policy().as_ref().clone(),
    })
}

fn breaker_not_found(name: &str) -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        ErrorBody::new("BREAKER_NOT_FOUND", format!("No circuit breaker named '{name}'")),
    )
}
