//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with one route per guarded operation
//! - Wire up middleware (tracing, timeout, body limit, request ID)
//! - Run each request through the guard pipeline and forward it upstream
//! - Apply quota tier policies reloaded by the config watcher
//! - Purge expired in-memory quota windows in the background
//! - Register both background tasks with the shutdown coordinator

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::{Body, Bytes},
    extract::{rejection::PathRejection, DefaultBodyLimit, Path, RawQuery, State},
    http::{HeaderMap, Method, Request, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, MethodFilter, MethodRouter},
    Json, Router,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin;
use crate::config::GuardConfig;
use crate::http::request::{merge_payload, request_id, MakeRequestUuid, X_REQUEST_ID};
use crate::http::response::{error_response, guarded_response, ErrorBody};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::pipeline::{Outcome, Pipeline};
use crate::quota::{CallerIdentity, TierPolicy};
use crate::upstream::{Upstream, UpstreamRequest};
use crate::validation::FieldError;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub upstream: Arc<dyn Upstream>,
    pub config: Arc<GuardConfig>,
    pub started_at: Instant,
    /// Counter store in use: "redis" or "memory".
    pub quota_store: &'static str,
}

/// One operation bound to its route.
struct RouteTarget {
    operation: String,
    method: Method,
}

/// HTTP server for the guard.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    /// Create a new HTTP server over a built pipeline.
    pub fn new(config: GuardConfig, pipeline: Arc<Pipeline>, upstream: Arc<dyn Upstream>) -> Self {
        Self::with_store_name(config, pipeline, upstream, "memory")
    }

    pub fn with_store_name(
        config: GuardConfig,
        pipeline: Arc<Pipeline>,
        upstream: Arc<dyn Upstream>,
        quota_store: &'static str,
    ) -> Self {
        let state = AppState {
            pipeline,
            upstream,
            config: Arc::new(config),
            started_at: Instant::now(),
            quota_store,
        };
        let router = Self::build_router(state.clone());
        Self { router, state }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(state: AppState) -> Router {
        let config = state.config.clone();

        let mut routes: HashMap<String, MethodRouter<AppState>> = HashMap::new();
        for op in config.effective_operations() {
            let method = match op.method.to_ascii_uppercase().parse::<Method>() {
                Ok(method) => method,
                Err(_) => {
                    tracing::warn!(operation = %op.name, method = %op.method, "Skipping operation with invalid method");
                    continue;
                }
            };
            let filter = match MethodFilter::try_from(method.clone()) {
                Ok(filter) => filter,
                Err(_) => {
                    tracing::warn!(operation = %op.name, method = %method, "Skipping operation with unroutable method");
                    continue;
                }
            };

            let target = Arc::new(RouteTarget {
                operation: op.name.clone(),
                method,
            });
            let handler = move |State(state): State<AppState>,
                                identity: CallerIdentity,
                                params: Result<Path<HashMap<String, String>>, PathRejection>,
                                RawQuery(query): RawQuery,
                                headers: HeaderMap,
                                uri: Uri,
                                body: Bytes| {
                let target = target.clone();
                async move {
                    let params = params.map(|Path(p)| p).unwrap_or_default();
                    guarded_handler(state, target, identity, params, query, headers, uri, body).await
                }
            };

            tracing::debug!(operation = %op.name, method = %op.method, path = %op.path, "Route registered");
            let existing = routes.remove(&op.path).unwrap_or_else(MethodRouter::new);
            routes.insert(op.path.clone(), existing.on(filter, handler));
        }

        let mut router = Router::new().route("/health", get(health_handler));
        for (path, method_router) in routes {
            router = router.route(&path, method_router);
        }

        let mut app = router.fallback(not_found).with_state(state.clone());
        if config.admin.enabled {
            app = app.merge(admin::setup_admin_router(state));
        }

        app.layer(DefaultBodyLimit::max(config.security.max_body_size))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                let request_id = request
                    .headers()
                    .get(X_REQUEST_ID)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("unknown");
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            }))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// The fully layered router, for serving or driving in-process.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &GuardConfig {
        &self.state.config
    }

    /// Run the server, accepting connections on the given listener.
    ///
    /// Applies tier policies from `policy_updates` until `shutdown` fires, then
    /// drains connections and hands teardown to [`Shutdown::finish`].
    pub async fn run(
        self,
        listener: TcpListener,
        mut policy_updates: mpsc::UnboundedReceiver<TierPolicy>,
        shutdown: Shutdown,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            operations = self.state.pipeline.operations().len(),
            "HTTP server starting"
        );

        let quota = self.state.pipeline.quota().clone();
        let mut stop = shutdown.subscribe();
        shutdown.track(
            "tier-reload",
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        update = policy_updates.recv() => match update {
                            Some(policy) => quota.set_policy(policy),
                            None => break,
                        },
                        _ = stop.recv() => break,
                    }
                }
            }),
        );

        let sweep_secs = self.state.config.quota.sweep_interval_secs;
        if sweep_secs > 0 {
            let store = self.state.pipeline.quota().local_store();
            shutdown.track(
                "quota-sweep",
                tokio::spawn(store.sweep(Duration::from_secs(sweep_secs), shutdown.subscribe())),
            );
        }

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let mut signal = shutdown.subscribe();
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = signal.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await;

        shutdown.finish(self.state.pipeline.breakers()).await;
        tracing::info!("HTTP server stopped");
        served
    }
}

/// Run one request through the pipeline and forward it upstream.
#[allow(clippy::too_many_arguments)]
async fn guarded_handler(
    state: AppState,
    target: Arc<RouteTarget>,
    identity: CallerIdentity,
    params: HashMap<String, String>,
    query: Option<String>,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> Response {
    let request_id = request_id(&headers);
    let operation = target.operation.as_str();

    tracing::debug!(
        request_id = request_id.as_deref().unwrap_or("unknown"),
        operation = %operation,
        client = %identity,
        "Guarding request"
    );

    // Parse failures still go through the pipeline so they are counted.
    let raw = merge_payload(query.as_deref(), &params, &body)
        .map_err(|e| FieldError::new("(root)", e.to_string()));

    let upstream = state.upstream.clone();
    let forward = UpstreamRequest {
        operation: operation.to_string(),
        method: target.method.clone(),
        path: uri.path().to_string(),
        payload: Default::default(),
        headers,
        request_id: request_id.clone(),
    };
    let result = state
        .pipeline
        .run_parsed(operation, &identity, raw, move |payload| async move {
            upstream.call(UpstreamRequest { payload, ..forward }).await
        })
        .await;

    match result {
        Ok(guarded) => {
            let kind = guarded.outcome.kind();
            match &guarded.outcome {
                Outcome::Success(_) => {}
                Outcome::UpstreamFailure { cause, .. } => tracing::error!(
                    request_id = request_id.as_deref().unwrap_or("unknown"),
                    operation = %operation,
                    cause = %cause,
                    "Upstream call failed"
                ),
                _ => tracing::info!(
                    request_id = request_id.as_deref().unwrap_or("unknown"),
                    operation = %operation,
                    outcome = kind,
                    "Request refused"
                ),
            }
            let response = guarded_response(guarded);
            metrics::record_request(operation, kind, response.status().as_u16());
            response
        }
        Err(e) => {
            tracing::error!(operation = %operation, error = %e, "Pipeline misconfigured");
            metrics::record_request(operation, "internal_error", 500);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody::new("INTERNAL_ERROR", "Internal server error"),
            )
        }
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, ErrorBody::new("NOT_FOUND", "Route not found"))
}
