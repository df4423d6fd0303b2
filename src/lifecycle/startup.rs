//! Startup orchestration.
//!
//! # Responsibilities
//! - Choose the quota counter store (shared when configured, else memory)
//! - Build the breaker registry with its log and metric observers
//! - Register every configured operation with the pipeline
//! - Assemble the HTTP server
//!
//! # Design Decisions
//! - Fail fast: an operation naming an unknown schema or tier is fatal
//! - An unreachable shared store is not fatal; the tracker falls back to
//!   process memory per request

use std::sync::Arc;

use thiserror::Error;

use crate::config::{GuardConfig, QuotaConfig};
use crate::http::HttpServer;
use crate::pipeline::{GuardedOperation, Pipeline, PipelineError};
use crate::quota::{QuotaTracker, RedisStore, TierPolicy};
use crate::resilience::{BreakerRegistry, LoggingObserver, MetricsObserver};
use crate::upstream::{HttpUpstream, Upstream, UpstreamError};
use crate::validation::storefront_schemas;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("pipeline setup failed: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("upstream setup failed: {0}")]
    Upstream(#[from] UpstreamError),
}

/// Quota tracker for `config`, plus the name of the counter store it uses.
pub fn build_quota(config: &QuotaConfig) -> (Arc<QuotaTracker>, &'static str) {
    let policy = TierPolicy::from(config);

    if let Some(url) = config.redis_url.as_deref() {
        match RedisStore::open(url, &config.key_prefix) {
            Ok(store) => {
                tracing::info!(prefix = %config.key_prefix, "Using redis counter store");
                return (Arc::new(QuotaTracker::with_store(policy, Arc::new(store))), "redis");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Invalid redis counter store, using process memory");
            }
        }
    }

    (Arc::new(QuotaTracker::new(policy)), "memory")
}

/// Breaker registry seeded with `config.breaker` defaults and the standard
/// observers.
pub fn build_breakers(config: &GuardConfig) -> Arc<BreakerRegistry> {
    let breakers = Arc::new(BreakerRegistry::new(config.breaker.clone()));
    breakers.subscribe(Arc::new(LoggingObserver));
    breakers.subscribe(Arc::new(MetricsObserver));
    breakers
}

pub fn build_pipeline(
    config: &GuardConfig,
    quota: Arc<QuotaTracker>,
    breakers: Arc<BreakerRegistry>,
) -> Result<Pipeline, PipelineError> {
    let mut builder = Pipeline::builder(quota, Arc::new(storefront_schemas()), breakers)
        .sanitize_markup(config.security.strip_markup);

    for op in config.effective_operations() {
        let guarded = GuardedOperation::from(&op);
        builder = match &op.breaker {
            Some(options) => builder.operation_with_breaker(guarded, options.clone()),
            None => builder.operation(guarded),
        };
    }

    builder.build()
}

/// Server forwarding to the configured HTTP upstream.
pub fn build_server(config: GuardConfig) -> Result<HttpServer, StartupError> {
    let upstream: Arc<dyn Upstream> = Arc::new(HttpUpstream::new(&config.upstream)?);
    build_server_with_upstream(config, upstream)
}

/// Server forwarding to `upstream`.
pub fn build_server_with_upstream(
    config: GuardConfig,
    upstream: Arc<dyn Upstream>,
) -> Result<HttpServer, StartupError> {
    let (quota, store) = build_quota(&config.quota);
    let breakers = build_breakers(&config);
    let pipeline = Arc::new(build_pipeline(&config, quota, breakers)?);

    tracing::info!(
        operations = pipeline.operations().len(),
        breakers = pipeline.breakers().len(),
        quota_store = store,
        "Guard pipeline ready"
    );

    Ok(HttpServer::with_store_name(config, pipeline, upstream, store))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OperationConfig;

    #[test]
    fn test_storefront_defaults_build() {
        let config = GuardConfig::default();
        let (quota, store) = build_quota(&config.quota);
        assert_eq!(store, "memory");

        let pipeline = build_pipeline(&config, quota, build_breakers(&config)).unwrap();
        assert_eq!(pipeline.operations().len(), config.effective_operations().len());
        assert_eq!(
            pipeline.breakers().names(),
            vec!["auth", "cart", "create_review", "farmers", "orders", "products", "users", "wishlist"]
        );
    }

    #[test]
    fn test_unknown_schema_is_fatal() {
        let config = GuardConfig {
            operations: vec![OperationConfig::new("ship", "POST", "/api/ship").schema("shipment")],
            ..Default::default()
        };
        let (quota, _) = build_quota(&config.quota);

        let err = build_pipeline(&config, quota, build_breakers(&config)).err();
        assert!(matches!(err, Some(PipelineError::UnknownSchema { .. })));
    }

    #[test]
    fn test_redis_url_selects_shared_store() {
        let config = QuotaConfig {
            redis_url: Some("redis://127.0.0.1:6379".to_string()),
            ..Default::default()
        };
        let (_, store) = build_quota(&config);
        assert_eq!(store, "redis");
    }
}
