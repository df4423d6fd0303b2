//! Guarded entry points, one per exposed operation.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::OperationConfig;
use crate::observability::metrics;
use crate::pipeline::outcome::{BoxError, Guarded, Outcome, UpstreamCause};
use crate::quota::{CallerIdentity, QuotaTracker};
use crate::resilience::{BreakerError, BreakerOptions, BreakerRegistry, CircuitBreaker};
use crate::validation::sanitize::strip_markup;
use crate::validation::{FieldError, Normalized, Schema, SchemaRegistry};

/// Static description of one guarded operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuardedOperation {
    pub name: String,
    pub schema: Option<String>,
    pub endpoint_tier: Option<String>,
    pub breaker: String,
}

impl GuardedOperation {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            breaker: name.clone(),
            name,
            schema: None,
            endpoint_tier: None,
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_endpoint_tier(mut self, tier: impl Into<String>) -> Self {
        self.endpoint_tier = Some(tier.into());
        self
    }

    pub fn with_breaker(mut self, breaker: impl Into<String>) -> Self {
        self.breaker = breaker.into();
        self
    }
}

impl From<&OperationConfig> for GuardedOperation {
    fn from(config: &OperationConfig) -> Self {
        Self {
            name: config.name.clone(),
            schema: config.schema.clone(),
            endpoint_tier: config.endpoint_tier.clone(),
            breaker: config.breaker_key().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("operation '{operation}' references unknown schema '{schema}'")]
    UnknownSchema { operation: String, schema: String },

    #[error("operation '{operation}' references unknown endpoint tier '{tier}'")]
    UnknownTier { operation: String, tier: String },

    #[error("operation '{0}' registered twice")]
    DuplicateOperation(String),

    #[error("no operation registered as '{0}'")]
    UnknownOperation(String),
}

struct Registered {
    operation: GuardedOperation,
    schema: Option<Arc<Schema>>,
    breaker: Arc<CircuitBreaker>,
}

/// Collects operations and checks their wiring.
pub struct PipelineBuilder {
    quota: Arc<QuotaTracker>,
    schemas: Arc<SchemaRegistry>,
    breakers: Arc<BreakerRegistry>,
    operations: Vec<(GuardedOperation, Option<BreakerOptions>)>,
    strip_markup: bool,
}

impl PipelineBuilder {
    pub fn operation(mut self, operation: GuardedOperation) -> Self {
        self.operations.push((operation, None));
        self
    }

    /// Register with breaker options used if this operation creates the breaker.
    pub fn operation_with_breaker(mut self, operation: GuardedOperation, options: BreakerOptions) -> Self {
        self.operations.push((operation, Some(options)));
        self
    }

    pub fn sanitize_markup(mut self, enabled: bool) -> Self {
        self.strip_markup = enabled;
        self
    }

    pub fn build(self) -> Result<Pipeline, PipelineError> {
        let policy = self.quota.policy();
        let mut registered = HashMap::with_capacity(self.operations.len());

        for (operation, options) in self.operations {
            if registered.contains_key(&operation.name) {
                return Err(PipelineError::DuplicateOperation(operation.name));
            }

            let schema = match &operation.schema {
                Some(name) => Some(self.schemas.require(name).map_err(|_| PipelineError::UnknownSchema {
                    operation: operation.name.clone(),
                    schema: name.clone(),
                })?),
                None => None,
            };

            if let Some(tier) = &operation.endpoint_tier {
                if !policy.has_endpoint(tier) {
                    return Err(PipelineError::UnknownTier {
                        operation: operation.name.clone(),
                        tier: tier.clone(),
                    });
                }
            }

            let breaker = self.breakers.get_or_create(&operation.breaker, options.as_ref());
            tracing::debug!(
                operation = %operation.name,
                schema = ?operation.schema,
                endpoint_tier = ?operation.endpoint_tier,
                breaker = %operation.breaker,
                "Guarded operation registered"
            );
            registered.insert(
                operation.name.clone(),
                Arc::new(Registered {
                    operation,
                    schema,
                    breaker,
                }),
            );
        }

        Ok(Pipeline {
            quota: self.quota,
            schemas: self.schemas,
            breakers: self.breakers,
            operations: registered,
            strip_markup: self.strip_markup,
        })
    }
}

/// Quota check, validation, and breaker-guarded call, composed.
pub struct Pipeline {
    quota: Arc<QuotaTracker>,
    schemas: Arc<SchemaRegistry>,
    breakers: Arc<BreakerRegistry>,
    operations: HashMap<String, Arc<Registered>>,
    strip_markup: bool,
}

impl Pipeline {
    pub fn builder(
        quota: Arc<QuotaTracker>,
        schemas: Arc<SchemaRegistry>,
        breakers: Arc<BreakerRegistry>,
    ) -> PipelineBuilder {
        PipelineBuilder {
            quota,
            schemas,
            breakers,
            operations: Vec::new(),
            strip_markup: false,
        }
    }

    pub fn quota(&self) -> &Arc<QuotaTracker> {
        &self.quota
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    pub fn schemas(&self) -> &Arc<SchemaRegistry> {
        &self.schemas
    }

    pub fn operation(&self, name: &str) -> Option<&GuardedOperation> {
        self.operations.get(name).map(|r| &r.operation)
    }

    /// Registered operations, sorted by name.
    pub fn operations(&self) -> Vec<GuardedOperation> {
        let mut operations: Vec<GuardedOperation> =
            self.operations.values().map(|r| r.operation.clone()).collect();
        operations.sort_by(|a, b| a.name.cmp(&b.name));
        operations
    }

    /// Run one request for `operation` from `identity`.
    ///
    /// `upstream` receives the normalized payload and is only invoked when the
    /// request passed quota and validation and the breaker admitted it.
    pub async fn run<F, Fut, T, E>(
        &self,
        operation: &str,
        identity: &CallerIdentity,
        raw: Value,
        upstream: F,
    ) -> Result<Guarded<T>, PipelineError>
    where
        F: FnOnce(Normalized) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        self.run_parsed(operation, identity, Ok(raw), upstream).await
    }

    /// Like [`Pipeline::run`], for payloads that may have failed to parse.
    ///
    /// A parse error still counts against the caller's quota and is reported
    /// as a validation failure once the request was admitted.
    pub async fn run_parsed<F, Fut, T, E>(
        &self,
        operation: &str,
        identity: &CallerIdentity,
        raw: Result<Value, FieldError>,
        upstream: F,
    ) -> Result<Guarded<T>, PipelineError>
    where
        F: FnOnce(Normalized) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        let registered = self
            .operations
            .get(operation)
            .ok_or_else(|| PipelineError::UnknownOperation(operation.to_string()))?;
        let op = &registered.operation;

        let admission = match self.quota.check_for(identity, op.endpoint_tier.as_deref()).await {
            Ok(admission) => admission,
            Err(limited) => {
                return Ok(Guarded {
                    outcome: Outcome::RateLimited(limited),
                    admission: None,
                })
            }
        };

        let parsed = raw.map_err(|error| {
            let schema = op.schema.clone().unwrap_or_else(|| op.name.clone());
            (schema, vec![error])
        });
        let normalized = match parsed.and_then(|raw| {
            let raw = if self.strip_markup { strip_markup(raw) } else { raw };
            self.normalize(registered, raw)
        }) {
            Ok(normalized) => normalized,
            Err((schema, errors)) => {
                metrics::record_validation_failed(&schema);
                tracing::debug!(
                    operation = %op.name,
                    schema = %schema,
                    errors = errors.len(),
                    "Payload rejected"
                );
                return Ok(Guarded {
                    outcome: Outcome::ValidationFailed { schema, errors },
                    admission: Some(admission),
                });
            }
        };

        let start = Instant::now();
        let result = registered.breaker.call(|| upstream(normalized)).await;

        let outcome = match result {
            Ok(value) => {
                metrics::record_upstream(&op.name, start);
                Outcome::Success(value)
            }
            Err(BreakerError::Open { .. }) => Outcome::CircuitOpen {
                operation: op.name.clone(),
                breaker: op.breaker.clone(),
                retry_after: registered.breaker.cooldown_remaining(),
            },
            Err(BreakerError::Timeout { after, .. }) => {
                metrics::record_upstream(&op.name, start);
                Outcome::UpstreamFailure {
                    operation: op.name.clone(),
                    cause: UpstreamCause::Timeout { after },
                }
            }
            Err(BreakerError::Upstream { source, .. }) => {
                metrics::record_upstream(&op.name, start);
                Outcome::UpstreamFailure {
                    operation: op.name.clone(),
                    cause: UpstreamCause::Failed(source.into()),
                }
            }
        };

        Ok(Guarded {
            outcome,
            admission: Some(admission),
        })
    }

    fn normalize(&self, registered: &Registered, raw: Value) -> Result<Normalized, (String, Vec<FieldError>)> {
        match &registered.schema {
            Some(schema) => schema
                .validate(&raw)
                .map_err(|invalid| (invalid.schema, invalid.errors)),
            None => match raw {
                Value::Object(map) => Ok(map),
                Value::Null => Ok(Map::new()),
                other => Err((
                    registered.operation.name.clone(),
                    vec![FieldError::new(
                        "(root)",
                        format!("Expected object, received {}", json_type(&other)),
                    )],
                )),
            },
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::{QuotaTier, TierPolicy};
    use crate::validation::storefront_schemas;
    use serde_json::json;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn pipeline() -> Pipeline {
        let policy = TierPolicy::new(
            QuotaTier::new("public", 60_000, 3),
            QuotaTier::new("authenticated", 60_000, 10),
            QuotaTier::new("seller", 60_000, 20),
        )
        .with_endpoint("orders", 60_000, 2);

        Pipeline::builder(
            Arc::new(QuotaTracker::new(policy)),
            Arc::new(storefront_schemas()),
            Arc::new(BreakerRegistry::default()),
        )
        .operation(GuardedOperation::new("create_order").with_schema("create_order"))
        .operation(GuardedOperation::new("ping"))
        .operation(
            GuardedOperation::new("limited_orders")
                .with_endpoint_tier("orders")
                .with_breaker("orders"),
        )
        .sanitize_markup(true)
        .build()
        .unwrap()
    }

    fn caller() -> CallerIdentity {
        CallerIdentity::anonymous(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)))
    }

    async fn echo(payload: Normalized) -> Result<Value, std::io::Error> {
        Ok(Value::Object(payload))
    }

    #[test]
    fn test_build_rejects_unknown_schema() {
        let result = Pipeline::builder(
            Arc::new(QuotaTracker::new(TierPolicy::default())),
            Arc::new(storefront_schemas()),
            Arc::new(BreakerRegistry::default()),
        )
        .operation(GuardedOperation::new("checkout").with_schema("checkout"))
        .build();

        assert_eq!(
            result.err(),
            Some(PipelineError::UnknownSchema {
                operation: "checkout".into(),
                schema: "checkout".into()
            })
        );
    }

    #[test]
    fn test_build_rejects_unknown_tier_and_duplicates() {
        let builder = || {
            Pipeline::builder(
                Arc::new(QuotaTracker::new(TierPolicy::default())),
                Arc::new(storefront_schemas()),
                Arc::new(BreakerRegistry::default()),
            )
        };

        let unknown_tier = builder()
            .operation(GuardedOperation::new("x").with_endpoint_tier("nope"))
            .build();
        assert!(matches!(unknown_tier, Err(PipelineError::UnknownTier { .. })));

        let duplicate = builder()
            .operation(GuardedOperation::new("x"))
            .operation(GuardedOperation::new("x"))
            .build();
        assert!(matches!(duplicate, Err(PipelineError::DuplicateOperation(_))));
    }

    #[tokio::test]
    async fn test_unknown_operation() {
        let result = pipeline().run("nope", &caller(), json!({}), echo).await;
        assert_eq!(result.err(), Some(PipelineError::UnknownOperation("nope".into())));
    }

    #[tokio::test]
    async fn test_invalid_payload_never_reaches_upstream() {
        let pipeline = pipeline();
        let calls = AtomicU32::new(0);

        let guarded = pipeline
            .run("create_order", &caller(), json!({"payment_method": "card"}), |payload| {
                calls.fetch_add(1, Ordering::SeqCst);
                echo(payload)
            })
            .await
            .unwrap();

        match guarded.outcome {
            Outcome::ValidationFailed { schema, errors } => {
                assert_eq!(schema, "create_order");
                let paths: Vec<&str> = errors.iter().map(|e| e.path.as_str()).collect();
                assert_eq!(paths, vec!["shipping_address", "items"]);
            }
            other => panic!("expected validation failure, got {}", other.kind()),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(guarded.admission.unwrap().remaining, 2);
    }

    #[tokio::test]
    async fn test_success_forwards_normalized_payload() {
        let guarded = pipeline()
            .run(
                "create_order",
                &caller(),
                json!({
                    "items": [{"product_id": "3f2504e0-4f89-41d3-9a0c-0305e82c3301", "quantity": 2}],
                    "shipping_address": "<b>123 St</b>",
                    "payment_method": "card",
                    "coupon": "ignored"
                }),
                echo,
            )
            .await
            .unwrap();

        let forwarded = guarded.outcome.success().unwrap();
        assert_eq!(forwarded["shipping_address"], "123 St");
        assert!(forwarded.get("coupon").is_none());
        assert!(forwarded.get("notes").is_none());
    }

    #[tokio::test]
    async fn test_quota_runs_before_validation() {
        let pipeline = pipeline();
        for _ in 0..3 {
            let guarded = pipeline.run("ping", &caller(), json!({}), echo).await.unwrap();
            assert!(guarded.outcome.is_success());
        }
        let guarded = pipeline.run("ping", &caller(), json!([1]), echo).await.unwrap();
        match guarded.outcome {
            Outcome::RateLimited(limited) => {
                assert_eq!(limited.tier, "public");
                assert!(limited.retry_after_ms() > 0);
            }
            other => panic!("expected rate limit, got {}", other.kind()),
        }
        assert!(guarded.admission.is_none());
    }

    #[tokio::test]
    async fn test_unparsed_payload_is_counted_then_rejected() {
        let pipeline = pipeline();
        let calls = AtomicU32::new(0);
        let unparsed = || Err(FieldError::new("(root)", "Invalid JSON: key must be a string"));

        for remaining in [1, 0] {
            let guarded = pipeline
                .run_parsed("limited_orders", &caller(), unparsed(), |payload| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    echo(payload)
                })
                .await
                .unwrap();
            match guarded.outcome {
                Outcome::ValidationFailed { schema, errors } => {
                    assert_eq!(schema, "limited_orders");
                    assert_eq!(errors[0].path, "(root)");
                }
                other => panic!("expected validation failure, got {}", other.kind()),
            }
            assert_eq!(guarded.admission.unwrap().remaining, remaining);
        }

        let guarded = pipeline
            .run_parsed("limited_orders", &caller(), unparsed(), echo)
            .await
            .unwrap();
        assert_eq!(guarded.outcome.kind(), "rate_limited");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_endpoint_tier_overrides_caller_class() {
        let pipeline = pipeline();
        for _ in 0..2 {
            let guarded = pipeline.run("limited_orders", &caller(), json!({}), echo).await.unwrap();
            assert!(guarded.outcome.is_success());
        }
        let guarded = pipeline.run("limited_orders", &caller(), json!({}), echo).await.unwrap();
        assert_eq!(guarded.outcome.kind(), "rate_limited");
    }

    #[tokio::test]
    async fn test_schemaless_operation_requires_object() {
        let guarded = pipeline().run("ping", &caller(), json!("text"), echo).await.unwrap();
        match guarded.outcome {
            Outcome::ValidationFailed { errors, .. } => {
                assert_eq!(errors[0].message, "Expected object, received string");
            }
            other => panic!("expected validation failure, got {}", other.kind()),
        }
    }

    #[tokio::test]
    async fn test_upstream_failure_and_open_circuit() {
        let pipeline = pipeline();
        let failing = |_: Normalized| async { Err::<Value, _>(std::io::Error::other("db down")) };

        let guarded = pipeline.run("ping", &caller(), json!({}), failing).await.unwrap();
        match guarded.outcome {
            Outcome::UpstreamFailure { cause, .. } => assert_eq!(cause.to_string(), "db down"),
            other => panic!("expected upstream failure, got {}", other.kind()),
        }

        let guarded = pipeline.run("ping", &caller(), json!({}), echo).await.unwrap();
        match guarded.outcome {
            Outcome::CircuitOpen {
                breaker,
                retry_after,
                ..
            } => {
                assert_eq!(breaker, "ping");
                assert!(retry_after.is_some());
            }
            other => panic!("expected open circuit, got {}", other.kind()),
        }
    }
}
