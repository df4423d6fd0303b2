//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the guard.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::resilience::BreakerOptions;

const FIFTEEN_MINUTES_MS: u64 = 15 * 60 * 1000;
const ONE_MINUTE_MS: u64 = 60 * 1000;

/// Root configuration for the guard.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Storefront backend the guarded operations forward to.
    pub upstream: UpstreamConfig,

    /// Tiered quota settings.
    pub quota: QuotaConfig,

    /// Default breaker options for operations without their own.
    pub breaker: BreakerOptions,

    /// Guarded operations exposed by the gateway.
    pub operations: Vec<OperationConfig>,

    pub security: SecurityConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Whole-request timeout in seconds, enforced by the HTTP layer.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Upstream storefront backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL, e.g. "http://127.0.0.1:5000".
    pub base_url: String,

    /// Largest upstream response body accepted, in bytes.
    pub max_body_bytes: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".to_string(),
            max_body_bytes: 4 * 1024 * 1024,
        }
    }
}

/// One quota tier.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TierConfig {
    pub window_ms: u64,
    pub max: u64,
}

impl TierConfig {
    pub fn new(window_ms: u64, max: u64) -> Self {
        Self { window_ms, max }
    }
}

/// Quota configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Shared counter store. Counters stay in process memory when unset.
    pub redis_url: Option<String>,

    /// Key prefix inside the shared store.
    pub key_prefix: String,

    /// How often expired in-memory windows are purged. 0 disables the sweep.
    pub sweep_interval_secs: u64,

    /// Key callers on `x-user-id`/`x-user-seller`. Only enable behind an auth
    /// proxy that strips these headers from client traffic.
    pub trust_identity_headers: bool,

    pub public: TierConfig,
    pub authenticated: TierConfig,
    pub seller: TierConfig,

    /// Named per-endpoint overrides.
    pub endpoints: BTreeMap<String, TierConfig>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        let endpoints = [
            ("products", TierConfig::new(FIFTEEN_MINUTES_MS, 200)),
            ("orders", TierConfig::new(FIFTEEN_MINUTES_MS, 150)),
            ("login", TierConfig::new(ONE_MINUTE_MS, 20)),
            ("register", TierConfig::new(ONE_MINUTE_MS, 5)),
            ("forgot_password", TierConfig::new(ONE_MINUTE_MS, 3)),
        ]
        .into_iter()
        .map(|(name, tier)| (name.to_string(), tier))
        .collect();

        Self {
            redis_url: None,
            key_prefix: crate::quota::redis_store::DEFAULT_PREFIX.to_string(),
            sweep_interval_secs: 60,
            trust_identity_headers: false,
            public: TierConfig::new(FIFTEEN_MINUTES_MS, 100),
            authenticated: TierConfig::new(FIFTEEN_MINUTES_MS, 300),
            seller: TierConfig::new(FIFTEEN_MINUTES_MS, 500),
            endpoints,
        }
    }
}

/// A guarded operation and the route that exposes it.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct OperationConfig {
    /// Unique operation name, used in logs and metrics.
    pub name: String,

    /// HTTP method (GET, POST, PUT, PATCH, DELETE).
    #[serde(default = "default_method")]
    pub method: String,

    /// Route path, with `{param}` segments.
    pub path: String,

    /// Schema the merged payload must satisfy. None skips validation.
    #[serde(default)]
    pub schema: Option<String>,

    /// Endpoint quota tier overriding the caller-class tier.
    #[serde(default)]
    pub endpoint_tier: Option<String>,

    /// Breaker to run under. Defaults to the operation name.
    #[serde(default)]
    pub breaker_name: Option<String>,

    /// Options for the breaker when this operation registers it first.
    #[serde(default)]
    pub breaker: Option<BreakerOptions>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl OperationConfig {
    pub fn new(name: &str, method: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            method: method.to_string(),
            path: path.to_string(),
            schema: None,
            endpoint_tier: None,
            breaker_name: None,
            breaker: None,
        }
    }

    pub fn schema(mut self, schema: &str) -> Self {
        self.schema = Some(schema.to_string());
        self
    }

    pub fn endpoint_tier(mut self, tier: &str) -> Self {
        self.endpoint_tier = Some(tier.to_string());
        self
    }

    pub fn breaker_name(mut self, breaker: &str) -> Self {
        self.breaker_name = Some(breaker.to_string());
        self
    }

    /// Name of the breaker guarding this operation.
    pub fn breaker_key(&self) -> &str {
        self.breaker_name.as_deref().unwrap_or(&self.name)
    }
}

/// The storefront routes guarded out of the box.
pub fn storefront_operations() -> Vec<OperationConfig> {
    vec![
        OperationConfig::new("list_products", "GET", "/api/products")
            .schema("pagination")
            .endpoint_tier("products")
            .breaker_name("products"),
        OperationConfig::new("create_product", "POST", "/api/products")
            .schema("create_product")
            .endpoint_tier("products")
            .breaker_name("products"),
        OperationConfig::new("get_product", "GET", "/api/products/{id}")
            .endpoint_tier("products")
            .breaker_name("products"),
        OperationConfig::new("create_order", "POST", "/api/orders")
            .schema("create_order")
            .endpoint_tier("orders")
            .breaker_name("orders"),
        OperationConfig::new("list_orders", "GET", "/api/orders")
            .schema("pagination")
            .endpoint_tier("orders")
            .breaker_name("orders"),
        OperationConfig::new("create_review", "POST", "/api/reviews").schema("create_review"),
        OperationConfig::new("register_user", "POST", "/api/auth/register")
            .schema("register_user")
            .endpoint_tier("register")
            .breaker_name("auth"),
        OperationConfig::new("login", "POST", "/api/auth/login")
            .endpoint_tier("login")
            .breaker_name("auth"),
        OperationConfig::new("forgot_password", "POST", "/api/auth/forgot-password")
            .endpoint_tier("forgot_password")
            .breaker_name("auth"),
        OperationConfig::new("add_cart_item", "POST", "/api/cart")
            .schema("cart_item")
            .breaker_name("cart"),
        OperationConfig::new("add_wishlist_item", "POST", "/api/wishlist")
            .schema("wishlist_item")
            .breaker_name("wishlist"),
        OperationConfig::new("update_notification_settings", "PUT", "/api/users/notifications")
            .schema("notification_settings")
            .breaker_name("users"),
        OperationConfig::new("add_address", "POST", "/api/users/addresses")
            .schema("address")
            .breaker_name("users"),
        OperationConfig::new("create_farmer_profile", "POST", "/api/farmers")
            .schema("farmer_profile")
            .breaker_name("farmers"),
    ]
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Strip HTML tags from string fields before validation.
    pub strip_markup: bool,

    /// Maximum request body size in bytes.
    pub max_body_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            strip_markup: true,
            max_body_size: 1024 * 1024, // 1MB
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_format: LogFormat,

    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    pub log_filter: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Pretty,
            log_filter: crate::observability::logging::DEFAULT_FILTER.to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Mount the admin API under `/admin`.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}

impl GuardConfig {
    /// Operations from the file, or the storefront defaults when none are listed.
    pub fn effective_operations(&self) -> Vec<OperationConfig> {
        if self.operations.is_empty() {
            storefront_operations()
        } else {
            self.operations.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config: GuardConfig = toml::from_str(
            r#"
            [listener]
            bind_address = "127.0.0.1:9000"

            [quota.public]
            window_ms = 60000
            max = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.bind_address, "127.0.0.1:9000");
        assert_eq!(config.quota.public, TierConfig::new(60_000, 10));
        assert_eq!(config.quota.seller.max, 500);
        assert_eq!(config.breaker.reset_timeout_ms, 30_000);
        assert_eq!(config.effective_operations().len(), storefront_operations().len());
    }

    #[test]
    fn test_operations_from_toml() {
        let config: GuardConfig = toml::from_str(
            r#"
            [[operations]]
            name = "create_order"
            method = "POST"
            path = "/api/orders"
            schema = "create_order"

            [operations.breaker]
            timeout_ms = 500
            "#,
        )
        .unwrap();

        let ops = config.effective_operations();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].breaker_key(), "create_order");
        let breaker = ops[0].breaker.as_ref().unwrap();
        assert_eq!(breaker.timeout_ms, 500);
        assert_eq!(breaker.error_threshold_percentage, 50.0);
    }

    #[test]
    fn test_log_format_names() {
        let config: ObservabilityConfig = toml::from_str(r#"log_format = "json""#).unwrap();
        assert_eq!(config.log_format, LogFormat::Json);
    }
}
