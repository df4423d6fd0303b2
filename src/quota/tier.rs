//! Quota tiers and tier selection.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use crate::config::{QuotaConfig, TierConfig};
use crate::quota::identity::{CallerClass, CallerIdentity};

const FIFTEEN_MINUTES_MS: u64 = 15 * 60 * 1000;
const ONE_MINUTE_MS: u64 = 60 * 1000;

/// A named request ceiling over a window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaTier {
    pub name: String,
    pub window_ms: u64,
    pub max: u64,
}

impl QuotaTier {
    pub fn new(name: impl Into<String>, window_ms: u64, max: u64) -> Self {
        Self {
            name: name.into(),
            window_ms,
            max,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// The full set of tiers in effect.
///
/// Selection precedence: endpoint override > seller > authenticated > public.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierPolicy {
    pub public: QuotaTier,
    pub authenticated: QuotaTier,
    pub seller: QuotaTier,
    pub endpoints: BTreeMap<String, QuotaTier>,
}

impl TierPolicy {
    /// Policy with only caller-class tiers.
    pub fn new(public: QuotaTier, authenticated: QuotaTier, seller: QuotaTier) -> Self {
        Self {
            public,
            authenticated,
            seller,
            endpoints: BTreeMap::new(),
        }
    }

    /// Add a per-endpoint override.
    pub fn with_endpoint(mut self, name: impl Into<String>, window_ms: u64, max: u64) -> Self {
        let name = name.into();
        self.endpoints
            .insert(name.clone(), QuotaTier::new(name, window_ms, max));
        self
    }

    /// Pick the tier for a caller. Unknown endpoint names fall through to the
    /// caller-class tier.
    pub fn select(&self, identity: &CallerIdentity, endpoint: Option<&str>) -> &QuotaTier {
        if let Some(tier) = endpoint.and_then(|name| self.endpoints.get(name)) {
            return tier;
        }
        match identity.class() {
            CallerClass::Seller => &self.seller,
            CallerClass::Authenticated => &self.authenticated,
            CallerClass::Public => &self.public,
        }
    }

    pub fn has_endpoint(&self, name: &str) -> bool {
        self.endpoints.contains_key(name)
    }
}

impl Default for TierPolicy {
    fn default() -> Self {
        TierPolicy::new(
            QuotaTier::new("public", FIFTEEN_MINUTES_MS, 100),
            QuotaTier::new("authenticated", FIFTEEN_MINUTES_MS, 300),
            QuotaTier::new("seller", FIFTEEN_MINUTES_MS, 500),
        )
        .with_endpoint("products", FIFTEEN_MINUTES_MS, 200)
        .with_endpoint("orders", FIFTEEN_MINUTES_MS, 150)
        .with_endpoint("login", ONE_MINUTE_MS, 20)
        .with_endpoint("register", ONE_MINUTE_MS, 5)
        .with_endpoint("forgot_password", ONE_MINUTE_MS, 3)
    }
}

fn tier_from(name: &str, config: &TierConfig) -> QuotaTier {
    QuotaTier::new(name, config.window_ms, config.max)
}

impl From<&QuotaConfig> for TierPolicy {
    fn from(config: &QuotaConfig) -> Self {
        let mut policy = TierPolicy::new(
            tier_from("public", &config.public),
            tier_from("authenticated", &config.authenticated),
            tier_from("seller", &config.seller),
        );
        for (name, tier) in &config.endpoints {
            policy.endpoints.insert(name.clone(), tier_from(name, tier));
        }
        policy
    }
}
