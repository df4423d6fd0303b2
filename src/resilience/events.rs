//! Breaker state-change notifications.

use std::fmt;

use serde::Serialize;

use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerEventKind {
    Opened,
    HalfOpened,
    Closed,
    FallbackInvoked,
}

impl BreakerEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerEventKind::Opened => "opened",
            BreakerEventKind::HalfOpened => "half-opened",
            BreakerEventKind::Closed => "closed",
            BreakerEventKind::FallbackInvoked => "fallback-invoked",
        }
    }
}

impl fmt::Display for BreakerEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerEvent {
    pub breaker: String,
    pub kind: BreakerEventKind,
}

/// Receives breaker events. Implementations must not block.
pub trait BreakerObserver: Send + Sync {
    fn on_event(&self, event: &BreakerEvent);
}

/// Writes every event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl BreakerObserver for LoggingObserver {
    fn on_event(&self, event: &BreakerEvent) {
        match event.kind {
            BreakerEventKind::Opened => {
                tracing::warn!(breaker = %event.breaker, "Circuit breaker opened");
            }
            BreakerEventKind::HalfOpened => {
                tracing::info!(breaker = %event.breaker, "Circuit breaker half-open, allowing trial call");
            }
            BreakerEventKind::Closed => {
                tracing::info!(breaker = %event.breaker, "Circuit breaker closed");
            }
            BreakerEventKind::FallbackInvoked => {
                tracing::warn!(breaker = %event.breaker, "Circuit breaker fallback invoked");
            }
        }
    }
}

/// Counts events as `guard_breaker_events_total{breaker, event}`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsObserver;

impl BreakerObserver for MetricsObserver {
    fn on_event(&self, event: &BreakerEvent) {
        metrics::record_breaker_event(&event.breaker, event.kind.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        assert_eq!(BreakerEventKind::HalfOpened.to_string(), "half-opened");
        assert_eq!(
            serde_json::to_value(BreakerEventKind::FallbackInvoked).unwrap(),
            serde_json::json!("fallback-invoked")
        );
    }
}
