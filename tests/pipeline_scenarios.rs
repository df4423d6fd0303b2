//! Guard pipeline scenarios on a paused clock.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use farmfresh_guard::pipeline::{GuardedOperation, Outcome, Pipeline};
use farmfresh_guard::quota::{CallerIdentity, QuotaTracker, TierPolicy};
use farmfresh_guard::resilience::{BreakerOptions, BreakerRegistry, BreakerState};
use farmfresh_guard::validation::{storefront_schemas, Normalized};
use serde_json::json;

fn pipeline(operations: Vec<(GuardedOperation, Option<BreakerOptions>)>) -> Pipeline {
    let mut builder = Pipeline::builder(
        Arc::new(QuotaTracker::new(TierPolicy::default())),
        Arc::new(storefront_schemas()),
        Arc::new(BreakerRegistry::default()),
    )
    .sanitize_markup(true);
    for (operation, options) in operations {
        builder = match options {
            Some(options) => builder.operation_with_breaker(operation, options),
            None => builder.operation(operation),
        };
    }
    builder.build().unwrap()
}

fn client(ip: &str) -> CallerIdentity {
    CallerIdentity::anonymous(ip.parse::<IpAddr>().unwrap())
}

async fn ok(_: Normalized) -> Result<(), std::io::Error> {
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_public_tier_allows_one_hundred_then_limits() {
    let pipeline = pipeline(vec![(GuardedOperation::new("browse"), None)]);
    let caller = client("1.2.3.4");

    for i in 0..100u64 {
        let guarded = pipeline.run("browse", &caller, json!({}), ok).await.unwrap();
        assert!(guarded.outcome.is_success(), "request {} should pass", i + 1);
        assert_eq!(guarded.admission.unwrap().remaining, 99 - i);
    }

    let guarded = pipeline.run("browse", &caller, json!({}), ok).await.unwrap();
    match guarded.outcome {
        Outcome::RateLimited(limited) => {
            assert_eq!(limited.tier, "public");
            assert_eq!(limited.limit, 100);
            assert!(limited.retry_after <= Duration::from_secs(15 * 60));
        }
        other => panic!("expected rate limit, got {}", other.kind()),
    }

    // Other callers are counted separately.
    let other = pipeline.run("browse", &client("5.6.7.8"), json!({}), ok).await.unwrap();
    assert!(other.outcome.is_success());
}

#[tokio::test(start_paused = true)]
async fn test_quota_window_expires() {
    let pipeline = pipeline(vec![(
        GuardedOperation::new("login").with_endpoint_tier("login"),
        None,
    )]);
    let caller = client("1.2.3.4");

    for _ in 0..20 {
        assert!(pipeline.run("login", &caller, json!({}), ok).await.unwrap().outcome.is_success());
    }
    let limited = pipeline.run("login", &caller, json!({}), ok).await.unwrap();
    assert_eq!(limited.outcome.kind(), "rate_limited");

    tokio::time::advance(Duration::from_secs(61)).await;

    let fresh = pipeline.run("login", &caller, json!({}), ok).await.unwrap();
    assert!(fresh.outcome.is_success());
    assert_eq!(fresh.admission.unwrap().remaining, 19);
}

#[tokio::test(start_paused = true)]
async fn test_breaker_opens_at_half_failures_and_recovers() {
    let options = BreakerOptions {
        volume_threshold: 10,
        ..Default::default()
    };
    let pipeline = pipeline(vec![(
        GuardedOperation::new("charge").with_breaker("payments"),
        Some(options),
    )]);
    let caller = client("1.2.3.4");
    let invocations = Arc::new(AtomicU32::new(0));

    for i in 0..10 {
        let calls = invocations.clone();
        let guarded = pipeline
            .run("charge", &caller, json!({}), move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if i < 5 {
                    Ok(())
                } else {
                    Err(std::io::Error::other("card processor down"))
                }
            })
            .await
            .unwrap();
        let expected = if i < 5 { "success" } else { "upstream_failure" };
        assert_eq!(guarded.outcome.kind(), expected);
    }

    let breaker = pipeline.breakers().get("payments").unwrap();
    assert_eq!(breaker.state(), BreakerState::Open);

    let calls = invocations.clone();
    let rejected = pipeline
        .run("charge", &caller, json!({}), move |_| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, std::io::Error>(())
        })
        .await
        .unwrap();
    match rejected.outcome {
        Outcome::CircuitOpen {
            breaker, retry_after, ..
        } => {
            assert_eq!(breaker, "payments");
            let retry_after = retry_after.unwrap();
            assert!(retry_after > Duration::from_secs(29) && retry_after <= Duration::from_secs(30));
        }
        other => panic!("expected open circuit, got {}", other.kind()),
    }
    assert_eq!(invocations.load(Ordering::SeqCst), 10);

    tokio::time::advance(Duration::from_secs(30)).await;
    assert_eq!(breaker.state(), BreakerState::HalfOpen);

    let trial = pipeline.run("charge", &caller, json!({}), ok).await.unwrap();
    assert!(trial.outcome.is_success());
    assert_eq!(breaker.state(), BreakerState::Closed);
    assert_eq!(breaker.stats().stats.fires, 0);
}

#[tokio::test(start_paused = true)]
async fn test_order_payload_is_validated_before_upstream() {
    let pipeline = pipeline(vec![(
        GuardedOperation::new("create_order")
            .with_schema("create_order")
            .with_endpoint_tier("orders")
            .with_breaker("orders"),
        None,
    )]);
    let caller = CallerIdentity::authenticated("1.2.3.4".parse().unwrap(), "buyer-1", false);
    let forwarded: Arc<Mutex<Vec<Normalized>>> = Arc::default();

    let sink = forwarded.clone();
    let guarded = pipeline
        .run(
            "create_order",
            &caller,
            json!({
                "items": [{"product_id": "6f1c2a4e-8b3d-4e5f-9a7b-1c2d3e4f5a6b", "quantity": 3}],
                "shipping_address": "<script>x</script>4 Field Rd",
                "payment_method": "paypal",
                "notes": "Leave at gate"
            }),
            move |payload| async move {
                sink.lock().unwrap().push(payload);
                Ok::<_, std::io::Error>("order-1")
            },
        )
        .await
        .unwrap();
    assert_eq!(guarded.outcome.success(), Some("order-1"));
    assert_eq!(guarded.admission.unwrap().tier, "orders");

    let payload = forwarded.lock().unwrap()[0].clone();
    assert_eq!(payload["shipping_address"], json!("x4 Field Rd"));
    assert_eq!(payload["notes"], json!("Leave at gate"));

    let sink = forwarded.clone();
    let rejected = pipeline
        .run(
            "create_order",
            &caller,
            json!({
                "items": [{"product_id": "not-a-uuid", "quantity": 0}],
                "payment_method": "card"
            }),
            move |payload| async move {
                sink.lock().unwrap().push(payload);
                Ok::<_, std::io::Error>("order-2")
            },
        )
        .await
        .unwrap();

    match rejected.outcome {
        Outcome::ValidationFailed { schema, errors } => {
            assert_eq!(schema, "create_order");
            let paths: Vec<&str> = errors.iter().map(|e| e.path.as_str()).collect();
            assert_eq!(
                paths,
                vec!["shipping_address", "items.0.product_id", "items.0.quantity"]
            );
        }
        other => panic!("expected validation failure, got {}", other.kind()),
    }
    assert_eq!(forwarded.lock().unwrap().len(), 1);
    assert!(rejected.admission.is_some());
}

#[tokio::test]
async fn test_concurrent_checks_never_overshoot() {
    let pipeline = Arc::new(pipeline(vec![(GuardedOperation::new("browse"), None)]));
    let caller = client("9.9.9.9");

    let attempts = (0..150).map(|_| {
        let pipeline = pipeline.clone();
        let caller = caller.clone();
        tokio::spawn(async move { pipeline.run("browse", &caller, json!({}), ok).await })
    });
    let results = futures_util::future::join_all(attempts).await;

    let admitted = results
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .filter(|guarded| guarded.outcome.is_success())
        .count();
    assert_eq!(admitted, 100);
}
