//! Rate limiter integration tests.
//!
//! Tests verify:
//! - Each tier is admitted exactly its allowance per window
//! - Windows reset once they elapse
//! - Callers never share counters
//! - Admission fails closed until the store is ready
//! - Background initialization retries and gives up as configured

use std::sync::Arc;
use std::time::Duration;

use iconforge::error::{AdmissionError, GateError};
use iconforge::limiter::{
    classify, AuthContext, LimiterRegistry, PolicyTable, Readiness, RetryPolicy, Tier,
};
use iconforge::store::InMemoryCounterStore;

use super::test_utils::{
    build_gate, ready_limiter, tree_fetcher, FlakyConnector, MockGenerator, TREE_URL_1,
};

fn small_table() -> PolicyTable {
    PolicyTable::with_allowances(2, 3, 4, 60).unwrap()
}

fn fast_retry(max_attempts: Option<u32>) -> RetryPolicy {
    RetryPolicy {
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(40),
        max_attempts,
    }
}

// =============================================================================
// Quota Exhaustion
// =============================================================================

#[tokio::test]
async fn test_each_tier_gets_exactly_its_allowance() {
    let registry =
        LimiterRegistry::with_store(small_table(), Arc::new(InMemoryCounterStore::new()));

    for (role, allowance) in [("guest", 2), ("member", 3), ("premium", 4)] {
        let auth = AuthContext::new(format!("{}-user", role), role);
        let identity = classify(Some(&auth), "10.0.0.1");

        for used in 1..=allowance {
            let admission = registry.admit(&identity).await.unwrap();
            assert_eq!(admission.tier, Tier::from_role(role));
            assert_eq!(admission.remaining, allowance - used);
            assert!(admission.reset_after_secs > 0);
        }

        match registry.admit(&identity).await {
            Err(AdmissionError::RateLimited {
                tier,
                retry_after_secs,
            }) => {
                assert_eq!(tier, Tier::from_role(role));
                assert!(retry_after_secs > 0 && retry_after_secs <= 60);
            }
            other => panic!("expected rate limit for {}, got {:?}", role, other),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_window_reset_restores_allowance() {
    let registry =
        LimiterRegistry::with_store(small_table(), Arc::new(InMemoryCounterStore::new()));
    let identity = classify(None, "10.0.0.1");

    registry.admit(&identity).await.unwrap();
    tokio::time::advance(Duration::from_secs(30)).await;
    registry.admit(&identity).await.unwrap();
    assert!(registry.admit(&identity).await.is_err());

    // The window started at the first admission, 30s ago.
    tokio::time::advance(Duration::from_secs(29)).await;
    assert!(registry.admit(&identity).await.is_err());

    tokio::time::advance(Duration::from_secs(2)).await;
    let admission = registry.admit(&identity).await.unwrap();
    assert_eq!(admission.remaining, 1);
    assert_eq!(admission.reset_after_secs, 60);
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_counts_down() {
    let registry =
        LimiterRegistry::with_store(small_table(), Arc::new(InMemoryCounterStore::new()));
    let identity = classify(None, "10.0.0.1");

    registry.admit(&identity).await.unwrap();
    registry.admit(&identity).await.unwrap();

    tokio::time::advance(Duration::from_secs(45)).await;
    match registry.admit(&identity).await {
        Err(AdmissionError::RateLimited {
            retry_after_secs, ..
        }) => assert_eq!(retry_after_secs, 15),
        other => panic!("expected rate limit, got {:?}", other),
    }
}

// =============================================================================
// Identity Isolation
// =============================================================================

#[tokio::test]
async fn test_identities_do_not_share_counters() {
    let registry =
        LimiterRegistry::with_store(small_table(), Arc::new(InMemoryCounterStore::new()));

    let first = classify(None, "10.0.0.1");
    let second = classify(None, "10.0.0.2");
    registry.admit(&first).await.unwrap();
    registry.admit(&first).await.unwrap();
    assert!(registry.admit(&first).await.is_err());

    assert_eq!(registry.admit(&second).await.unwrap().remaining, 1);

    // A member on an exhausted address still has their own allowance.
    let member = AuthContext::new("user-1", "member");
    let member = classify(Some(&member), "10.0.0.1");
    assert_eq!(registry.admit(&member).await.unwrap().remaining, 2);
}

#[tokio::test]
async fn test_tier_is_part_of_the_key() {
    let registry =
        LimiterRegistry::with_store(small_table(), Arc::new(InMemoryCounterStore::new()))
            .with_key_prefix("icons");

    // Same id, different roles: a role change starts a fresh counter.
    let as_member = classify(Some(&AuthContext::new("user-1", "member")), "x");
    let as_premium = classify(Some(&AuthContext::new("user-1", "premium")), "x");

    assert_eq!(registry.counter_key(&as_member), "icons:member:user-1");
    assert_eq!(registry.counter_key(&as_premium), "icons:premium:user-1");

    registry.admit(&as_member).await.unwrap();
    assert_eq!(registry.admit(&as_premium).await.unwrap().remaining, 3);
}

#[tokio::test]
async fn test_unknown_role_uses_guest_policy() {
    let registry =
        LimiterRegistry::with_store(small_table(), Arc::new(InMemoryCounterStore::new()));
    let identity = classify(Some(&AuthContext::new("user-1", "enterprise")), "10.0.0.1");

    assert_eq!(identity.tier(), Tier::Guest);
    let admission = registry.admit(&identity).await.unwrap();
    assert_eq!(admission.tier, Tier::Guest);
    assert_eq!(admission.remaining, 1);
}

// =============================================================================
// Readiness
// =============================================================================

#[tokio::test]
async fn test_fail_closed_until_ready() {
    let registry = Arc::new(LimiterRegistry::new(small_table()));
    let identity = classify(None, "10.0.0.1");

    assert_eq!(registry.readiness(), Readiness::Initializing);
    assert!(matches!(
        registry.admit(&identity).await,
        Err(AdmissionError::NotReady { .. })
    ));

    let connector = FlakyConnector::new(2);
    registry.initialize(&connector, fast_retry(None)).await;

    assert_eq!(connector.attempts(), 3);
    assert!(registry.is_ready());
    assert_eq!(registry.admit(&identity).await.unwrap().remaining, 1);
}

#[tokio::test]
async fn test_background_initializer_reaches_ready() {
    let registry = Arc::new(LimiterRegistry::new(small_table()));
    let handle = registry.spawn_initializer(FlakyConnector::new(3), fast_retry(None));

    assert!(registry.wait_ready(Duration::from_secs(5)).await);
    handle.await.unwrap();
    assert_eq!(registry.readiness(), Readiness::Ready);
}

#[tokio::test]
async fn test_initializer_gives_up() {
    let registry = Arc::new(LimiterRegistry::new(small_table()));
    let connector = FlakyConnector::new(10);

    registry.initialize(&connector, fast_retry(Some(3))).await;

    assert_eq!(connector.attempts(), 3);
    assert_eq!(registry.readiness(), Readiness::Failed);
    assert!(!registry.wait_ready(Duration::from_millis(50)).await);

    let identity = classify(None, "10.0.0.1");
    assert!(matches!(
        registry.admit(&identity).await,
        Err(AdmissionError::NotReady { .. })
    ));
}

#[tokio::test]
async fn test_gate_fails_closed_before_generation() {
    let generator = Arc::new(MockGenerator::with_urls(&[TREE_URL_1]));
    let registry = Arc::new(LimiterRegistry::new(small_table()));
    let gate = build_gate(registry.clone(), generator.clone(), tree_fetcher());

    let err = gate.handle(Some("tree"), None, "10.0.0.1").await.unwrap_err();
    assert!(matches!(err, GateError::RateLimiterNotReady { .. }));
    assert_eq!(generator.call_count(), 0);

    registry.install(Arc::new(InMemoryCounterStore::new()));
    let outcome = gate.handle(Some("tree"), None, "10.0.0.1").await.unwrap();
    assert_eq!(outcome.admission.remaining, 1);
    assert_eq!(generator.call_count(), 1);
}

#[tokio::test]
async fn test_empty_input_never_reaches_store() {
    let generator = Arc::new(MockGenerator::with_urls(&[TREE_URL_1]));
    let limiter = ready_limiter();
    let gate = build_gate(limiter.clone(), generator.clone(), tree_fetcher());

    for _ in 0..5 {
        let err = gate.handle(Some(""), None, "10.0.0.1").await.unwrap_err();
        assert!(matches!(err, GateError::Validation(_)));
    }

    // The guest allowance (2) is untouched.
    let outcome = gate.handle(Some("tree"), None, "10.0.0.1").await.unwrap();
    assert_eq!(outcome.admission.remaining, 1);
    assert_eq!(generator.call_count(), 1);
}
