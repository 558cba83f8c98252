//! Authentication integration tests.
//!
//! Tests verify:
//! - Valid session tokens (header and cookie) select the caller's tier
//! - Tokens issued by the login flow are accepted as-is
//! - Expired, forged and malformed tokens fall back to guest
//! - Anonymous callers are keyed by their address

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::ConnectInfo;
use axum::http::StatusCode;
use tower::ServiceExt;

use iconforge::{RouterConfig, SessionTokenAuth};

use super::test_utils::{
    build_router, generate_request, generate_request_from, ready_limiter, tree_fetcher,
    MockGenerator, TREE_URL_1,
};

const TEST_SECRET: &str = "test-secret-key-for-hmac-signing";
const TREE: &str = r#"{"userinput": "tree"}"#;

fn router(config: RouterConfig) -> axum::Router {
    build_router(
        ready_limiter(),
        Arc::new(MockGenerator::with_urls(&[TREE_URL_1])),
        tree_fetcher(),
        config,
    )
}

fn remaining(response: &axum::response::Response) -> u32 {
    response
        .headers()
        .get("x-ratelimit-remaining")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap()
}

// =============================================================================
// Valid Tokens
// =============================================================================

#[tokio::test]
async fn test_bearer_token_selects_member_tier() {
    let router = router(RouterConfig::new().with_session_secret(TEST_SECRET));
    let (token, _) = SessionTokenAuth::new(TEST_SECRET)
        .sign("user-1", "member", Duration::from_secs(3600))
        .unwrap();

    let mut request = generate_request(TREE);
    request.headers_mut().insert(
        "authorization",
        format!("Bearer {}", token).parse().unwrap(),
    );

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    // Member allowance is 5.
    assert_eq!(remaining(&response), 4);
}

#[tokio::test]
async fn test_cookie_token_selects_premium_tier() {
    let router = router(RouterConfig::new().with_session_secret(TEST_SECRET));
    let (token, _) = SessionTokenAuth::new(TEST_SECRET)
        .sign("user-2", "premium", Duration::from_secs(3600))
        .unwrap();

    let mut request = generate_request(TREE);
    request.headers_mut().insert(
        "cookie",
        format!("theme=dark; token={}", token).parse().unwrap(),
    );

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(remaining(&response), 19);
}

#[tokio::test]
async fn test_unknown_role_is_guest() {
    let router = router(RouterConfig::new().with_session_secret(TEST_SECRET));
    let (token, _) = SessionTokenAuth::new(TEST_SECRET)
        .sign("user-3", "superadmin", Duration::from_secs(3600))
        .unwrap();

    let mut request = generate_request(TREE);
    request.headers_mut().insert(
        "authorization",
        format!("Bearer {}", token).parse().unwrap(),
    );

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(remaining(&response), 1);
}

#[tokio::test]
async fn test_members_have_separate_counters() {
    let router = router(RouterConfig::new().with_session_secret(TEST_SECRET));
    let auth = SessionTokenAuth::new(TEST_SECRET);

    for (id, expected) in [("alice", 4), ("alice", 3), ("bob", 4)] {
        let (token, _) = auth.sign(id, "member", Duration::from_secs(3600)).unwrap();
        let mut request = generate_request(TREE);
        request.headers_mut().insert(
            "authorization",
            format!("Bearer {}", token).parse().unwrap(),
        );

        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(remaining(&response), expected, "caller {}", id);
    }
}

// =============================================================================
// Rejected Tokens
// =============================================================================

#[tokio::test]
async fn test_expired_token_is_guest() {
    let router = router(RouterConfig::new().with_session_secret(TEST_SECRET));
    let past = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
        - 60;
    let token = SessionTokenAuth::new(TEST_SECRET)
        .sign_with_expiry("user-1", "premium", past)
        .unwrap();

    let mut request = generate_request(TREE);
    request.headers_mut().insert(
        "authorization",
        format!("Bearer {}", token).parse().unwrap(),
    );

    let response = router.oneshot(request).await.unwrap();
    // Never rejected for auth; just not premium.
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(remaining(&response), 1);
}

#[tokio::test]
async fn test_token_signed_with_other_secret_is_guest() {
    let router = router(RouterConfig::new().with_session_secret(TEST_SECRET));
    let (token, _) = SessionTokenAuth::new("some-other-secret")
        .sign("user-1", "premium", Duration::from_secs(3600))
        .unwrap();

    let mut request = generate_request(TREE);
    request.headers_mut().insert(
        "authorization",
        format!("Bearer {}", token).parse().unwrap(),
    );

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(remaining(&response), 1);
}

#[tokio::test]
async fn test_tampered_role_is_guest() {
    let router = router(RouterConfig::new().with_session_secret(TEST_SECRET));
    let (member, _) = SessionTokenAuth::new(TEST_SECRET)
        .sign("user-1", "member", Duration::from_secs(3600))
        .unwrap();
    let (premium, _) = SessionTokenAuth::new("attacker-key")
        .sign("user-1", "premium", Duration::from_secs(3600))
        .unwrap();

    // Premium claims carrying the member token's signature.
    let (premium_body, _) = premium.rsplit_once('.').unwrap();
    let (_, member_sig) = member.rsplit_once('.').unwrap();
    let tampered = format!("{}.{}", premium_body, member_sig);

    let mut request = generate_request(TREE);
    request.headers_mut().insert(
        "authorization",
        format!("Bearer {}", tampered).parse().unwrap(),
    );

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(remaining(&response), 1);
}

#[tokio::test]
async fn test_login_issued_jwt_in_cookie_selects_tier() {
    let router = router(RouterConfig::new().with_session_secret(TEST_SECRET));
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs();
    // Claims exactly as the login flow issues them.
    let token = jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &serde_json::json!({"id": "cm1user", "role": "premium", "iat": now, "exp": now + 3600}),
        &jsonwebtoken::EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .unwrap();

    let mut request = generate_request(TREE);
    request
        .headers_mut()
        .insert("cookie", format!("token={}", token).parse().unwrap());

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(remaining(&response), 19);
}

#[tokio::test]
async fn test_tokens_ignored_without_secret() {
    let router = router(RouterConfig::without_auth());
    let (token, _) = SessionTokenAuth::new(TEST_SECRET)
        .sign("user-1", "premium", Duration::from_secs(3600))
        .unwrap();

    let mut request = generate_request(TREE);
    request.headers_mut().insert(
        "authorization",
        format!("Bearer {}", token).parse().unwrap(),
    );

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(remaining(&response), 1);
}

// =============================================================================
// Source Addresses
// =============================================================================

#[tokio::test]
async fn test_connect_info_keys_guests() {
    let router = router(RouterConfig::without_auth());

    for (address, expected) in [
        ("10.0.0.1:5000", 1),
        ("10.0.0.1:5001", 0),
        ("10.0.0.2:5000", 1),
    ] {
        let mut request = generate_request(TREE);
        let peer: SocketAddr = address.parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(peer));

        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(remaining(&response), expected, "peer {}", address);
    }
}

#[tokio::test]
async fn test_forwarded_for_trusted() {
    let router = router(RouterConfig::without_auth().with_trust_forwarded_for(true));

    let first = router
        .clone()
        .oneshot(generate_request_from("203.0.113.7, 10.0.0.1", TREE))
        .await
        .unwrap();
    assert_eq!(remaining(&first), 1);

    let other = router
        .clone()
        .oneshot(generate_request_from("198.51.100.4", TREE))
        .await
        .unwrap();
    assert_eq!(remaining(&other), 1);

    let again = router
        .oneshot(generate_request_from("203.0.113.7", TREE))
        .await
        .unwrap();
    assert_eq!(remaining(&again), 0);
}

#[tokio::test]
async fn test_forwarded_for_ignored_by_default() {
    let router = router(RouterConfig::without_auth());

    let first = router
        .clone()
        .oneshot(generate_request_from("203.0.113.7", TREE))
        .await
        .unwrap();
    assert_eq!(remaining(&first), 1);

    // A different header value does not buy a fresh allowance.
    let spoofed = router
        .oneshot(generate_request_from("198.51.100.4", TREE))
        .await
        .unwrap();
    assert_eq!(remaining(&spoofed), 0);
}

#[tokio::test]
async fn test_user_id_cookie_does_not_key_guests() {
    let router = router(RouterConfig::without_auth());

    for (cookie, expected) in [("user_id=a", 1), ("user_id=b", 0)] {
        let mut request = generate_request(TREE);
        request
            .headers_mut()
            .insert("cookie", cookie.parse().unwrap());

        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(remaining(&response), expected, "cookie {}", cookie);
    }
}
