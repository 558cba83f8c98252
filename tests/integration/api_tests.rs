//! API integration tests for the generation and health endpoints.
//!
//! Tests verify:
//! - The "tree" scenario end to end
//! - Partial and total vectorization failure
//! - Every gate error status and its envelope
//! - Health reporting

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use tower::ServiceExt;

use iconforge::error::GenerationError;
use iconforge::{LimiterRegistry, PolicyTable, RouterConfig, DEFAULT_IMAGES_PER_REQUEST};

use super::test_utils::{
    build_router, generate_request, json_body, ready_limiter, tree_fetcher, MockGenerator,
    MockImageFetcher, MISSING_URL, TREE_URL_1, TREE_URL_2,
};

// =============================================================================
// Successful Generation
// =============================================================================

#[tokio::test]
async fn test_tree_scenario_returns_two_svgs() {
    let generator = Arc::new(MockGenerator::with_urls(&[TREE_URL_1, TREE_URL_2]));
    let router = build_router(
        ready_limiter(),
        generator.clone(),
        tree_fetcher(),
        RouterConfig::without_auth(),
    );

    let response = router
        .oneshot(generate_request(r#"{"userinput": "tree"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("x-ratelimit-remaining").unwrap(),
        "1"
    );

    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert!(body["error"].is_null());

    let images = body["data"]["images"].as_array().unwrap();
    assert_eq!(images.len(), 2);
    assert_eq!(images[0]["url"], TREE_URL_1);
    assert_eq!(images[1]["url"], TREE_URL_2);
    for image in images {
        let svg = image["svg"].as_str().unwrap();
        assert!(svg.starts_with("<svg"), "unexpected svg: {}", svg);
        assert!(svg.contains("<path"));
        assert!(!svg.to_ascii_lowercase().contains("<script"));
        assert!(image.get("error").is_none());
    }

    // One generator call with the icon prompt and the configured count.
    let calls = generator.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].0.contains("'tree'"));
    assert_eq!(calls[0].1, DEFAULT_IMAGES_PER_REQUEST);
}

#[tokio::test]
async fn test_partial_success_is_200() {
    let generator = Arc::new(MockGenerator::with_urls(&[TREE_URL_1, MISSING_URL]));
    let router = build_router(
        ready_limiter(),
        generator,
        tree_fetcher(),
        RouterConfig::without_auth(),
    );

    let response = router
        .oneshot(generate_request(r#"{"userinput": "tree"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["success"], true);

    let images = body["data"]["images"].as_array().unwrap();
    assert_eq!(images.len(), 2);
    assert!(images[0]["svg"].is_string());
    assert!(images[0].get("error").is_none());
    assert!(images[1].get("svg").is_none());
    assert!(images[1]["error"].as_str().unwrap().contains("404"));
}

#[tokio::test]
async fn test_all_images_failed_is_502_with_details() {
    let generator = Arc::new(MockGenerator::with_urls(&[MISSING_URL]));
    let router = build_router(
        ready_limiter(),
        generator,
        MockImageFetcher::new(),
        RouterConfig::without_auth(),
    );

    let response = router
        .oneshot(generate_request(r#"{"userinput": "tree"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let body = json_body(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "vectorization_failed");

    let images = body["data"]["images"].as_array().unwrap();
    assert_eq!(images.len(), 2);
    assert!(images.iter().all(|image| image["error"].is_string()));
}

#[tokio::test]
async fn test_undecodable_image_reported_per_item() {
    let generator = Arc::new(MockGenerator::with_urls(&[TREE_URL_1, TREE_URL_2]));
    let fetcher = tree_fetcher().with_image(TREE_URL_2, b"not an image".to_vec());
    let router = build_router(
        ready_limiter(),
        generator,
        fetcher,
        RouterConfig::without_auth(),
    );

    let response = router
        .oneshot(generate_request(r#"{"userinput": "tree"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    let images = body["data"]["images"].as_array().unwrap();
    assert!(images[0]["svg"].is_string());
    assert!(images[1]["error"]
        .as_str()
        .unwrap()
        .starts_with("Failed to decode image"));
}

// =============================================================================
// Validation
// =============================================================================

#[tokio::test]
async fn test_empty_input_rejected_without_side_effects() {
    let generator = Arc::new(MockGenerator::with_urls(&[TREE_URL_1]));
    let limiter = ready_limiter();
    let router = build_router(
        limiter.clone(),
        generator.clone(),
        tree_fetcher(),
        RouterConfig::without_auth(),
    );

    for body in [
        r#"{"userinput": ""}"#,
        r#"{"userinput": "   "}"#,
        r#"{"userinput": null}"#,
        r#"{}"#,
    ] {
        let response = router
            .clone()
            .oneshot(generate_request(body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {}", body);

        let json = json_body(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "validation_error");
        assert!(json["data"].is_null());
    }

    assert_eq!(generator.call_count(), 0);

    // The quota was never touched: the guest still has the full allowance.
    let response = router
        .oneshot(generate_request(r#"{"userinput": "tree"}"#))
        .await
        .unwrap();
    assert_eq!(
        response.headers().get("x-ratelimit-remaining").unwrap(),
        "1"
    );
}

#[tokio::test]
async fn test_malformed_json_is_validation_error() {
    let generator = Arc::new(MockGenerator::with_urls(&[TREE_URL_1]));
    let router = build_router(
        ready_limiter(),
        generator.clone(),
        tree_fetcher(),
        RouterConfig::without_auth(),
    );

    let response = router
        .oneshot(generate_request(r#"{"userinput": "tr"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "validation_error");
    assert_eq!(generator.call_count(), 0);
}

#[tokio::test]
async fn test_missing_content_type_is_validation_error() {
    let router = build_router(
        ready_limiter(),
        Arc::new(MockGenerator::with_urls(&[TREE_URL_1])),
        tree_fetcher(),
        RouterConfig::without_auth(),
    );

    let request = Request::builder()
        .method("POST")
        .uri("/api/generate-svg")
        .body(Body::from(r#"{"userinput": "tree"}"#))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "validation_error");
}

#[tokio::test]
async fn test_overlong_input_rejected() {
    let router = build_router(
        ready_limiter(),
        Arc::new(MockGenerator::with_urls(&[TREE_URL_1])),
        tree_fetcher(),
        RouterConfig::without_auth(),
    );

    let body = serde_json::json!({ "userinput": "x".repeat(201) }).to_string();
    let response = router.oneshot(generate_request(&body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// =============================================================================
// Gate Errors
// =============================================================================

#[tokio::test]
async fn test_guest_over_allowance_gets_429_with_retry_after() {
    let generator = Arc::new(MockGenerator::with_urls(&[TREE_URL_1]));
    let router = build_router(
        ready_limiter(),
        generator.clone(),
        tree_fetcher(),
        RouterConfig::without_auth(),
    );

    // Default guest allowance is 2.
    for _ in 0..2 {
        let response = router
            .clone()
            .oneshot(generate_request(r#"{"userinput": "tree"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = router
        .oneshot(generate_request(r#"{"userinput": "tree"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let retry_after: u64 = response
        .headers()
        .get(header::RETRY_AFTER)
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after > 0);

    let body = json_body(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "rate_limit_exceeded");
    assert!(body["data"].is_null());

    // The rejected request never reached the generator.
    assert_eq!(generator.call_count(), 2);
}

#[tokio::test]
async fn test_limiter_not_ready_is_503() {
    let generator = Arc::new(MockGenerator::with_urls(&[TREE_URL_1]));
    let router = build_router(
        Arc::new(LimiterRegistry::new(PolicyTable::default())),
        generator.clone(),
        tree_fetcher(),
        RouterConfig::without_auth(),
    );

    let response = router
        .oneshot(generate_request(r#"{"userinput": "tree"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["error"], "rate_limiter_not_ready");
    assert_eq!(generator.call_count(), 0);
}

#[tokio::test]
async fn test_generator_failure_is_502() {
    let generator = Arc::new(MockGenerator::failing(GenerationError::Status {
        status: 500,
        message: "upstream exploded".to_string(),
    }));
    let router = build_router(
        ready_limiter(),
        generator,
        tree_fetcher(),
        RouterConfig::without_auth(),
    );

    let response = router
        .oneshot(generate_request(r#"{"userinput": "tree"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let body = json_body(response).await;
    assert_eq!(body["error"], "upstream_generation_error");
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("upstream exploded"));
}

// =============================================================================
// Health and Routing
// =============================================================================

#[tokio::test]
async fn test_health_ready() {
    let router = build_router(
        ready_limiter(),
        Arc::new(MockGenerator::default()),
        MockImageFetcher::new(),
        RouterConfig::without_auth(),
    );

    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["rate_limiter"], "ready");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_health_degraded_before_store() {
    let router = build_router(
        Arc::new(LimiterRegistry::new(PolicyTable::default())),
        Arc::new(MockGenerator::default()),
        MockImageFetcher::new(),
        RouterConfig::without_auth(),
    );

    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["rate_limiter"], "initializing");
}

#[tokio::test]
async fn test_generate_rejects_get() {
    let router = build_router(
        ready_limiter(),
        Arc::new(MockGenerator::default()),
        MockImageFetcher::new(),
        RouterConfig::without_auth(),
    );

    let request = Request::builder()
        .uri("/api/generate-svg")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_cors_preflight_allows_post() {
    let router = build_router(
        ready_limiter(),
        Arc::new(MockGenerator::default()),
        MockImageFetcher::new(),
        RouterConfig::without_auth().with_cors_origins(vec!["https://app.example".to_string()]),
    );

    let request = Request::builder()
        .method("OPTIONS")
        .uri("/api/generate-svg")
        .header("origin", "https://app.example")
        .header("access-control-request-method", "POST")
        .header("access-control-request-headers", "content-type")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "https://app.example"
    );
    let methods = response
        .headers()
        .get("access-control-allow-methods")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(methods.contains("POST"));
}
