//! Router configuration for iconforge.
//!
//! # Route Structure
//!
//! ```text
//! /health              - Health check
//! /api/generate-svg    - Icon generation (quota-gated)
//! ```
//!
//! Authentication never blocks a request: a valid session token only moves
//! the caller into its tier, everyone else is a guest keyed by address.
//!
//! # Example
//!
//! ```ignore
//! use std::net::SocketAddr;
//! use iconforge::server::{create_router, RouterConfig};
//!
//! let config = RouterConfig::new()
//!     .with_session_secret("my-secret-key")
//!     .with_cors_origins(vec!["https://example.com".to_string()]);
//!
//! let router = create_router(gate, config);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>()).await?;
//! ```

use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::Method;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::auth::{SessionResolver, SessionTokenAuth};
use super::handlers::{generate_svg_handler, health_handler, AppState};
use crate::gate::RequestGate;
use crate::generate::ImageGenerator;
use crate::pipeline::ImageFetcher;

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Clone, Default)]
pub struct RouterConfig {
    /// Secret for session tokens (None = every caller is anonymous)
    pub session_secret: Option<String>,

    /// Allowed CORS origins (None = allow any origin)
    pub cors_origins: Option<Vec<String>>,

    /// Whether to enable request tracing
    pub enable_tracing: bool,

    /// Take the source address from `X-Forwarded-For` when present
    pub trust_forwarded_for: bool,
}

impl RouterConfig {
    /// Create a new router configuration.
    ///
    /// By default:
    /// - Session auth is disabled
    /// - CORS allows any origin
    /// - Tracing is enabled
    /// - `X-Forwarded-For` is ignored
    pub fn new() -> Self {
        Self {
            enable_tracing: true,
            ..Default::default()
        }
    }

    /// Create a configuration with session auth disabled.
    pub fn without_auth() -> Self {
        Self::new()
    }

    /// Verify session tokens with this secret.
    pub fn with_session_secret(mut self, secret: impl Into<String>) -> Self {
        self.session_secret = Some(secret.into());
        self
    }

    /// Set specific allowed CORS origins.
    ///
    /// Pass an empty vec to disallow all cross-origin requests.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    /// Enable or disable request tracing.
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }

    /// Only enable this behind a proxy that sets the header itself.
    pub fn with_trust_forwarded_for(mut self, trusted: bool) -> Self {
        self.trust_forwarded_for = trusted;
        self
    }

    fn session_resolver(&self) -> SessionResolver {
        let auth = self
            .session_secret
            .as_deref()
            .filter(|secret| !secret.is_empty())
            .map(SessionTokenAuth::new);
        SessionResolver::new(auth, self.trust_forwarded_for)
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the main application router.
///
/// Serve it with `into_make_service_with_connect_info::<SocketAddr>()` so
/// anonymous callers are keyed by their peer address.
pub fn create_router<G, F>(gate: RequestGate<G, F>, config: RouterConfig) -> Router
where
    G: ImageGenerator + 'static,
    F: ImageFetcher + 'static,
{
    let app_state = AppState::new(gate).with_sessions(config.session_resolver());
    let cors = build_cors_layer(&config);

    let router = Router::new()
        .route("/health", get(health_handler::<G, F>))
        .route("/api/generate-svg", post(generate_svg_handler::<G, F>))
        .with_state(app_state)
        .layer(cors);

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Build the CORS layer based on configuration.
fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .max_age(Duration::from_secs(86400));

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        Some(origins) if origins.is_empty() => cors,
        Some(origins) => {
            let parsed_origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed_origins)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
