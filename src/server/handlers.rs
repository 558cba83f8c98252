//! HTTP request handlers for the iconforge API.
//!
//! # Endpoints
//!
//! - `POST /api/generate-svg` - Generate and vectorize icons for a concept
//! - `GET /health` - Health check endpoint

use axum::{
    extract::{rejection::JsonRejection, FromRef, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::GateError;
use crate::gate::RequestGate;
use crate::generate::ImageGenerator;
use crate::pipeline::{ImageFetcher, PipelineOutcome, VectorResult};

use super::auth::{CallerContext, SessionResolver};

/// Remaining quota for the caller after this request.
pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";

// =============================================================================
// Application State
// =============================================================================

/// Shared application state.
///
/// This is passed to all handlers via Axum's State extractor.
pub struct AppState<G: ImageGenerator, F: ImageFetcher> {
    /// The gate every generation request goes through
    pub gate: RequestGate<G, F>,

    /// Resolves session tokens and source addresses
    pub sessions: SessionResolver,
}

impl<G: ImageGenerator, F: ImageFetcher> AppState<G, F> {
    pub fn new(gate: RequestGate<G, F>) -> Self {
        Self {
            gate,
            sessions: SessionResolver::default(),
        }
    }

    pub fn with_sessions(mut self, sessions: SessionResolver) -> Self {
        self.sessions = sessions;
        self
    }
}

impl<G: ImageGenerator, F: ImageFetcher> Clone for AppState<G, F> {
    fn clone(&self) -> Self {
        Self {
            gate: self.gate.clone(),
            sessions: self.sessions.clone(),
        }
    }
}

impl<G: ImageGenerator, F: ImageFetcher> FromRef<AppState<G, F>> for SessionResolver {
    fn from_ref(state: &AppState<G, F>) -> Self {
        state.sessions.clone()
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Body of `POST /api/generate-svg`.
#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    /// The concept to draw; validated by the gate
    #[serde(default)]
    pub userinput: Option<String>,
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON envelope returned by the generation endpoint, on success and error.
#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub success: bool,

    /// Human-readable summary
    pub message: String,

    pub data: Option<ImagesData>,

    /// Error type identifier (e.g., "validation_error"), null on success
    pub error: Option<String>,
}

impl ApiResponse {
    pub fn success(message: impl Into<String>, data: ImagesData) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            error: Some(error.into()),
        }
    }

    /// Attach image results to a failure envelope.
    pub fn with_data(mut self, data: ImagesData) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Debug, Serialize)]
pub struct ImagesData {
    pub images: Vec<ImageResult>,
}

impl From<&PipelineOutcome> for ImagesData {
    fn from(outcome: &PipelineOutcome) -> Self {
        Self {
            images: outcome.results.iter().map(ImageResult::from).collect(),
        }
    }
}

/// One generated image; exactly one of `svg` and `error` is set.
#[derive(Debug, Serialize)]
pub struct ImageResult {
    /// Raster URL the vector was traced from
    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub svg: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub revised_prompt: Option<String>,
}

impl From<&VectorResult> for ImageResult {
    fn from(result: &VectorResult) -> Self {
        Self {
            url: result.source.url.clone(),
            svg: result.svg().map(str::to_string),
            error: result.error().map(|e| e.to_string()),
            revised_prompt: result.source.revised_prompt.clone(),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `healthy` when the rate limiter is ready, `degraded` otherwise
    pub status: String,

    /// Service version
    pub version: String,

    /// Rate limiter readiness (e.g., "ready", "initializing")
    pub rate_limiter: String,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Convert GateError to HTTP response.
///
/// Logged by severity:
/// - 5xx errors at ERROR level
/// - 429 at DEBUG level (expected under normal use)
/// - other 4xx errors at WARN level
impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            GateError::Validation(reason) => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                reason.clone(),
            ),

            GateError::RateLimitExceeded { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limit_exceeded",
                self.to_string(),
            ),

            GateError::RateLimiterNotReady { .. } => (
                StatusCode::SERVICE_UNAVAILABLE,
                "rate_limiter_not_ready",
                self.to_string(),
            ),

            GateError::UpstreamGeneration(_) => (
                StatusCode::BAD_GATEWAY,
                "upstream_generation_error",
                self.to_string(),
            ),
        };

        if status.is_server_error() {
            error!(
                error_type = error_type,
                status = status.as_u16(),
                "Server error: {}",
                message
            );
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            debug!(
                error_type = error_type,
                status = status.as_u16(),
                "Rate limited: {}",
                message
            );
        } else {
            warn!(
                error_type = error_type,
                status = status.as_u16(),
                "Client error: {}",
                message
            );
        }

        let mut response = (status, Json(ApiResponse::failure(error_type, message))).into_response();

        if let GateError::RateLimitExceeded { retry_after_secs } = self {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from(retry_after_secs.max(1)),
            );
        }

        response
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle icon generation requests.
///
/// # Endpoint
///
/// `POST /api/generate-svg`
///
/// # Request
///
/// ```json
/// { "userinput": "tree" }
/// ```
///
/// # Response
///
/// `200 OK` when at least one image was vectorized:
/// ```json
/// {
///   "success": true,
///   "message": "Generated 2 icons",
///   "data": { "images": [ { "url": "https://...", "svg": "<svg ...>" } ] },
///   "error": null
/// }
/// ```
///
/// # Errors
///
/// - `400 Bad Request`: Missing, empty or malformed input
/// - `429 Too Many Requests`: Quota exhausted (with `Retry-After`)
/// - `502 Bad Gateway`: Generator failed, or no image could be vectorized
/// - `503 Service Unavailable`: Rate limiter is not ready
pub async fn generate_svg_handler<G, F>(
    State(state): State<AppState<G, F>>,
    caller: CallerContext,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Response, GateError>
where
    G: ImageGenerator + 'static,
    F: ImageFetcher + 'static,
{
    let Json(request) =
        payload.map_err(|rejection| GateError::Validation(rejection.body_text()))?;

    let result = state
        .gate
        .handle(
            request.userinput.as_deref(),
            caller.auth.as_ref(),
            &caller.source_address,
        )
        .await?;

    let outcome = &result.outcome;
    let data = ImagesData::from(outcome);

    let (status, body) = if outcome.overall_success {
        info!(
            succeeded = outcome.success_count(),
            failed = outcome.failure_count(),
            "Icons generated"
        );
        let message = if outcome.failure_count() == 0 {
            format!("Generated {} icons", outcome.success_count())
        } else {
            format!(
                "Generated {} of {} icons",
                outcome.success_count(),
                outcome.results.len()
            )
        };
        (StatusCode::OK, ApiResponse::success(message, data))
    } else {
        error!(
            error_type = "vectorization_failed",
            status = StatusCode::BAD_GATEWAY.as_u16(),
            failed = outcome.failure_count(),
            "Server error: no generated image could be vectorized"
        );
        (
            StatusCode::BAD_GATEWAY,
            ApiResponse::failure(
                "vectorization_failed",
                "Failed to vectorize any generated image",
            )
            .with_data(data),
        )
    };

    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        RATE_LIMIT_REMAINING_HEADER,
        HeaderValue::from(result.admission.remaining),
    );

    Ok(response)
}

/// Health check endpoint.
///
/// # Endpoint
///
/// `GET /health`
///
/// # Response
///
/// Always `200 OK`:
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "rate_limiter": "ready"
/// }
/// ```
pub async fn health_handler<G, F>(State(state): State<AppState<G, F>>) -> Json<HealthResponse>
where
    G: ImageGenerator + 'static,
    F: ImageFetcher + 'static,
{
    let limiter = state.gate.limiter();
    let status = if limiter.is_ready() {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        rate_limiter: limiter.readiness().to_string(),
    })
}

// =============================================================================
// Tests
// =============================================================================
