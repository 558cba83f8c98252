//! # iconforge
//!
//! Turns short text concepts into sanitized SVG icons.
//!
//! A request names a concept ("tree"). The service asks an image generator
//! for raster icons, traces each raster into vector paths, strips anything
//! executable from the result and returns the SVGs. Every request spends one
//! unit of the caller's quota, set by the caller's tier.
//!
//! ## Features
//!
//! - **Tiered quotas**: Guest, member and premium allowances over a fixed
//!   window, counted in Redis (or in memory for development)
//! - **Fail closed**: No request is admitted until the counter store is ready
//! - **Concurrent vectorization**: One task per image, results in input order,
//!   partial success reported per image
//! - **Sanitized output**: Scripts, event handlers and dangerous CSS never
//!   reach the client
//! - **Session tokens**: Optional HS256 JWTs carry the caller's tier
//!
//! ## Architecture
//!
//! - [`store`] - Counter store backends (Redis, in-memory)
//! - [`limiter`] - Tiers, quota policies and the limiter registry
//! - [`generate`] - Upstream image generator client
//! - [`pipeline`] - Fetch, decode, trace and sanitize
//! - [`gate`] - Per-request orchestration
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use iconforge::{
//!     create_router, HttpImageFetcher, InMemoryCounterStore, LimiterRegistry,
//!     OpenAiImageGenerator, PolicyTable, RequestGate, RouterConfig, VectorizationPipeline,
//!     DEFAULT_FETCH_TIMEOUT,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let limiter = Arc::new(LimiterRegistry::with_store(
//!         PolicyTable::default(),
//!         Arc::new(InMemoryCounterStore::new()),
//!     ));
//!     let generator = Arc::new(OpenAiImageGenerator::new(std::env::var("OPENAI_API_KEY").ok()));
//!     let pipeline = VectorizationPipeline::new(HttpImageFetcher::new(DEFAULT_FETCH_TIMEOUT));
//!
//!     let gate = RequestGate::new(limiter, generator, pipeline);
//!     let router = create_router(gate, RouterConfig::new());
//!
//!     // Serve with `into_make_service_with_connect_info::<SocketAddr>()`...
//! #   let _ = router;
//! }
//! ```

pub mod config;
pub mod error;
pub mod gate;
pub mod generate;
pub mod limiter;
pub mod pipeline;
pub mod server;
pub mod store;

// Re-export commonly used types
pub use config::{
    CheckConfig, Cli, Command, QuotaArgs, ServeConfig, TokenConfig, TokenOutputFormat, TraceArgs,
    TraceConfig,
};
pub use error::{AdmissionError, GateError, GenerationError, PipelineError, StoreError};
pub use gate::{validate_input, GateOutcome, RequestGate, DEFAULT_IMAGES_PER_REQUEST, MAX_INPUT_CHARS};
pub use generate::{build_prompt, ImageGenerator, OpenAiImageGenerator};
pub use limiter::{
    classify, Admission, AuthContext, CallerIdentity, LimiterRegistry, LimiterState, PolicyTable,
    QuotaPolicy, Readiness, RetryPolicy, Tier,
};
pub use pipeline::{
    decode_raster, sanitize, trace_to_svg, HttpImageFetcher, ImageFetcher, PipelineOutcome,
    RasterReference, TraceOptions, VectorResult, VectorizationPipeline, DEFAULT_BATCH_TIMEOUT,
    DEFAULT_FETCH_TIMEOUT,
};
pub use server::{
    create_router, generate_svg_handler, health_handler, ApiResponse, AppState, AuthError,
    CallerContext, HealthResponse, RouterConfig, SessionResolver, SessionTokenAuth,
};
pub use store::{
    CounterSnapshot, CounterStore, InMemoryConnector, InMemoryCounterStore, RedisConnector,
    RedisCounterStore, StoreConnector,
};
