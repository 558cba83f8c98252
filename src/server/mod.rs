//! HTTP server layer for iconforge.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │        POST /api/generate-svg            GET /health            │
//! │                                                                 │
//! │  ┌─────────────┐  ┌──────────────┐  ┌────────────────────────┐  │
//! │  │  handlers   │  │     auth     │  │        routes          │  │
//! │  │ (envelope)  │  │  (sessions)  │  │    (router config)     │  │
//! │  └─────────────┘  └──────────────┘  └────────────────────────┘  │
//! └────────────────────────────────┬────────────────────────────────┘
//!                                  │
//!                                  ▼
//!                             RequestGate
//! ```

pub mod auth;
pub mod handlers;
pub mod routes;

pub use auth::{
    source_address, token_from_headers, AuthError, CallerContext, SessionResolver,
    SessionTokenAuth, SESSION_COOKIE,
};
pub use handlers::{
    generate_svg_handler, health_handler, ApiResponse, AppState, GenerateRequest,
    HealthResponse, ImageResult, ImagesData, RATE_LIMIT_REMAINING_HEADER,
};
pub use routes::{create_router, RouterConfig};
