//! Configuration management for iconforge.
//!
//! This module provides a flexible configuration system that supports:
//! - Command-line arguments via clap
//! - Environment variables with `ICONFORGE_` prefix
//! - Sensible defaults for all optional settings
//!
//! # Subcommands
//!
//! - `serve` (default): run the HTTP server
//! - `trace`: vectorize a local file or URL to SVG
//! - `token`: mint a session token
//! - `check`: verify Redis connectivity and print the quota policies
//!
//! # Environment Variables
//!
//! - `ICONFORGE_HOST` - Server bind address (default: 0.0.0.0)
//! - `ICONFORGE_PORT` - Server port (default: 3000)
//! - `ICONFORGE_REDIS_URL` - Counter store URL (required unless `--memory-store`)
//! - `ICONFORGE_KEY_PREFIX` - Counter key prefix (default: rate)
//! - `ICONFORGE_GUEST_ALLOWANCE` / `_MEMBER_ALLOWANCE` / `_PREMIUM_ALLOWANCE`
//! - `ICONFORGE_WINDOW_SECS` - Quota window (default: 86400)
//! - `ICONFORGE_IMAGE_API_KEY` - Image generator API key
//! - `ICONFORGE_SESSION_SECRET` - shared secret for HS256 session tokens
//! - `ICONFORGE_CORS_ORIGINS` - Allowed CORS origins (comma-separated)

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::gate::DEFAULT_IMAGES_PER_REQUEST;
use crate::generate::{DEFAULT_IMAGE_API_BASE_URL, DEFAULT_IMAGE_MODEL, DEFAULT_IMAGE_SIZE};
use crate::limiter::{
    PolicyTable, DEFAULT_GUEST_ALLOWANCE, DEFAULT_KEY_PREFIX, DEFAULT_MEMBER_ALLOWANCE,
    DEFAULT_PREMIUM_ALLOWANCE, DEFAULT_WINDOW_SECS,
};
use crate::pipeline::trace::{
    DEFAULT_COLORS, DEFAULT_ERROR_THRESHOLD, DEFAULT_PATH_OMIT, DEFAULT_QUANTIZE_CYCLES,
    DEFAULT_ROUND_DIGITS,
};
use crate::pipeline::TraceOptions;

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default bound on one admission round trip, in milliseconds.
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 2000;

pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_BATCH_TIMEOUT_SECS: u64 = 90;

/// Default session token lifetime (24 hours).
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 24 * 60 * 60;

// =============================================================================
// CLI Arguments
// =============================================================================

/// iconforge - Text concepts to sanitized SVG icons.
///
/// Generates raster icons for a concept, traces them into vector paths and
/// serves the result behind tiered request quotas.
#[derive(Parser, Debug)]
#[command(name = "iconforge")]
#[command(author, version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Server options, used when no subcommand is given
    #[command(flatten)]
    pub serve: ServeConfig,
}

impl Cli {
    /// Resolve the command to run; no subcommand means `serve`.
    pub fn into_command(self) -> Command {
        self.command.unwrap_or(Command::Serve(self.serve))
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP server
    Serve(ServeConfig),

    /// Vectorize a local image or URL to SVG
    Trace(TraceConfig),

    /// Mint a session token
    Token(TokenConfig),

    /// Check Redis connectivity and print the quota policies
    Check(CheckConfig),
}

// =============================================================================
// Shared Argument Groups
// =============================================================================

/// Per-tier allowances and the shared window.
#[derive(Args, Debug, Clone)]
pub struct QuotaArgs {
    /// Requests per window for anonymous and unknown-role callers.
    #[arg(long, default_value_t = DEFAULT_GUEST_ALLOWANCE, env = "ICONFORGE_GUEST_ALLOWANCE")]
    pub guest_allowance: u32,

    /// Requests per window for members.
    #[arg(long, default_value_t = DEFAULT_MEMBER_ALLOWANCE, env = "ICONFORGE_MEMBER_ALLOWANCE")]
    pub member_allowance: u32,

    /// Requests per window for premium callers.
    #[arg(long, default_value_t = DEFAULT_PREMIUM_ALLOWANCE, env = "ICONFORGE_PREMIUM_ALLOWANCE")]
    pub premium_allowance: u32,

    /// Quota window length in seconds.
    #[arg(long, default_value_t = DEFAULT_WINDOW_SECS, env = "ICONFORGE_WINDOW_SECS")]
    pub window_secs: u64,
}

impl QuotaArgs {
    pub fn policy_table(&self) -> Result<PolicyTable, String> {
        PolicyTable::with_allowances(
            self.guest_allowance,
            self.member_allowance,
            self.premium_allowance,
            self.window_secs,
        )
    }
}

/// Tracer tuning.
#[derive(Args, Debug, Clone)]
pub struct TraceArgs {
    /// Simplification tolerance in pixels (smaller keeps more detail).
    #[arg(long, default_value_t = DEFAULT_ERROR_THRESHOLD, env = "ICONFORGE_ERROR_THRESHOLD")]
    pub error_threshold: f32,

    /// Fold one-pixel-thick lines into the surrounding colour.
    #[arg(long, default_value_t = false, env = "ICONFORGE_LINE_FILTER")]
    pub line_filter: bool,

    /// Palette size.
    #[arg(long, default_value_t = DEFAULT_COLORS, env = "ICONFORGE_COLORS")]
    pub colors: usize,

    /// K-means refinement passes.
    #[arg(long, default_value_t = DEFAULT_QUANTIZE_CYCLES, env = "ICONFORGE_QUANTIZE_CYCLES")]
    pub quantize_cycles: usize,

    /// Drop outlines with fewer vertices than this.
    #[arg(long, default_value_t = DEFAULT_PATH_OMIT, env = "ICONFORGE_PATH_OMIT")]
    pub path_omit: usize,

    /// Decimal places in emitted coordinates.
    #[arg(long, default_value_t = DEFAULT_ROUND_DIGITS, env = "ICONFORGE_ROUND_DIGITS")]
    pub round_digits: usize,
}

impl TraceArgs {
    pub fn options(&self) -> TraceOptions {
        TraceOptions {
            error_threshold: self.error_threshold,
            line_filter: self.line_filter,
            colors: self.colors,
            quantize_cycles: self.quantize_cycles,
            path_omit: self.path_omit,
            round_digits: self.round_digits,
        }
    }
}

// =============================================================================
// Serve Command
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "ICONFORGE_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "ICONFORGE_PORT")]
    pub port: u16,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Redis URL for the quota counters.
    #[arg(long, env = "ICONFORGE_REDIS_URL")]
    pub redis_url: Option<String>,

    /// Keep quota counters in process memory instead of Redis.
    ///
    /// Counters are lost on restart and not shared between instances.
    #[arg(long, default_value_t = false, env = "ICONFORGE_MEMORY_STORE")]
    pub memory_store: bool,

    /// Prefix for counter keys.
    #[arg(long, default_value = DEFAULT_KEY_PREFIX, env = "ICONFORGE_KEY_PREFIX")]
    pub key_prefix: String,

    #[command(flatten)]
    pub quota: QuotaArgs,

    /// Bound on one counter store round trip, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_STORE_TIMEOUT_MS, env = "ICONFORGE_STORE_TIMEOUT_MS")]
    pub store_timeout_ms: u64,

    // =========================================================================
    // Image Generation Configuration
    // =========================================================================
    /// API key for the image generator.
    ///
    /// The server starts without one; generation requests then fail with 502.
    #[arg(long, env = "ICONFORGE_IMAGE_API_KEY", hide_env_values = true)]
    pub image_api_key: Option<String>,

    /// Base URL of the OpenAI-compatible image API.
    #[arg(long, default_value = DEFAULT_IMAGE_API_BASE_URL, env = "ICONFORGE_IMAGE_API_BASE")]
    pub image_api_base: String,

    #[arg(long, default_value = DEFAULT_IMAGE_MODEL, env = "ICONFORGE_IMAGE_MODEL")]
    pub image_model: String,

    #[arg(long, default_value = DEFAULT_IMAGE_SIZE, env = "ICONFORGE_IMAGE_SIZE")]
    pub image_size: String,

    /// Images generated (and vectorized) per request.
    #[arg(long, default_value_t = DEFAULT_IMAGES_PER_REQUEST, env = "ICONFORGE_IMAGES_PER_REQUEST")]
    pub images_per_request: u8,

    // =========================================================================
    // Vectorization Configuration
    // =========================================================================
    /// Timeout for fetching one raster, in seconds.
    #[arg(long, default_value_t = DEFAULT_FETCH_TIMEOUT_SECS, env = "ICONFORGE_FETCH_TIMEOUT_SECS")]
    pub fetch_timeout_secs: u64,

    /// Deadline for vectorizing a whole batch, in seconds.
    #[arg(long, default_value_t = DEFAULT_BATCH_TIMEOUT_SECS, env = "ICONFORGE_BATCH_TIMEOUT_SECS")]
    pub batch_timeout_secs: u64,

    #[command(flatten)]
    pub trace: TraceArgs,

    // =========================================================================
    // Authentication Configuration
    // =========================================================================
    /// Shared secret for HS256 session tokens (the login flow's JWT secret).
    ///
    /// Without it every caller is treated as an anonymous guest.
    #[arg(long, env = "ICONFORGE_SESSION_SECRET", hide_env_values = true)]
    pub session_secret: Option<String>,

    /// Key anonymous callers by the first `X-Forwarded-For` entry.
    ///
    /// Only enable behind a proxy that overwrites the header.
    #[arg(long, default_value_t = false, env = "ICONFORGE_TRUST_FORWARDED_FOR")]
    pub trust_forwarded_for: bool,

    // =========================================================================
    // CORS Configuration
    // =========================================================================
    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "ICONFORGE_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if !self.memory_store && self.redis_url.as_deref().map_or(true, str::is_empty) {
            return Err(
                "No counter store configured. \
                 Set --redis-url or ICONFORGE_REDIS_URL, or use --memory-store"
                    .to_string(),
            );
        }

        if self.key_prefix.is_empty() {
            return Err("key_prefix must not be empty".to_string());
        }

        self.quota.policy_table()?;

        if self.store_timeout_ms == 0 {
            return Err("store_timeout_ms must be greater than 0".to_string());
        }

        if self.images_per_request == 0 || self.images_per_request > 10 {
            return Err("images_per_request must be between 1 and 10".to_string());
        }

        if self.fetch_timeout_secs == 0 {
            return Err("fetch_timeout_secs must be greater than 0".to_string());
        }
        if self.batch_timeout_secs < self.fetch_timeout_secs {
            return Err("batch_timeout_secs must be at least fetch_timeout_secs".to_string());
        }

        self.trace.options().validate()?;

        if self.session_secret.as_deref() == Some("") {
            return Err("session_secret must not be empty when set".to_string());
        }

        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }
}

// =============================================================================
// Trace Command
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct TraceConfig {
    /// Image file path, or an http(s) URL.
    pub input: String,

    /// Write the SVG here instead of stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Timeout for fetching a URL input, in seconds.
    #[arg(long, default_value_t = DEFAULT_FETCH_TIMEOUT_SECS)]
    pub fetch_timeout_secs: u64,

    /// Skip sanitization of the traced output.
    #[arg(long, default_value_t = false)]
    pub raw: bool,

    #[command(flatten)]
    pub trace: TraceArgs,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl TraceConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.input.trim().is_empty() {
            return Err("input must not be empty".to_string());
        }
        if self.fetch_timeout_secs == 0 {
            return Err("fetch_timeout_secs must be greater than 0".to_string());
        }
        self.trace.options().validate()
    }

    /// Whether the input names a remote image.
    pub fn is_url(&self) -> bool {
        self.input.starts_with("http://") || self.input.starts_with("https://")
    }
}

// =============================================================================
// Token Command
// =============================================================================

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TokenOutputFormat {
    /// Just the token
    #[default]
    Token,
    /// JSON with the token, claims and expiry
    Json,
}

#[derive(Args, Debug, Clone)]
pub struct TokenConfig {
    /// Secret key shared with the server.
    #[arg(long, env = "ICONFORGE_SESSION_SECRET", hide_env_values = true)]
    pub secret: String,

    /// Caller identifier.
    #[arg(long)]
    pub id: String,

    /// Caller role (guest, member, premium).
    #[arg(long, default_value = "member")]
    pub role: String,

    /// Token lifetime in seconds.
    #[arg(long, default_value_t = DEFAULT_TOKEN_TTL_SECS)]
    pub ttl: u64,

    #[arg(long, value_enum, default_value_t = TokenOutputFormat::Token)]
    pub format: TokenOutputFormat,
}

impl TokenConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.secret.is_empty() {
            return Err("secret must not be empty".to_string());
        }
        if self.id.trim().is_empty() {
            return Err("id must not be empty".to_string());
        }
        if self.ttl == 0 {
            return Err("ttl must be greater than 0".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Check Command
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct CheckConfig {
    /// Redis URL to test. Without it only the policies are printed.
    #[arg(long, env = "ICONFORGE_REDIS_URL")]
    pub redis_url: Option<String>,

    #[command(flatten)]
    pub quota: QuotaArgs,

    /// Bound on the connectivity test, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_STORE_TIMEOUT_MS, env = "ICONFORGE_STORE_TIMEOUT_MS")]
    pub store_timeout_ms: u64,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

// =============================================================================
// Tests
// =============================================================================
