use thiserror::Error;

use crate::limiter::Tier;

/// Errors raised by a counter store backend.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Could not open or verify a connection to the store
    #[error("Connection error: {0}")]
    Connection(String),

    /// The store rejected or failed a command
    #[error("Command error: {0}")]
    Command(String),

    /// The store replied with data we could not interpret
    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),
}

/// Reasons an admission attempt did not result in `Admitted`.
#[derive(Debug, Clone, Error)]
pub enum AdmissionError {
    /// The caller has used up the allowance for the current window
    #[error("Quota exhausted for {tier} tier, retry in {retry_after_secs}s")]
    RateLimited { tier: Tier, retry_after_secs: u64 },

    /// The counter store is not connected yet (or gave up connecting)
    #[error("Rate limiter is not ready: {state}")]
    NotReady { state: String },

    /// The counter store round trip did not finish in time
    #[error("Counter store did not answer within {timeout_ms}ms")]
    StoreTimeout { timeout_ms: u64 },

    /// The counter store answered with an error
    #[error("Counter store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors from the upstream image generator.
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    /// No API key was configured
    #[error("Image API key is not configured")]
    MissingApiKey,

    /// Transport-level failure talking to the generator
    #[error("Image generation request failed: {0}")]
    Request(String),

    /// The generator answered with a non-success status
    #[error("Image generator returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The generator answered with a body we could not use
    #[error("Invalid generator response: {0}")]
    InvalidResponse(String),
}

/// Per-image pipeline failures.
///
/// These never escape the pipeline; each one is captured into the result of
/// the image it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// The raster URL could not be fetched
    #[error("Failed to fetch image: {0}")]
    Fetch(String),

    /// The raster host answered with a non-success status
    #[error("Failed to fetch image: HTTP {status}")]
    FetchStatus { status: u16 },

    /// The fetch did not complete within the per-fetch timeout
    #[error("Fetching image timed out after {secs}s")]
    FetchTimeout { secs: u64 },

    /// The fetched bytes are not a decodable raster
    #[error("Failed to decode image: {0}")]
    Decode(String),

    /// The tracer could not produce vector output
    #[error("Failed to trace image: {0}")]
    Trace(String),

    /// The sanitizer could not guarantee safe output
    #[error("Sanitization fault: {0}")]
    Sanitization(String),

    /// The batch deadline passed before this image finished
    #[error("Batch deadline exceeded after {secs}s")]
    DeadlineExceeded { secs: u64 },

    /// The worker task for this image died
    #[error("Image task failed: {0}")]
    TaskFailed(String),

    /// The item was abandoned before its CPU-bound stages finished
    #[error("Image processing cancelled")]
    Cancelled,
}

/// Errors that short-circuit a generation request at the gate.
#[derive(Debug, Clone, Error)]
pub enum GateError {
    /// The request itself is invalid (client fault)
    #[error("{0}")]
    Validation(String),

    /// The caller must wait before trying again
    #[error("Too many requests. Please try again in {retry_after_secs}s")]
    RateLimitExceeded { retry_after_secs: u64 },

    /// Admission could not be decided; the gate fails closed
    #[error("Rate limiter is not configured properly: {reason}")]
    RateLimiterNotReady { reason: String },

    /// The upstream generator failed
    #[error("Failed to generate image: {0}")]
    UpstreamGeneration(#[from] GenerationError),
}

impl From<AdmissionError> for GateError {
    fn from(err: AdmissionError) -> Self {
        match err {
            AdmissionError::RateLimited {
                retry_after_secs, ..
            } => GateError::RateLimitExceeded { retry_after_secs },
            other => GateError::RateLimiterNotReady {
                reason: other.to_string(),
            },
        }
    }
}
