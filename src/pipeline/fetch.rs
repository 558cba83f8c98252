use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::Client;
use tracing::{debug, error};

use crate::error::PipelineError;

/// Default per-fetch timeout.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest raster body we are willing to download (20 MiB).
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

// =============================================================================
// ImageFetcher Trait
// =============================================================================

/// Retrieves the bytes behind a raster reference.
///
/// The pipeline only depends on this trait, so tests can serve canned bytes
/// without a network.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Fetch the full body at `url`.
    async fn fetch(&self, url: &str) -> Result<Bytes, PipelineError>;
}

// =============================================================================
// HttpImageFetcher
// =============================================================================

/// [`ImageFetcher`] over HTTP(S) using `reqwest`.
#[derive(Clone)]
pub struct HttpImageFetcher {
    client: Client,
    timeout: Duration,
    max_bytes: usize,
}

impl HttpImageFetcher {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                error!(error = %e, "Failed to build HTTP client with custom timeout, using default client");
                Client::new()
            });

        Self {
            client,
            timeout,
            max_bytes: DEFAULT_MAX_IMAGE_BYTES,
        }
    }

    /// Override the maximum accepted body size.
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch_inner(&self, url: &str) -> Result<Bytes, PipelineError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::FetchStatus {
                status: status.as_u16(),
            });
        }

        if let Some(length) = response.content_length() {
            if length > self.max_bytes as u64 {
                return Err(PipelineError::Fetch(format!(
                    "image is {} bytes, limit is {}",
                    length, self.max_bytes
                )));
            }
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| self.map_transport_error(e))?
        {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(PipelineError::Fetch(format!(
                    "image exceeds {} bytes",
                    self.max_bytes
                )));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(body.freeze())
    }

    fn map_transport_error(&self, err: reqwest::Error) -> PipelineError {
        if err.is_timeout() {
            PipelineError::FetchTimeout {
                secs: self.timeout.as_secs(),
            }
        } else {
            PipelineError::Fetch(err.to_string())
        }
    }
}

impl Default for HttpImageFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_FETCH_TIMEOUT)
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, PipelineError> {
        validate_url(url)?;

        debug!(url = %url, "Fetching raster image");

        // The client timeout covers the request; this bounds the body read too.
        match tokio::time::timeout(self.timeout, self.fetch_inner(url)).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::FetchTimeout {
                secs: self.timeout.as_secs(),
            }),
        }
    }
}

/// Only absolute `http`/`https` URLs are fetched.
pub fn validate_url(raw: &str) -> Result<url::Url, PipelineError> {
    let parsed =
        url::Url::parse(raw).map_err(|e| PipelineError::Fetch(format!("invalid URL: {}", e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(PipelineError::Fetch(format!(
            "unsupported URL scheme '{}'",
            other
        ))),
    }
}
