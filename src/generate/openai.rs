use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use super::ImageGenerator;
use crate::error::GenerationError;
use crate::pipeline::RasterReference;

pub const DEFAULT_IMAGE_API_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_IMAGE_MODEL: &str = "dall-e-2";
pub const DEFAULT_IMAGE_SIZE: &str = "1024x1024";

/// Generation can be slow; this bounds a single call.
const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(120);

/// OpenAI-compatible image generator.
pub struct OpenAiImageGenerator {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    size: String,
}

impl OpenAiImageGenerator {
    /// Create a generator. A missing or blank key is accepted here and
    /// reported on the first call, so the server can still start.
    pub fn new(api_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(DEFAULT_GENERATION_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                error!(error = %e, "Failed to build HTTP client with custom timeout, using default client");
                Client::new()
            });

        Self {
            client,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            base_url: DEFAULT_IMAGE_API_BASE_URL.to_string(),
            model: DEFAULT_IMAGE_MODEL.to_string(),
            size: DEFAULT_IMAGE_SIZE.to_string(),
        }
    }

    /// Set custom base URL (for proxies or compatible services)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.size = size.into();
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn generations_url(&self) -> String {
        format!("{}/images/generations", self.base_url)
    }
}

#[async_trait]
impl ImageGenerator for OpenAiImageGenerator {
    async fn generate(
        &self,
        prompt: &str,
        count: u8,
    ) -> Result<Vec<RasterReference>, GenerationError> {
        let api_key = self.api_key.as_deref().ok_or(GenerationError::MissingApiKey)?;

        let request = GenerationRequest {
            model: &self.model,
            prompt,
            n: count,
            size: &self.size,
        };

        debug!(model = %self.model, n = count, "Requesting image generation");

        let response = self
            .client
            .post(self.generations_url())
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| GenerationError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = error_message(&text);
            error!(status = %status, "Image generation API error: {}", message);
            return Err(GenerationError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body: GenerationResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;

        references_from_response(body)
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Serialize)]
struct GenerationRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u8,
    size: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    #[serde(default)]
    data: Vec<GeneratedImage>,
}

#[derive(Debug, Deserialize)]
struct GeneratedImage {
    url: Option<String>,
    revised_prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

fn references_from_response(
    body: GenerationResponse,
) -> Result<Vec<RasterReference>, GenerationError> {
    let total = body.data.len();
    let references: Vec<RasterReference> = body
        .data
        .into_iter()
        .filter_map(|image| {
            let url = image.url?;
            Some(RasterReference {
                url,
                revised_prompt: image.revised_prompt,
            })
        })
        .collect();

    if references.len() < total {
        warn!(
            skipped = total - references.len(),
            "Generator returned images without a URL"
        );
    }

    if references.is_empty() {
        return Err(GenerationError::InvalidResponse(
            "response contained no image URLs".to_string(),
        ));
    }

    Ok(references)
}

/// Pull the human-readable message out of an error body, if it has one.
fn error_message(body: &str) -> String {
    serde_json::from_str::<ApiErrorBody>(body)
        .map(|parsed| parsed.error.message)
        .unwrap_or_else(|_| body.chars().take(500).collect())
}
