//! Upstream raster generation.
//!
//! The gate only sees the [`ImageGenerator`] trait. [`OpenAiImageGenerator`]
//! talks to any OpenAI-compatible `images/generations` endpoint.

mod openai;

use async_trait::async_trait;

use crate::error::GenerationError;
use crate::pipeline::RasterReference;

pub use openai::{
    OpenAiImageGenerator, DEFAULT_IMAGE_API_BASE_URL, DEFAULT_IMAGE_MODEL, DEFAULT_IMAGE_SIZE,
};

/// Produces raster images for a prompt.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Generate `count` images for `prompt`.
    ///
    /// One network call; implementations must not retry.
    async fn generate(&self, prompt: &str, count: u8)
        -> Result<Vec<RasterReference>, GenerationError>;
}

/// Wrap a user concept in the icon-style prompt sent to the generator.
pub fn build_prompt(concept: &str) -> String {
    format!(
        "A clean, minimalistic black-and-white line drawing icon in vector style, \
         representing the concept of '{}'. The illustration should be simple, elegant, \
         and symbolic, suitable for use as an app icon or logo. Use only fine black lines \
         on a white background. No shading, no color, no extra elements unrelated to the \
         concept. Centered and clearly recognizable.",
        concept
    )
}
