//! Request gate for the generation endpoint.
//!
//! Every generation request passes through [`RequestGate::handle`], which runs
//! the steps in a fixed order:
//!
//! 1. validate the input (nothing else is touched for a bad request)
//! 2. classify the caller and consume one unit of their quota
//! 3. ask the generator for rasters (one call, no retries)
//! 4. vectorize every raster
//!
//! The first failing step short-circuits the rest.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::GateError;
use crate::generate::{build_prompt, ImageGenerator};
use crate::limiter::{classify, Admission, AuthContext, LimiterRegistry};
use crate::pipeline::{ImageFetcher, PipelineOutcome, TraceOptions, VectorizationPipeline};

/// Images requested from the generator per call.
pub const DEFAULT_IMAGES_PER_REQUEST: u8 = 2;

/// Longest accepted concept, in characters.
pub const MAX_INPUT_CHARS: usize = 200;

/// An admitted and processed request.
#[derive(Debug, Clone)]
pub struct GateOutcome {
    pub admission: Admission,
    pub outcome: PipelineOutcome,
}

pub struct RequestGate<G: ImageGenerator, F: ImageFetcher> {
    limiter: Arc<LimiterRegistry>,
    generator: Arc<G>,
    pipeline: VectorizationPipeline<F>,
    images_per_request: u8,
    trace_options: TraceOptions,
}

impl<G: ImageGenerator, F: ImageFetcher> Clone for RequestGate<G, F> {
    fn clone(&self) -> Self {
        Self {
            limiter: Arc::clone(&self.limiter),
            generator: Arc::clone(&self.generator),
            pipeline: self.pipeline.clone(),
            images_per_request: self.images_per_request,
            trace_options: self.trace_options,
        }
    }
}

impl<G: ImageGenerator, F: ImageFetcher + 'static> RequestGate<G, F> {
    pub fn new(
        limiter: Arc<LimiterRegistry>,
        generator: Arc<G>,
        pipeline: VectorizationPipeline<F>,
    ) -> Self {
        Self {
            limiter,
            generator,
            pipeline,
            images_per_request: DEFAULT_IMAGES_PER_REQUEST,
            trace_options: TraceOptions::default(),
        }
    }

    pub fn with_images_per_request(mut self, count: u8) -> Self {
        self.images_per_request = count.max(1);
        self
    }

    pub fn with_trace_options(mut self, options: TraceOptions) -> Self {
        self.trace_options = options;
        self
    }

    pub fn limiter(&self) -> &Arc<LimiterRegistry> {
        &self.limiter
    }

    pub fn images_per_request(&self) -> u8 {
        self.images_per_request
    }

    pub fn trace_options(&self) -> &TraceOptions {
        &self.trace_options
    }

    /// Run one generation request end to end.
    pub async fn handle(
        &self,
        input: Option<&str>,
        auth: Option<&AuthContext>,
        source_address: &str,
    ) -> Result<GateOutcome, GateError> {
        let concept = validate_input(input)?;

        let identity = classify(auth, source_address);
        let admission = self.limiter.admit(&identity).await.map_err(|e| {
            debug!(tier = %identity.tier(), error = %e, "Request not admitted");
            GateError::from(e)
        })?;

        info!(
            tier = %admission.tier,
            authenticated = identity.is_authenticated(),
            remaining = admission.remaining,
            "Generating icons"
        );

        let prompt = build_prompt(&concept);
        let references = self
            .generator
            .generate(&prompt, self.images_per_request)
            .await
            .map_err(|e| {
                warn!(error = %e, "Image generation failed");
                GateError::UpstreamGeneration(e)
            })?;

        let outcome = self
            .pipeline
            .vectorize_all(references, &self.trace_options)
            .await;

        Ok(GateOutcome { admission, outcome })
    }
}

/// Check and normalize the raw concept text.
pub fn validate_input(input: Option<&str>) -> Result<String, GateError> {
    let concept = input.map(str::trim).unwrap_or_default();
    if concept.is_empty() {
        return Err(GateError::Validation("userinput is required".to_string()));
    }
    if concept.chars().count() > MAX_INPUT_CHARS {
        return Err(GateError::Validation(format!(
            "userinput must be at most {} characters",
            MAX_INPUT_CHARS
        )));
    }
    if concept.chars().any(char::is_control) {
        return Err(GateError::Validation(
            "userinput must not contain control characters".to_string(),
        ));
    }
    Ok(concept.to_string())
}
