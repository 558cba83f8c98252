//! Fan-out/fan-in vectorization of a batch of raster references.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::decode::decode_raster;
use super::fetch::ImageFetcher;
use super::sanitize::sanitize;
use super::trace::{trace_to_svg_cancellable, TraceOptions};
use crate::error::PipelineError;

/// Default bound on the whole batch.
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(90);

// =============================================================================
// Types
// =============================================================================

/// A pointer to a generated raster image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RasterReference {
    pub url: String,

    /// Prompt as rewritten by the generator, when it reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revised_prompt: Option<String>,
}

impl RasterReference {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            revised_prompt: None,
        }
    }

    pub fn with_revised_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.revised_prompt = Some(prompt.into());
        self
    }
}

/// Result for one reference: sanitized SVG markup or the error that stopped it.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorResult {
    pub source: RasterReference,
    pub outcome: Result<String, PipelineError>,
}

impl VectorResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn svg(&self) -> Option<&str> {
        self.outcome.as_ref().ok().map(String::as_str)
    }

    pub fn error(&self) -> Option<&PipelineError> {
        self.outcome.as_ref().err()
    }
}

/// Results for a whole batch, in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutcome {
    pub results: Vec<VectorResult>,

    /// True when at least one result carries markup
    pub overall_success: bool,
}

impl PipelineOutcome {
    pub fn from_results(results: Vec<VectorResult>) -> Self {
        let overall_success = results.iter().any(VectorResult::is_success);
        Self {
            results,
            overall_success,
        }
    }

    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.results.len() - self.success_count()
    }
}

/// Where an item is in its lifecycle. Only used for logging; items never
/// move backwards and are not retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStage {
    Pending,
    Fetching,
    Decoding,
    Tracing,
    Sanitizing,
    Done,
}

impl ItemStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStage::Pending => "pending",
            ItemStage::Fetching => "fetching",
            ItemStage::Decoding => "decoding",
            ItemStage::Tracing => "tracing",
            ItemStage::Sanitizing => "sanitizing",
            ItemStage::Done => "done",
        }
    }
}

impl fmt::Display for ItemStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// VectorizationPipeline
// =============================================================================

/// Turns raster references into sanitized SVG markup.
///
/// Each reference runs in its own task. A failing item never cancels its
/// siblings; its error is recorded in its own slot of the outcome.
pub struct VectorizationPipeline<F: ImageFetcher> {
    fetcher: Arc<F>,
    batch_timeout: Duration,
}

impl<F: ImageFetcher> Clone for VectorizationPipeline<F> {
    fn clone(&self) -> Self {
        Self {
            fetcher: Arc::clone(&self.fetcher),
            batch_timeout: self.batch_timeout,
        }
    }
}

impl<F: ImageFetcher + 'static> VectorizationPipeline<F> {
    pub fn new(fetcher: F) -> Self {
        Self::from_arc(Arc::new(fetcher))
    }

    pub fn from_arc(fetcher: Arc<F>) -> Self {
        Self {
            fetcher,
            batch_timeout: DEFAULT_BATCH_TIMEOUT,
        }
    }

    pub fn with_batch_timeout(mut self, batch_timeout: Duration) -> Self {
        self.batch_timeout = batch_timeout;
        self
    }

    pub fn batch_timeout(&self) -> Duration {
        self.batch_timeout
    }

    pub fn fetcher(&self) -> &Arc<F> {
        &self.fetcher
    }

    /// Vectorize every reference concurrently.
    ///
    /// Always returns exactly one result per reference, in input order.
    /// Items still running when the batch deadline passes are aborted and
    /// reported as [`PipelineError::DeadlineExceeded`]; blocking work they
    /// already started stops at its next cancellation check.
    pub async fn vectorize_all(
        &self,
        references: Vec<RasterReference>,
        options: &TraceOptions,
    ) -> PipelineOutcome {
        let deadline = Instant::now() + self.batch_timeout;
        let total = references.len();

        let tasks: Vec<(RasterReference, JoinHandle<Result<String, PipelineError>>)> = references
            .into_iter()
            .enumerate()
            .map(|(index, reference)| {
                let fetcher = Arc::clone(&self.fetcher);
                let url = reference.url.clone();
                let options = *options;
                debug!(index, stage = %ItemStage::Pending, url = %url, "Item stage");
                let handle =
                    tokio::spawn(async move { vectorize_item(fetcher, index, url, options).await });
                (reference, handle)
            })
            .collect();

        let mut results = Vec::with_capacity(total);
        for (index, (source, mut handle)) in tasks.into_iter().enumerate() {
            let outcome = match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(join_error)) => {
                    warn!(index, error = %join_error, "Vectorization task failed");
                    Err(PipelineError::TaskFailed(join_error.to_string()))
                }
                Err(_) => {
                    handle.abort();
                    warn!(index, url = %source.url, "Vectorization batch deadline exceeded");
                    Err(PipelineError::DeadlineExceeded {
                        secs: self.batch_timeout.as_secs(),
                    })
                }
            };
            results.push(VectorResult { source, outcome });
        }

        let outcome = PipelineOutcome::from_results(results);
        info!(
            total,
            succeeded = outcome.success_count(),
            failed = outcome.failure_count(),
            "Vectorization batch finished"
        );
        outcome
    }

    /// Vectorize a single reference inline, without a batch deadline.
    pub async fn vectorize_one(
        &self,
        reference: &RasterReference,
        options: &TraceOptions,
    ) -> Result<String, PipelineError> {
        vectorize_item(Arc::clone(&self.fetcher), 0, reference.url.clone(), *options).await
    }
}

/// Run one item through every stage.
async fn vectorize_item<F: ImageFetcher + ?Sized>(
    fetcher: Arc<F>,
    index: usize,
    url: String,
    options: TraceOptions,
) -> Result<String, PipelineError> {
    let result = run_stages(&*fetcher, index, &url, options).await;
    match &result {
        Ok(svg) => debug!(index, stage = %ItemStage::Done, bytes = svg.len(), "Image vectorized"),
        Err(e) => warn!(index, url = %url, error = %e, "Image vectorization failed"),
    }
    result
}

async fn run_stages<F: ImageFetcher + ?Sized>(
    fetcher: &F,
    index: usize,
    url: &str,
    options: TraceOptions,
) -> Result<String, PipelineError> {
    debug!(index, stage = %ItemStage::Fetching, url = %url, "Item stage");
    let bytes = fetcher.fetch(url).await?;

    // Dropping this future (deadline abort) signals the blocking stages.
    let guard = CancelOnDrop::new();
    let cancelled = guard.flag();

    // Decode, trace and sanitize are CPU-bound.
    tokio::task::spawn_blocking(move || run_blocking_stages(index, &bytes, &options, &cancelled))
        .await
        .map_err(|e| PipelineError::TaskFailed(e.to_string()))?
}

/// Decode, trace and sanitize, checking `cancelled` between stages.
fn run_blocking_stages(
    index: usize,
    bytes: &[u8],
    options: &TraceOptions,
    cancelled: &AtomicBool,
) -> Result<String, PipelineError> {
    let check = || {
        if cancelled.load(Ordering::Relaxed) {
            debug!(index, "Item cancelled");
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    };

    check()?;
    debug!(index, stage = %ItemStage::Decoding, bytes = bytes.len(), "Item stage");
    let raster = decode_raster(bytes)?;

    check()?;
    debug!(
        index,
        stage = %ItemStage::Tracing,
        width = raster.width(),
        height = raster.height(),
        "Item stage"
    );
    let svg = trace_to_svg_cancellable(&raster, options, cancelled)?;

    check()?;
    debug!(index, stage = %ItemStage::Sanitizing, "Item stage");
    sanitize(&svg)
}

/// Sets a shared flag when dropped.
struct CancelOnDrop(Arc<AtomicBool>);

impl CancelOnDrop {
    fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}
