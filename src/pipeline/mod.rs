//! Image-to-vector conversion.
//!
//! Every raster reference goes through the same stages in its own task:
//!
//! ```text
//! Pending → Fetching → Decoding → Tracing → Sanitizing → Done(svg | error)
//! ```
//!
//! Fetching is the only stage that waits on the network; the others run on
//! the blocking pool. A failure at any stage ends that item only.

mod decode;
mod fetch;
mod sanitize;
mod service;
pub mod trace;

pub use decode::{decode_raster, MAX_DECODED_PIXELS};
pub use fetch::{
    validate_url, HttpImageFetcher, ImageFetcher, DEFAULT_FETCH_TIMEOUT, DEFAULT_MAX_IMAGE_BYTES,
};
pub use sanitize::sanitize;
pub use service::{
    ItemStage, PipelineOutcome, RasterReference, VectorResult, VectorizationPipeline,
    DEFAULT_BATCH_TIMEOUT,
};
pub use trace::{trace_to_svg, trace_to_svg_cancellable, TraceOptions};
