//! Raster to SVG tracing.
//!
//! # Stages
//!
//! ```text
//! RgbaImage
//!    │ quantize (palette + k-means)
//!    ▼
//! palette indices ──(line filter)──▶ per-colour masks
//!    │ boundary tracing
//!    ▼
//! integer loops ──(omit short)──▶ edge midpoints ──▶ RDP ──▶ <path>
//! ```
//!
//! Layers are emitted largest first so smaller details paint over the
//! background they sit on.

mod contour;
mod quantize;
mod simplify;
mod svg;

use std::sync::atomic::{AtomicBool, Ordering};

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Default simplification tolerance, in pixels.
pub const DEFAULT_ERROR_THRESHOLD: f32 = 1.0;
pub const DEFAULT_COLORS: usize = 16;
pub const DEFAULT_QUANTIZE_CYCLES: usize = 3;
pub const DEFAULT_PATH_OMIT: usize = 8;
pub const DEFAULT_ROUND_DIGITS: usize = 1;

/// Largest palette a layer index can address.
pub const MAX_COLORS: usize = 256;

/// Tracing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceOptions {
    /// Maximum deviation, in pixels, a simplified outline may have from the
    /// traced one. Smaller keeps more detail.
    pub error_threshold: f32,

    /// Fold one-pixel-thick lines into the surrounding colour
    pub line_filter: bool,

    /// Palette size
    pub colors: usize,

    /// K-means refinement passes
    pub quantize_cycles: usize,

    /// Outlines with fewer vertices than this are dropped
    pub path_omit: usize,

    /// Decimal places in emitted coordinates
    pub round_digits: usize,
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self {
            error_threshold: DEFAULT_ERROR_THRESHOLD,
            line_filter: false,
            colors: DEFAULT_COLORS,
            quantize_cycles: DEFAULT_QUANTIZE_CYCLES,
            path_omit: DEFAULT_PATH_OMIT,
            round_digits: DEFAULT_ROUND_DIGITS,
        }
    }
}

impl TraceOptions {
    pub fn validate(&self) -> Result<(), String> {
        if !self.error_threshold.is_finite() || self.error_threshold < 0.0 {
            return Err("error_threshold must be a finite, non-negative number".to_string());
        }
        if self.colors == 0 || self.colors > MAX_COLORS {
            return Err(format!("colors must be between 1 and {}", MAX_COLORS));
        }
        if self.round_digits > 6 {
            return Err("round_digits must be at most 6".to_string());
        }
        Ok(())
    }
}

/// Trace `image` into a standalone SVG document.
///
/// CPU-bound; async callers should run it on the blocking pool.
pub fn trace_to_svg(image: &RgbaImage, options: &TraceOptions) -> Result<String, PipelineError> {
    trace_to_svg_cancellable(image, options, &AtomicBool::new(false))
}

/// Like [`trace_to_svg`], but gives up with [`PipelineError::Cancelled`]
/// once `cancelled` is set. The flag is checked after quantization and
/// before each colour layer.
pub fn trace_to_svg_cancellable(
    image: &RgbaImage,
    options: &TraceOptions,
    cancelled: &AtomicBool,
) -> Result<String, PipelineError> {
    options.validate().map_err(PipelineError::Trace)?;
    if image.width() == 0 || image.height() == 0 {
        return Err(PipelineError::Trace("image has no pixels".to_string()));
    }

    let mut quantized = quantize::quantize(image, options.colors, options.quantize_cycles);
    check_cancelled(cancelled)?;
    if options.line_filter {
        contour::filter_thin_lines(&mut quantized);
    }

    let histogram = quantized.histogram();
    let mut order: Vec<usize> = (0..quantized.palette.len())
        .filter(|&i| histogram[i] > 0)
        .collect();
    // Stable sort keeps palette order among equal-sized layers.
    order.sort_by(|a, b| histogram[*b].cmp(&histogram[*a]));

    let tolerance = f64::from(options.error_threshold);
    let layers = order
        .into_iter()
        .map(|index| {
            check_cancelled(cancelled)?;
            let mask = contour::LayerMask::from_quantized(&quantized, index as u8);
            let outlines = contour::trace_loops(&mask)
                .into_iter()
                .filter(|outline| outline.len() >= options.path_omit)
                .map(|outline| {
                    simplify::simplify_closed(&simplify::edge_midpoints(&outline), tolerance)
                })
                .filter(|outline| outline.len() >= 3)
                .collect();
            Ok(svg::Layer {
                color: quantized.palette[index],
                outlines,
            })
        })
        .collect::<Result<Vec<_>, PipelineError>>()?;

    Ok(svg::render(
        image.width(),
        image.height(),
        &layers,
        options.round_digits,
    ))
}

fn check_cancelled(cancelled: &AtomicBool) -> Result<(), PipelineError> {
    if cancelled.load(Ordering::Relaxed) {
        return Err(PipelineError::Cancelled);
    }
    Ok(())
}
