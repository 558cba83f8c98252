use std::io::Cursor;

use image::{ImageFormat, ImageReader, RgbaImage};

use crate::error::PipelineError;

/// Rasters above this many pixels are refused (40 megapixels).
pub const MAX_DECODED_PIXELS: u64 = 40_000_000;

/// Decode PNG, JPEG or WebP bytes into an RGBA raster.
///
/// The format is sniffed from the bytes, not from the URL or content type.
/// Dimensions are read from the header and checked before any pixel buffer
/// is allocated.
pub fn decode_raster(bytes: &[u8]) -> Result<RgbaImage, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::Decode("empty image body".to_string()));
    }

    let format = image::guess_format(bytes)
        .map_err(|e| PipelineError::Decode(format!("unrecognized image format: {}", e)))?;

    let (width, height) = ImageReader::with_format(Cursor::new(bytes), format)
        .into_dimensions()
        .map_err(|e| PipelineError::Decode(e.to_string()))?;
    check_dimensions(width, height)?;

    let decoded = decode_with_format(bytes, format)?;
    check_dimensions(decoded.width(), decoded.height())?;

    Ok(decoded.to_rgba8())
}

fn decode_with_format(
    bytes: &[u8],
    format: ImageFormat,
) -> Result<image::DynamicImage, PipelineError> {
    ImageReader::with_format(Cursor::new(bytes), format)
        .decode()
        .map_err(|e| PipelineError::Decode(e.to_string()))
}

fn check_dimensions(width: u32, height: u32) -> Result<(), PipelineError> {
    if width == 0 || height == 0 {
        return Err(PipelineError::Decode("image has no pixels".to_string()));
    }
    if u64::from(width) * u64::from(height) > MAX_DECODED_PIXELS {
        return Err(PipelineError::Decode(format!(
            "image is {}x{}, larger than {} pixels",
            width, height, MAX_DECODED_PIXELS
        )));
    }
    Ok(())
}
