//! Palette quantization.
//!
//! Seeds are picked by farthest-point sampling over a strided subset of the
//! pixels (deterministic, and it gives a small dark feature on a large light
//! background its own entry), then refined with a few k-means passes.

use image::RgbaImage;

/// Upper bound on pixels examined while seeding.
const SEED_SAMPLE_TARGET: usize = 65_536;

pub type Rgba = [u8; 4];

/// Manhattan distance over all four channels.
#[inline]
pub fn distance(a: &Rgba, b: &Rgba) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (i32::from(*x) - i32::from(*y)).unsigned_abs())
        .sum()
}

/// Index of the palette entry closest to `pixel`.
#[inline]
pub fn nearest(palette: &[Rgba], pixel: &Rgba) -> usize {
    let mut best = 0;
    let mut best_distance = u32::MAX;
    for (i, color) in palette.iter().enumerate() {
        let d = distance(color, pixel);
        if d < best_distance {
            best = i;
            best_distance = d;
            if d == 0 {
                break;
            }
        }
    }
    best
}

/// Quantized image: palette plus one palette index per pixel (row-major).
#[derive(Debug, Clone)]
pub struct Quantized {
    pub width: usize,
    pub height: usize,
    pub palette: Vec<Rgba>,
    pub indices: Vec<u8>,
}

impl Quantized {
    #[cfg(test)]
    pub fn index_at(&self, x: usize, y: usize) -> u8 {
        self.indices[y * self.width + x]
    }

    /// Pixel count per palette entry.
    pub fn histogram(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.palette.len()];
        for &i in &self.indices {
            counts[i as usize] += 1;
        }
        counts
    }
}

/// Reduce `image` to at most `colors` palette entries.
///
/// `colors` must be in `1..=256`; callers validate it.
pub fn quantize(image: &RgbaImage, colors: usize, cycles: usize) -> Quantized {
    let width = image.width() as usize;
    let height = image.height() as usize;
    let pixels: Vec<Rgba> = image.pixels().map(|p| p.0).collect();

    let mut palette = seed_palette(&pixels, colors);

    for _ in 0..cycles {
        let mut sums = vec![[0u64; 4]; palette.len()];
        let mut counts = vec![0u64; palette.len()];

        for pixel in &pixels {
            let k = nearest(&palette, pixel);
            counts[k] += 1;
            for c in 0..4 {
                sums[k][c] += u64::from(pixel[c]);
            }
        }

        let mut moved = false;
        for (k, color) in palette.iter_mut().enumerate() {
            // Empty clusters keep their previous center.
            if counts[k] == 0 {
                continue;
            }
            let mean = [
                (sums[k][0] / counts[k]) as u8,
                (sums[k][1] / counts[k]) as u8,
                (sums[k][2] / counts[k]) as u8,
                (sums[k][3] / counts[k]) as u8,
            ];
            if mean != *color {
                *color = mean;
                moved = true;
            }
        }

        if !moved {
            break;
        }
    }

    let indices = pixels
        .iter()
        .map(|pixel| nearest(&palette, pixel) as u8)
        .collect();

    Quantized {
        width,
        height,
        palette,
        indices,
    }
}

/// Farthest-point seeding over a strided sample.
fn seed_palette(pixels: &[Rgba], colors: usize) -> Vec<Rgba> {
    if pixels.is_empty() {
        return vec![[0, 0, 0, 0]];
    }

    let step = (pixels.len() / SEED_SAMPLE_TARGET).max(1);
    let sample: Vec<Rgba> = pixels.iter().step_by(step).copied().collect();

    let mut palette = Vec::with_capacity(colors);
    palette.push(sample[0]);

    // Distance from each sample to its nearest seed so far.
    let mut nearest_distance: Vec<u32> = sample.iter().map(|p| distance(p, &sample[0])).collect();

    while palette.len() < colors {
        let (far_index, far_distance) = nearest_distance
            .iter()
            .enumerate()
            .max_by_key(|(_, d)| **d)
            .map(|(i, d)| (i, *d))
            .unwrap_or((0, 0));

        // Every sample already coincides with a seed.
        if far_distance == 0 {
            break;
        }

        let seed = sample[far_index];
        palette.push(seed);
        for (d, p) in nearest_distance.iter_mut().zip(sample.iter()) {
            *d = (*d).min(distance(p, &seed));
        }
    }

    palette
}
