//! Dominant colour extraction.
//!
//! Samples a bounded number of pixels, buckets colours on a fixed grid, and greedily keeps the
//! most frequent buckets that are at least `min_distance` apart from everything already kept.

use std::collections::HashMap;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};

use crate::colour::{Colour, distance};

/// Tuning knobs for [`extract`] and [`detect`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractOptions {
    pub max_colours: usize,
    /// Minimum Euclidean RGB distance between any two returned colours.
    pub min_distance: f64,
    /// Quantization step per channel; 0 behaves like 1.
    pub bin_width: u8,
    /// Upper bound on inspected pixels.
    pub sample_cap: usize,
    /// Pixels with alpha below this are skipped.
    pub alpha_threshold: u8,
    /// Longest image side before scanning (see [`downscale_for_scan`]).
    pub max_dimension: u32,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            max_colours: 12,
            min_distance: 30.0,
            bin_width: 8,
            sample_cap: 100_000,
            alpha_threshold: 128,
            max_dimension: 300,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DominantColour {
    pub colour: Colour,
    /// Sampled pixels that fell into this colour's bin.
    pub count: u32,
}

struct Bin {
    count: u32,
    first_seen: usize,
}

/// Extract a distinct colour set from an RGBA8 buffer.
///
/// `width`/`height` describe the image; the number of pixels actually present in `pixels` bounds
/// the scan, so a short buffer is never indexed out of range.
pub fn extract(
    pixels: &[u8],
    width: u32,
    height: u32,
    opts: &ExtractOptions,
) -> Vec<DominantColour> {
    let total = (width as usize * height as usize).min(pixels.len() / 4);
    if total == 0 || opts.max_colours == 0 {
        return Vec::new();
    }
    let stride = (total / opts.sample_cap.max(1)).max(1);
    let bin = opts.bin_width.max(1);
    let quantize = |v: u8| (v / bin) * bin;

    let mut bins: HashMap<[u8; 3], Bin> = HashMap::new();
    for (seen, px) in pixels[..total * 4].chunks_exact(4).step_by(stride).enumerate() {
        if px[3] < opts.alpha_threshold {
            continue;
        }
        let key = [quantize(px[0]), quantize(px[1]), quantize(px[2])];
        bins.entry(key)
            .or_insert(Bin {
                count: 0,
                first_seen: seen,
            })
            .count += 1;
    }

    let mut ranked: Vec<([u8; 3], Bin)> = bins.into_iter().collect();
    ranked.sort_by(|a, b| {
        b.1.count
            .cmp(&a.1.count)
            .then(a.1.first_seen.cmp(&b.1.first_seen))
    });
    let bin_count = ranked.len();

    let mut distinct: Vec<DominantColour> = Vec::with_capacity(opts.max_colours);
    for (key, bin) in ranked {
        let candidate = Colour::from(key);
        if distinct
            .iter()
            .all(|d| distance(d.colour, candidate) >= opts.min_distance)
        {
            distinct.push(DominantColour {
                colour: candidate,
                count: bin.count,
            });
            if distinct.len() >= opts.max_colours {
                break;
            }
        }
    }
    tracing::debug!(
        width,
        height,
        stride,
        bins = bin_count,
        selected = distinct.len(),
        "extracted dominant colours"
    );
    distinct
}

/// Shrink `img` so its longer side is at most `max_dimension`, preserving aspect ratio. Images
/// already within bounds are returned as-is.
pub fn downscale_for_scan(img: &DynamicImage, max_dimension: u32) -> DynamicImage {
    let (w, h) = img.dimensions();
    let longest = w.max(h);
    if max_dimension == 0 || longest <= max_dimension {
        return img.clone();
    }
    let scale = max_dimension as f64 / longest as f64;
    let nw = ((w as f64 * scale) as u32).max(1);
    let nh = ((h as f64 * scale) as u32).max(1);
    DynamicImage::ImageRgba8(image::imageops::resize(
        &img.to_rgba8(),
        nw,
        nh,
        FilterType::Triangle,
    ))
}

/// Downscale then extract.
pub fn detect(img: &DynamicImage, opts: &ExtractOptions) -> Vec<DominantColour> {
    let scan = downscale_for_scan(img, opts.max_dimension);
    let (w, h) = scan.dimensions();
    let raw = scan.to_rgba8().into_raw();
    extract(&raw, w, h, opts)
}
