//! Palette substitution over RGBA8 buffers.
//!
//! The palette is an ordered list of target/replacement pairs. Every pixel is tested against the
//! targets in list order and the first match wins; alpha is never touched.

use serde::{Deserialize, Serialize};

use crate::colour::{Colour, matches};
use crate::extract::DominantColour;

/// Multiplier applied to the primary replacement to derive the secondary one.
pub const SECONDARY_MULTIPLIER: f64 = 0.85;
/// Smallest palette the pair-removal operation will shrink to.
pub const MIN_PAIRS: usize = 3;
/// Largest palette the editing operations produce.
pub const MAX_PAIRS: usize = 12;

pub const DEFAULT_TARGETS: [Colour; 3] = [
    Colour::new(255, 0, 0),
    Colour::new(0, 255, 0),
    Colour::new(0, 0, 255),
];
pub const DEFAULT_REPLACEMENTS: [Colour; 3] = [
    Colour::new(255, 255, 0),
    Colour::new(255, 0, 255),
    Colour::new(0, 255, 255),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColourPair {
    pub target: Colour,
    pub replacement: Colour,
}

impl ColourPair {
    pub const fn new(target: Colour, replacement: Colour) -> Self {
        Self {
            target,
            replacement,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Palette {
    pub pairs: Vec<ColourPair>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecolourSettings {
    /// Inclusive per-channel match window.
    #[serde(default)]
    pub tolerance: u32,
    /// Derive pair 1's replacement from pair 0's before substituting.
    #[serde(default)]
    pub multiplier_mode: bool,
}

impl Default for Palette {
    fn default() -> Self {
        Self::resized_from(&[], DEFAULT_TARGETS.len())
    }
}

impl Palette {
    pub fn new(pairs: Vec<ColourPair>) -> Self {
        Self { pairs }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Resize to `count` pairs (clamped to [`MAX_PAIRS`]). Existing pairs are kept, new slots are
    /// filled from the default palette and then with black.
    pub fn resized(&self, count: usize) -> Self {
        Self::resized_from(&self.pairs, count)
    }

    fn resized_from(existing: &[ColourPair], count: usize) -> Self {
        let count = count.min(MAX_PAIRS);
        let pairs = (0..count)
            .map(|i| {
                existing.get(i).copied().unwrap_or_else(|| {
                    ColourPair::new(
                        DEFAULT_TARGETS.get(i).copied().unwrap_or(Colour::BLACK),
                        DEFAULT_REPLACEMENTS.get(i).copied().unwrap_or(Colour::BLACK),
                    )
                })
            })
            .collect();
        Self { pairs }
    }

    /// Remove the pair at `index`. Refused (returns false) at or below [`MIN_PAIRS`] pairs or when
    /// the index is out of range.
    pub fn remove_pair(&mut self, index: usize) -> bool {
        if self.pairs.len() <= MIN_PAIRS || index >= self.pairs.len() {
            return false;
        }
        self.pairs.remove(index);
        true
    }

    /// Install detected colours as targets: the palette is resized to the number of detected
    /// colours (at most [`MAX_PAIRS`]) and targets are overwritten in order.
    pub fn with_detected_targets(&self, detected: &[DominantColour]) -> Self {
        let count = detected.len().min(MAX_PAIRS);
        let mut out = self.resized(count);
        for (pair, found) in out.pairs.iter_mut().zip(detected) {
            pair.target = found.colour;
        }
        out
    }
}

/// Pure pre-processing step for multiplier mode: with at least two pairs, pair 1's replacement
/// becomes pair 0's replacement scaled by [`SECONDARY_MULTIPLIER`].
pub fn derive_secondary(palette: &Palette) -> Palette {
    let mut out = palette.clone();
    if out.pairs.len() > 1 {
        out.pairs[1].replacement = out.pairs[0].replacement.scaled(SECONDARY_MULTIPLIER);
    }
    out
}

/// Rewrite matching pixels in place. `pixels` is RGBA8 interleaved; a trailing partial pixel is
/// ignored. Returns the number of rewritten pixels.
pub fn substitute(pixels: &mut [u8], pairs: &[ColourPair], tolerance: u32) -> usize {
    if pairs.is_empty() {
        return 0;
    }
    let mut rewritten = 0usize;
    for px in pixels.chunks_exact_mut(4) {
        let (r, g, b) = (px[0], px[1], px[2]);
        if let Some(pair) = pairs
            .iter()
            .find(|p| matches(r, g, b, p.target, tolerance))
        {
            px[0] = pair.replacement.r;
            px[1] = pair.replacement.g;
            px[2] = pair.replacement.b;
            // alpha preserved
            rewritten += 1;
        }
    }
    rewritten
}

/// Full recolour step: optional derived secondary colour, then substitution. Returns the palette
/// that was actually applied so the caller can keep it.
pub fn recolour(pixels: &mut [u8], palette: &Palette, settings: &RecolourSettings) -> Palette {
    let effective = if settings.multiplier_mode {
        derive_secondary(palette)
    } else {
        palette.clone()
    };
    let rewritten = substitute(pixels, &effective.pairs, settings.tolerance);
    tracing::debug!(
        pixels = pixels.len() / 4,
        rewritten,
        pairs = effective.len(),
        tolerance = settings.tolerance,
        multiplier_mode = settings.multiplier_mode,
        "recoloured buffer"
    );
    effective
}
