use image::DynamicImage;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

use crate::error::ToolError;

/// Largest accepted output side.
pub const MAX_DIMENSION: u32 = 4096;
/// Widest initial suggestion offered for a freshly loaded image.
pub const INITIAL_MAX_WIDTH: u32 = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResizeMode {
    /// Smooth (interpolated) scaling.
    #[default]
    Linear,
    /// Nearest-neighbour scaling, keeps hard pixel edges.
    Point,
}

impl ResizeMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ResizeMode::Linear => "linear",
            ResizeMode::Point => "point",
        }
    }

    pub fn filter(self) -> FilterType {
        match self {
            ResizeMode::Linear => FilterType::Triangle,
            ResizeMode::Point => FilterType::Nearest,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Width,
    Height,
}

fn in_range(v: u32) -> bool {
    (1..=MAX_DIMENSION).contains(&v)
}

pub fn validate_dimensions(width: u32, height: u32) -> Result<(), ToolError> {
    if in_range(width) && in_range(height) {
        Ok(())
    } else {
        Err(ToolError::InvalidDimensions {
            width,
            height,
            max: MAX_DIMENSION,
        })
    }
}

/// Starting width/height for an image of `width`x`height`: width capped at
/// [`INITIAL_MAX_WIDTH`], height following the aspect ratio, both kept within [`MAX_DIMENSION`].
pub fn initial_dimensions(width: u32, height: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (1, 1);
    }
    let aspect = width as f64 / height as f64;
    let mut w = width.min(INITIAL_MAX_WIDTH);
    let mut h = (w as f64 / aspect).round().max(1.0) as u32;
    if h > MAX_DIMENSION {
        h = MAX_DIMENSION;
        w = (h as f64 * aspect).round().max(1.0) as u32;
    }
    (w, h)
}

/// Aspect-locked partner for an edited side. `aspect` is width / height. Returns `None` when the
/// partner would fall outside `1..=MAX_DIMENSION`, in which case it should be left as it was.
pub fn linked_dimension(changed: Axis, value: u32, aspect: f64) -> Option<u32> {
    if !(aspect.is_finite() && aspect > 0.0) {
        return None;
    }
    let partner = match changed {
        Axis::Width => (value as f64 / aspect).round(),
        Axis::Height => (value as f64 * aspect).round(),
    };
    if partner >= 1.0 && partner <= MAX_DIMENSION as f64 {
        Some(partner as u32)
    } else {
        None
    }
}

/// Output size for a resize request. Explicit sides win; with the aspect lock a single given side
/// drives the other, otherwise the missing side keeps the source size. With nothing given the
/// [`initial_dimensions`] suggestion is used.
pub fn target_dimensions(
    width: Option<u32>,
    height: Option<u32>,
    source: (u32, u32),
    lock_aspect_ratio: bool,
) -> (u32, u32) {
    let (sw, sh) = source;
    let aspect = sw as f64 / sh as f64;
    match (width, height) {
        (Some(w), Some(h)) => (w, h),
        (Some(w), None) if lock_aspect_ratio => {
            (w, linked_dimension(Axis::Width, w, aspect).unwrap_or(sh))
        }
        (Some(w), None) => (w, sh),
        (None, Some(h)) if lock_aspect_ratio => {
            (linked_dimension(Axis::Height, h, aspect).unwrap_or(sw), h)
        }
        (None, Some(h)) => (sw, h),
        (None, None) => initial_dimensions(sw, sh),
    }
}

/// Scale to exactly `width`x`height` (aspect ratio is the caller's concern).
pub fn resize(
    img: &DynamicImage,
    width: u32,
    height: u32,
    mode: ResizeMode,
) -> Result<DynamicImage, ToolError> {
    validate_dimensions(width, height)?;
    Ok(img.resize_exact(width, height, mode.filter()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgba, RgbaImage};

    #[test]
    fn initial_dimensions_follow_aspect() {
        assert_eq!(initial_dimensions(1024, 768), (512, 384));
        assert_eq!(initial_dimensions(300, 200), (300, 200));
        // very tall: height clamps, width recomputed
        assert_eq!(initial_dimensions(1000, 20000), (205, 4096));
        assert_eq!(initial_dimensions(0, 10), (1, 1));
    }

    #[test]
    fn linked_dimension_respects_limits() {
        assert_eq!(linked_dimension(Axis::Width, 400, 2.0), Some(200));
        assert_eq!(linked_dimension(Axis::Height, 400, 2.0), Some(800));
        assert_eq!(linked_dimension(Axis::Height, 3000, 2.0), None);
        assert_eq!(linked_dimension(Axis::Width, 1, 4.0), None);
        assert_eq!(linked_dimension(Axis::Width, 10, f64::NAN), None);
    }

    #[test]
    fn target_dimensions_fill_missing_sides() {
        assert_eq!(target_dimensions(Some(10), Some(20), (400, 200), true), (10, 20));
        assert_eq!(target_dimensions(Some(100), None, (400, 200), true), (100, 50));
        assert_eq!(target_dimensions(Some(100), None, (400, 200), false), (100, 200));
        assert_eq!(target_dimensions(None, Some(100), (400, 200), true), (200, 100));
        assert_eq!(target_dimensions(None, Some(100), (400, 200), false), (400, 100));
        assert_eq!(target_dimensions(None, None, (1024, 768), true), (512, 384));
        // partner out of range keeps the source side
        assert_eq!(target_dimensions(None, Some(4000), (400, 200), true), (400, 4000));
    }

    #[test]
    fn resize_modes() {
        let mut img = RgbaImage::from_pixel(2, 1, Rgba([0, 0, 0, 255]));
        img.put_pixel(1, 0, Rgba([255, 255, 255, 255]));
        let img = DynamicImage::ImageRgba8(img);

        let point = resize(&img, 8, 4, ResizeMode::Point).unwrap().to_rgba8();
        assert_eq!(point.dimensions(), (8, 4));
        // nearest keeps only the two source colours
        assert!(
            point
                .pixels()
                .all(|p| p.0 == [0, 0, 0, 255] || p.0 == [255, 255, 255, 255])
        );

        let linear = resize(&img, 8, 4, ResizeMode::Linear).unwrap();
        assert_eq!(linear.dimensions(), (8, 4));
        assert!(
            linear
                .to_rgba8()
                .pixels()
                .any(|p| p.0[0] > 0 && p.0[0] < 255)
        );
    }

    #[test]
    fn resize_rejects_out_of_range() {
        let img = DynamicImage::ImageRgba8(RgbaImage::new(4, 4));
        assert!(matches!(
            resize(&img, 0, 4, ResizeMode::Linear),
            Err(ToolError::InvalidDimensions { .. })
        ));
        assert!(resize(&img, 4, MAX_DIMENSION + 1, ResizeMode::Point).is_err());
    }
}
