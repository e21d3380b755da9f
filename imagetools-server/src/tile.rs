//! Repeat an image across a canvas, one scaled copy per tile.

use image::{DynamicImage, GenericImageView, RgbaImage};

use crate::error::ToolError;
use crate::resize::{MAX_DIMENSION, ResizeMode, validate_dimensions};

pub const DEFAULT_TILE_SIZE: u32 = 128;
/// Tiles per side when no canvas size is requested.
pub const DEFAULT_REPEAT: u32 = 4;

/// Tile footprint for a tile height of `tile_height`: the width follows the image aspect ratio.
pub fn tile_size(tile_height: u32, image_width: u32, image_height: u32) -> (f64, f64) {
    if image_height == 0 {
        return (0.0, tile_height as f64);
    }
    let aspect = image_width as f64 / image_height as f64;
    (tile_height as f64 * aspect, tile_height as f64)
}

/// Canvas showing [`DEFAULT_REPEAT`] tiles in each direction, kept within [`MAX_DIMENSION`].
pub fn default_canvas(tile_height: u32, image_width: u32, image_height: u32) -> (u32, u32) {
    let (tw, th) = tile_size(tile_height, image_width, image_height);
    let side = |v: f64| ((v * DEFAULT_REPEAT as f64).round() as u32).clamp(1, MAX_DIMENSION);
    (side(tw), side(th))
}

/// Render `img` tiled from the top-left corner into an `out_width`x`out_height` canvas.
pub fn render_tiled(
    img: &DynamicImage,
    tile_height: u32,
    out_width: u32,
    out_height: u32,
    mode: ResizeMode,
) -> Result<RgbaImage, ToolError> {
    if tile_height == 0 || tile_height > MAX_DIMENSION {
        return Err(ToolError::InvalidTileSize(tile_height));
    }
    validate_dimensions(out_width, out_height)?;
    let (iw, ih) = img.dimensions();
    let (tw, th) = tile_size(tile_height, iw, ih);
    let tw = (tw.round() as u32).clamp(1, MAX_DIMENSION);
    let th = th as u32;
    let tile = img.resize_exact(tw, th, mode.filter()).to_rgba8();

    let mut canvas = RgbaImage::new(out_width, out_height);
    for y in (0..out_height).step_by(th as usize) {
        for x in (0..out_width).step_by(tw as usize) {
            image::imageops::replace(&mut canvas, &tile, x as i64, y as i64);
        }
    }
    tracing::debug!(tile_w = tw, tile_h = th, out_width, out_height, "rendered tiled canvas");
    Ok(canvas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn tile_width_tracks_aspect() {
        assert_eq!(tile_size(100, 400, 200), (200.0, 100.0));
        assert_eq!(tile_size(90, 100, 300), (30.0, 90.0));
        assert_eq!(tile_size(10, 5, 0), (0.0, 10.0));
    }

    #[test]
    fn default_canvas_repeats_tiles() {
        assert_eq!(default_canvas(100, 400, 200), (800, 400));
        assert_eq!(default_canvas(2000, 400, 200), (4096, 4096));
    }

    #[test]
    fn tiles_repeat_across_canvas() {
        // 2x1 source: left red, right blue
        let mut src = RgbaImage::from_pixel(2, 1, Rgba([255, 0, 0, 255]));
        src.put_pixel(1, 0, Rgba([0, 0, 255, 255]));
        let src = DynamicImage::ImageRgba8(src);
        let out = render_tiled(&src, 2, 9, 5, ResizeMode::Point).unwrap();
        assert_eq!(out.dimensions(), (9, 5));
        // tile is 4x2: columns 0,1 red; 2,3 blue; repeats every 4 px
        assert_eq!(out.get_pixel(0, 0).0, [255, 0, 0, 255]);
        assert_eq!(out.get_pixel(3, 1).0, [0, 0, 255, 255]);
        assert_eq!(out.get_pixel(4, 2).0, [255, 0, 0, 255]);
        assert_eq!(out.get_pixel(7, 4).0, [0, 0, 255, 255]);
        assert_eq!(out.get_pixel(8, 4).0, [255, 0, 0, 255]);
    }

    #[test]
    fn rejects_bad_sizes() {
        let src = DynamicImage::ImageRgba8(RgbaImage::new(3, 3));
        assert!(matches!(
            render_tiled(&src, 0, 10, 10, ResizeMode::Linear),
            Err(ToolError::InvalidTileSize(0))
        ));
        assert!(render_tiled(&src, 4, 0, 10, ResizeMode::Linear).is_err());
    }
}
