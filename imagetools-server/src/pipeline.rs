use image::{DynamicImage, GenericImageView, RgbaImage};

use crate::convert::{self, ExportFormat};
use crate::error::ToolError;
use crate::recolour::{self, Palette, RecolourSettings};

/// Raw RGBA8 output of a processing step.
pub struct PreparedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl PreparedImage {
    pub fn from_image(img: &DynamicImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width,
            height,
            pixels: img.to_rgba8().into_raw(),
        }
    }

    pub fn into_image(self) -> Result<DynamicImage, ToolError> {
        let (w, h) = (self.width, self.height);
        RgbaImage::from_raw(w, h, self.pixels)
            .map(DynamicImage::ImageRgba8)
            .ok_or(ToolError::InvalidDimensions {
                width: w,
                height: h,
                max: u32::MAX,
            })
    }

    pub fn encode(self, format: ExportFormat, quality: u8) -> Result<Vec<u8>, ToolError> {
        let img = self.into_image()?;
        convert::encode(&img, format, quality)
    }
}

/// Recolour request context.
pub struct RecolourParams<'a> {
    pub image: &'a DynamicImage,
    pub palette: &'a Palette,
    pub settings: RecolourSettings,
}

/// Run palette substitution over a decoded image. Returns the rewritten pixels and the palette
/// that was applied (which differs from the input in multiplier mode).
pub fn process(params: RecolourParams) -> (PreparedImage, Palette) {
    let mut prepared = PreparedImage::from_image(params.image);
    let effective = recolour::recolour(&mut prepared.pixels, params.palette, &params.settings);
    (prepared, effective)
}

/// Decode uploaded bytes and apply any EXIF orientation so pixels are in view orientation.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, ToolError> {
    let mut img = image::load_from_memory(bytes)?;
    if let Some(tag) = extract_exif_orientation(bytes) {
        img = apply_exif_orientation(img, tag);
    }
    let (w, h) = img.dimensions();
    tracing::debug!(width = w, height = h, bytes = bytes.len(), "decoded image");
    Ok(img)
}

/// Parse the EXIF orientation tag, if the container carries one.
fn extract_exif_orientation(bytes: &[u8]) -> Option<u16> {
    let mut cursor = std::io::Cursor::new(bytes);
    let reader = exif::Reader::new().read_from_container(&mut cursor).ok()?;
    let field = reader.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    if let exif::Value::Short(ref v) = field.value
        && let Some(val) = v.first()
    {
        return Some(*val);
    }
    field
        .display_value()
        .with_unit(&reader)
        .to_string()
        .trim()
        .parse::<u16>()
        .ok()
}

fn apply_exif_orientation(img: DynamicImage, tag: u16) -> DynamicImage {
    match tag {
        3 => DynamicImage::ImageRgba8(image::imageops::rotate180(&img)),
        6 => DynamicImage::ImageRgba8(image::imageops::rotate90(&img)),
        8 => DynamicImage::ImageRgba8(image::imageops::rotate270(&img)),
        // 1 is identity; mirrored variants are left as decoded
        _ => img,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::colour::Colour;
    use crate::recolour::ColourPair;
    use image::Rgba;

    fn png_bytes(img: &RgbaImage) -> Vec<u8> {
        convert::encode(&DynamicImage::ImageRgba8(img.clone()), ExportFormat::Png, 0).unwrap()
    }

    #[test]
    fn decode_png_without_exif() {
        let img = RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 4]));
        let decoded = decode(&png_bytes(&img)).unwrap();
        assert_eq!(decoded.dimensions(), (3, 2));
        assert_eq!(decoded.to_rgba8(), img);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(decode(b"not an image"), Err(ToolError::Image(_))));
    }

    #[test]
    fn orientation_rotates() {
        let img = DynamicImage::ImageRgba8(RgbaImage::new(4, 2));
        assert_eq!(apply_exif_orientation(img.clone(), 6).dimensions(), (2, 4));
        assert_eq!(apply_exif_orientation(img.clone(), 8).dimensions(), (2, 4));
        assert_eq!(apply_exif_orientation(img.clone(), 3).dimensions(), (4, 2));
        assert_eq!(apply_exif_orientation(img, 1).dimensions(), (4, 2));
    }

    #[test]
    fn process_recolours_and_reports_palette() {
        let mut img = RgbaImage::from_pixel(2, 2, Rgba([255, 0, 0, 255]));
        img.put_pixel(1, 1, Rgba([0, 255, 0, 99]));
        let img = DynamicImage::ImageRgba8(img);
        let palette = Palette::new(vec![
            ColourPair::new(Colour::new(255, 0, 0), Colour::new(200, 100, 50)),
            ColourPair::new(Colour::new(0, 255, 0), Colour::new(0, 0, 0)),
        ]);
        let (out, effective) = process(RecolourParams {
            image: &img,
            palette: &palette,
            settings: RecolourSettings {
                tolerance: 0,
                multiplier_mode: true,
            },
        });
        assert_eq!((out.width, out.height), (2, 2));
        assert_eq!(&out.pixels[0..4], &[200, 100, 50, 255]);
        assert_eq!(&out.pixels[12..16], &[170, 85, 43, 99]);
        assert_eq!(effective.pairs[1].replacement, Colour::new(170, 85, 43));

        let bytes = out.encode(ExportFormat::Png, 0).unwrap();
        assert_eq!(image::load_from_memory(&bytes).unwrap().dimensions(), (2, 2));
    }
}
