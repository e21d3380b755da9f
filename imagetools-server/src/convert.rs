//! Re-encoding into a chosen output format plus the size bookkeeping shown next to a conversion.

use std::io::Cursor;
use std::str::FromStr;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};

use crate::error::ToolError;

pub const DEFAULT_QUALITY: u8 = 85;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    #[default]
    Png,
    Jpeg,
    /// Lossless only; the quality setting is accepted but has no effect.
    Webp,
    Gif,
    Bmp,
}

impl ExportFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            ExportFormat::Png => "image/png",
            ExportFormat::Jpeg => "image/jpeg",
            ExportFormat::Webp => "image/webp",
            ExportFormat::Gif => "image/gif",
            ExportFormat::Bmp => "image/bmp",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Png => "png",
            ExportFormat::Jpeg => "jpeg",
            ExportFormat::Webp => "webp",
            ExportFormat::Gif => "gif",
            ExportFormat::Bmp => "bmp",
        }
    }

    /// Whether a quality slider is meaningful for this format.
    pub fn uses_quality(self) -> bool {
        matches!(self, ExportFormat::Jpeg | ExportFormat::Webp)
    }

    fn image_format(self) -> ImageFormat {
        match self {
            ExportFormat::Png => ImageFormat::Png,
            ExportFormat::Jpeg => ImageFormat::Jpeg,
            ExportFormat::Webp => ImageFormat::WebP,
            ExportFormat::Gif => ImageFormat::Gif,
            ExportFormat::Bmp => ImageFormat::Bmp,
        }
    }
}

/// Accepts bare names (`jpeg`, `jpg`) and MIME types (`image/jpeg`), case-insensitive.
impl FromStr for ExportFormat {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_ascii_lowercase();
        let name = norm.strip_prefix("image/").unwrap_or(&norm);
        match name {
            "png" => Ok(ExportFormat::Png),
            "jpeg" | "jpg" => Ok(ExportFormat::Jpeg),
            "webp" => Ok(ExportFormat::Webp),
            "gif" => Ok(ExportFormat::Gif),
            "bmp" => Ok(ExportFormat::Bmp),
            _ => Err(ToolError::UnsupportedFormat(s.to_string())),
        }
    }
}

/// Encode `img` as `format`. `quality` (0-100, clamped to at least 1) applies to JPEG.
pub fn encode(img: &DynamicImage, format: ExportFormat, quality: u8) -> Result<Vec<u8>, ToolError> {
    let mut bytes = Vec::new();
    match format {
        ExportFormat::Jpeg => {
            // JPEG has no alpha channel
            let rgb = img.to_rgb8();
            let encoder = JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100));
            rgb.write_with_encoder(encoder)?;
        }
        other => {
            DynamicImage::ImageRgba8(img.to_rgba8())
                .write_to(&mut Cursor::new(&mut bytes), other.image_format())?;
        }
    }
    tracing::debug!(format = ?format, quality, bytes = bytes.len(), "encoded image");
    Ok(bytes)
}

/// Byte sizes before and after a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SizeReport {
    pub original: usize,
    pub converted: usize,
}

impl SizeReport {
    /// Percentage saved, rounded to one decimal; negative when the output grew.
    pub fn change_percent(&self) -> f64 {
        if self.original == 0 {
            return 0.0;
        }
        let pct = (self.original as f64 - self.converted as f64) / self.original as f64 * 100.0;
        (pct * 10.0).round() / 10.0
    }

    pub fn label(&self) -> &'static str {
        if self.change_percent() < 0.0 {
            "Increase"
        } else {
            "Reduction"
        }
    }

    /// e.g. `Reduction: 42.1%`
    pub fn summary(&self) -> String {
        format!("{}: {:.1}%", self.label(), self.change_percent().abs())
    }
}

/// Human readable size with 1024-based units.
pub fn format_file_size(bytes: usize) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgba, RgbaImage};

    fn sample() -> DynamicImage {
        let mut img = RgbaImage::new(16, 8);
        for (x, y, px) in img.enumerate_pixels_mut() {
            *px = Rgba([(x * 16) as u8, (y * 32) as u8, 90, if x < 8 { 255 } else { 128 }]);
        }
        DynamicImage::ImageRgba8(img)
    }

    #[test]
    fn parses_names_and_mime_types() {
        assert_eq!("PNG".parse::<ExportFormat>().unwrap(), ExportFormat::Png);
        assert_eq!("image/jpeg".parse::<ExportFormat>().unwrap(), ExportFormat::Jpeg);
        assert_eq!("jpg".parse::<ExportFormat>().unwrap(), ExportFormat::Jpeg);
        assert_eq!("image/webp".parse::<ExportFormat>().unwrap(), ExportFormat::Webp);
        assert!(matches!(
            "tiff".parse::<ExportFormat>(),
            Err(ToolError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn quality_flag_follows_lossy_formats() {
        assert!(ExportFormat::Jpeg.uses_quality());
        assert!(ExportFormat::Webp.uses_quality());
        assert!(!ExportFormat::Png.uses_quality());
        assert!(!ExportFormat::Gif.uses_quality());
    }

    #[test]
    fn every_format_encodes_and_decodes() {
        let img = sample();
        for format in [
            ExportFormat::Png,
            ExportFormat::Jpeg,
            ExportFormat::Webp,
            ExportFormat::Gif,
            ExportFormat::Bmp,
        ] {
            let bytes = encode(&img, format, DEFAULT_QUALITY).unwrap();
            assert_eq!(
                image::guess_format(&bytes).unwrap(),
                format.image_format(),
                "{format:?}"
            );
            let back = image::load_from_memory(&bytes).unwrap();
            assert_eq!(back.dimensions(), (16, 8));
        }
    }

    #[test]
    fn png_is_lossless() {
        let img = sample();
        let bytes = encode(&img, ExportFormat::Png, 0).unwrap();
        let back = image::load_from_memory(&bytes).unwrap();
        assert_eq!(back.to_rgba8(), img.to_rgba8());
    }

    #[test]
    fn size_report() {
        let r = SizeReport {
            original: 1000,
            converted: 579,
        };
        assert_eq!(r.change_percent(), 42.1);
        assert_eq!(r.summary(), "Reduction: 42.1%");
        let grew = SizeReport {
            original: 100,
            converted: 150,
        };
        assert_eq!(grew.label(), "Increase");
        assert_eq!(grew.summary(), "Increase: 50.0%");
        let empty = SizeReport {
            original: 0,
            converted: 10,
        };
        assert_eq!(empty.change_percent(), 0.0);
    }

    #[test]
    fn file_sizes() {
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(2 * 1024 * 1024), "2.0 MB");
    }
}
