//! Still-image encoding of the final framebuffer.

use std::io::Cursor;
use std::str::FromStr;

use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;

use crate::error::ShotError;

/// JPEG quality used when none is configured.
pub const DEFAULT_JPEG_QUALITY: u8 = 75;

// ── ImageFormat ──────────────────────────────────────────────────

/// Output format of the captured still image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// Lossy JPEG, quality 1..=100.
    Jpeg { quality: u8 },
    /// Lossless PNG.
    Png,
}

impl Default for ImageFormat {
    fn default() -> Self {
        ImageFormat::Jpeg {
            quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl FromStr for ImageFormat {
    type Err = ShotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(ImageFormat::default()),
            "png" => Ok(ImageFormat::Png),
            other => Err(ShotError::Encoding(format!("unsupported image format: {other}"))),
        }
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Jpeg { .. } => write!(f, "jpeg"),
            Self::Png => write!(f, "png"),
        }
    }
}

/// Encode an RGB raster in the given format.
pub fn encode_still_image(image: &RgbImage, format: ImageFormat) -> Result<Vec<u8>, ShotError> {
    let mut buf = Cursor::new(Vec::new());
    match format {
        ImageFormat::Jpeg { quality } => {
            let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
            image.write_with_encoder(encoder)?;
        }
        ImageFormat::Png => {
            let encoder = PngEncoder::new(&mut buf);
            image.write_with_encoder(encoder)?;
        }
    }
    Ok(buf.into_inner())
}
