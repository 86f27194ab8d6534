//! Bitmap update decoding.
//!
//! Turns the raw bytes of a [`BitmapUpdate`] into an RGB patch that the
//! [`Framebuffer`](crate::rdp::framebuffer::Framebuffer) can blit.
//! Uncompressed bitmaps are handled here; compressed ones (interleaved
//! RLE, planar) belong to whichever protocol stack produced them and
//! are plugged in through [`BitmapCodec`].

use image::{Rgb, RgbImage};

use crate::error::ShotError;
use crate::rdp::types::BitmapUpdate;

// ── BitmapCodec ──────────────────────────────────────────────────

/// Decodes protocol bitmaps into RGB patches.
pub trait BitmapCodec: Send {
    fn decode(&self, update: &BitmapUpdate) -> Result<RgbImage, ShotError>;
}

// ── RawBitmapCodec ───────────────────────────────────────────────

/// Decoder for uncompressed bitmaps.
///
/// RDP bitmaps are stored bottom-up, left-to-right, with every
/// scanline padded to a 4-byte boundary.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawBitmapCodec;

impl RawBitmapCodec {
    /// Bytes per pixel for a colour depth, or `None` if unsupported.
    pub const fn bytes_per_pixel(bits_per_pixel: u16) -> Option<usize> {
        match bits_per_pixel {
            15 | 16 => Some(2),
            24 => Some(3),
            32 => Some(4),
            _ => None,
        }
    }

    /// Scanline length in bytes, including padding.
    pub const fn stride(width: usize, bytes_per_pixel: usize) -> usize {
        (width * bytes_per_pixel + 3) & !3
    }
}

impl BitmapCodec for RawBitmapCodec {
    fn decode(&self, update: &BitmapUpdate) -> Result<RgbImage, ShotError> {
        if update.compressed {
            return Err(ShotError::Bitmap(format!(
                "compressed {}bpp bitmaps need a protocol codec",
                update.bits_per_pixel
            )));
        }
        let bpp = Self::bytes_per_pixel(update.bits_per_pixel).ok_or_else(|| {
            ShotError::Bitmap(format!("unsupported colour depth: {}bpp", update.bits_per_pixel))
        })?;

        let width = update.width as usize;
        let height = update.height as usize;
        let stride = Self::stride(width, bpp);
        let expected = stride * height;
        if update.data.len() < expected {
            return Err(ShotError::Bitmap(format!(
                "bitmap too short: {} < {}",
                update.data.len(),
                expected
            )));
        }

        let depth = update.bits_per_pixel;
        let data = &update.data;
        Ok(RgbImage::from_fn(width as u32, height as u32, |x, y| {
            // Bottom-up: the first scanline in memory is the last on screen.
            let row = height - 1 - y as usize;
            let offset = row * stride + x as usize * bpp;
            to_rgb(depth, &data[offset..offset + bpp])
        }))
    }
}

fn to_rgb(bits_per_pixel: u16, px: &[u8]) -> Rgb<u8> {
    match bits_per_pixel {
        15 => {
            let v = u16::from_le_bytes([px[0], px[1]]);
            Rgb([
                expand5((v >> 10) & 0x1F),
                expand5((v >> 5) & 0x1F),
                expand5(v & 0x1F),
            ])
        }
        16 => {
            let v = u16::from_le_bytes([px[0], px[1]]);
            Rgb([
                expand5((v >> 11) & 0x1F),
                expand6((v >> 5) & 0x3F),
                expand5(v & 0x1F),
            ])
        }
        // 24 and 32 bpp are BGR(X).
        _ => Rgb([px[2], px[1], px[0]]),
    }
}

fn expand5(v: u16) -> u8 {
    ((v << 3) | (v >> 2)) as u8
}

fn expand6(v: u16) -> u8 {
    ((v << 2) | (v >> 4)) as u8
}

// ── Tests ────────────────────────────────────────────────────────
