//! Off-screen raster that bitmap updates are composed into.

use image::{Rgb, RgbImage};

use crate::error::ShotError;
use crate::rdp::encoder::{ImageFormat, encode_still_image};
use crate::rdp::types::Rect;

/// Colour of every pixel no update has touched yet.
pub const BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);

// ── Framebuffer ──────────────────────────────────────────────────

/// Fixed-size RGB surface owned by a capture session.
///
/// Created once at the requested capture size and never resized.
/// Writes are clamped to the surface, so an update that spills past
/// the edge of the desktop is cropped rather than rejected.
#[derive(Debug, Clone)]
pub struct Framebuffer {
    surface: RgbImage,
}

impl Framebuffer {
    /// Allocate a surface filled with [`BACKGROUND`].
    pub fn create(width: u32, height: u32) -> Result<Self, ShotError> {
        if width == 0 || height == 0 {
            return Err(ShotError::InvalidDimensions { width, height });
        }
        Ok(Self {
            surface: RgbImage::from_pixel(width, height, BACKGROUND),
        })
    }

    pub fn width(&self) -> u32 {
        self.surface.width()
    }

    pub fn height(&self) -> u32 {
        self.surface.height()
    }

    /// Pixel at `(x, y)`, or `None` outside the surface.
    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgb<u8>> {
        self.surface.get_pixel_checked(x, y).copied()
    }

    pub fn as_image(&self) -> &RgbImage {
        &self.surface
    }

    /// Copy the top-left `dest.width() × dest.height()` region of
    /// `source` to `(dest.left, dest.top)`.
    ///
    /// The copied region is clamped to both the source patch and the
    /// surface. Inverted or fully off-surface rectangles write nothing.
    pub fn blit(&mut self, dest: Rect, source: &RgbImage) {
        let left = dest.left as u32;
        let top = dest.top as u32;
        if left >= self.width() || top >= self.height() {
            return;
        }

        let w = dest
            .width()
            .min(source.width())
            .min(self.width() - left);
        let h = dest
            .height()
            .min(source.height())
            .min(self.height() - top);

        for y in 0..h {
            for x in 0..w {
                self.surface
                    .put_pixel(left + x, top + y, *source.get_pixel(x, y));
            }
        }
    }

    /// Encode the current surface as a still image.
    pub fn encode(&self, format: ImageFormat) -> Result<Vec<u8>, ShotError> {
        encode_still_image(&self.surface, format)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Rgb<u8> = Rgb([255, 0, 0]);

    fn patch(w: u32, h: u32, colour: Rgb<u8>) -> RgbImage {
        RgbImage::from_pixel(w, h, colour)
    }

    #[test]
    fn create_fills_background() {
        let fb = Framebuffer::create(8, 4).unwrap();
        assert_eq!((fb.width(), fb.height()), (8, 4));
        assert!(fb.as_image().pixels().all(|p| *p == BACKGROUND));
    }

    #[test]
    fn create_rejects_zero_dimensions() {
        assert!(matches!(
            Framebuffer::create(0, 10),
            Err(ShotError::InvalidDimensions { .. })
        ));
        assert!(Framebuffer::create(10, 0).is_err());
    }

    #[test]
    fn blit_inside_bounds() {
        let mut fb = Framebuffer::create(16, 16).unwrap();
        fb.blit(Rect::new(2, 3, 5, 4), &patch(4, 2, RED));

        assert_eq!(fb.pixel(2, 3), Some(RED));
        assert_eq!(fb.pixel(5, 4), Some(RED));
        assert_eq!(fb.pixel(6, 4), Some(BACKGROUND));
        assert_eq!(fb.pixel(2, 5), Some(BACKGROUND));
    }

    #[test]
    fn blit_clips_at_surface_edge() {
        let mut fb = Framebuffer::create(10, 10).unwrap();
        // Right and bottom spill past the surface.
        fb.blit(Rect::new(8, 8, 15, 15), &patch(8, 8, RED));

        assert_eq!((fb.width(), fb.height()), (10, 10));
        assert_eq!(fb.pixel(9, 9), Some(RED));
        assert_eq!(fb.pixel(8, 8), Some(RED));
        assert_eq!(fb.pixel(7, 9), Some(BACKGROUND));
        let painted = fb.as_image().pixels().filter(|p| **p == RED).count();
        assert_eq!(painted, 4);
    }

    #[test]
    fn blit_clips_to_source_patch() {
        let mut fb = Framebuffer::create(10, 10).unwrap();
        // Destination claims 6x6 but the decoded patch is only 2x2.
        fb.blit(Rect::new(0, 0, 5, 5), &patch(2, 2, RED));
        let painted = fb.as_image().pixels().filter(|p| **p == RED).count();
        assert_eq!(painted, 4);
    }

    #[test]
    fn blit_off_surface_or_inverted_is_noop() {
        let mut fb = Framebuffer::create(10, 10).unwrap();
        fb.blit(Rect::new(10, 0, 12, 2), &patch(3, 3, RED));
        fb.blit(Rect::new(5, 5, 4, 4), &patch(3, 3, RED));
        assert!(fb.as_image().pixels().all(|p| *p == BACKGROUND));
    }

    #[test]
    fn later_blits_overwrite_earlier_ones() {
        let blue = Rgb([0, 0, 255]);
        let mut fb = Framebuffer::create(4, 4).unwrap();
        fb.blit(Rect::new(0, 0, 3, 3), &patch(4, 4, RED));
        fb.blit(Rect::new(1, 1, 2, 2), &patch(2, 2, blue));
        assert_eq!(fb.pixel(0, 0), Some(RED));
        assert_eq!(fb.pixel(1, 1), Some(blue));
    }
}
