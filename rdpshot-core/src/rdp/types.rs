//! Shared types for the capture pipeline.
//!
//! These travel between the protocol boundary and the capture session:
//! the security level a connection is attempted with, and the bitmap
//! updates a connection delivers.

use bytes::Bytes;

use crate::error::ShotError;
use crate::rdp::x224::RequestedProtocols;

// ── SecurityMode ─────────────────────────────────────────────────

/// Security level a connection attempt is made with.
///
/// Starts at [`NegotiatedHigh`](Self::NegotiatedHigh) and may move to
/// [`Legacy`](Self::Legacy) once per target, never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SecurityMode {
    /// TLS-wrapped session (`PROTOCOL_SSL`).
    #[default]
    NegotiatedHigh,
    /// Standard RDP security (`PROTOCOL_RDP`).
    Legacy,
}

impl SecurityMode {
    /// Protocols advertised in the X.224 negotiation request.
    pub fn requested_protocols(self) -> RequestedProtocols {
        match self {
            SecurityMode::NegotiatedHigh => RequestedProtocols::SSL,
            SecurityMode::Legacy => RequestedProtocols::RDP,
        }
    }

    /// Switch to legacy security.
    ///
    /// Valid from: `NegotiatedHigh`. A second downgrade is a protocol
    /// violation, which is what keeps the fallback single-use.
    pub fn downgrade(&mut self) -> Result<(), ShotError> {
        match self {
            SecurityMode::NegotiatedHigh => {
                *self = SecurityMode::Legacy;
                Ok(())
            }
            SecurityMode::Legacy => Err(ShotError::ProtocolViolation(
                "security mode already downgraded",
            )),
        }
    }
}

impl std::fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NegotiatedHigh => write!(f, "tls"),
            Self::Legacy => write!(f, "rdp"),
        }
    }
}

// ── Rect ─────────────────────────────────────────────────────────

/// Destination rectangle of a bitmap update. All bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub left: u16,
    pub top: u16,
    pub right: u16,
    pub bottom: u16,
}

impl Rect {
    pub const fn new(left: u16, top: u16, right: u16, bottom: u16) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Width in pixels; 0 for an inverted rectangle.
    pub fn width(&self) -> u32 {
        if self.right < self.left {
            0
        } else {
            (self.right - self.left) as u32 + 1
        }
    }

    /// Height in pixels; 0 for an inverted rectangle.
    pub fn height(&self) -> u32 {
        if self.bottom < self.top {
            0
        } else {
            (self.bottom - self.top) as u32 + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }
}

// ── BitmapUpdate ─────────────────────────────────────────────────

/// One rectangle of screen content as delivered by the protocol layer.
///
/// `width`/`height` describe the encoded bitmap, which may be larger
/// than `dest` (servers pad bitmap widths to a multiple of 4).
#[derive(Debug, Clone)]
pub struct BitmapUpdate {
    /// Where the bitmap lands on the desktop.
    pub dest: Rect,
    /// Encoded bitmap width in pixels.
    pub width: u16,
    /// Encoded bitmap height in pixels.
    pub height: u16,
    /// Colour depth: 15, 16, 24 or 32.
    pub bits_per_pixel: u16,
    /// Whether `data` is RLE / planar compressed.
    pub compressed: bool,
    /// Raw bitmap bytes.
    pub data: Bytes,
}
