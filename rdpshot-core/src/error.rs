//! Domain-specific error types for rdpshot.
//!
//! All fallible operations return `Result<T, ShotError>`.
//! Protocol-level failures never escape a capture session: they are
//! folded into a [`CaptureResult::Failure`](crate::session::CaptureResult).

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for rdpshot.
#[derive(Debug, Error)]
pub enum ShotError {
    // ── Input Errors ─────────────────────────────────────────────
    /// The `host[:port]` target, dimensions or timeout are unusable.
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// A raster was requested with a zero dimension.
    #[error("invalid dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    // ── Session Errors ───────────────────────────────────────────
    /// The server refused the requested security protocol.
    #[error("security negotiation failed: {0}")]
    SecurityNegotiationFailed(String),

    /// The connection could not be established.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// An established connection dropped unexpectedly.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The session closed cleanly without a single usable bitmap update.
    #[error("no data received")]
    NoDataReceived,

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── Connection Errors ────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// A PDU or state transition violated protocol rules.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    // ── Codec Errors ─────────────────────────────────────────────
    /// A bitmap update could not be decoded.
    #[error("bitmap decode error: {0}")]
    Bitmap(String),

    /// Still-image or record encoding failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── FailureReason ────────────────────────────────────────────────

/// Why a connection attempt failed or an established link dropped.
///
/// This is the classification the security fallback policy looks at;
/// everything it does not care about collapses into `Other`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The server rejected the requested security protocol.
    SecurityNegotiationFailed(String),
    /// Any other failure.
    Other(String),
}

impl FailureReason {
    pub fn is_security_negotiation(&self) -> bool {
        matches!(self, Self::SecurityNegotiationFailed(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::SecurityNegotiationFailed(m) | Self::Other(m) => m,
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SecurityNegotiationFailed(m) => write!(f, "security negotiation failed: {m}"),
            Self::Other(m) => write!(f, "{m}"),
        }
    }
}

impl From<ShotError> for FailureReason {
    fn from(e: ShotError) -> Self {
        match e {
            ShotError::SecurityNegotiationFailed(m) => Self::SecurityNegotiationFailed(m),
            ShotError::ConnectionFailed(m) | ShotError::ConnectionLost(m) => Self::Other(m),
            other => Self::Other(other.to_string()),
        }
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for ShotError {
    fn from(s: String) -> Self {
        ShotError::Other(s)
    }
}

impl From<&str> for ShotError {
    fn from(s: &str) -> Self {
        ShotError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for ShotError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        ShotError::ChannelClosed
    }
}

impl From<image::ImageError> for ShotError {
    fn from(e: image::ImageError) -> Self {
        ShotError::Encoding(e.to_string())
    }
}

impl From<serde_json::Error> for ShotError {
    fn from(e: serde_json::Error) -> Self {
        ShotError::Encoding(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = ShotError::NoDataReceived;
        assert!(e.to_string().contains("no data"));

        let e = ShotError::InvalidDimensions {
            width: 0,
            height: 600,
        };
        assert!(e.to_string().contains("0x600"));
    }

    #[test]
    fn from_string() {
        let e: ShotError = "something broke".into();
        assert!(matches!(e, ShotError::Other(_)));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let e: ShotError = io_err.into();
        assert!(matches!(e, ShotError::Connection(_)));
    }

    #[test]
    fn failure_reason_classification() {
        let r = FailureReason::from(ShotError::SecurityNegotiationFailed(
            "HYBRID_REQUIRED_BY_SERVER".into(),
        ));
        assert!(r.is_security_negotiation());
        assert_eq!(r.message(), "HYBRID_REQUIRED_BY_SERVER");

        let r = FailureReason::from(ShotError::ConnectionFailed("refused".into()));
        assert!(!r.is_security_negotiation());
        assert!(r.to_string().contains("refused"));
    }
}
