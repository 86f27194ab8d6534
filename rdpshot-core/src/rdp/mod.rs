//! # rdp: screen capture over the Remote Desktop Protocol
//!
//! Everything between a socket and a framebuffer full of pixels.
//!
//! ## Pipeline
//!
//! ```text
//!  RdpConnector ──IronRDP──► Connection ──ProtocolEvent──► CaptureSession
//!                                                            │
//!                               BitmapCodec ◄── BitmapUpdate ┘
//!                                  │
//!                             Framebuffer ──► encoder ──► JPEG / PNG
//! ```
//!
//! ## Sub-modules
//!
//! | Module        | Purpose                                            |
//! |---------------|----------------------------------------------------|
//! | `types`       | Security mode, rectangles and bitmap updates       |
//! | `x224`        | Connection Request / Confirm and RDP_NEG PDUs      |
//! | `transport`   | IronRDP-backed connector and active stage          |
//! | `client`      | Protocol boundary: connector, connection, events   |
//! | `decoder`     | Bitmap update decoding into RGB patches            |
//! | `framebuffer` | Off-screen raster receiving the patches            |
//! | `encoder`     | Still-image encoding                               |

pub mod client;
pub mod decoder;
pub mod encoder;
pub mod framebuffer;
pub mod transport;
pub mod types;
pub mod x224;

// ── Re-exports ───────────────────────────────────────────────────

pub use client::{Connection, ConnectionHandle, Connector, ProtocolEvent, SessionObserver};
pub use decoder::{BitmapCodec, RawBitmapCodec};
pub use encoder::{ImageFormat, encode_still_image};
pub use framebuffer::Framebuffer;
pub use transport::RdpConnector;
pub use types::{BitmapUpdate, Rect, SecurityMode};
pub use x224::{ConnectionConfirm, ConnectionRequest, NegotiationFailure, RequestedProtocols};
