//! # rdpshot-core
//!
//! Core library for rdpshot, a one-shot RDP screenshot client.
//!
//! This crate contains:
//! - **Target**: `CaptureTarget`, the validated `host[:port]` plus capture geometry
//! - **Session**: `CaptureSession`, the state machine driving one capture to a `CaptureResult`
//! - **State**: connection lifecycle and the single legacy-security fallback policy
//! - **RDP**: X.224 negotiation PDUs, the IronRDP connector, bitmap decoding, framebuffer, image encoding
//! - **Codec**: `TpktCodec` for framed TCP I/O via `tokio_util`
//! - **Record**: the JSON output envelope and its materializer
//! - **Registry**: `SessionRegistry`, the driver's count of live sessions
//! - **Error**: `ShotError`, a typed `thiserror`-based error hierarchy

pub mod codec;
pub mod error;
pub mod rdp;
pub mod record;
pub mod registry;
pub mod session;
pub mod state;
pub mod target;
pub mod timer;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use codec::TpktCodec;
pub use error::{FailureReason, ShotError};
pub use rdp::{
    BitmapUpdate, Connection, Connector, Framebuffer, ImageFormat, ProtocolEvent, Rect,
    RdpConnector, SecurityMode, SessionObserver,
};
pub use record::{CaptureRecord, RecordStatus, materialize};
pub use registry::{LoopControl, Outcome, SessionId, SessionRegistry};
pub use session::{Action, CaptureResult, CaptureSession, SessionSettings};
pub use state::{ConnectionState, Verdict};
pub use target::{CaptureTarget, DEFAULT_RDP_PORT, parse_address};
pub use timer::IdleTimer;
