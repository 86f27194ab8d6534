//! Protocol boundary between a capture session and an RDP stack.
//!
//! A [`Connector`] opens one [`Connection`] per attempt. The connection
//! delivers [`ProtocolEvent`]s in order over an mpsc channel and accepts
//! a single close request. The session consumes those events through
//! the [`SessionObserver`] capability set.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::error::{FailureReason, ShotError};
use crate::rdp::types::{BitmapUpdate, SecurityMode};
use crate::target::CaptureTarget;

/// Buffer size of a connection's event channel.
pub const EVENT_CHANNEL_SIZE: usize = 256;

// ── ProtocolEvent ────────────────────────────────────────────────

/// Everything a connection can report after it has been established.
#[derive(Debug, Clone)]
pub enum ProtocolEvent {
    /// The protocol stack is connected, just before bitmaps flow.
    Ready,
    /// The remote desktop session is ready.
    SessionReady,
    /// A rectangle of screen content.
    Bitmap(BitmapUpdate),
    /// The stack closed, in response to a close request or by itself.
    Closed,
    /// The link dropped.
    Lost(FailureReason),
}

// ── SessionObserver ──────────────────────────────────────────────

/// Callbacks of the protocol stack.
pub trait SessionObserver {
    fn on_ready(&mut self);
    fn on_session_ready(&mut self);
    fn on_bitmap_update(&mut self, update: BitmapUpdate);
    fn on_close(&mut self);
}

// ── Connection ───────────────────────────────────────────────────

/// One established link to the remote desktop.
///
/// Dropping a `Connection` drops both channel ends, which tells the
/// stack behind it to tear the link down.
#[derive(Debug)]
pub struct Connection {
    events: mpsc::Receiver<ProtocolEvent>,
    close: Option<oneshot::Sender<()>>,
    ended: bool,
}

/// The stack's half of a [`Connection`].
#[derive(Debug)]
pub struct ConnectionHandle {
    /// Event sink towards the session.
    pub events: mpsc::Sender<ProtocolEvent>,
    /// Resolves when the session requests a close.
    pub close: oneshot::Receiver<()>,
}

impl Connection {
    /// Create a connection together with the handle its stack drives.
    pub fn pair() -> (Self, ConnectionHandle) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let (close_tx, close_rx) = oneshot::channel();
        (
            Self {
                events: events_rx,
                close: Some(close_tx),
                ended: false,
            },
            ConnectionHandle {
                events: events_tx,
                close: close_rx,
            },
        )
    }

    /// Next event from the stack.
    ///
    /// A channel that ends without a `Closed` or `Lost` event is
    /// reported once as `Lost`; after that this stays pending.
    pub async fn next_event(&mut self) -> ProtocolEvent {
        if self.ended {
            return std::future::pending().await;
        }
        match self.events.recv().await {
            Some(event) => {
                if matches!(event, ProtocolEvent::Closed | ProtocolEvent::Lost(_)) {
                    self.ended = true;
                }
                event
            }
            None => {
                self.ended = true;
                ProtocolEvent::Lost(FailureReason::Other("connection dropped".into()))
            }
        }
    }

    /// Ask the stack for a protocol-level close. Idempotent.
    pub fn request_close(&mut self) {
        if let Some(close) = self.close.take() {
            let _ = close.send(());
        }
    }

    pub fn close_requested(&self) -> bool {
        self.close.is_none()
    }
}

// ── Connector ────────────────────────────────────────────────────

/// Opens connections to a target.
///
/// A failed attempt returns an error; an attempt that fails after the
/// connection was handed out reports [`ProtocolEvent::Lost`] instead.
/// Security negotiation failures must surface as
/// [`ShotError::SecurityNegotiationFailed`] for the fallback to kick in.
#[async_trait]
pub trait Connector: Send {
    async fn connect(
        &mut self,
        target: &CaptureTarget,
        mode: SecurityMode,
    ) -> Result<Connection, ShotError>;
}
