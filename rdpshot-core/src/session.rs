//! Capture session: the state machine that turns one target into one
//! [`CaptureResult`].
//!
//! The machine itself is synchronous. Connection lifecycle events,
//! protocol callbacks ([`SessionObserver`]) and timer fires go in;
//! [`Action`]s come out. [`CaptureSession::run`] interprets those
//! actions against a [`Connector`] and two [`IdleTimer`]s on the
//! calling task, so every callback runs on one thread, one at a time.
//!
//! ```text
//!  Connecting ──connect ok──► Active ──idle fire──► Closing ──closed──► Terminated
//!     │  ▲                      │                                          ▲
//!     │  └──── Retrying ◄───────┤ lost, policy = retry (once)              │
//!     └─────────────────────────┴── lost, policy = give up ────────────────┘
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::error::{FailureReason, ShotError};
use crate::rdp::client::{Connection, Connector, ProtocolEvent, SessionObserver};
use crate::rdp::decoder::{BitmapCodec, RawBitmapCodec};
use crate::rdp::framebuffer::Framebuffer;
use crate::rdp::types::{BitmapUpdate, SecurityMode};
use crate::state::{ConnectionState, Verdict, decide};
use crate::target::CaptureTarget;
use crate::timer::IdleTimer;

/// Default wait for a requested close to be confirmed.
pub const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(5);
/// Default bound on the whole session, updates or not.
pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(60);

// ── SessionSettings ──────────────────────────────────────────────

/// Knobs that are not part of the capture request itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// How long to wait for the stack to confirm a requested close
    /// before terminating anyway.
    pub close_grace: Duration,
    /// Non-resetting bound on the session. `None` disables it.
    pub max_duration: Option<Duration>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            close_grace: DEFAULT_CLOSE_GRACE,
            max_duration: Some(DEFAULT_MAX_DURATION),
        }
    }
}

// ── CaptureResult ────────────────────────────────────────────────

/// Terminal outcome of a capture session. Produced exactly once.
#[derive(Debug)]
pub enum CaptureResult {
    Success {
        image: Framebuffer,
        width: u16,
        height: u16,
        timeout_used: u64,
    },
    Failure {
        reason: ShotError,
    },
}

impl CaptureResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// One-line description for logs and the outcome log.
    pub fn summary(&self) -> String {
        match self {
            Self::Success { width, height, .. } => format!("captured {width}x{height}"),
            Self::Failure { reason } => reason.to_string(),
        }
    }
}

// ── Action ───────────────────────────────────────────────────────

/// Side effects requested by the state machine.
#[derive(Debug)]
pub enum Action {
    /// Open a connection with the given security mode, replacing any
    /// previous one.
    Connect(SecurityMode),
    /// (Re)arm the idle timer.
    ArmIdle(Duration),
    CancelIdle,
    /// Request a protocol-level close of the current connection.
    Close,
    /// Stop processing and hand out the result.
    Finish(CaptureResult),
}

// ── CaptureSession ───────────────────────────────────────────────

pub struct CaptureSession {
    target: CaptureTarget,
    settings: SessionSettings,
    codec: Box<dyn BitmapCodec>,
    /// Taken when a success result is built.
    framebuffer: Option<Framebuffer>,
    state: ConnectionState,
    mode: SecurityMode,
    has_data: bool,
    updates: u64,
    attempts: u32,
    actions: VecDeque<Action>,
}

impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("target", &self.target)
            .field("state", &self.state)
            .field("mode", &self.mode)
            .field("has_data", &self.has_data)
            .field("updates", &self.updates)
            .field("attempts", &self.attempts)
            .finish()
    }
}

impl CaptureSession {
    /// Create a session with a framebuffer sized to the target.
    pub fn new(target: CaptureTarget, settings: SessionSettings) -> Result<Self, ShotError> {
        let framebuffer = Framebuffer::create(target.width() as u32, target.height() as u32)?;
        Ok(Self {
            target,
            settings,
            codec: Box::new(RawBitmapCodec),
            framebuffer: Some(framebuffer),
            state: ConnectionState::default(),
            mode: SecurityMode::default(),
            has_data: false,
            updates: 0,
            attempts: 0,
            actions: VecDeque::new(),
        })
    }

    /// Replace the bitmap codec (e.g. with one that understands RLE).
    pub fn with_codec(mut self, codec: Box<dyn BitmapCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn target(&self) -> &CaptureTarget {
        &self.target
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn mode(&self) -> SecurityMode {
        self.mode
    }

    pub fn has_data(&self) -> bool {
        self.has_data
    }

    /// Bitmap updates received while active or closing.
    pub fn updates(&self) -> u64 {
        self.updates
    }

    /// Connection attempts issued so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Current framebuffer; `None` once a success result took it.
    pub fn framebuffer(&self) -> Option<&Framebuffer> {
        self.framebuffer.as_ref()
    }

    /// Pop the next pending side effect.
    pub fn next_action(&mut self) -> Option<Action> {
        self.actions.pop_front()
    }

    // ── Lifecycle events ─────────────────────────────────────────

    /// Issue the first connection attempt.
    pub fn start(&mut self) {
        if self.attempts == 0 && self.state == ConnectionState::Connecting {
            info!(target = %self.target, "starting capture");
            self.issue_connect();
        }
    }

    /// The outstanding connection attempt succeeded.
    pub fn on_connected(&mut self) {
        match self.state.connected() {
            Ok(()) => info!(target = %self.target, mode = %self.mode, "connected"),
            Err(e) => debug!("ignoring connect completion: {e}"),
        }
    }

    /// The outstanding attempt failed or the established link dropped.
    pub fn on_connection_lost(&mut self, reason: FailureReason) {
        match self.state {
            ConnectionState::Terminated => trace!("ignoring loss after termination"),
            ConnectionState::Closing => {
                debug!("connection ended while closing: {reason}");
                self.finish_closed();
            }
            ConnectionState::Connecting | ConnectionState::Active | ConnectionState::Retrying => {
                match decide(self.mode, &reason) {
                    Verdict::RetryLegacy => {
                        if let Err(e) = self.retry_legacy(&reason) {
                            self.fail(e);
                        }
                    }
                    Verdict::GiveUp if self.has_data => {
                        warn!("connection lost after data arrived, keeping capture: {reason}");
                        self.finish_closed();
                    }
                    Verdict::GiveUp => {
                        let error = self.loss_error(reason);
                        self.fail(error);
                    }
                }
            }
        }
    }

    /// The idle timer fired.
    ///
    /// While active this starts the close; while closing it means the
    /// close grace ran out.
    pub fn on_idle_timeout(&mut self) {
        match self.state {
            ConnectionState::Active => {
                info!(updates = self.updates, "no update for {:?}, closing", self.target.idle_timeout());
                self.begin_close();
            }
            ConnectionState::Closing => {
                warn!("close not confirmed within {:?}", self.settings.close_grace);
                self.finish_closed();
            }
            _ => trace!(state = %self.state, "ignoring idle fire"),
        }
    }

    /// The absolute session deadline elapsed.
    pub fn on_deadline(&mut self) {
        let limit = self.settings.max_duration.unwrap_or_default();
        match self.state {
            ConnectionState::Active => {
                info!(updates = self.updates, "session deadline of {limit:?} reached, closing");
                self.begin_close();
            }
            ConnectionState::Connecting | ConnectionState::Retrying => {
                self.fail(ShotError::Timeout(limit));
            }
            _ => trace!(state = %self.state, "ignoring deadline"),
        }
    }

    // ── Runner ───────────────────────────────────────────────────

    /// Drive the session to its terminal result.
    pub async fn run<C>(mut self, connector: &mut C) -> CaptureResult
    where
        C: Connector + ?Sized,
    {
        let mut link: Option<Connection> = None;
        let mut idle = IdleTimer::new();
        let mut deadline = IdleTimer::new();
        if let Some(limit) = self.settings.max_duration {
            deadline.arm(limit);
        }

        self.start();
        loop {
            while let Some(action) = self.next_action() {
                match action {
                    Action::Connect(mode) => {
                        // Never two sockets to the same target.
                        link = None;
                        let attempt = tokio::select! {
                            result = connector.connect(&self.target, mode) => Some(result),
                            () = deadline.fired() => None,
                        };
                        match attempt {
                            Some(Ok(connection)) => {
                                link = Some(connection);
                                self.on_connected();
                            }
                            Some(Err(e)) => self.on_connection_lost(FailureReason::from(e)),
                            None => self.on_deadline(),
                        }
                    }
                    Action::ArmIdle(after) => idle.arm(after),
                    Action::CancelIdle => idle.cancel(),
                    Action::Close => {
                        if let Some(connection) = link.as_mut() {
                            connection.request_close();
                        }
                    }
                    Action::Finish(result) => {
                        info!(target = %self.target, attempts = self.attempts, "{}", result.summary());
                        return result;
                    }
                }
            }

            tokio::select! {
                event = next_event(&mut link) => self.dispatch(event),
                () = idle.fired() => self.on_idle_timeout(),
                () = deadline.fired() => self.on_deadline(),
            }
        }
    }

    fn dispatch(&mut self, event: ProtocolEvent) {
        match event {
            ProtocolEvent::Ready => self.on_ready(),
            ProtocolEvent::SessionReady => self.on_session_ready(),
            ProtocolEvent::Bitmap(update) => self.on_bitmap_update(update),
            ProtocolEvent::Closed => self.on_close(),
            ProtocolEvent::Lost(reason) => self.on_connection_lost(reason),
        }
    }

    // ── Internal ─────────────────────────────────────────────────

    fn issue_connect(&mut self) {
        self.attempts += 1;
        debug!(attempt = self.attempts, mode = %self.mode, "connecting");
        self.actions.push_back(Action::Connect(self.mode));
    }

    fn retry_legacy(&mut self, reason: &FailureReason) -> Result<(), ShotError> {
        self.mode.downgrade()?;
        self.state.begin_retry()?;
        warn!("{reason}; retrying with standard RDP security");
        self.actions.push_back(Action::CancelIdle);
        self.state.reconnect()?;
        self.issue_connect();
        Ok(())
    }

    fn begin_close(&mut self) {
        if let Err(e) = self.state.begin_close() {
            debug!("not closing: {e}");
            return;
        }
        self.actions.push_back(Action::Close);
        self.actions.push_back(Action::ArmIdle(self.settings.close_grace));
    }

    fn loss_error(&self, reason: FailureReason) -> ShotError {
        match reason {
            FailureReason::SecurityNegotiationFailed(m) => ShotError::SecurityNegotiationFailed(m),
            FailureReason::Other(m) if self.state == ConnectionState::Connecting => {
                ShotError::ConnectionFailed(m)
            }
            FailureReason::Other(m) => ShotError::ConnectionLost(m),
        }
    }

    /// Terminate after the connection closed, successfully if any
    /// update made it into the framebuffer.
    fn finish_closed(&mut self) {
        if self.state.is_terminated() {
            return;
        }
        let result = match (self.has_data, self.framebuffer.take()) {
            (true, Some(image)) => CaptureResult::Success {
                image,
                width: self.target.width(),
                height: self.target.height(),
                timeout_used: self.target.timeout_secs(),
            },
            _ => CaptureResult::Failure {
                reason: ShotError::NoDataReceived,
            },
        };
        self.finish(result);
    }

    fn fail(&mut self, reason: ShotError) {
        self.finish(CaptureResult::Failure { reason });
    }

    fn finish(&mut self, result: CaptureResult) {
        if self.state.terminate().is_err() {
            trace!("result already produced, dropping {}", result.summary());
            return;
        }
        self.actions.clear();
        self.actions.push_back(Action::CancelIdle);
        self.actions.push_back(Action::Finish(result));
    }
}

impl SessionObserver for CaptureSession {
    fn on_ready(&mut self) {
        debug!(target = %self.target, "protocol stack ready");
    }

    fn on_session_ready(&mut self) {
        debug!(target = %self.target, "remote session ready");
    }

    fn on_bitmap_update(&mut self, update: BitmapUpdate) {
        if !matches!(self.state, ConnectionState::Active | ConnectionState::Closing) {
            trace!(state = %self.state, "ignoring bitmap update");
            return;
        }
        self.updates += 1;

        match self.codec.decode(&update) {
            Ok(patch) => {
                if let Some(framebuffer) = self.framebuffer.as_mut() {
                    framebuffer.blit(update.dest, &patch);
                    self.has_data = true;
                }
            }
            Err(e) => warn!(dest = ?update.dest, "skipping bitmap update: {e}"),
        }

        // Measures silence between updates, not total session length.
        if self.state.is_active() {
            self.actions
                .push_back(Action::ArmIdle(self.target.idle_timeout()));
        }
    }

    fn on_close(&mut self) {
        match self.state {
            ConnectionState::Active | ConnectionState::Closing => {
                debug!("protocol stack closed");
                self.finish_closed();
            }
            ConnectionState::Terminated => {}
            _ => self.on_connection_lost(FailureReason::Other(
                "closed before the connection was established".into(),
            )),
        }
    }
}

async fn next_event(link: &mut Option<Connection>) -> ProtocolEvent {
    match link.as_mut() {
        Some(connection) => connection.next_event().await,
        None => std::future::pending().await,
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rdp::types::Rect;
    use bytes::Bytes;
    use std::net::{IpAddr, Ipv4Addr};

    fn session() -> CaptureSession {
        let target =
            CaptureTarget::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 3389, 64, 32, 5).unwrap();
        CaptureSession::new(target, SessionSettings::default()).unwrap()
    }

    fn drain(s: &mut CaptureSession) -> Vec<Action> {
        std::iter::from_fn(|| s.next_action()).collect()
    }

    fn finishes(actions: &[Action]) -> usize {
        actions
            .iter()
            .filter(|a| matches!(a, Action::Finish(_)))
            .count()
    }

    fn nego() -> FailureReason {
        FailureReason::SecurityNegotiationFailed("SSL_NOT_ALLOWED_BY_SERVER".into())
    }

    /// 4x4 red square, uncompressed 32bpp.
    fn red_update() -> BitmapUpdate {
        let px = [0x00, 0x00, 0xFF, 0x00];
        BitmapUpdate {
            dest: Rect::new(0, 0, 3, 3),
            width: 4,
            height: 4,
            bits_per_pixel: 32,
            compressed: false,
            data: Bytes::from(px.repeat(16)),
        }
    }

    fn connected() -> CaptureSession {
        let mut s = session();
        s.start();
        s.on_connected();
        drain(&mut s);
        s
    }

    #[test]
    fn start_issues_one_high_security_connect() {
        let mut s = session();
        s.start();
        s.start();
        let actions = drain(&mut s);
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], Action::Connect(SecurityMode::NegotiatedHigh)));
        assert_eq!(s.attempts(), 1);
    }

    #[test]
    fn negotiation_failure_retries_once_with_legacy() {
        let mut s = session();
        s.start();
        drain(&mut s);

        s.on_connection_lost(nego());
        let actions = drain(&mut s);
        assert!(matches!(actions.last(), Some(Action::Connect(SecurityMode::Legacy))));
        assert_eq!(s.mode(), SecurityMode::Legacy);
        assert_eq!(s.state(), ConnectionState::Connecting);

        s.on_connection_lost(nego());
        let actions = drain(&mut s);
        assert_eq!(finishes(&actions), 1);
        assert!(!actions.iter().any(|a| matches!(a, Action::Connect(_))));
        match actions.into_iter().last() {
            Some(Action::Finish(CaptureResult::Failure { reason })) => {
                assert!(matches!(reason, ShotError::SecurityNegotiationFailed(_)))
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(s.attempts(), 2);
        assert!(s.state().is_terminated());
    }

    #[test]
    fn other_failure_gives_up_without_retry() {
        let mut s = session();
        s.start();
        drain(&mut s);

        s.on_connection_lost(FailureReason::Other("connection refused".into()));
        let actions = drain(&mut s);
        match actions.into_iter().last() {
            Some(Action::Finish(CaptureResult::Failure { reason })) => {
                assert!(matches!(reason, ShotError::ConnectionFailed(_)))
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(s.mode(), SecurityMode::NegotiatedHigh);
    }

    #[test]
    fn update_blits_and_rearms_idle() {
        let mut s = connected();
        s.on_bitmap_update(red_update());

        assert!(s.has_data());
        assert_eq!(s.updates(), 1);
        let fb = s.framebuffer().unwrap();
        assert_eq!(fb.pixel(0, 0), Some(image::Rgb([255, 0, 0])));
        assert_eq!(fb.pixel(4, 0), Some(crate::rdp::framebuffer::BACKGROUND));

        let actions = drain(&mut s);
        assert!(matches!(actions[..], [Action::ArmIdle(d)] if d == Duration::from_secs(5)));

        s.on_bitmap_update(red_update());
        assert_eq!(drain(&mut s).len(), 1);
    }

    #[test]
    fn undecodable_update_rearms_but_is_not_data() {
        let mut s = connected();
        let mut update = red_update();
        update.compressed = true;
        s.on_bitmap_update(update);

        assert!(!s.has_data());
        assert_eq!(s.updates(), 1);
        assert!(matches!(drain(&mut s)[..], [Action::ArmIdle(_)]));
    }

    #[test]
    fn idle_fire_requests_close_then_success_on_closed() {
        let mut s = connected();
        s.on_bitmap_update(red_update());
        drain(&mut s);

        s.on_idle_timeout();
        assert_eq!(s.state(), ConnectionState::Closing);
        let actions = drain(&mut s);
        assert!(matches!(actions[0], Action::Close));
        assert!(matches!(actions[1], Action::ArmIdle(d) if d == DEFAULT_CLOSE_GRACE));

        s.on_close();
        let actions = drain(&mut s);
        match actions.into_iter().last() {
            Some(Action::Finish(CaptureResult::Success {
                width,
                height,
                timeout_used,
                image,
            })) => {
                assert_eq!((width, height, timeout_used), (64, 32, 5));
                assert_eq!(image.pixel(3, 3), Some(image::Rgb([255, 0, 0])));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn ready_without_updates_then_close_is_no_data() {
        let mut s = connected();
        s.on_ready();
        s.on_session_ready();
        s.on_close();

        let actions = drain(&mut s);
        match actions.into_iter().last() {
            Some(Action::Finish(CaptureResult::Failure { reason })) => {
                assert!(matches!(reason, ShotError::NoDataReceived))
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn loss_while_closing_completes_the_close() {
        let mut s = connected();
        s.on_bitmap_update(red_update());
        s.on_idle_timeout();
        drain(&mut s);

        s.on_connection_lost(FailureReason::Other("peer closed the connection".into()));
        let actions = drain(&mut s);
        assert!(matches!(
            actions.last(),
            Some(Action::Finish(CaptureResult::Success { .. }))
        ));
    }

    #[test]
    fn unexpected_drop_after_data_keeps_capture() {
        let mut s = connected();
        s.on_bitmap_update(red_update());
        drain(&mut s);

        s.on_connection_lost(FailureReason::Other("reset".into()));
        assert!(matches!(
            drain(&mut s).last(),
            Some(Action::Finish(CaptureResult::Success { .. }))
        ));
    }

    #[test]
    fn unexpected_drop_before_data_is_connection_lost() {
        let mut s = connected();
        s.on_connection_lost(FailureReason::Other("reset".into()));
        match drain(&mut s).into_iter().last() {
            Some(Action::Finish(CaptureResult::Failure { reason })) => {
                assert!(matches!(reason, ShotError::ConnectionLost(_)))
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn close_grace_expiry_terminates() {
        let mut s = connected();
        s.on_idle_timeout();
        drain(&mut s);
        s.on_idle_timeout();
        match drain(&mut s).into_iter().last() {
            Some(Action::Finish(CaptureResult::Failure { reason })) => {
                assert!(matches!(reason, ShotError::NoDataReceived))
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn deadline_while_connecting_is_timeout() {
        let mut s = session();
        s.start();
        drain(&mut s);
        s.on_deadline();
        match drain(&mut s).into_iter().last() {
            Some(Action::Finish(CaptureResult::Failure { reason })) => {
                assert!(matches!(reason, ShotError::Timeout(_)))
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn terminal_result_is_produced_once() {
        let mut s = connected();
        s.on_bitmap_update(red_update());
        s.on_close();
        s.on_close();
        s.on_connection_lost(nego());
        s.on_idle_timeout();
        s.on_deadline();
        s.on_bitmap_update(red_update());

        let actions = drain(&mut s);
        assert_eq!(finishes(&actions), 1);
        assert_eq!(s.updates(), 1);
        assert_eq!(s.mode(), SecurityMode::NegotiatedHigh);
    }

    #[test]
    fn updates_before_connect_are_ignored() {
        let mut s = session();
        s.start();
        drain(&mut s);
        s.on_bitmap_update(red_update());
        assert_eq!(s.updates(), 0);
        assert!(drain(&mut s).is_empty());
    }

    #[test]
    fn updates_while_closing_are_blitted_without_rearming() {
        let mut s = connected();
        s.on_idle_timeout();
        let closing = drain(&mut s);
        assert_eq!(s.state(), ConnectionState::Closing);
        assert!(closing.iter().any(|a| matches!(a, Action::Close)));

        s.on_bitmap_update(red_update());
        assert!(s.has_data());
        assert_eq!(s.updates(), 1);
        assert_eq!(
            s.framebuffer().unwrap().pixel(0, 0),
            Some(image::Rgb([0xFF, 0, 0]))
        );

        let idle = s.target().idle_timeout();
        let after = drain(&mut s);
        assert!(
            !after.iter().any(|a| matches!(a, Action::ArmIdle(d) if *d == idle)),
            "{after:?}"
        );
        assert_eq!(s.state(), ConnectionState::Closing);
    }
}
