//! RDP connector built on IronRDP.
//!
//! [`RdpConnector`] opens the TCP link and lets `ironrdp-connector`
//! drive the connection sequence (X.224 negotiation, TLS upgrade, MCS,
//! capability exchange, licensing). The established session is handed
//! to a task running the `ironrdp-session` active stage, which decodes
//! bitmap, RLE and planar updates into an RGBA surface. Every region
//! it reports is forwarded to the capture session as a
//! [`ProtocolEvent::Bitmap`].
//!
//! The negotiation step is where a server refuses TLS, which is what
//! drives the session's single legacy fallback. IronRDP only speaks
//! TLS-based security, so a [`SecurityMode::Legacy`] attempt fails
//! before anything goes on the wire.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use ironrdp_connector::{ClientConnector, ConnectionResult, Credentials, DesktopSize, ServerName};
use ironrdp_graphics::image_processing::PixelFormat;
use ironrdp_pdu::gcc::KeyboardType;
use ironrdp_pdu::geometry::InclusiveRectangle;
use ironrdp_pdu::nego::NegoRequestData;
use ironrdp_pdu::rdp::capability_sets::MajorPlatformType;
use ironrdp_pdu::rdp::client_info::{PerformanceFlags, TimezoneInfo};
use ironrdp_session::image::DecodedImage;
use ironrdp_session::{ActiveStage, ActiveStageOutput};
use ironrdp_tokio::{FramedWrite, TokioFramed};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_util::codec::Decoder;
use tracing::{debug, info, warn};

use crate::codec::TpktCodec;
use crate::error::{FailureReason, ShotError};
use crate::rdp::client::{Connection, ConnectionHandle, Connector, ProtocolEvent};
use crate::rdp::types::{BitmapUpdate, Rect, SecurityMode};
use crate::rdp::x224::{ConnectionConfirm, RequestedProtocols, validate_cookie};
use crate::target::CaptureTarget;

/// Default bound on TCP connect.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on the connection sequence after TCP connect.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

const CLIENT_NAME: &str = "rdpshot";
const CLIENT_DIR: &str = "C:\\Windows\\System32\\mstscax.dll";

/// Bytes of server traffic kept for classifying a failed handshake.
/// A Connection Confirm is 19 bytes.
const HANDSHAKE_RECORD_LIMIT: usize = 64;

type TlsFramed = TokioFramed<ironrdp_tls::TlsStream<TcpStream>>;

// ── RdpConnector ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RdpConnector {
    connect_timeout: Duration,
    handshake_timeout: Duration,
    cookie: Option<String>,
}

impl Default for RdpConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT, DEFAULT_HANDSHAKE_TIMEOUT)
    }
}

impl RdpConnector {
    pub fn new(connect_timeout: Duration, handshake_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            handshake_timeout,
            cookie: None,
        }
    }

    /// Send an `mstshash` cookie with every Connection Request.
    ///
    /// An empty cookie means none. A cookie too long for the request's
    /// length indicator is rejected with [`ShotError::Encoding`].
    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Result<Self, ShotError> {
        let cookie = cookie.into();
        validate_cookie(&cookie)?;
        self.cookie = Some(cookie).filter(|c| !c.is_empty());
        Ok(self)
    }

    pub fn cookie(&self) -> Option<&str> {
        self.cookie.as_deref()
    }

    /// Client configuration for one attempt at `target`.
    ///
    /// No credentials are sent: the capture is of whatever the server
    /// shows before logon, which rules out CredSSP.
    fn session_config(&self, target: &CaptureTarget, mode: SecurityMode) -> ironrdp_connector::Config {
        ironrdp_connector::Config {
            desktop_size: DesktopSize {
                width: target.width(),
                height: target.height(),
            },
            desktop_scale_factor: 0,
            enable_tls: mode.requested_protocols().contains(RequestedProtocols::SSL),
            enable_credssp: false,
            credentials: Credentials::UsernamePassword {
                username: String::new(),
                password: String::new(),
            },
            domain: None,
            client_build: 0,
            client_name: CLIENT_NAME.to_owned(),
            keyboard_type: KeyboardType::IbmEnhanced,
            keyboard_subtype: 0,
            keyboard_layout: 0,
            keyboard_functional_keys_count: 12,
            ime_file_name: String::new(),
            dig_product_id: String::new(),
            client_dir: CLIENT_DIR.to_owned(),
            platform: MajorPlatformType::UNIX,
            hardware_id: None,
            request_data: self.cookie.clone().map(NegoRequestData::cookie),
            autologon: false,
            enable_audio_playback: false,
            bitmap: None,
            license_cache: None,
            enable_server_pointer: false,
            pointer_software_rendering: true,
            performance_flags: PerformanceFlags::default(),
            timezone_info: TimezoneInfo::default(),
        }
    }

    async fn open(&self, addr: SocketAddr) -> Result<TcpStream, ShotError> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ShotError::Timeout(self.connect_timeout))?
            .map_err(|e| ShotError::ConnectionFailed(format!("{addr}: {e}")))?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

#[async_trait]
impl Connector for RdpConnector {
    async fn connect(
        &mut self,
        target: &CaptureTarget,
        mode: SecurityMode,
    ) -> Result<Connection, ShotError> {
        let requested = mode.requested_protocols();
        if !requested.contains(RequestedProtocols::SSL) {
            return Err(ShotError::ConnectionFailed(
                "standard RDP security is not supported".into(),
            ));
        }

        let addr = target.socket_addr();
        debug!(%addr, %mode, "opening connection");
        let stream = self.open(addr).await?;
        let config = self.session_config(target, mode);

        let (framed, result) = tokio::time::timeout(
            self.handshake_timeout,
            handshake(stream, addr, config, requested),
        )
        .await
        .map_err(|_| ShotError::Timeout(self.handshake_timeout))??;
        info!(
            %addr,
            %mode,
            width = result.desktop_size.width,
            height = result.desktop_size.height,
            "session established"
        );

        let (connection, handle) = Connection::pair();
        tokio::spawn(run_active_stage(framed, result, handle));
        Ok(connection)
    }
}

// ── Connection sequence ──────────────────────────────────────────

async fn handshake(
    stream: TcpStream,
    addr: SocketAddr,
    config: ironrdp_connector::Config,
    requested: RequestedProtocols,
) -> Result<(TlsFramed, ConnectionResult), ShotError> {
    let client_addr = stream.local_addr()?;
    let mut framed = TokioFramed::new(Recorder::new(stream));
    let mut connector = ClientConnector::new(config, client_addr);

    let should_upgrade = match ironrdp_tokio::connect_begin(&mut framed, &mut connector).await {
        Ok(should_upgrade) => should_upgrade,
        Err(e) => {
            let (recorder, _) = framed.into_inner();
            return Err(classify_handshake(recorder.seen(), requested, e));
        }
    };

    let stream = framed.into_inner_no_leftover().into_inner();
    let server_name = addr.ip().to_string();
    let (tls, server_public_key) = ironrdp_tls::upgrade(stream, &server_name)
        .await
        .map_err(|e| ShotError::ConnectionFailed(format!("TLS upgrade: {e}")))?;
    let upgraded = ironrdp_tokio::mark_as_upgraded(should_upgrade, &mut connector);
    debug!(%addr, "TLS established");

    let mut framed = TokioFramed::new(tls);
    let result = ironrdp_tokio::connect_finalize(
        upgraded,
        &mut framed,
        connector,
        ServerName::new(server_name),
        server_public_key,
        None,
        None,
    )
    .await
    .map_err(|e| ShotError::ConnectionFailed(e.to_string()))?;
    Ok((framed, result))
}

/// Turn a failed pre-TLS handshake into a session error.
///
/// When the recorded server bytes hold a Connection Confirm carrying
/// `RDP_NEG_FAILURE`, the failure is a security negotiation refusal.
/// Anything else is a plain connection failure.
pub(crate) fn classify_handshake(
    seen: &[u8],
    requested: RequestedProtocols,
    cause: impl std::fmt::Display,
) -> ShotError {
    let mut buf = BytesMut::from(seen);
    let refused = match TpktCodec.decode(&mut buf) {
        Ok(Some(tpdu)) => ConnectionConfirm::decode(&tpdu)
            .and_then(|confirm| confirm.selected_protocol(requested))
            .err(),
        _ => None,
    };
    match refused {
        Some(e @ ShotError::SecurityNegotiationFailed(_)) => e,
        _ => ShotError::ConnectionFailed(cause.to_string()),
    }
}

/// Stream wrapper keeping the first bytes the server sends.
struct Recorder<S> {
    inner: S,
    seen: BytesMut,
}

impl<S> Recorder<S> {
    fn new(inner: S) -> Self {
        Self {
            inner,
            seen: BytesMut::new(),
        }
    }

    fn seen(&self) -> &[u8] {
        &self.seen
    }

    fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Recorder<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = poll {
            let fresh = &buf.filled()[before..];
            let room = HANDSHAKE_RECORD_LIMIT.saturating_sub(this.seen.len());
            this.seen.put_slice(&fresh[..fresh.len().min(room)]);
        }
        poll
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Recorder<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

// ── Active stage ─────────────────────────────────────────────────

/// Pump server PDUs through the active stage until the session asks for
/// a close, the server terminates, or the link drops.
async fn run_active_stage(mut framed: TlsFramed, result: ConnectionResult, handle: ConnectionHandle) {
    let ConnectionHandle { events, mut close } = handle;
    let (width, height) = (result.desktop_size.width, result.desktop_size.height);
    let mut image = DecodedImage::new(PixelFormat::RgbA32, width, height);
    let mut stage = ActiveStage::new(result);

    for event in [ProtocolEvent::Ready, ProtocolEvent::SessionReady] {
        if events.send(event).await.is_err() {
            return;
        }
    }

    loop {
        let outputs = tokio::select! {
            // Also resolves when the session drops its `Connection`.
            requested = &mut close => {
                if requested.is_ok() {
                    shutdown(&mut framed, &mut stage).await;
                    let _ = events.send(ProtocolEvent::Closed).await;
                }
                return;
            }
            pdu = framed.read_pdu() => {
                let processed = match pdu {
                    Ok((action, payload)) => stage
                        .process(&mut image, action, &payload)
                        .map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                };
                match processed {
                    Ok(outputs) => outputs,
                    Err(reason) => {
                        warn!("link dropped: {reason}");
                        let _ = events.send(ProtocolEvent::Lost(FailureReason::Other(reason))).await;
                        return;
                    }
                }
            }
        };

        for output in outputs {
            match output {
                ActiveStageOutput::ResponseFrame(frame) => {
                    if let Err(e) = framed.write_all(&frame).await {
                        warn!("link dropped: {e}");
                        let _ = events
                            .send(ProtocolEvent::Lost(FailureReason::Other(e.to_string())))
                            .await;
                        return;
                    }
                }
                ActiveStageOutput::GraphicsUpdate(region) => {
                    let Some(update) =
                        region_update(image.data(), image.width(), image.height(), rect_of(&region))
                    else {
                        continue;
                    };
                    if events.send(ProtocolEvent::Bitmap(update)).await.is_err() {
                        return;
                    }
                }
                ActiveStageOutput::Terminate(reason) => {
                    info!(?reason, "server ended the session");
                    let _ = events.send(ProtocolEvent::Closed).await;
                    return;
                }
                _ => {}
            }
        }
    }
}

async fn shutdown(framed: &mut TlsFramed, stage: &mut ActiveStage) {
    let outputs = match stage.graceful_shutdown() {
        Ok(outputs) => outputs,
        Err(e) => {
            debug!("graceful shutdown failed: {e}");
            return;
        }
    };
    for output in outputs {
        if let ActiveStageOutput::ResponseFrame(frame) = output {
            if let Err(e) = framed.write_all(&frame).await {
                debug!("shutdown after close request failed: {e}");
                return;
            }
        }
    }
}

fn rect_of(region: &InclusiveRectangle) -> Rect {
    Rect::new(region.left, region.top, region.right, region.bottom)
}

/// Copy `region` of a top-down RGBA surface into a raw 32 bpp update.
///
/// The update uses the wire layout of an uncompressed RDP bitmap
/// (bottom-up rows of BGRX) so it goes through the same decoder as
/// any other raw bitmap. Returns `None` when the region misses the
/// surface entirely.
pub(crate) fn region_update(
    rgba: &[u8],
    surface_width: u16,
    surface_height: u16,
    region: Rect,
) -> Option<BitmapUpdate> {
    if surface_width == 0 || surface_height == 0 {
        return None;
    }
    let clipped = Rect::new(
        region.left,
        region.top,
        region.right.min(surface_width - 1),
        region.bottom.min(surface_height - 1),
    );
    if clipped.is_empty() || rgba.len() < surface_width as usize * surface_height as usize * 4 {
        return None;
    }

    let width = clipped.width() as usize;
    let height = clipped.height() as usize;
    let mut data = BytesMut::with_capacity(width * height * 4);
    for y in (clipped.top as usize..=clipped.bottom as usize).rev() {
        let row = (y * surface_width as usize + clipped.left as usize) * 4;
        for px in rgba[row..row + width * 4].chunks_exact(4) {
            data.put_slice(&[px[2], px[1], px[0], 0]);
        }
    }

    Some(BitmapUpdate {
        dest: clipped,
        width: width as u16,
        height: height as u16,
        bits_per_pixel: 32,
        compressed: false,
        data: data.freeze(),
    })
}

// ── Tests ────────────────────────────────────────────────────────
