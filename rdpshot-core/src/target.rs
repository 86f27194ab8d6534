//! Capture target: where to connect and what to capture.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::error::ShotError;

/// Well-known RDP port, used when `--target` carries no port.
pub const DEFAULT_RDP_PORT: u16 = 3389;

// ── CaptureTarget ────────────────────────────────────────────────

/// Immutable description of one capture request.
///
/// Built once from user input and shared read-only by the driver and
/// the capture session for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureTarget {
    ip: IpAddr,
    port: u16,
    width: u16,
    height: u16,
    timeout_secs: u64,
}

impl CaptureTarget {
    /// Validate and build a target.
    ///
    /// Rejects port 0, zero width/height and a zero idle timeout.
    pub fn new(
        ip: IpAddr,
        port: u16,
        width: u16,
        height: u16,
        timeout_secs: u64,
    ) -> Result<Self, ShotError> {
        if port == 0 {
            return Err(ShotError::InvalidTarget("port must be in 1..=65535".into()));
        }
        if width == 0 || height == 0 {
            return Err(ShotError::InvalidTarget(format!(
                "capture size must be non-zero, got {width}x{height}"
            )));
        }
        if timeout_secs == 0 {
            return Err(ShotError::InvalidTarget("idle timeout must be at least 1s".into()));
        }
        Ok(Self {
            ip,
            port,
            width,
            height,
            timeout_secs,
        })
    }

    /// Parse `host[:port]` and build a target from it.
    pub fn parse(
        spec: &str,
        width: u16,
        height: u16,
        timeout_secs: u64,
    ) -> Result<Self, ShotError> {
        let (ip, port) = parse_address(spec)?;
        Self::new(ip, port, width, height, timeout_secs)
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    /// Idle timeout as requested, in whole seconds.
    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    /// Maximum silence between two bitmap updates.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl std::fmt::Display for CaptureTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

// ── Address parsing ──────────────────────────────────────────────

/// Parse `ip`, `ip:port` or `[v6]:port` into an address pair.
///
/// Only literal IP addresses are accepted; hostnames are rejected.
/// A missing port defaults to [`DEFAULT_RDP_PORT`].
pub fn parse_address(spec: &str) -> Result<(IpAddr, u16), ShotError> {
    let spec = spec.trim();

    // Bare address, including IPv6 without brackets.
    if let Ok(ip) = spec.parse::<IpAddr>() {
        return Ok((ip, DEFAULT_RDP_PORT));
    }

    if let Ok(addr) = spec.parse::<SocketAddr>() {
        if addr.port() == 0 {
            return Err(ShotError::InvalidTarget(format!("{spec}: port 0 is not valid")));
        }
        return Ok((addr.ip(), addr.port()));
    }

    match spec.rsplit_once(':') {
        Some((host, _)) if host.parse::<IpAddr>().is_err() => Err(ShotError::InvalidTarget(
            format!("{spec}: {host:?} is not an IP address"),
        )),
        Some((_, port)) => Err(ShotError::InvalidTarget(format!(
            "{spec}: {port:?} is not a valid port"
        ))),
        None => Err(ShotError::InvalidTarget(format!("{spec}: not an IP address"))),
    }
}

// ── Tests ────────────────────────────────────────────────────────
