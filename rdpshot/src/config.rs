//! Configuration for rdpshot.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rdpshot_core::rdp::encoder::DEFAULT_JPEG_QUALITY;
use rdpshot_core::session::{DEFAULT_CLOSE_GRACE, DEFAULT_MAX_DURATION};
use rdpshot_core::{ImageFormat, RdpConnector, SessionSettings, ShotError};
use serde::{Deserialize, Serialize};

use crate::output::OutputMode;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Capture geometry and session timing.
    pub capture: CaptureConfig,
    /// Connection settings.
    pub network: NetworkConfig,
    /// Where the record goes.
    pub output: OutputConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub width: u16,
    pub height: u16,
    /// Seconds of silence after the last update before closing.
    pub idle_timeout_secs: u64,
    /// Absolute bound on a session. 0 disables it.
    pub max_duration_secs: u64,
    /// Seconds to wait for a requested close to be confirmed.
    pub close_grace_secs: u64,
    /// "jpeg" or "png".
    pub image_format: String,
    /// JPEG quality, 1-100.
    pub jpeg_quality: u8,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Bound on the RDP connection sequence (negotiation, TLS,
    /// capability exchange) in milliseconds.
    pub handshake_timeout_ms: u64,
    /// `mstshash` cookie sent with the connection request. Empty for none.
    pub cookie: String,
}

/// Output routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub mode: OutputMode,
    /// Directory for file mode.
    pub dir: PathBuf,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            idle_timeout_secs: 5,
            max_duration_secs: DEFAULT_MAX_DURATION.as_secs(),
            close_grace_secs: DEFAULT_CLOSE_GRACE.as_secs(),
            image_format: "jpeg".into(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,
            handshake_timeout_ms: 15000,
            cookie: String::new(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            mode: OutputMode::Stdout,
            dir: PathBuf::from("/tmp/"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from a TOML file.
    ///
    /// A missing file yields the defaults. A file that does not parse is
    /// an error; the caller decides whether to fall back.
    pub fn load(path: &Path) -> Result<Self, toml::de::Error> {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents),
            Err(_) => Ok(Self::default()),
        }
    }

    /// The default configuration as TOML (for bootstrapping).
    pub fn default_toml() -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(&Self::default())
    }

    /// Session knobs beyond the capture request itself.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            close_grace: Duration::from_secs(self.capture.close_grace_secs),
            max_duration: match self.capture.max_duration_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }

    /// Still-image format, JPEG at the configured quality unless PNG is
    /// asked for. Unknown names fall back to JPEG.
    pub fn image_format(&self) -> ImageFormat {
        let format = self.capture.image_format.parse().unwrap_or_else(|e| {
            tracing::warn!("{e}; using jpeg");
            ImageFormat::default()
        });
        match format {
            ImageFormat::Jpeg { .. } => ImageFormat::Jpeg {
                quality: self.capture.jpeg_quality.clamp(1, 100),
            },
            other => other,
        }
    }

    /// The RDP connector. Fails when the cookie cannot be sent.
    pub fn connector(&self) -> Result<RdpConnector, ShotError> {
        RdpConnector::new(
            Duration::from_millis(self.network.connect_timeout_ms.max(1)),
            Duration::from_millis(self.network.handshake_timeout_ms.max(1)),
        )
        .with_cookie(self.network.cookie.clone())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = AppConfig::default_toml().unwrap();
        assert!(text.contains("idle_timeout_secs"));
        assert!(text.contains("[output]"));
        assert!(text.contains("mode = \"stdout\""));
    }

    #[test]
    fn roundtrip_config() {
        let text = AppConfig::default_toml().unwrap();
        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.capture.width, 800);
        assert_eq!(parsed.capture.height, 600);
        assert_eq!(parsed.output.dir, PathBuf::from("/tmp/"));
        assert_eq!(parsed.logging.level, "info");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let parsed: AppConfig =
            toml::from_str("[capture]\nwidth = 1024\n\n[output]\nmode = \"file\"\n").unwrap();
        assert_eq!(parsed.capture.width, 1024);
        assert_eq!(parsed.capture.height, 600);
        assert_eq!(parsed.output.mode, OutputMode::File);
        assert_eq!(parsed.network.connect_timeout_ms, 5000);
    }

    #[test]
    fn zero_max_duration_disables_deadline() {
        let mut cfg = AppConfig::default();
        assert_eq!(cfg.session_settings(), SessionSettings::default());
        cfg.capture.max_duration_secs = 0;
        assert_eq!(cfg.session_settings().max_duration, None);
    }

    #[test]
    fn image_format_uses_configured_quality() {
        let mut cfg = AppConfig::default();
        cfg.capture.jpeg_quality = 90;
        assert_eq!(cfg.image_format(), ImageFormat::Jpeg { quality: 90 });

        cfg.capture.image_format = "PNG".into();
        assert_eq!(cfg.image_format(), ImageFormat::Png);

        cfg.capture.image_format = "gif".into();
        assert!(matches!(cfg.image_format(), ImageFormat::Jpeg { .. }));
    }

    #[test]
    fn oversized_cookie_is_a_config_error() {
        let mut cfg = AppConfig::default();
        assert!(cfg.connector().unwrap().cookie().is_none());

        cfg.network.cookie = "scanner".into();
        assert_eq!(cfg.connector().unwrap().cookie(), Some("scanner"));

        cfg.network.cookie = "x".repeat(300);
        assert!(matches!(cfg.connector(), Err(ShotError::Encoding(_))));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = AppConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.capture.idle_timeout_secs, 5);
    }

    #[test]
    fn invalid_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "capture = 3").unwrap();
        assert!(AppConfig::load(&path).is_err());

        std::fs::write(&path, "[capture]\nwidth = 1024\n").unwrap();
        assert_eq!(AppConfig::load(&path).unwrap().capture.width, 1024);
    }
}
