//! Command line surface.
//!
//! ```text
//! rdpshot --target 10.0.0.5[:3389]          Capture, print one JSON line
//! rdpshot --target .. --mode file           Write <output-dir>/rdp_<ip>_<port>.json
//! rdpshot --config <path>                   Load a custom config TOML
//! rdpshot --gen-config                      Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use rdpshot_core::{CaptureTarget, ShotError};

use crate::config::AppConfig;
use crate::output::{OutputMode, OutputSink};

/// Flags left unset fall back to the config file, then to built-in defaults.
#[derive(Parser, Debug)]
#[command(name = "rdpshot", version, about = "One-shot RDP screenshot capture")]
pub struct Cli {
    /// Target as host[:port]; the host must be an IP address. Port defaults to 3389.
    #[arg(short, long)]
    pub target: Option<String>,

    /// Capture width in pixels [default: 800].
    #[arg(long)]
    pub width: Option<u16>,

    /// Capture height in pixels [default: 600].
    #[arg(long)]
    pub height: Option<u16>,

    /// Seconds without a screen update before the capture is taken [default: 5].
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Where the JSON record goes [default: stdout].
    #[arg(long, value_enum)]
    pub mode: Option<OutputMode>,

    /// Directory for file mode [default: /tmp/].
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "rdpshot.toml")]
    pub config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    pub gen_config: bool,
}

impl Cli {
    /// Validate the target against flags and config.
    pub fn build_target(&self, config: &AppConfig) -> Result<CaptureTarget, ShotError> {
        let spec = self
            .target
            .as_deref()
            .ok_or_else(|| ShotError::InvalidTarget("--target is required".into()))?;
        CaptureTarget::parse(
            spec,
            self.width.unwrap_or(config.capture.width),
            self.height.unwrap_or(config.capture.height),
            self.timeout.unwrap_or(config.capture.idle_timeout_secs),
        )
    }

    pub fn output_sink(&self, config: &AppConfig) -> OutputSink {
        OutputSink::new(
            self.mode.unwrap_or(config.output.mode),
            self.output_dir
                .clone()
                .unwrap_or_else(|| config.output.dir.clone()),
        )
    }
}
