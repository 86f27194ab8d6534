//! Where the capture record goes.

use std::io::Write;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use rdpshot_core::CaptureRecord;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Routing of the output record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// One JSON line on stdout.
    #[default]
    Stdout,
    /// `<dir>/rdp_<ip>_<port>.json`.
    File,
}

#[derive(Debug, Clone)]
pub enum OutputSink {
    Stdout,
    File { dir: PathBuf },
}

impl OutputSink {
    pub fn new(mode: OutputMode, dir: impl Into<PathBuf>) -> Self {
        match mode {
            OutputMode::Stdout => Self::Stdout,
            OutputMode::File => Self::File { dir: dir.into() },
        }
    }

    /// File a record for `ip`/`port` lands in, in file mode.
    pub fn file_name(record: &CaptureRecord) -> String {
        // IPv6 colons are not portable in file names.
        let ip = record.ip.replace(':', "_");
        format!("rdp_{ip}_{}.json", record.port)
    }

    /// Write one record. Returns the file path in file mode.
    pub fn emit(&self, record: &CaptureRecord) -> std::io::Result<Option<PathBuf>> {
        let json = serde_json::to_string(record)?;
        match self {
            Self::Stdout => {
                let mut out = std::io::stdout().lock();
                writeln!(out, "{json}")?;
                out.flush()?;
                Ok(None)
            }
            Self::File { dir } => {
                let path = write_record(dir, &Self::file_name(record), &json)?;
                info!("record written to {}", path.display());
                Ok(Some(path))
            }
        }
    }
}

fn write_record(dir: &Path, name: &str, json: &str) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(name);
    std::fs::write(&path, json)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdpshot_core::{CaptureTarget, ShotError};

    fn record(spec: &str) -> CaptureRecord {
        let target = CaptureTarget::parse(spec, 800, 600, 5).unwrap();
        CaptureRecord::from_failure(&target, &ShotError::NoDataReceived)
    }

    #[test]
    fn file_names() {
        assert_eq!(OutputSink::file_name(&record("10.1.2.3")), "rdp_10.1.2.3_3389.json");
        assert_eq!(OutputSink::file_name(&record("[::1]:3390")), "rdp___1_3390.json");
    }

    #[test]
    fn file_mode_writes_one_record() {
        let dir = tempfile::tempdir().unwrap();
        let sink = OutputSink::new(OutputMode::File, dir.path().join("out"));
        let path = sink.emit(&record("10.1.2.3:3390")).unwrap().unwrap();

        assert_eq!(path, dir.path().join("out").join("rdp_10.1.2.3_3390.json"));
        let written: CaptureRecord =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, record("10.1.2.3:3390"));
        assert_eq!(std::fs::read_dir(dir.path().join("out")).unwrap().count(), 1);
    }

    #[test]
    fn mode_parses_from_toml_strings() {
        #[derive(Deserialize)]
        struct Wrap {
            mode: OutputMode,
        }
        let w: Wrap = toml::from_str("mode = \"file\"").unwrap();
        assert_eq!(w.mode, OutputMode::File);
    }
}
