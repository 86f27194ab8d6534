//! Output record: the JSON envelope produced once per invocation.
//!
//! ```text
//! { "ip": "..", "port": 3389,
//!   "data": { "rdp": { "status": "success" | "unknown-error",
//!                      "result": { "response": { "image", "size", "request" } },
//!                      "error": ".." } } }
//! ```

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ShotError;
use crate::rdp::encoder::ImageFormat;
use crate::rdp::framebuffer::Framebuffer;
use crate::session::CaptureResult;
use crate::target::CaptureTarget;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordStatus {
    Success,
    UnknownError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRecord {
    pub ip: String,
    pub port: u16,
    pub data: RecordData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordData {
    pub rdp: RdpOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RdpOutcome {
    pub status: RecordStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<RdpResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RdpResult {
    pub response: CaptureResponse,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureResponse {
    /// Base64 of the encoded still image.
    pub image: String,
    /// Length of the encoded image before base64.
    pub size: usize,
    pub request: CaptureRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRequest {
    pub width: u16,
    pub height: u16,
    pub timeout: u64,
}

impl CaptureRecord {
    /// Encode the framebuffer and wrap it in a success record.
    pub fn from_success(
        framebuffer: &Framebuffer,
        target: &CaptureTarget,
        format: ImageFormat,
    ) -> Result<Self, ShotError> {
        let bytes = framebuffer.encode(format)?;
        Ok(Self::envelope(
            target,
            RdpOutcome {
                status: RecordStatus::Success,
                result: Some(RdpResult {
                    response: CaptureResponse {
                        image: STANDARD.encode(&bytes),
                        size: bytes.len(),
                        request: CaptureRequest {
                            width: target.width(),
                            height: target.height(),
                            timeout: target.timeout_secs(),
                        },
                    },
                }),
                error: None,
            },
        ))
    }

    pub fn from_failure(target: &CaptureTarget, reason: &ShotError) -> Self {
        Self::envelope(
            target,
            RdpOutcome {
                status: RecordStatus::UnknownError,
                result: None,
                error: Some(reason.to_string()),
            },
        )
    }

    fn envelope(target: &CaptureTarget, rdp: RdpOutcome) -> Self {
        Self {
            ip: target.ip().to_string(),
            port: target.port(),
            data: RecordData { rdp },
        }
    }

    pub fn is_success(&self) -> bool {
        self.data.rdp.status == RecordStatus::Success
    }

    /// Raw image bytes of a success record.
    pub fn decoded_image(&self) -> Option<Vec<u8>> {
        let response = &self.data.rdp.result.as_ref()?.response;
        STANDARD.decode(&response.image).ok()
    }

    pub fn to_json(&self) -> Result<String, ShotError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Turn a terminal result into exactly one record. An image that fails
/// to encode becomes a failure record.
pub fn materialize(result: &CaptureResult, target: &CaptureTarget, format: ImageFormat) -> CaptureRecord {
    match result {
        CaptureResult::Success { image, .. } => {
            CaptureRecord::from_success(image, target, format).unwrap_or_else(|e| {
                warn!(%target, "encoding capture failed: {e}");
                CaptureRecord::from_failure(target, &e)
            })
        }
        CaptureResult::Failure { reason } => CaptureRecord::from_failure(target, reason),
    }
}
