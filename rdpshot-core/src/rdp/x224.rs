//! X.224 connection PDUs carrying RDP security negotiation.
//!
//! Only the connection phase is modelled: the client's Connection
//! Request with an `RDP_NEG_REQ`, and the server's Connection Confirm
//! with either an `RDP_NEG_RSP` or an `RDP_NEG_FAILURE`.
//!
//! ## Wire format (inside a TPKT frame)
//!
//! ```text
//! length indicator:  u8          (bytes that follow, excluding itself)
//! TPDU code:         u8          (0xE0 request, 0xD0 confirm)
//! dst-ref:           u16 BE
//! src-ref:           u16 BE
//! class:             u8
//! cookie:            "Cookie: mstshash=<name>\r\n"  (request only, optional)
//! negotiation:       type u8, flags u8, length u16 LE (=8), value u32 LE
//! ```

use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ShotError;

const TPDU_CONNECTION_REQUEST: u8 = 0xE0;
const TPDU_CONNECTION_CONFIRM: u8 = 0xD0;

const TYPE_RDP_NEG_REQ: u8 = 0x01;
const TYPE_RDP_NEG_RSP: u8 = 0x02;
const TYPE_RDP_NEG_FAILURE: u8 = 0x03;

const NEG_BLOCK_LEN: usize = 8;
/// Fixed part of a TPDU: LI, code, dst-ref, src-ref, class.
const FIXED_LEN: usize = 7;

bitflags! {
    /// Security protocols a client may request (MS-RDPBCGR 2.2.1.1.1).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RequestedProtocols: u32 {
        /// Standard RDP security; the absence of every other bit.
        const RDP = 0x0000_0000;
        const SSL = 0x0000_0001;
        const HYBRID = 0x0000_0002;
        const RDSTLS = 0x0000_0004;
        const HYBRID_EX = 0x0000_0008;
    }
}

// ── NegotiationFailure ───────────────────────────────────────────

/// Failure codes of an `RDP_NEG_FAILURE` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationFailure {
    SslRequiredByServer,
    SslNotAllowedByServer,
    SslCertNotOnServer,
    InconsistentFlags,
    HybridRequiredByServer,
    SslWithUserAuthRequiredByServer,
    Unknown(u32),
}

impl From<u32> for NegotiationFailure {
    fn from(code: u32) -> Self {
        match code {
            1 => Self::SslRequiredByServer,
            2 => Self::SslNotAllowedByServer,
            3 => Self::SslCertNotOnServer,
            4 => Self::InconsistentFlags,
            5 => Self::HybridRequiredByServer,
            6 => Self::SslWithUserAuthRequiredByServer,
            other => Self::Unknown(other),
        }
    }
}

impl std::fmt::Display for NegotiationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SslRequiredByServer => write!(f, "SSL_REQUIRED_BY_SERVER"),
            Self::SslNotAllowedByServer => write!(f, "SSL_NOT_ALLOWED_BY_SERVER"),
            Self::SslCertNotOnServer => write!(f, "SSL_CERT_NOT_ON_SERVER"),
            Self::InconsistentFlags => write!(f, "INCONSISTENT_FLAGS"),
            Self::HybridRequiredByServer => write!(f, "HYBRID_REQUIRED_BY_SERVER"),
            Self::SslWithUserAuthRequiredByServer => {
                write!(f, "SSL_WITH_USER_AUTH_REQUIRED_BY_SERVER")
            }
            Self::Unknown(code) => write!(f, "unknown failure code {code:#x}"),
        }
    }
}

// ── ConnectionRequest ────────────────────────────────────────────

const COOKIE_PREFIX: &str = "Cookie: mstshash=";
const COOKIE_SUFFIX: &str = "\r\n";

/// Longest `mstshash` value whose request still fits the u8 length indicator.
pub const MAX_COOKIE_LEN: usize =
    u8::MAX as usize - (FIXED_LEN - 1) - NEG_BLOCK_LEN - COOKIE_PREFIX.len() - COOKIE_SUFFIX.len();

/// Check that `cookie` can be carried in a Connection Request.
pub fn validate_cookie(cookie: &str) -> Result<(), ShotError> {
    if cookie.len() > MAX_COOKIE_LEN {
        return Err(ShotError::Encoding(format!(
            "cookie is {} bytes, at most {MAX_COOKIE_LEN} fit in a connection request",
            cookie.len()
        )));
    }
    if cookie.bytes().any(|b| b == b'\r' || b == b'\n') {
        return Err(ShotError::Encoding("cookie must not contain line breaks".into()));
    }
    Ok(())
}

/// Client X.224 Connection Request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRequest {
    /// Optional `mstshash` routing cookie.
    pub cookie: Option<String>,
    pub protocols: RequestedProtocols,
}

impl ConnectionRequest {
    pub fn new(protocols: RequestedProtocols) -> Self {
        Self {
            cookie: None,
            protocols,
        }
    }

    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }

    /// Serialize the TPDU (without the TPKT header).
    ///
    /// Fails with [`ShotError::Encoding`] when the cookie does not fit.
    pub fn encode(&self) -> Result<Bytes, ShotError> {
        let cookie = self.cookie.as_deref().filter(|c| !c.is_empty());
        if let Some(c) = cookie {
            validate_cookie(c)?;
        }
        let cookie_len = cookie.map_or(0, |c| COOKIE_PREFIX.len() + c.len() + COOKIE_SUFFIX.len());
        let li = u8::try_from(FIXED_LEN - 1 + cookie_len + NEG_BLOCK_LEN)
            .map_err(|_| ShotError::Encoding("connection request too long".into()))?;

        let mut buf = BytesMut::with_capacity(FIXED_LEN + cookie_len + NEG_BLOCK_LEN);
        buf.put_u8(li);
        buf.put_u8(TPDU_CONNECTION_REQUEST);
        buf.put_u16(0); // dst-ref
        buf.put_u16(0); // src-ref
        buf.put_u8(0); // class 0
        if let Some(c) = cookie {
            buf.put_slice(COOKIE_PREFIX.as_bytes());
            buf.put_slice(c.as_bytes());
            buf.put_slice(COOKIE_SUFFIX.as_bytes());
        }
        buf.put_u8(TYPE_RDP_NEG_REQ);
        buf.put_u8(0);
        buf.put_u16_le(NEG_BLOCK_LEN as u16);
        buf.put_u32_le(self.protocols.bits());
        Ok(buf.freeze())
    }

    /// Parse a TPDU (the TPKT payload). A request without a negotiation
    /// block asks for standard RDP security.
    pub fn decode(tpdu: &[u8]) -> Result<Self, ShotError> {
        let body = variable_part(tpdu, TPDU_CONNECTION_REQUEST, "expected X.224 Connection Request")?;

        let (cookie, rest) = match body.strip_prefix(COOKIE_PREFIX.as_bytes()) {
            Some(after) => {
                let end = after
                    .windows(2)
                    .position(|w| w == COOKIE_SUFFIX.as_bytes())
                    .ok_or(ShotError::ProtocolViolation("unterminated cookie"))?;
                let cookie = String::from_utf8_lossy(&after[..end]).into_owned();
                (Some(cookie), &after[end + COOKIE_SUFFIX.len()..])
            }
            None => (None, body),
        };

        let protocols = match rest.len() {
            0 => RequestedProtocols::RDP,
            NEG_BLOCK_LEN if rest[0] == TYPE_RDP_NEG_REQ => RequestedProtocols::from_bits_retain(
                u32::from_le_bytes([rest[4], rest[5], rest[6], rest[7]]),
            ),
            _ => return Err(ShotError::ProtocolViolation("bad negotiation request")),
        };
        Ok(Self { cookie, protocols })
    }
}

/// Validate the fixed header and return the bytes after it, up to LI.
fn variable_part<'a>(tpdu: &'a [u8], code: u8, wrong_code: &'static str) -> Result<&'a [u8], ShotError> {
    if tpdu.len() < FIXED_LEN {
        return Err(ShotError::ProtocolViolation("X.224 TPDU too short"));
    }
    let li = tpdu[0] as usize;
    if li + 1 > tpdu.len() || li + 1 < FIXED_LEN {
        return Err(ShotError::ProtocolViolation("X.224 length indicator out of range"));
    }
    if tpdu[1] & 0xF0 != code {
        return Err(ShotError::ProtocolViolation(wrong_code));
    }
    Ok(&tpdu[FIXED_LEN..li + 1])
}

// ── ConnectionConfirm ────────────────────────────────────────────

/// Negotiation block of a Connection Confirm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negotiation {
    /// The server picked a protocol.
    Response {
        flags: u8,
        selected: RequestedProtocols,
    },
    /// The server refused every requested protocol.
    Failure(NegotiationFailure),
}

/// Server X.224 Connection Confirm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionConfirm {
    /// `None` for pre-negotiation servers, which implies standard RDP security.
    pub negotiation: Option<Negotiation>,
}

impl ConnectionConfirm {
    /// Parse a TPDU (the TPKT payload).
    pub fn decode(tpdu: &[u8]) -> Result<Self, ShotError> {
        let rest = variable_part(tpdu, TPDU_CONNECTION_CONFIRM, "expected X.224 Connection Confirm")?;
        if rest.len() < NEG_BLOCK_LEN {
            return Ok(Self { negotiation: None });
        }

        let kind = rest[0];
        let flags = rest[1];
        let len = u16::from_le_bytes([rest[2], rest[3]]) as usize;
        if len != NEG_BLOCK_LEN {
            return Err(ShotError::ProtocolViolation("bad negotiation block length"));
        }
        let value = u32::from_le_bytes([rest[4], rest[5], rest[6], rest[7]]);

        let negotiation = match kind {
            TYPE_RDP_NEG_RSP => Negotiation::Response {
                flags,
                selected: RequestedProtocols::from_bits_retain(value),
            },
            TYPE_RDP_NEG_FAILURE => Negotiation::Failure(NegotiationFailure::from(value)),
            _ => return Err(ShotError::ProtocolViolation("unknown negotiation block type")),
        };
        Ok(Self {
            negotiation: Some(negotiation),
        })
    }

    /// Resolve the confirm against what was requested.
    ///
    /// A failure block becomes [`ShotError::SecurityNegotiationFailed`];
    /// a selection outside the request is a protocol violation.
    pub fn selected_protocol(
        &self,
        requested: RequestedProtocols,
    ) -> Result<RequestedProtocols, ShotError> {
        match self.negotiation {
            None => Ok(RequestedProtocols::RDP),
            Some(Negotiation::Failure(code)) => {
                Err(ShotError::SecurityNegotiationFailed(code.to_string()))
            }
            Some(Negotiation::Response { selected, .. }) => {
                if selected.is_empty() || requested.contains(selected) {
                    Ok(selected)
                } else {
                    Err(ShotError::ProtocolViolation(
                        "server selected a protocol that was not requested",
                    ))
                }
            }
        }
    }

    /// Serialize the TPDU (without the TPKT header).
    pub fn encode(&self) -> Bytes {
        let neg_len = if self.negotiation.is_some() { NEG_BLOCK_LEN } else { 0 };
        let mut buf = BytesMut::with_capacity(FIXED_LEN + neg_len);
        buf.put_u8((FIXED_LEN - 1 + neg_len) as u8);
        buf.put_u8(TPDU_CONNECTION_CONFIRM);
        buf.put_u16(0);
        buf.put_u16(0x1234);
        buf.put_u8(0);
        match self.negotiation {
            Some(Negotiation::Response { flags, selected }) => {
                buf.put_u8(TYPE_RDP_NEG_RSP);
                buf.put_u8(flags);
                buf.put_u16_le(NEG_BLOCK_LEN as u16);
                buf.put_u32_le(selected.bits());
            }
            Some(Negotiation::Failure(code)) => {
                buf.put_u8(TYPE_RDP_NEG_FAILURE);
                buf.put_u8(0);
                buf.put_u16_le(NEG_BLOCK_LEN as u16);
                buf.put_u32_le(code.code());
            }
            None => {}
        }
        buf.freeze()
    }
}

impl NegotiationFailure {
    pub fn code(self) -> u32 {
        match self {
            Self::SslRequiredByServer => 1,
            Self::SslNotAllowedByServer => 2,
            Self::SslCertNotOnServer => 3,
            Self::InconsistentFlags => 4,
            Self::HybridRequiredByServer => 5,
            Self::SslWithUserAuthRequiredByServer => 6,
            Self::Unknown(code) => code,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_layout_without_cookie() {
        let req = ConnectionRequest::new(RequestedProtocols::SSL).encode().unwrap();
        assert_eq!(
            &req[..],
            &[0x0E, 0xE0, 0, 0, 0, 0, 0, 0x01, 0x00, 0x08, 0x00, 0x01, 0, 0, 0]
        );
    }

    #[test]
    fn request_with_cookie_counts_cookie_in_li() {
        let req = ConnectionRequest::new(RequestedProtocols::RDP)
            .with_cookie("admin")
            .encode()
            .unwrap();
        let cookie = b"Cookie: mstshash=admin\r\n";
        assert_eq!(req[0] as usize, 6 + cookie.len() + 8);
        assert_eq!(&req[7..7 + cookie.len()], cookie);
        assert_eq!(req.len(), req[0] as usize + 1);
    }

    #[test]
    fn longest_cookie_fills_the_length_indicator() {
        let req = ConnectionRequest::new(RequestedProtocols::SSL)
            .with_cookie("a".repeat(MAX_COOKIE_LEN))
            .encode()
            .unwrap();
        assert_eq!(req[0], u8::MAX);
        assert_eq!(req.len(), req[0] as usize + 1);
    }

    #[test]
    fn oversized_cookie_is_rejected_not_truncated() {
        for len in [MAX_COOKIE_LEN + 1, 250] {
            let err = ConnectionRequest::new(RequestedProtocols::SSL)
                .with_cookie("a".repeat(len))
                .encode()
                .unwrap_err();
            assert!(matches!(err, ShotError::Encoding(_)), "{len}: {err}");
        }
        assert!(validate_cookie("a\r\nx").is_err());
    }

    #[test]
    fn request_decodes_back() {
        let req = ConnectionRequest::new(RequestedProtocols::SSL).with_cookie("scan");
        assert_eq!(ConnectionRequest::decode(&req.encode().unwrap()).unwrap(), req);

        // Pre-negotiation clients send no RDP_NEG_REQ.
        let bare = ConnectionRequest::decode(&[0x06, 0xE0, 0, 0, 0, 0, 0]).unwrap();
        assert_eq!(bare.protocols, RequestedProtocols::RDP);
        assert!(ConnectionRequest::decode(&[0x06, 0xD0, 0, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn confirm_with_response() {
        let cc = ConnectionConfirm {
            negotiation: Some(Negotiation::Response {
                flags: 0,
                selected: RequestedProtocols::SSL,
            }),
        };
        let parsed = ConnectionConfirm::decode(&cc.encode()).unwrap();
        assert_eq!(parsed, cc);
        assert_eq!(
            parsed.selected_protocol(RequestedProtocols::SSL).unwrap(),
            RequestedProtocols::SSL
        );
    }

    #[test]
    fn confirm_with_failure_is_negotiation_error() {
        let cc = ConnectionConfirm {
            negotiation: Some(Negotiation::Failure(NegotiationFailure::HybridRequiredByServer)),
        };
        let parsed = ConnectionConfirm::decode(&cc.encode()).unwrap();
        let err = parsed.selected_protocol(RequestedProtocols::SSL).unwrap_err();
        match err {
            ShotError::SecurityNegotiationFailed(msg) => {
                assert_eq!(msg, "HYBRID_REQUIRED_BY_SERVER")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn confirm_without_negotiation_means_standard_security() {
        let parsed = ConnectionConfirm::decode(&[0x06, 0xD0, 0, 0, 0, 0, 0]).unwrap();
        assert_eq!(parsed.negotiation, None);
        assert_eq!(
            parsed.selected_protocol(RequestedProtocols::RDP).unwrap(),
            RequestedProtocols::RDP
        );
    }

    #[test]
    fn unrequested_selection_is_rejected() {
        let cc = ConnectionConfirm {
            negotiation: Some(Negotiation::Response {
                flags: 0,
                selected: RequestedProtocols::HYBRID,
            }),
        };
        assert!(matches!(
            cc.selected_protocol(RequestedProtocols::SSL),
            Err(ShotError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn malformed_confirms() {
        assert!(ConnectionConfirm::decode(&[0x06, 0xD0]).is_err());
        // Connection Request code where a confirm is expected.
        assert!(ConnectionConfirm::decode(&[0x06, 0xE0, 0, 0, 0, 0, 0]).is_err());
        // LI claims more bytes than present.
        assert!(ConnectionConfirm::decode(&[0x20, 0xD0, 0, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn failure_codes_roundtrip_through_u32() {
        for code in 1..=6 {
            assert_eq!(NegotiationFailure::from(code).code(), code);
        }
        assert_eq!(NegotiationFailure::from(42), NegotiationFailure::Unknown(42));
    }
}
