//! TPKT framing (RFC 1006) for `tokio_util::codec::Framed`.
//!
//! ```text
//! version:   u8      (always 3)
//! reserved:  u8
//! length:    u16 BE  (whole frame, header included)
//! payload:   [u8]    (length - 4 bytes)
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ShotError;

pub const TPKT_VERSION: u8 = 3;
pub const TPKT_HEADER_LEN: usize = 4;
/// Largest frame the 16-bit length field can describe.
pub const MAX_TPKT_FRAME: usize = u16::MAX as usize;

#[derive(Debug, Default, Clone, Copy)]
pub struct TpktCodec;

impl Decoder for TpktCodec {
    type Item = BytesMut;
    type Error = ShotError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < TPKT_HEADER_LEN {
            return Ok(None);
        }
        if src[0] != TPKT_VERSION {
            return Err(ShotError::ProtocolViolation("not a TPKT frame"));
        }

        let length = u16::from_be_bytes([src[2], src[3]]) as usize;
        if length < TPKT_HEADER_LEN {
            return Err(ShotError::ProtocolViolation("TPKT length shorter than header"));
        }
        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(length);
        frame.advance(TPKT_HEADER_LEN);
        Ok(Some(frame))
    }
}

impl Encoder<Bytes> for TpktCodec {
    type Error = ShotError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let length = item.len() + TPKT_HEADER_LEN;
        if length > MAX_TPKT_FRAME {
            return Err(ShotError::Encoding(format!(
                "TPKT payload too large: {} bytes",
                item.len()
            )));
        }
        dst.reserve(length);
        dst.put_u8(TPKT_VERSION);
        dst.put_u8(0);
        dst.put_u16(length as u16);
        dst.extend_from_slice(&item);
        Ok(())
    }
}
