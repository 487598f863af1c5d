//! Liveness ping framing
//!
//! Frames carry an 8-byte header (major version, minor version, body length,
//! request id) followed by tag-length-value items. A probe sends an opcode
//! item set to [`OP_PING`] plus an opaque payload; a healthy server answers
//! with [`OP_PONG`] and the same payload under the same request id.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

pub const VERSION_MAJOR: u8 = 1;
pub const VERSION_MINOR: u8 = 0;
pub const HEADER_LEN: usize = 8;

pub const TAG_OPCODE: u8 = 0x11;
pub const TAG_PAYLOAD: u8 = 0x12;

pub const OP_PING: u8 = 0xF1;
pub const OP_PONG: u8 = 0xF2;
pub const OP_ERROR: u8 = 0xFF;

/// Frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub body_len: usize,
    pub id: u32,
}

/// Decoded frame body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: u8,
    pub payload: Bytes,
}

/// Encode a complete frame (header and body)
pub fn encode(id: u32, opcode: u8, payload: &[u8]) -> Result<Bytes> {
    let body_len = 3 + 1 + 3 + payload.len();
    let wire_len = u16::try_from(body_len)
        .map_err(|_| Error::Probe(format!("ping payload too large: {} bytes", payload.len())))?;

    let mut buf = BytesMut::with_capacity(HEADER_LEN + body_len);
    buf.put_u8(VERSION_MAJOR);
    buf.put_u8(VERSION_MINOR);
    buf.put_u16(wire_len);
    buf.put_u32(id);

    buf.put_u8(TAG_OPCODE);
    buf.put_u16(1);
    buf.put_u8(opcode);

    buf.put_u8(TAG_PAYLOAD);
    // Fits: body_len already checked against u16
    buf.put_u16(payload.len() as u16);
    buf.put_slice(payload);

    Ok(buf.freeze())
}

pub fn decode_header(mut raw: &[u8]) -> Result<Header> {
    if raw.len() < HEADER_LEN {
        return Err(Error::Probe("short frame header".to_string()));
    }
    let major = raw.get_u8();
    let _minor = raw.get_u8();
    if major != VERSION_MAJOR {
        return Err(Error::Probe(format!("unsupported protocol version {}", major)));
    }
    let body_len = raw.get_u16() as usize;
    let id = raw.get_u32();
    Ok(Header { body_len, id })
}

pub fn decode_body(mut raw: &[u8]) -> Result<Frame> {
    let mut opcode = None;
    let mut payload = Bytes::new();

    while raw.has_remaining() {
        if raw.remaining() < 3 {
            return Err(Error::Probe("truncated frame item".to_string()));
        }
        let tag = raw.get_u8();
        let len = raw.get_u16() as usize;
        if raw.remaining() < len {
            return Err(Error::Probe(format!("item 0x{:02x} overruns frame", tag)));
        }
        let data = raw.copy_to_bytes(len);

        match tag {
            TAG_OPCODE if len == 1 => opcode = Some(data[0]),
            TAG_OPCODE => return Err(Error::Probe("malformed opcode item".to_string())),
            TAG_PAYLOAD => payload = data,
            // Unknown items are skipped
            _ => {}
        }
    }

    let opcode = opcode.ok_or_else(|| Error::Probe("frame has no opcode".to_string()))?;
    Ok(Frame { opcode, payload })
}

/// Check that a decoded response answers the ping we sent
pub fn check_pong(expected_id: u32, expected_payload: &[u8], header: &Header, frame: &Frame) -> Result<()> {
    if header.id != expected_id {
        return Err(Error::Probe(format!(
            "response id {} does not match ping id {}",
            header.id, expected_id
        )));
    }
    match frame.opcode {
        OP_PONG if frame.payload.as_ref() == expected_payload => Ok(()),
        OP_PONG => Err(Error::Probe("pong payload mismatch".to_string())),
        OP_ERROR => Err(Error::Probe(format!(
            "server returned error code {}",
            frame.payload.first().copied().unwrap_or(0)
        ))),
        op => Err(Error::Probe(format!("unexpected opcode 0x{:02x}", op))),
    }
}
