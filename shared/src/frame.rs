//! Frame codec for the upgraded transport.
//!
//! Supports unfragmented frames with 7- or 16-bit payload lengths. Frames
//! from clients must be masked and frames from the server must not be.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha1::{Digest, Sha1};
use thiserror::Error;

/// Suffix appended to the client key before hashing the accept token.
pub const ACCEPT_MAGIC: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Largest payload expressible with the 16-bit length form.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_GOING_AWAY: u16 = 1001;
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
pub const CLOSE_TOO_LARGE: u16 = 1009;

/// Close reasons are capped so the close payload fits a control frame.
const MAX_CLOSE_REASON: usize = 123;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("fragmented frames are not supported")]
    Fragmented,
    #[error("client frame is not masked")]
    Unmasked,
    #[error("server frame must not be masked")]
    UnexpectedMask,
    #[error("frame payload too large")]
    TooLarge,
    #[error("unknown opcode {0:#x}")]
    UnknownOpcode(u8),
}

impl FrameError {
    /// Close code sent to the peer when this error ends a connection.
    pub fn close_code(&self) -> u16 {
        match self {
            FrameError::TooLarge => CLOSE_TOO_LARGE,
            _ => CLOSE_PROTOCOL_ERROR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl TryFrom<u8> for Opcode {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x1 => Ok(Opcode::Text),
            0x2 => Ok(Opcode::Binary),
            0x8 => Ok(Opcode::Close),
            0x9 => Ok(Opcode::Ping),
            0xA => Ok(Opcode::Pong),
            other => Err(FrameError::UnknownOpcode(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(opcode: Opcode, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            opcode,
            payload: payload.into(),
        }
    }
}

/// Readiness of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Open,
    /// This side sent a close frame and waits for the echo.
    Closing,
    Closed,
}

/// Which end of the connection this codec runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl Role {
    /// Whether frames received by this role must carry a mask.
    fn expects_masked(self) -> bool {
        self == Role::Server
    }
}

/// Parses frames out of a receive buffer.
#[derive(Debug, Clone, Copy)]
pub struct FrameDecoder {
    role: Role,
}

impl FrameDecoder {
    pub fn new(role: Role) -> Self {
        Self { role }
    }

    /// Decodes one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` while the buffer holds less than a whole frame and
    /// leaves it untouched. On success the frame's bytes are drained from `buf`.
    pub fn decode_next(&self, buf: &mut Vec<u8>) -> Result<Option<Frame>, FrameError> {
        if buf.len() < 2 {
            return Ok(None);
        }

        let fin = buf[0] & 0x80 != 0;
        let opcode_bits = buf[0] & 0x0F;
        let masked = buf[1] & 0x80 != 0;
        let length_bits = buf[1] & 0x7F;

        if !fin {
            return Err(FrameError::Fragmented);
        }
        if masked != self.role.expects_masked() {
            return Err(if masked {
                FrameError::UnexpectedMask
            } else {
                FrameError::Unmasked
            });
        }
        if length_bits == 127 {
            return Err(FrameError::TooLarge);
        }
        let opcode = Opcode::try_from(opcode_bits)?;

        let mut offset = 2;
        let payload_len = if length_bits == 126 {
            if buf.len() < offset + 2 {
                return Ok(None);
            }
            let len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
            offset += 2;
            len
        } else {
            length_bits as usize
        };

        let mask = if masked {
            if buf.len() < offset + 4 {
                return Ok(None);
            }
            let key = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
            offset += 4;
            Some(key)
        } else {
            None
        };

        let end = offset + payload_len;
        if buf.len() < end {
            return Ok(None);
        }

        let mut payload = buf[offset..end].to_vec();
        if let Some(key) = mask {
            apply_mask(&mut payload, key);
        }
        buf.drain(..end);

        Ok(Some(Frame { opcode, payload }))
    }
}

/// Encodes a final frame, masked with `mask` when given.
pub fn encode_frame(opcode: Opcode, payload: &[u8], mask: Option<[u8; 4]>) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(FrameError::TooLarge);
    }

    let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };
    let mut out = Vec::with_capacity(payload.len() + 8);
    out.push(0x80 | opcode as u8);

    if payload.len() < 126 {
        out.push(mask_bit | payload.len() as u8);
    } else {
        out.push(mask_bit | 126);
        out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    }

    match mask {
        Some(key) => {
            out.extend_from_slice(&key);
            let start = out.len();
            out.extend_from_slice(payload);
            apply_mask(&mut out[start..], key);
        }
        None => out.extend_from_slice(payload),
    }

    Ok(out)
}

/// XORs `data` with the repeating 4-byte `key`. Applying it twice restores the input.
pub fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Accept token for a client key: `base64(SHA-1(key ++ magic))`.
pub fn accept_token(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(ACCEPT_MAGIC.as_bytes());
    STANDARD.encode(hasher.finalize())
}

pub fn close_payload(code: u16, reason: &str) -> Vec<u8> {
    let mut end = reason.len().min(MAX_CLOSE_REASON);
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = Vec::with_capacity(2 + end);
    out.extend_from_slice(&code.to_be_bytes());
    out.extend_from_slice(&reason.as_bytes()[..end]);
    out
}

/// Splits a close payload into its code and reason. Both are optional on the wire.
pub fn parse_close_payload(payload: &[u8]) -> (Option<u16>, String) {
    if payload.len() < 2 {
        return (None, String::new());
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    (Some(code), String::from_utf8_lossy(&payload[2..]).into_owned())
}
