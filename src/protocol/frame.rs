//! Frame struct and the nested request/response envelope.
//!
//! A [`Frame`] is one complete wire unit: the decoded envelope fields plus
//! the body as zero-copy `bytes::Bytes`. Request/response framing is a
//! second envelope nested inside a Business body, carrying an 8-byte magic,
//! the message ID and the inner payload length.

use bytes::Bytes;

use super::wire::CommandType;
use crate::error::{PeerlinkError, Result};

/// Magic prefix for request envelopes (also used by enveloped notifications).
pub const REQUEST_MAGIC: [u8; 8] = *b"Request\0";

/// Magic prefix for response envelopes.
pub const RESPONSE_MAGIC: [u8; 8] = *b"Response";

/// Fixed part of the inner envelope: magic(8) + messageId(8) + innerLen(4).
pub const ENVELOPE_PREFIX_LEN: usize = 20;

/// A complete decoded frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Legacy per-connection acknowledgement counter.
    pub ack: u64,
    /// Command-type flags.
    pub flags: CommandType,
    /// Body bytes (zero-copy via `bytes::Bytes`).
    pub body: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(ack: u64, flags: CommandType, body: Bytes) -> Self {
        Self { ack, flags, body }
    }

    /// Check if this is a registration frame.
    #[inline]
    pub fn is_register(&self) -> bool {
        self.flags.contains(CommandType::PEER_REGISTER)
    }

    /// Check if this is a business frame.
    #[inline]
    pub fn is_business(&self) -> bool {
        self.flags.contains(CommandType::BUSINESS)
    }

    /// Check if this frame nests a request envelope.
    #[inline]
    pub fn is_request(&self) -> bool {
        self.flags.contains(CommandType::REQUEST)
    }

    /// Check if this frame nests a response envelope.
    #[inline]
    pub fn is_response(&self) -> bool {
        self.flags.contains(CommandType::RESPONSE)
    }

    /// Check if this frame failed classification.
    #[inline]
    pub fn is_unknown(&self) -> bool {
        self.flags.contains(CommandType::UNKNOWN)
    }
}

/// Which magic a nested envelope carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    /// `"Request\0"` magic.
    Request,
    /// `"Response"` magic.
    Response,
}

/// The envelope nested inside a Business body.
///
/// Wire layout: `magic(8) | messageId u64 | innerLen u32 |
/// [businessHeader u64 if present] | innerPayload(innerLen)`.
/// Presence of the optional business header is derived from the remaining
/// length after the fixed prefix, so a zero header is simply omitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Correlation ID, unique among in-flight calls per session.
    pub message_id: u64,
    /// Business discriminator; 0 means none.
    pub header: u64,
    /// Inner payload (zero-copy slice of the frame body).
    pub payload: Bytes,
}

impl Envelope {
    /// Encode this envelope with the given magic into a frame body.
    pub fn encode(&self, kind: EnvelopeKind) -> Vec<u8> {
        let magic = match kind {
            EnvelopeKind::Request => &REQUEST_MAGIC,
            EnvelopeKind::Response => &RESPONSE_MAGIC,
        };
        let header_len = if self.header != 0 { 8 } else { 0 };
        let mut buf = Vec::with_capacity(ENVELOPE_PREFIX_LEN + header_len + self.payload.len());
        buf.extend_from_slice(magic);
        buf.extend_from_slice(&self.message_id.to_le_bytes());
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        if self.header != 0 {
            buf.extend_from_slice(&self.header.to_le_bytes());
        }
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Check which magic, if any, a body starts with.
    pub fn peek_kind(body: &[u8]) -> Option<EnvelopeKind> {
        if body.len() < 8 {
            return None;
        }
        if body[..8] == REQUEST_MAGIC {
            Some(EnvelopeKind::Request)
        } else if body[..8] == RESPONSE_MAGIC {
            Some(EnvelopeKind::Response)
        } else {
            None
        }
    }

    /// Decode an envelope from a Business frame body.
    ///
    /// # Errors
    ///
    /// Returns a protocol error when the magic is unknown or the declared
    /// inner length does not match the body.
    pub fn decode(body: &Bytes) -> Result<(EnvelopeKind, Self)> {
        let kind = Self::peek_kind(body)
            .ok_or_else(|| PeerlinkError::Protocol("unknown envelope magic".to_string()))?;

        if body.len() < ENVELOPE_PREFIX_LEN {
            return Err(PeerlinkError::Protocol(format!(
                "envelope truncated: {} bytes",
                body.len()
            )));
        }

        let message_id = u64::from_le_bytes(body[8..16].try_into().unwrap());
        let inner_len = u32::from_le_bytes(body[16..20].try_into().unwrap()) as usize;

        let remaining = body.len() - ENVELOPE_PREFIX_LEN;
        let (header, payload_start) = if remaining == inner_len {
            (0, ENVELOPE_PREFIX_LEN)
        } else if remaining == inner_len + 8 {
            let header = u64::from_le_bytes(body[20..28].try_into().unwrap());
            (header, ENVELOPE_PREFIX_LEN + 8)
        } else {
            return Err(PeerlinkError::Protocol(format!(
                "envelope length mismatch: declared {}, remaining {}",
                inner_len, remaining
            )));
        };

        Ok((
            kind,
            Self {
                message_id,
                header,
                payload: body.slice(payload_start..payload_start + inner_len),
            },
        ))
    }
}
