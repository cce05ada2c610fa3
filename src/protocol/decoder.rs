//! Frame decoder for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management and a state
//! machine for fragmented frames:
//! - `WaitingForEnvelope`: need the variable-length prefix
//! - `WaitingForBody`: prefix parsed, need N more body bytes
//!
//! The stream has no inherent message boundaries, so the decoder buffers
//! until the exact byte count for each stage is satisfied.

use bytes::{Bytes, BytesMut};

use super::frame::Frame;
use super::wire::{CommandType, FIXED_TAIL_LEN, PROTOCOL_VERSION};
use crate::error::{PeerlinkError, Result};

/// State machine for frame parsing.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for the complete envelope prefix.
    WaitingForEnvelope,
    /// Prefix parsed, waiting for body bytes.
    WaitingForBody {
        ack: u64,
        flags: CommandType,
        remaining: u32,
    },
}

/// Incremental decoder turning raw stream bytes into complete frames.
///
/// A header sentinel mismatch is a soft failure: the frame is consumed and
/// classified [`CommandType::UNKNOWN`] so the connection survives an
/// incompatible peer. Oversized bodies and unsupported versions are hard
/// failures reported before the body is buffered.
pub struct FrameDecoder {
    /// Accumulated bytes from stream reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Expected header sentinel.
    header_bytes: Vec<u8>,
    /// Maximum allowed body length.
    max_frame_length: u32,
}

impl FrameDecoder {
    /// Create a decoder for the given sentinel and body limit.
    pub fn new(header_bytes: Vec<u8>, max_frame_length: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForEnvelope,
            header_bytes,
            max_frame_length,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Partial data is buffered internally for the next push.
    ///
    /// # Errors
    ///
    /// Returns an error on an unsupported version or a body length above the
    /// configured maximum; both terminate this connection's reader.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Number of buffered bytes not yet consumed by a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn try_extract_one(&mut self) -> Result<Option<Frame>> {
        match self.state {
            State::WaitingForEnvelope => {
                if self.buffer.len() < 2 {
                    return Ok(None);
                }

                let header_len = u16::from_le_bytes([self.buffer[0], self.buffer[1]]) as usize;
                let prefix_len = 2 + header_len + FIXED_TAIL_LEN;
                if self.buffer.len() < prefix_len {
                    return Ok(None);
                }

                let header_ok = header_len == self.header_bytes.len()
                    && self.buffer[2..2 + header_len] == self.header_bytes[..];

                let tail = &self.buffer[2 + header_len..prefix_len];
                let version = u32::from_le_bytes(tail[0..4].try_into().unwrap());
                let ack = u64::from_le_bytes(tail[4..12].try_into().unwrap());
                let flags_bits = u16::from_le_bytes(tail[16..18].try_into().unwrap());
                let body_len = u32::from_le_bytes(tail[18..22].try_into().unwrap());

                // A mismatched sentinel means the peer speaks something else;
                // its version field cannot be trusted, only the framing.
                if header_ok && version != PROTOCOL_VERSION {
                    return Err(PeerlinkError::UnsupportedVersion(version));
                }

                if body_len > self.max_frame_length {
                    return Err(PeerlinkError::FrameTooLarge {
                        len: body_len,
                        max: self.max_frame_length,
                    });
                }

                let flags = if header_ok {
                    CommandType::from_bits_truncate(flags_bits)
                } else {
                    CommandType::UNKNOWN
                };

                let _ = self.buffer.split_to(prefix_len);

                if body_len == 0 {
                    return Ok(Some(Frame::new(ack, flags, Bytes::new())));
                }

                self.state = State::WaitingForBody {
                    ack,
                    flags,
                    remaining: body_len,
                };
                self.try_extract_one()
            }

            State::WaitingForBody {
                ack,
                flags,
                remaining,
            } => {
                let remaining = remaining as usize;
                if self.buffer.len() < remaining {
                    return Ok(None);
                }

                let body = self.buffer.split_to(remaining).freeze();
                self.state = State::WaitingForEnvelope;
                Ok(Some(Frame::new(ack, flags, body)))
            }
        }
    }
}
