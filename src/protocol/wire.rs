//! Wire format encoding.
//!
//! Implements the frame envelope (all integers Little Endian):
//! ```text
//! ┌───────────┬──────────────┬─────────┬─────────┬──────────┬─────────┬─────────┬──────────┐
//! │ headerLen │ header bytes │ version │ ack     │ reserved │ flags   │ bodyLen │ body     │
//! │ u16       │ headerLen    │ u32     │ u64     │ u32 = 0  │ u16     │ u32     │ bodyLen  │
//! └───────────┴──────────────┴─────────┴─────────┴──────────┴─────────┴─────────┴──────────┘
//! ```
//!
//! The header bytes are a fixed configurable sentinel. A frame whose header
//! does not match is still consumed but classified [`CommandType::UNKNOWN`],
//! so an incompatible peer degrades the stream instead of killing it.

use bitflags::bitflags;

/// Protocol version carried in every frame. Version 0 is rejected.
pub const PROTOCOL_VERSION: u32 = 1;

/// Default header sentinel bytes.
pub const DEFAULT_HEADER_BYTES: &[u8] = b"PLNK";

/// Bytes after the header region: version(4) + ack(8) + reserved(4) +
/// flags(2) + bodyLen(4).
pub const FIXED_TAIL_LEN: usize = 22;

bitflags! {
    /// Command-type bitflags carried in the frame envelope.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CommandType: u16 {
        /// Registration handshake; body is the initiator's logical name.
        const PEER_REGISTER = 1 << 0;
        /// Opaque payload forwarded to caller-supplied handlers.
        const BUSINESS = 1 << 1;
        /// Business body nests a request envelope expecting a response.
        const REQUEST = 1 << 2;
        /// Business body nests a response envelope completing a pending call.
        const RESPONSE = 1 << 3;
        /// Frame could not be classified (header sentinel mismatch).
        const UNKNOWN = 1 << 15;
    }
}

/// Length of the full envelope prefix (everything before the body) for a
/// given header sentinel.
#[inline]
pub fn prefix_len(header_bytes: &[u8]) -> usize {
    2 + header_bytes.len() + FIXED_TAIL_LEN
}

/// Encode the envelope prefix for a frame.
///
/// The body itself is written separately so callers can use scatter/gather
/// I/O and avoid copying large payloads.
pub fn encode_prefix(
    header_bytes: &[u8],
    ack: u64,
    flags: CommandType,
    body_len: u32,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(prefix_len(header_bytes));
    buf.extend_from_slice(&(header_bytes.len() as u16).to_le_bytes());
    buf.extend_from_slice(header_bytes);
    buf.extend_from_slice(&PROTOCOL_VERSION.to_le_bytes());
    buf.extend_from_slice(&ack.to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes());
    buf.extend_from_slice(&flags.bits().to_le_bytes());
    buf.extend_from_slice(&body_len.to_le_bytes());
    buf
}

/// Encode a complete frame as a contiguous byte vector.
///
/// # Example
///
/// ```
/// use peerlink::protocol::{encode_frame, CommandType, DEFAULT_HEADER_BYTES};
///
/// let bytes = encode_frame(DEFAULT_HEADER_BYTES, 7, CommandType::BUSINESS, b"hello");
/// assert_eq!(bytes.len(), 2 + 4 + 22 + 5);
/// ```
pub fn encode_frame(header_bytes: &[u8], ack: u64, flags: CommandType, body: &[u8]) -> Vec<u8> {
    let mut buf = encode_prefix(header_bytes, ack, flags, body.len() as u32);
    buf.extend_from_slice(body);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_layout_little_endian() {
        let prefix = encode_prefix(b"PLNK", 0x0102030405060708, CommandType::BUSINESS, 0x11);

        // headerLen = 4 in LE
        assert_eq!(&prefix[0..2], &[4, 0]);
        assert_eq!(&prefix[2..6], b"PLNK");
        // version = 1 in LE
        assert_eq!(&prefix[6..10], &[1, 0, 0, 0]);
        // ack in LE
        assert_eq!(&prefix[10..18], &[8, 7, 6, 5, 4, 3, 2, 1]);
        // reserved = 0
        assert_eq!(&prefix[18..22], &[0, 0, 0, 0]);
        // flags
        assert_eq!(&prefix[22..24], &CommandType::BUSINESS.bits().to_le_bytes());
        // bodyLen
        assert_eq!(&prefix[24..28], &[0x11, 0, 0, 0]);
    }

    #[test]
    fn test_prefix_len_matches_encoding() {
        let prefix = encode_prefix(b"PLNK", 0, CommandType::PEER_REGISTER, 0);
        assert_eq!(prefix.len(), prefix_len(b"PLNK"));
    }

    #[test]
    fn test_encode_frame_appends_body() {
        let frame = encode_frame(b"PLNK", 1, CommandType::BUSINESS, b"abc");
        assert_eq!(&frame[frame.len() - 3..], b"abc");
        assert_eq!(frame.len(), prefix_len(b"PLNK") + 3);
    }

    #[test]
    fn test_command_type_combinations() {
        let flags = CommandType::BUSINESS | CommandType::REQUEST;
        assert!(flags.contains(CommandType::BUSINESS));
        assert!(flags.contains(CommandType::REQUEST));
        assert!(!flags.contains(CommandType::RESPONSE));
    }
}
