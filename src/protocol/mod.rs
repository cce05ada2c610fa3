//! Protocol module - wire format, framing, and the nested envelope.
//!
//! This module implements the binary protocol:
//! - variable-prefix envelope encoding/decoding
//! - incremental frame decoder for partial reads
//! - the request/response envelope nested inside Business bodies

mod decoder;
mod frame;
mod wire;

pub use decoder::FrameDecoder;
pub use frame::{
    Envelope, EnvelopeKind, Frame, ENVELOPE_PREFIX_LEN, REQUEST_MAGIC, RESPONSE_MAGIC,
};
pub use wire::{
    encode_frame, encode_prefix, prefix_len, CommandType, DEFAULT_HEADER_BYTES, FIXED_TAIL_LEN,
    PROTOCOL_VERSION,
};
