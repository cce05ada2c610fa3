//! Error types for peerlink.

use thiserror::Error;

/// Main error type for all peerlink operations.
#[derive(Debug, Error)]
pub enum PeerlinkError {
    /// I/O error during pipe/socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol error (malformed frame, bad envelope, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Frame declared a body larger than the configured maximum.
    ///
    /// Raised before the body is buffered.
    #[error("Frame body {len} exceeds maximum {max}")]
    FrameTooLarge { len: u32, max: u32 },

    /// Frame carried an unsupported protocol version.
    ///
    /// Only version 1 is accepted; version 0 is explicitly rejected.
    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u32),

    /// The session to the peer is broken and no reconnection will restore it.
    ///
    /// Pending calls are failed with this error when their session breaks.
    #[error("Connection to peer broken")]
    ConnectionBroken,

    /// Reconnection gave up after the configured attempt budget.
    #[error("Reconnection failed after {attempts} attempt(s)")]
    ReconnectFailed { attempts: u32 },

    /// Writer queue is at capacity.
    #[error("Backpressure timeout")]
    BackpressureTimeout,
}

/// Result type alias using PeerlinkError.
pub type Result<T> = std::result::Result<T, PeerlinkError>;
