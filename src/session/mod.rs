//! Per-peer session machinery.
//!
//! A session bundles everything one logical peer needs: a request
//! correlator, an ordered writer over the current transport, reader tasks
//! for break detection, and the reconnection driver. The
//! [`PeerRegistry`] maps logical names to sessions process-wide.

pub mod correlator;
pub mod peer;
pub(crate) mod reader;
pub(crate) mod reconnect;
pub mod registry;
pub mod sequence;
pub mod writer;

pub use peer::{PeerSession, SessionState};
pub use registry::PeerRegistry;
pub use writer::WriterConfig;
