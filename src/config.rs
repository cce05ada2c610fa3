//! Endpoint configuration.
//!
//! [`Config`] gathers everything the transport consumes from outside:
//! frame limits, the header sentinel, reconnection behavior, and the
//! inbound dispatch ordering policy.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::protocol::DEFAULT_HEADER_BYTES;
use crate::session::WriterConfig;

/// Default maximum frame body length (~16.7 MB).
pub const DEFAULT_MAX_FRAME_LENGTH: u32 = 16_777_216;

/// Default bound on reconnection attempts.
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 16;

/// Default delay between reconnection attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(200);

/// Ordering policy for inbound handler dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// No ordering guarantee; handlers run concurrently (default).
    #[default]
    Concurrent,
    /// Strict one-at-a-time handler execution in arrival order.
    Ordered,
}

/// Bounded-retry reconnection policy.
///
/// Attempts are numbered from 1. Before each attempt the policy is asked
/// whether to continue; the default predicate allows up to
/// [`max_attempts`](Self::max_attempts) attempts.
#[derive(Clone)]
pub struct ReconnectPolicy {
    /// Maximum number of attempts before giving up.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub retry_delay: Duration,
    /// Optional override consulted before each attempt.
    should_continue: Option<Arc<dyn Fn(u32) -> bool + Send + Sync>>,
}

impl ReconnectPolicy {
    /// Create a policy with the given attempt budget and delay.
    pub fn new(max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            max_attempts,
            retry_delay,
            should_continue: None,
        }
    }

    /// Install a continue-predicate consulted before each attempt.
    ///
    /// The predicate receives the 1-based attempt number. Returning `false`
    /// aborts the reconnection sequence even if the attempt budget is not
    /// exhausted.
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(u32) -> bool + Send + Sync + 'static,
    {
        self.should_continue = Some(Arc::new(predicate));
        self
    }

    /// Whether the given 1-based attempt may run.
    pub fn allows(&self, attempt: u32) -> bool {
        if attempt > self.max_attempts {
            return false;
        }
        match &self.should_continue {
            Some(pred) => pred(attempt),
            None => true,
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_DELAY)
    }
}

impl fmt::Debug for ReconnectPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconnectPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("retry_delay", &self.retry_delay)
            .field("has_predicate", &self.should_continue.is_some())
            .finish()
    }
}

/// Configuration for an [`Endpoint`](crate::Endpoint).
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum allowed frame body length.
    pub max_frame_length: u32,
    /// Header sentinel bytes prefixed to every frame.
    pub header_bytes: Vec<u8>,
    /// Whether broken sessions reconnect automatically.
    pub auto_reconnect: bool,
    /// Inbound handler dispatch ordering.
    pub dispatch: DispatchMode,
    /// Reconnection policy applied to broken sessions.
    pub reconnect: ReconnectPolicy,
    /// Writer queue tuning.
    pub writer: WriterConfig,
    /// Directory for endpoint sockets (Unix only; default `/tmp`).
    pub pipe_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            header_bytes: DEFAULT_HEADER_BYTES.to_vec(),
            auto_reconnect: true,
            dispatch: DispatchMode::Concurrent,
            reconnect: ReconnectPolicy::default(),
            writer: WriterConfig::default(),
            pipe_dir: None,
        }
    }
}
