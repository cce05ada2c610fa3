//! Request/response correlation.
//!
//! Matches outbound requests to inbound responses by message ID. Each
//! session owns one correlator; the pending table lives behind a single
//! mutex and is swapped out wholesale when the session breaks, so every
//! pending call completes exactly once.

use std::collections::HashMap;
use std::sync::Mutex;

use bytes::Bytes;
use tokio::sync::oneshot;

use super::sequence::SequenceCounter;
use crate::error::{PeerlinkError, Result};

/// Pending-call table keyed by message ID.
#[derive(Debug)]
pub struct RequestCorrelator {
    ids: SequenceCounter,
    pending: Mutex<HashMap<u64, oneshot::Sender<Result<Bytes>>>>,
}

impl RequestCorrelator {
    /// Create an empty correlator.
    pub fn new() -> Self {
        Self {
            ids: SequenceCounter::new(),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a message ID without registering a pending call.
    ///
    /// Fire-and-forget notifications stamp their envelope from the same
    /// counter so IDs stay unique among everything in flight.
    pub fn next_message_id(&self) -> u64 {
        self.ids.next()
    }

    /// Allocate the next message ID and register a pending call for it.
    ///
    /// Returns the ID to embed in the request envelope and the receiver the
    /// caller awaits.
    pub fn register(&self) -> (u64, oneshot::Receiver<Result<Bytes>>) {
        let id = self.ids.next();
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending table lock poisoned")
            .insert(id, tx);
        (id, rx)
    }

    /// Complete the pending call with the given ID.
    ///
    /// Returns `false` when the ID is unknown (duplicate or already-resolved
    /// delivery); such responses are silently dropped by the caller.
    pub fn complete(&self, id: u64, payload: Bytes) -> bool {
        let sender = self
            .pending
            .lock()
            .expect("pending table lock poisoned")
            .remove(&id);
        match sender {
            Some(tx) => tx.send(Ok(payload)).is_ok(),
            None => false,
        }
    }

    /// Drop a pending call without completing it (request never made it out).
    pub fn forget(&self, id: u64) {
        self.pending
            .lock()
            .expect("pending table lock poisoned")
            .remove(&id);
    }

    /// Fail every pending call with a connection-broken error.
    ///
    /// Swaps the whole table atomically, so no entry can be completed twice
    /// or missed even if responses race the break.
    pub fn fail_all(&self) -> usize {
        let drained = std::mem::take(
            &mut *self.pending.lock().expect("pending table lock poisoned"),
        );
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(PeerlinkError::ConnectionBroken));
        }
        count
    }

    /// Number of in-flight calls.
    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .expect("pending table lock poisoned")
            .len()
    }
}

impl Default for RequestCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_complete_reaches_matching_call() {
        let correlator = RequestCorrelator::new();
        let (id_a, rx_a) = correlator.register();
        let (id_b, rx_b) = correlator.register();
        assert_ne!(id_a, id_b);

        // Complete out of order.
        assert!(correlator.complete(id_b, Bytes::from_static(b"b")));
        assert!(correlator.complete(id_a, Bytes::from_static(b"a")));

        assert_eq!(rx_a.await.unwrap().unwrap(), Bytes::from_static(b"a"));
        assert_eq!(rx_b.await.unwrap().unwrap(), Bytes::from_static(b"b"));
    }

    #[test]
    fn test_unknown_id_silently_dropped() {
        let correlator = RequestCorrelator::new();
        assert!(!correlator.complete(999, Bytes::new()));
    }

    #[test]
    fn test_duplicate_completion_ignored() {
        let correlator = RequestCorrelator::new();
        let (id, _rx) = correlator.register();
        correlator.complete(id, Bytes::new());
        assert!(!correlator.complete(id, Bytes::new()));
    }

    #[tokio::test]
    async fn test_fail_all_completes_every_call_exactly_once() {
        let correlator = RequestCorrelator::new();
        let receivers: Vec<_> = (0..10).map(|_| correlator.register().1).collect();

        assert_eq!(correlator.fail_all(), 10);
        assert_eq!(correlator.pending_count(), 0);

        for rx in receivers {
            let result = rx.await.unwrap();
            assert!(matches!(result, Err(PeerlinkError::ConnectionBroken)));
        }

        // Second break finds nothing.
        assert_eq!(correlator.fail_all(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_correlation_uniqueness() {
        use std::sync::Arc;

        let correlator = Arc::new(RequestCorrelator::new());
        let mut tasks = Vec::new();

        for _ in 0..50 {
            let correlator = correlator.clone();
            tasks.push(tokio::spawn(async move {
                let (id, rx) = correlator.register();
                // Responder echoes the ID back as the payload.
                let responder = correlator.clone();
                tokio::spawn(async move {
                    responder.complete(id, Bytes::copy_from_slice(&id.to_le_bytes()));
                });
                let payload = rx.await.unwrap().unwrap();
                assert_eq!(u64::from_le_bytes(payload[..8].try_into().unwrap()), id);
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }
    }
}
