//! Per-peer session state machine.
//!
//! A [`PeerSession`] is the stable handle for one logical peer:
//! `Connecting → Connected → Broken → (Reconnecting → Connected | terminal)`.
//! It owns the peer's correlator and a replaceable writer slot, so the
//! underlying transport swaps transparently across reconnects and external
//! references never need replacing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::watch;

use super::correlator::RequestCorrelator;
use super::reader::spawn_session_reader;
use super::writer::{spawn_writer_task, OutboundFrame, WriterHandle};
use crate::error::{PeerlinkError, Result};
use crate::events::PeerEvent;
use crate::message::Message;
use crate::node::Shared;
use crate::protocol::{CommandType, Envelope, EnvelopeKind};
use crate::transport::{endpoint_path, PipeStream};

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, no transport yet.
    Connecting,
    /// Transport in place.
    Connected,
    /// Transport lost; about to reconnect or terminate.
    Broken,
    /// Reconnection policy running.
    Reconnecting,
    /// Broken for good; the session is removed from the registry.
    Terminal,
}

/// One logical peer's session.
pub struct PeerSession {
    peer_name: String,
    correlator: RequestCorrelator,
    /// Replaceable handle to the current transport's writer.
    writer: Mutex<Option<WriterHandle>>,
    /// Incremented on every writer swap; readers carry the epoch they were
    /// spawned under so a stale connection's EOF cannot break a fresh one.
    epoch: AtomicU64,
    state_tx: watch::Sender<SessionState>,
    /// Serializes outbound connection establishment.
    connect_lock: tokio::sync::Mutex<()>,
}

impl PeerSession {
    /// Create a session in `Connecting`.
    pub fn new(peer_name: &str) -> Arc<Self> {
        let (state_tx, _) = watch::channel(SessionState::Connecting);
        Arc::new(Self {
            peer_name: peer_name.to_string(),
            correlator: RequestCorrelator::new(),
            writer: Mutex::new(None),
            epoch: AtomicU64::new(0),
            state_tx,
            connect_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Logical peer name.
    pub fn peer_name(&self) -> &str {
        &self.peer_name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Number of in-flight requests.
    pub fn pending_requests(&self) -> usize {
        self.correlator.pending_count()
    }

    pub(crate) fn correlator(&self) -> &RequestCorrelator {
        &self.correlator
    }

    /// Epoch of the current transport.
    pub(crate) fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    fn writer_handle(&self) -> Option<WriterHandle> {
        self.writer.lock().expect("writer slot lock poisoned").clone()
    }

    /// Install a new writer and bump the epoch.
    fn attach_writer(&self, handle: WriterHandle) -> u64 {
        *self.writer.lock().expect("writer slot lock poisoned") = Some(handle);
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Send a fire-and-forget notification.
    pub(crate) async fn notify(
        self: &Arc<Self>,
        shared: &Arc<Shared>,
        message: Message,
    ) -> Result<()> {
        let writer = self.ensure_writer(shared).await?;
        let envelope = Envelope {
            message_id: self.correlator.next_message_id(),
            header: message.header,
            payload: message.body,
        };
        tracing::debug!(
            peer = %self.peer_name,
            tag = %message.tag,
            "sending notification"
        );
        writer
            .send(OutboundFrame::new(
                CommandType::BUSINESS,
                Bytes::from(envelope.encode(EnvelopeKind::Request)),
            ))
            .await
    }

    /// Send a correlated request and await its response body.
    ///
    /// Returns immediately after enqueueing on the ordered writer; the
    /// await resumes on the matching response or on session break.
    pub(crate) async fn request(
        self: &Arc<Self>,
        shared: &Arc<Shared>,
        message: Message,
    ) -> Result<Bytes> {
        let writer = self.ensure_writer(shared).await?;
        let (id, response) = self.correlator.register();
        let envelope = Envelope {
            message_id: id,
            header: message.header,
            payload: message.body,
        };
        tracing::debug!(
            peer = %self.peer_name,
            tag = %message.tag,
            message_id = id,
            "sending request"
        );
        if let Err(e) = writer
            .send(OutboundFrame::new(
                CommandType::BUSINESS | CommandType::REQUEST,
                Bytes::from(envelope.encode(EnvelopeKind::Request)),
            ))
            .await
        {
            self.correlator.forget(id);
            return Err(e);
        }

        response
            .await
            .map_err(|_| PeerlinkError::ConnectionBroken)?
    }

    /// Send the response for an inbound request.
    pub(crate) async fn send_response(
        self: &Arc<Self>,
        shared: &Arc<Shared>,
        message_id: u64,
        payload: Bytes,
    ) -> Result<()> {
        let writer = self.ensure_writer(shared).await?;
        let envelope = Envelope {
            message_id,
            header: 0,
            payload,
        };
        writer
            .send(OutboundFrame::new(
                CommandType::BUSINESS | CommandType::RESPONSE,
                Bytes::from(envelope.encode(EnvelopeKind::Response)),
            ))
            .await
    }

    /// Get a usable writer, connecting or waiting for reconnection as the
    /// state machine dictates.
    async fn ensure_writer(self: &Arc<Self>, shared: &Arc<Shared>) -> Result<WriterHandle> {
        loop {
            match self.state() {
                SessionState::Terminal => return Err(PeerlinkError::ConnectionBroken),
                SessionState::Connected | SessionState::Connecting => {
                    if let Some(handle) = self.writer_handle() {
                        if handle.is_open() {
                            return Ok(handle);
                        }
                    }
                    return self.open_outbound(shared).await;
                }
                SessionState::Broken | SessionState::Reconnecting => {
                    self.wait_for_recovery().await?;
                }
            }
        }
    }

    /// Block until the session recovers (reconnected) or turns terminal.
    async fn wait_for_recovery(&self) -> Result<()> {
        let mut rx = self.state_tx.subscribe();
        loop {
            match *rx.borrow_and_update() {
                SessionState::Connected => return Ok(()),
                SessionState::Terminal => return Err(PeerlinkError::ConnectionBroken),
                _ => {}
            }
            rx.changed()
                .await
                .map_err(|_| PeerlinkError::ConnectionBroken)?;
        }
    }

    /// Open a fresh outbound connection and perform the registration
    /// handshake. Used for first contact and by the reconnection policy.
    pub(crate) async fn open_outbound(
        self: &Arc<Self>,
        shared: &Arc<Shared>,
    ) -> Result<WriterHandle> {
        let _guard = self.connect_lock.lock().await;

        // Someone else may have connected while we waited for the lock.
        if let Some(handle) = self.writer_handle() {
            if handle.is_open() {
                return Ok(handle);
            }
        }
        if self.state() == SessionState::Terminal {
            return Err(PeerlinkError::ConnectionBroken);
        }

        let path = endpoint_path(&self.peer_name, shared.config.pipe_dir.as_deref());
        let stream = match PipeStream::connect(&path).await {
            Ok(stream) => stream,
            Err(e) => {
                // First contact never succeeded: drop the registry entry so
                // an unreachable name does not accumulate dead sessions.
                // Reconnecting sessions (epoch > 0) stay registered for the
                // policy to keep driving.
                if self.state() == SessionState::Connecting && self.current_epoch() == 0 {
                    shared.registry.remove(&self.peer_name);
                }
                return Err(e);
            }
        };
        let (read_half, write_half) = stream.into_split();

        let (handle, _task) = spawn_writer_task(
            write_half,
            shared.config.header_bytes.clone(),
            shared.config.writer.clone(),
        );

        // Registration travels first on every new connection.
        handle
            .send(OutboundFrame::new(
                CommandType::PEER_REGISTER,
                Bytes::copy_from_slice(shared.local_name.as_bytes()),
            ))
            .await?;

        let epoch = self.attach_writer(handle.clone());
        spawn_session_reader(read_half, self.clone(), shared.clone(), epoch);

        // Swap is visible before any event fires.
        let mut previous = self.state();
        self.state_tx.send_if_modified(|state| {
            previous = *state;
            if *state == SessionState::Terminal {
                false
            } else {
                *state = SessionState::Connected;
                true
            }
        });

        match previous {
            SessionState::Reconnecting | SessionState::Broken => {
                tracing::info!(peer = %self.peer_name, "peer reconnected");
                shared.events.publish(PeerEvent::Reconnected {
                    peer: self.peer_name.clone(),
                });
            }
            SessionState::Connecting => {
                tracing::debug!(peer = %self.peer_name, "peer connected");
                shared.events.publish(PeerEvent::Connected {
                    peer: self.peer_name.clone(),
                });
            }
            _ => {}
        }

        Ok(handle)
    }

    /// Mark the session connected after an inbound registration bound a
    /// connection to it. Returns `true` when this was the transition that
    /// connected the session.
    pub(crate) fn mark_connected_inbound(&self) -> bool {
        self.state_tx.send_if_modified(|state| {
            if *state == SessionState::Connecting {
                *state = SessionState::Connected;
                true
            } else {
                false
            }
        })
    }

    /// Break transition for the connection with the given epoch.
    ///
    /// Idempotent per connection generation: the first caller drains the
    /// pending table and decides between reconnection and terminal removal;
    /// stale connections and duplicate reports are ignored.
    pub(crate) fn on_broken(self: &Arc<Self>, shared: &Arc<Shared>, epoch: u64) {
        if epoch != self.current_epoch() {
            return;
        }

        let mut transitioned = false;
        self.state_tx.send_if_modified(|state| match *state {
            SessionState::Connected | SessionState::Connecting => {
                *state = SessionState::Broken;
                transitioned = true;
                true
            }
            _ => false,
        });
        if !transitioned {
            return;
        }

        *self.writer.lock().expect("writer slot lock poisoned") = None;

        let failed = self.correlator.fail_all();
        tracing::warn!(
            peer = %self.peer_name,
            failed_calls = failed,
            "peer session broken"
        );
        shared.events.publish(PeerEvent::Broken {
            peer: self.peer_name.clone(),
        });

        if shared.config.auto_reconnect {
            self.state_tx.send_replace(SessionState::Reconnecting);
            super::reconnect::spawn_reconnect(self.clone(), shared.clone());
        } else {
            self.make_terminal(shared);
        }
    }

    /// Drive the session to terminal Broken and remove it from the
    /// registry. Waiters observing the state see `ConnectionBroken`.
    pub(crate) fn make_terminal(self: &Arc<Self>, shared: &Arc<Shared>) {
        self.state_tx.send_replace(SessionState::Terminal);
        *self.writer.lock().expect("writer slot lock poisoned") = None;
        self.correlator.fail_all();
        shared.registry.remove(&self.peer_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_connecting() {
        let session = PeerSession::new("a");
        assert_eq!(session.state(), SessionState::Connecting);
        assert_eq!(session.peer_name(), "a");
        assert_eq!(session.pending_requests(), 0);
    }

    #[test]
    fn test_mark_connected_inbound_once() {
        let session = PeerSession::new("a");
        assert!(session.mark_connected_inbound());
        assert!(!session.mark_connected_inbound());
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[test]
    fn test_attach_writer_bumps_epoch() {
        let session = PeerSession::new("a");
        assert_eq!(session.current_epoch(), 0);

        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        let handle = super::super::writer::test_support::handle_for(tx);
        assert_eq!(session.attach_writer(handle), 1);
        assert_eq!(session.current_epoch(), 1);
    }
}
