//! Connection reader tasks.
//!
//! Every live connection gets one reader task that feeds bytes through a
//! [`FrameDecoder`] and classifies the resulting frames. Outbound
//! connections start with a known peer; inbound connections are anonymous
//! until their first registration frame binds them to a session. Both kinds
//! report EOF and transport errors to [`PeerSession::on_broken`] under the
//! epoch they were spawned with.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::peer::PeerSession;
use crate::error::Result;
use crate::events::PeerEvent;
use crate::message::Message;
use crate::node::Shared;
use crate::protocol::{Envelope, EnvelopeKind, Frame, FrameDecoder};

const READ_BUF_SIZE: usize = 64 * 1024;

/// Spawn the reader for an outbound connection whose peer is already known.
pub(crate) fn spawn_session_reader<R>(
    read_half: R,
    session: Arc<PeerSession>,
    shared: Arc<Shared>,
    epoch: u64,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut shutdown = shared.shutdown.clone();
        match read_frames(read_half, &session, &shared, &mut shutdown).await {
            Ok(ReadEnd::Shutdown) => return,
            Ok(ReadEnd::Eof) => {
                tracing::debug!(peer = %session.peer_name(), "connection closed by peer");
            }
            Err(e) => {
                tracing::warn!(peer = %session.peer_name(), "reader stopped: {}", e);
            }
        }
        session.on_broken(&shared, epoch);
    })
}

/// Spawn the reader for an accepted inbound connection.
///
/// The task owns the whole stream so the write direction stays open for
/// the life of the connection; it is only ever read from. The connection
/// stays unassociated until a registration frame names the peer.
pub(crate) fn spawn_inbound_reader<S>(stream: S, shared: Arc<Shared>) -> JoinHandle<()>
where
    S: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut shutdown = shared.shutdown.clone();
        let mut stream = stream;
        let mut decoder = FrameDecoder::new(
            shared.config.header_bytes.clone(),
            shared.config.max_frame_length,
        );
        let mut buf = vec![0u8; READ_BUF_SIZE];
        let mut bound: Option<(Arc<PeerSession>, u64)> = None;

        let graceful = loop {
            let n = tokio::select! {
                _ = shutdown.changed() => break true,
                read = stream.read(&mut buf) => match read {
                    Ok(0) => break false,
                    Ok(n) => n,
                    Err(e) => {
                        tracing::warn!("inbound connection read failed: {}", e);
                        break false;
                    }
                },
            };

            let frames = match decoder.push(&buf[..n]) {
                Ok(frames) => frames,
                Err(e) => {
                    tracing::warn!("inbound connection closed on decode error: {}", e);
                    break false;
                }
            };

            for frame in frames {
                if frame.is_register() {
                    bind_registration(&frame, &mut bound, &shared);
                    continue;
                }
                match &bound {
                    Some((session, _)) => handle_frame(session, &shared, frame),
                    None => {
                        tracing::warn!(
                            ack = frame.ack,
                            "dropping frame on unassociated connection"
                        );
                    }
                }
            }
        };

        if !graceful {
            if let Some((session, epoch)) = bound {
                session.on_broken(&shared, epoch);
            }
        }
    })
}

enum ReadEnd {
    Eof,
    Shutdown,
}

async fn read_frames<R>(
    mut read_half: R,
    session: &Arc<PeerSession>,
    shared: &Arc<Shared>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<ReadEnd>
where
    R: AsyncRead + Unpin + Send,
{
    let mut decoder = FrameDecoder::new(
        shared.config.header_bytes.clone(),
        shared.config.max_frame_length,
    );
    let mut buf = vec![0u8; READ_BUF_SIZE];

    loop {
        let n = tokio::select! {
            _ = shutdown.changed() => return Ok(ReadEnd::Shutdown),
            read = read_half.read(&mut buf) => read?,
        };
        if n == 0 {
            return Ok(ReadEnd::Eof);
        }
        for frame in decoder.push(&buf[..n])? {
            if frame.is_register() {
                // The peer registered back over a connection we opened.
                // Identity is already known from the connect target.
                tracing::debug!(
                    peer = %session.peer_name(),
                    "registration on outbound connection ignored"
                );
                continue;
            }
            handle_frame(session, shared, frame);
        }
    }
}

/// Bind (or re-bind) an inbound connection from a registration frame.
fn bind_registration(
    frame: &Frame,
    bound: &mut Option<(Arc<PeerSession>, u64)>,
    shared: &Arc<Shared>,
) {
    let name = match std::str::from_utf8(&frame.body) {
        Ok(name) if !name.is_empty() => name.to_string(),
        _ => {
            tracing::warn!("unparseable registration body, connection stays unassociated");
            return;
        }
    };

    if let Some((session, _)) = bound {
        if session.peer_name() == name {
            tracing::debug!(peer = %name, "duplicate registration");
            return;
        }
        tracing::warn!(
            old = %session.peer_name(),
            new = %name,
            "connection re-registered under a different name"
        );
    }

    let session = shared.registry.get_or_create(&name);
    let epoch = session.current_epoch();
    if session.mark_connected_inbound() {
        tracing::debug!(peer = %name, "peer registered");
        shared.events.publish(PeerEvent::Connected { peer: name });
    }
    *bound = Some((session, epoch));
}

/// Classify one decoded frame and route it.
///
/// Responses resolve the correlator inline; requests and notifications go
/// through the dispatcher so handler execution follows the configured
/// ordering policy.
pub(crate) fn handle_frame(session: &Arc<PeerSession>, shared: &Arc<Shared>, frame: Frame) {
    if frame.is_unknown() {
        tracing::debug!(
            peer = %session.peer_name(),
            ack = frame.ack,
            "dropping frame with unrecognized header"
        );
        return;
    }

    if frame.is_response() {
        match Envelope::decode(&frame.body) {
            Ok((_, envelope)) => {
                if !session.correlator().complete(envelope.message_id, envelope.payload) {
                    tracing::debug!(
                        peer = %session.peer_name(),
                        message_id = envelope.message_id,
                        "unmatched response dropped"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(peer = %session.peer_name(), "bad response envelope: {}", e);
            }
        }
        return;
    }

    if frame.is_request() {
        let (_, envelope) = match Envelope::decode(&frame.body) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!(peer = %session.peer_name(), "bad request envelope: {}", e);
                return;
            }
        };
        let message_id = envelope.message_id;
        let request = Message {
            tag: String::new(),
            header: envelope.header,
            body: envelope.payload,
        };
        let session = session.clone();
        let shared_inner = shared.clone();
        shared.dispatcher.dispatch(async move {
            match shared_inner
                .handlers
                .dispatch(request, session.peer_name())
                .await
            {
                Some(response) => {
                    session
                        .send_response(&shared_inner, message_id, response)
                        .await
                }
                None => {
                    tracing::warn!(
                        peer = %session.peer_name(),
                        message_id,
                        "no handler accepted request"
                    );
                    Ok(())
                }
            }
        });
        return;
    }

    if frame.is_business() {
        // Notifications normally arrive enveloped; raw bodies from minimal
        // senders are delivered as-is with a zero header.
        let message = match Envelope::peek_kind(&frame.body) {
            Some(EnvelopeKind::Request) => match Envelope::decode(&frame.body) {
                Ok((_, envelope)) => Message {
                    tag: String::new(),
                    header: envelope.header,
                    body: envelope.payload,
                },
                Err(e) => {
                    tracing::warn!(
                        peer = %session.peer_name(),
                        "bad notification envelope: {}",
                        e
                    );
                    return;
                }
            },
            _ => Message::new(frame.body.clone()),
        };

        let peer = session.peer_name().to_string();
        let events = shared.events.clone();
        shared.dispatcher.dispatch(async move {
            events.publish(PeerEvent::Message { peer, message });
            Ok(())
        });
        return;
    }

    tracing::debug!(
        peer = %session.peer_name(),
        ack = frame.ack,
        "frame with no recognized command flags dropped"
    );
}
