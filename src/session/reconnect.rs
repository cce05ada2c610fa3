//! Reconnection sequences.
//!
//! When a session breaks with auto-reconnect enabled, a single reconnect
//! task drives bounded connection attempts under the configured
//! [`ReconnectPolicy`](crate::config::ReconnectPolicy). Transient connect
//! errors are retried after the policy delay; anything else aborts the
//! sequence and removes the session.

use std::io;
use std::sync::Arc;

use tokio::task::JoinHandle;

use super::peer::PeerSession;
use crate::error::PeerlinkError;
use crate::events::PeerEvent;
use crate::node::Shared;

/// Spawn the reconnect task for a session in `Reconnecting`.
pub(crate) fn spawn_reconnect(session: Arc<PeerSession>, shared: Arc<Shared>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let policy = shared.config.reconnect.clone();
        let mut attempt: u32 = 1;

        loop {
            if *shared.shutdown.borrow() {
                return;
            }
            if !policy.allows(attempt) {
                give_up(&session, &shared, attempt - 1);
                return;
            }

            tracing::debug!(
                peer = %session.peer_name(),
                attempt,
                "reconnection attempt"
            );
            match session.open_outbound(&shared).await {
                // open_outbound installed the new transport and published
                // the Reconnected event.
                Ok(_) => return,
                Err(e) if is_transient(&e) => {
                    tracing::debug!(
                        peer = %session.peer_name(),
                        attempt,
                        "reconnection attempt failed: {}",
                        e
                    );
                    tokio::time::sleep(policy.retry_delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        peer = %session.peer_name(),
                        attempt,
                        "reconnection aborted: {}",
                        e
                    );
                    give_up(&session, &shared, attempt);
                    return;
                }
            }
        }
    })
}

fn give_up(session: &Arc<PeerSession>, shared: &Arc<Shared>, attempts: u32) {
    tracing::warn!(
        peer = %session.peer_name(),
        attempts,
        "reconnection failed, removing session"
    );
    session.make_terminal(shared);
    shared.events.publish(PeerEvent::ReconnectFailed {
        peer: session.peer_name().to_string(),
        attempts,
    });
}

/// Errors worth retrying: the peer endpoint is simply not there yet or the
/// connection raced a restart.
fn is_transient(error: &PeerlinkError) -> bool {
    match error {
        PeerlinkError::Io(io) => matches!(
            io.kind(),
            io::ErrorKind::ConnectionRefused
                | io::ErrorKind::NotFound
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
        ),
        PeerlinkError::ConnectionBroken => false,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let refused = PeerlinkError::Io(io::Error::new(io::ErrorKind::ConnectionRefused, "x"));
        assert!(is_transient(&refused));

        let missing = PeerlinkError::Io(io::Error::new(io::ErrorKind::NotFound, "x"));
        assert!(is_transient(&missing));

        let denied = PeerlinkError::Io(io::Error::new(io::ErrorKind::PermissionDenied, "x"));
        assert!(!is_transient(&denied));

        assert!(!is_transient(&PeerlinkError::ConnectionBroken));
    }
}
