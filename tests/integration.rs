//! End-to-end tests over real endpoint pairs.
//!
//! Unix only: the tests bind sockets under a per-test tempdir so parallel
//! runs never collide on endpoint paths.

#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Mutex;
use tokio::time::timeout;

use peerlink::{DispatchMode, Endpoint, PeerEvent, ReconnectPolicy, SessionState};

const WAIT: Duration = Duration::from_secs(5);

/// Honor RUST_LOG in test output; repeated calls are fine.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn recv_matching<F>(rx: &mut tokio::sync::broadcast::Receiver<PeerEvent>, mut want: F) -> PeerEvent
where
    F: FnMut(&PeerEvent) -> bool,
{
    loop {
        let event = timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        if want(&event) {
            return event;
        }
    }
}

#[tokio::test]
async fn test_request_response_between_peers() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    let server = Endpoint::builder("rr-server")
        .pipe_dir(dir.path())
        .handle_fn(0, |request, _peer| async move {
            if request.body.as_ref() == [0x01] {
                Some(Bytes::from_static(&[0x02, 0x03]))
            } else {
                None
            }
        })
        .bind()
        .await
        .unwrap();

    let client = Endpoint::builder("rr-client")
        .pipe_dir(dir.path())
        .bind()
        .await
        .unwrap();

    let reply = timeout(WAIT, client.request("rr-server", vec![0x01]))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply.as_ref(), &[0x02, 0x03]);

    assert_eq!(
        client.session_state("rr-server"),
        Some(SessionState::Connected)
    );

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_handler_sees_registered_peer_name() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    let server = Endpoint::builder("name-server")
        .pipe_dir(dir.path())
        .handle_fn(0, |_request, peer: String| async move {
            Some(Bytes::from(peer.into_bytes()))
        })
        .bind()
        .await
        .unwrap();

    let client = Endpoint::builder("name-client")
        .pipe_dir(dir.path())
        .bind()
        .await
        .unwrap();

    let reply = timeout(WAIT, client.request("name-server", vec![]))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply.as_ref(), b"name-client");

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_notifications_arrive_in_order() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    let server = Endpoint::builder("notify-server")
        .pipe_dir(dir.path())
        .dispatch_mode(DispatchMode::Ordered)
        .bind()
        .await
        .unwrap();
    let mut events = server.subscribe();

    let client = Endpoint::builder("notify-client")
        .pipe_dir(dir.path())
        .bind()
        .await
        .unwrap();

    for i in 0..20u8 {
        client.notify("notify-server", vec![i]).await.unwrap();
    }

    let mut seen = Vec::new();
    while seen.len() < 20 {
        if let PeerEvent::Message { peer, message } =
            recv_matching(&mut events, |e| matches!(e, PeerEvent::Message { .. })).await
        {
            assert_eq!(peer, "notify-client");
            seen.push(message.body[0]);
        }
    }
    assert_eq!(seen, (0..20u8).collect::<Vec<_>>());

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_peer_shutdown_fails_all_in_flight_requests() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    // Handler never responds within the test window.
    let server = Endpoint::builder("slow-server")
        .pipe_dir(dir.path())
        .handle_fn(0, |_request, _peer| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Some(Bytes::new())
        })
        .bind()
        .await
        .unwrap();

    let client = Arc::new(
        Endpoint::builder("slow-client")
            .pipe_dir(dir.path())
            .bind()
            .await
            .unwrap(),
    );

    let mut in_flight = Vec::new();
    for i in 0..10u8 {
        let client = client.clone();
        in_flight.push(tokio::spawn(async move {
            client.request("slow-server", vec![i]).await
        }));
    }

    // Let every request reach the server before it goes away.
    tokio::time::sleep(Duration::from_millis(300)).await;
    server.shutdown().await;

    for task in in_flight {
        let result = timeout(WAIT, task).await.unwrap().unwrap();
        match result {
            Err(peerlink::PeerlinkError::ConnectionBroken) => {}
            other => panic!("expected ConnectionBroken, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_reconnects_after_peer_restart() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    let respond = |request: peerlink::Message, _peer: String| async move {
        Some(Bytes::from(request.body.to_vec()))
    };

    let server = Endpoint::builder("restart-server")
        .pipe_dir(dir.path())
        .handle_fn(0, respond)
        .bind()
        .await
        .unwrap();

    let client = Endpoint::builder("restart-client")
        .pipe_dir(dir.path())
        .reconnect_policy(ReconnectPolicy::new(50, Duration::from_millis(50)))
        .bind()
        .await
        .unwrap();
    let mut events = client.subscribe();

    let reply = timeout(WAIT, client.request("restart-server", vec![7]))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply.as_ref(), &[7]);

    server.shutdown().await;
    recv_matching(&mut events, |e| matches!(e, PeerEvent::Broken { .. })).await;

    // Same name, fresh process stand-in.
    let server = Endpoint::builder("restart-server")
        .pipe_dir(dir.path())
        .handle_fn(0, respond)
        .bind()
        .await
        .unwrap();

    recv_matching(&mut events, |e| matches!(e, PeerEvent::Reconnected { .. })).await;

    let reply = timeout(WAIT, client.request("restart-server", vec![9]))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply.as_ref(), &[9]);

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_exhausted_reconnect_policy_removes_session() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    let server = Endpoint::builder("gone-server")
        .pipe_dir(dir.path())
        .bind()
        .await
        .unwrap();

    let client = Endpoint::builder("gone-client")
        .pipe_dir(dir.path())
        .reconnect_policy(
            ReconnectPolicy::new(16, Duration::from_millis(10)).with_predicate(|_| false),
        )
        .bind()
        .await
        .unwrap();
    let mut events = client.subscribe();

    client.notify("gone-server", vec![1]).await.unwrap();
    server.shutdown().await;

    recv_matching(&mut events, |e| matches!(e, PeerEvent::Broken { .. })).await;
    let failed = recv_matching(&mut events, |e| {
        matches!(e, PeerEvent::ReconnectFailed { .. })
    })
    .await;
    if let PeerEvent::ReconnectFailed { peer, attempts } = failed {
        assert_eq!(peer, "gone-server");
        assert_eq!(attempts, 0);
    }

    assert!(client.peers().is_empty());
    assert_eq!(client.session_state("gone-server"), None);

    // Further calls fail fast on a fresh session that cannot connect, and
    // the failed first contact leaves no registry entry behind.
    let result = client.request("gone-server", vec![2]).await;
    assert!(result.is_err());
    assert!(client.peers().is_empty());

    client.shutdown().await;
}

#[tokio::test]
async fn test_failed_first_contact_leaves_no_session() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    let client = Endpoint::builder("lonely-client")
        .pipe_dir(dir.path())
        .bind()
        .await
        .unwrap();

    let result = client.request("nobody-home", vec![1]).await;
    assert!(result.is_err());

    assert!(client.peers().is_empty());
    assert_eq!(client.session_state("nobody-home"), None);

    client.shutdown().await;
}

#[tokio::test]
async fn test_custom_header_bytes_end_to_end() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    let server = Endpoint::builder("hdr-server")
        .pipe_dir(dir.path())
        .header_bytes(b"XY".to_vec())
        .handle_fn(0, |request, _peer| async move {
            Some(Bytes::from(request.body.to_vec()))
        })
        .bind()
        .await
        .unwrap();

    let client = Endpoint::builder("hdr-client")
        .pipe_dir(dir.path())
        .header_bytes(b"XY".to_vec())
        .bind()
        .await
        .unwrap();

    let reply = timeout(WAIT, client.request("hdr-server", vec![1, 2, 3]))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply.as_ref(), &[1, 2, 3]);

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_business_header_round_trip() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = seen.clone();

    let server = Endpoint::builder("disc-server")
        .pipe_dir(dir.path())
        .handle_fn(0, move |request, _peer| {
            let record = record.clone();
            async move {
                record.lock().await.push(request.header);
                Some(Bytes::new())
            }
        })
        .bind()
        .await
        .unwrap();

    let client = Endpoint::builder("disc-client")
        .pipe_dir(dir.path())
        .bind()
        .await
        .unwrap();

    let message = peerlink::Message::new(vec![0u8]).with_header(0xDEAD_BEEF);
    timeout(WAIT, client.request("disc-server", message))
        .await
        .unwrap()
        .unwrap();

    // Zero means no discriminator and travels without the optional field.
    timeout(WAIT, client.request("disc-server", vec![0u8]))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(*seen.lock().await, vec![0xDEAD_BEEF, 0]);

    client.shutdown().await;
    server.shutdown().await;
}
