//! Session behaviour over the in-memory transport.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;

use inolink::transport::memory::{ConnectBehavior, MemoryPeer, MemoryTransport, EPIPE};
use inolink::{ChannelSink, ConnectionState, LinkConfig, LinkError, LinkEvent, LinkSession};

const WAIT: Duration = Duration::from_secs(2);
const SETTLE: Duration = Duration::from_millis(100);

fn session(
    transport: &MemoryTransport,
    config: LinkConfig,
) -> (LinkSession, UnboundedReceiver<LinkEvent>) {
    let (sink, rx) = ChannelSink::channel();
    let session = LinkSession::new(Arc::new(transport.clone()), Arc::new(sink), config);
    (session, rx)
}

async fn next_event(rx: &mut UnboundedReceiver<LinkEvent>) -> LinkEvent {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

async fn expect_state(rx: &mut UnboundedReceiver<LinkEvent>, expected: ConnectionState) {
    match next_event(rx).await {
        LinkEvent::StateChanged(state) => assert_eq!(state, expected),
        other => panic!("expected state {}, got {:?}", expected, other),
    }
}

async fn expect_error(rx: &mut UnboundedReceiver<LinkEvent>) -> inolink::ErrorReport {
    match next_event(rx).await {
        LinkEvent::Error(report) => report,
        other => panic!("expected error, got {:?}", other),
    }
}

async fn expect_peer(rx: &mut UnboundedReceiver<LinkEvent>, expected: &str) {
    match next_event(rx).await {
        LinkEvent::PeerIdentified(name) => assert_eq!(name, expected),
        other => panic!("expected peer {}, got {:?}", expected, other),
    }
}

async fn expect_message(rx: &mut UnboundedReceiver<LinkEvent>, expected: &str) {
    match next_event(rx).await {
        LinkEvent::MessageReceived(message) => assert_eq!(message, expected),
        other => panic!("expected message {}, got {:?}", expected, other),
    }
}

async fn expect_quiet(rx: &mut UnboundedReceiver<LinkEvent>) {
    tokio::time::sleep(SETTLE).await;
    if let Ok(event) = rx.try_recv() {
        panic!("unexpected event {:?}", event);
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Start listening and accept a board dialing in.
async fn connect_inbound(
    transport: &MemoryTransport,
    session: &LinkSession,
    rx: &mut UnboundedReceiver<LinkEvent>,
) -> MemoryPeer {
    session.start();
    expect_state(rx, ConnectionState::Listening).await;

    let peer = transport.dial_in("00:11:22:33:44:55", Some("zum-core"));
    expect_peer(rx, "zum-core").await;
    expect_state(rx, ConnectionState::ConnectedConfigured).await;
    peer
}

#[tokio::test]
async fn test_start_listens_once() {
    let transport = MemoryTransport::new();
    let (session, mut rx) = session(&transport, LinkConfig::default());
    assert_eq!(session.state(), ConnectionState::Disconnected);

    session.start();
    expect_state(&mut rx, ConnectionState::Listening).await;
    assert_eq!(transport.open_endpoints(), 1);

    session.start();
    expect_quiet(&mut rx).await;
    assert_eq!(transport.listen_calls(), 1);
    assert_eq!(transport.open_endpoints(), 1);
}

#[tokio::test]
async fn test_inbound_connection_receives_frames() {
    let transport = MemoryTransport::new();
    let (session, mut rx) = session(&transport, LinkConfig::default());
    let peer = connect_inbound(&transport, &session, &mut rx).await;

    assert!(session.is_connected());
    assert_eq!(transport.open_endpoints(), 0);
    assert_eq!(
        session.peer().map(|p| p.address),
        Some("00:11:22:33:44:55".to_string())
    );

    peer.send(b"garbage&&hel");
    peer.send(b"lo%%&&world%%");
    expect_message(&mut rx, "hello").await;
    expect_message(&mut rx, "world").await;

    peer.send(b"%%noise&&late%%");
    expect_quiet(&mut rx).await;
}

#[tokio::test]
async fn test_send_frame_and_text() {
    let transport = MemoryTransport::new();
    let (session, mut rx) = session(&transport, LinkConfig::default());
    let peer = connect_inbound(&transport, &session, &mut rx).await;

    session.send_frame("LED ON").unwrap();
    assert_eq!(peer.received(), b"&&LED ON%%".to_vec());
    match next_event(&mut rx).await {
        LinkEvent::MessageSent(bytes) => assert_eq!(bytes, b"&&LED ON%%".to_vec()),
        other => panic!("expected sent message, got {:?}", other),
    }

    session.send_text("   ").unwrap();
    expect_quiet(&mut rx).await;

    let err = session.send_frame("a%%b").unwrap_err();
    assert!(matches!(err, LinkError::Frame(_)));
    assert_eq!(peer.received(), b"&&LED ON%%".to_vec());

    session.send_text("raw").unwrap();
    assert_eq!(peer.received(), b"&&LED ON%%raw".to_vec());
}

#[tokio::test]
async fn test_write_when_not_connected() {
    let transport = MemoryTransport::new();
    let (session, mut rx) = session(&transport, LinkConfig::default());

    let err = session.write(b"x").unwrap_err();
    assert!(matches!(err, LinkError::NotConnected));

    session.start();
    expect_state(&mut rx, ConnectionState::Listening).await;
    assert!(matches!(session.write(b"x"), Err(LinkError::NotConnected)));
    expect_quiet(&mut rx).await;
}

#[tokio::test]
async fn test_read_failure_returns_to_listening() {
    let transport = MemoryTransport::new();
    let (session, mut rx) = session(&transport, LinkConfig::default());
    let peer = connect_inbound(&transport, &session, &mut rx).await;

    peer.fail(io::ErrorKind::ConnectionReset);

    let report = expect_error(&mut rx).await;
    assert_eq!(report.state, ConnectionState::ErrorConnecting);
    assert!(matches!(*report.cause, LinkError::ConnectionLost { .. }));
    expect_state(&mut rx, ConnectionState::Disconnected).await;
    expect_state(&mut rx, ConnectionState::Listening).await;
    expect_quiet(&mut rx).await;

    assert!(peer.is_closed());
    assert_eq!(transport.open_endpoints(), 1);
    assert_eq!(transport.listen_calls(), 2);
    assert_eq!(transport.live_handles(), 0);

    // The new listener takes the next board.
    transport.dial_in("66:77:88:99:AA:BB", None);
    expect_peer(&mut rx, "66:77:88:99:AA:BB").await;
    expect_state(&mut rx, ConnectionState::ConnectedConfigured).await;
}

#[tokio::test]
async fn test_remote_hang_up_is_connection_lost() {
    let transport = MemoryTransport::new();
    let (session, mut rx) = session(&transport, LinkConfig::default());
    let peer = connect_inbound(&transport, &session, &mut rx).await;

    peer.send(b"&&bye%%");
    peer.hang_up();

    expect_message(&mut rx, "bye").await;
    let report = expect_error(&mut rx).await;
    assert_eq!(
        report.cause.io_error().map(|e| e.kind()),
        Some(io::ErrorKind::UnexpectedEof)
    );
    expect_state(&mut rx, ConnectionState::Disconnected).await;
    expect_state(&mut rx, ConnectionState::Listening).await;
}

#[tokio::test]
async fn test_write_failure_keeps_connection() {
    let transport = MemoryTransport::new();
    let (session, mut rx) = session(&transport, LinkConfig::default());
    let peer = connect_inbound(&transport, &session, &mut rx).await;

    peer.fail_writes(true);
    let err = session.send_frame("x").unwrap_err();
    assert!(matches!(err, LinkError::Write { .. }));
    assert_eq!(err.io_error().and_then(|e| e.raw_os_error()), Some(EPIPE));

    let report = expect_error(&mut rx).await;
    assert_eq!(report.state, ConnectionState::ErrorConfiguring);
    assert_eq!(
        report.cause.io_error().and_then(|e| e.raw_os_error()),
        Some(EPIPE)
    );
    expect_quiet(&mut rx).await;
    assert_eq!(session.state(), ConnectionState::ConnectedConfigured);

    peer.fail_writes(false);
    session.send_frame("y").unwrap();
    assert_eq!(peer.received(), b"&&y%%".to_vec());
}

#[tokio::test]
async fn test_stop_while_listening() {
    let transport = MemoryTransport::new();
    let (session, mut rx) = session(&transport, LinkConfig::default());

    session.start();
    expect_state(&mut rx, ConnectionState::Listening).await;

    session.stop();
    expect_state(&mut rx, ConnectionState::Disconnected).await;
    expect_quiet(&mut rx).await;
    assert_eq!(transport.open_endpoints(), 0);
    assert_eq!(transport.live_handles(), 0);

    session.start();
    expect_state(&mut rx, ConnectionState::Listening).await;
    assert_eq!(transport.open_endpoints(), 1);
}

#[tokio::test]
async fn test_stop_while_connected() {
    let transport = MemoryTransport::new();
    let (session, mut rx) = session(&transport, LinkConfig::default());
    let peer = connect_inbound(&transport, &session, &mut rx).await;

    session.stop();
    expect_state(&mut rx, ConnectionState::Disconnected).await;
    expect_quiet(&mut rx).await;

    assert!(peer.is_closed());
    assert!(session.peer().is_none());
    assert_eq!(transport.live_handles(), 0);
    assert_eq!(transport.open_endpoints(), 0);
}

#[tokio::test]
async fn test_drop_stops_session() {
    let transport = MemoryTransport::new();
    let (session, mut rx) = session(&transport, LinkConfig::default());

    session.start();
    expect_state(&mut rx, ConnectionState::Listening).await;

    drop(session);
    expect_state(&mut rx, ConnectionState::Disconnected).await;
    assert_eq!(transport.open_endpoints(), 0);
}

#[tokio::test]
async fn test_outbound_connect() {
    let transport = MemoryTransport::new();
    transport.add_peer("11:22:33:44:55:66", Some("board"), ConnectBehavior::Accept);
    let (session, mut rx) = session(&transport, LinkConfig::default());

    session.start();
    expect_state(&mut rx, ConnectionState::Listening).await;

    session.connect("11:22:33:44:55:66");
    expect_state(&mut rx, ConnectionState::Connecting).await;
    expect_peer(&mut rx, "board").await;
    expect_state(&mut rx, ConnectionState::ConnectedConfigured).await;

    assert_eq!(transport.discovery_cancels(), 1);
    assert_eq!(transport.max_live_handles(), 1);
    assert_eq!(transport.open_endpoints(), 0);

    let peer = transport.outbound_peer("11:22:33:44:55:66").unwrap();
    peer.send(b"&&ready%%");
    expect_message(&mut rx, "ready").await;
}

#[tokio::test]
async fn test_refused_connect_returns_to_listening() {
    let transport = MemoryTransport::new();
    transport.add_peer("11:22:33:44:55:66", None, ConnectBehavior::Refuse);
    let (session, mut rx) = session(&transport, LinkConfig::default());

    session.start();
    expect_state(&mut rx, ConnectionState::Listening).await;

    session.connect("11:22:33:44:55:66");
    expect_state(&mut rx, ConnectionState::Connecting).await;
    let report = expect_error(&mut rx).await;
    assert_eq!(report.state, ConnectionState::ErrorConnecting);
    assert_eq!(
        report.cause.io_error().map(|e| e.kind()),
        Some(io::ErrorKind::ConnectionRefused)
    );
    expect_state(&mut rx, ConnectionState::Listening).await;
    expect_quiet(&mut rx).await;

    // The listener kept running through the attempt.
    assert_eq!(transport.listen_calls(), 1);
    assert_eq!(transport.open_endpoints(), 1);
    assert_eq!(transport.live_handles(), 0);
}

#[tokio::test]
async fn test_connect_to_unknown_peer() {
    let transport = MemoryTransport::new();
    let (session, mut rx) = session(&transport, LinkConfig::default());

    session.connect("nowhere");
    expect_state(&mut rx, ConnectionState::Connecting).await;
    let report = expect_error(&mut rx).await;
    assert!(matches!(*report.cause, LinkError::Connect { .. }));
    assert_eq!(
        report.cause.io_error().map(|e| e.kind()),
        Some(io::ErrorKind::NotFound)
    );
    expect_state(&mut rx, ConnectionState::Listening).await;
}

#[tokio::test]
async fn test_stop_during_connect() {
    let transport = MemoryTransport::new();
    transport.add_peer("11:22:33:44:55:66", None, ConnectBehavior::Hold);
    let (session, mut rx) = session(&transport, LinkConfig::default());

    session.connect("11:22:33:44:55:66");
    expect_state(&mut rx, ConnectionState::Connecting).await;
    let peer = transport.outbound_peer("11:22:33:44:55:66").unwrap();

    session.stop();
    expect_state(&mut rx, ConnectionState::Disconnected).await;
    assert!(peer.is_closed());

    // The aborted attempt must not bring the session back to life.
    expect_quiet(&mut rx).await;
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(transport.open_endpoints(), 0);
}

#[tokio::test]
async fn test_new_connect_supersedes_pending_one() {
    let transport = MemoryTransport::new();
    transport.add_peer("AA:AA:AA:AA:AA:AA", Some("first"), ConnectBehavior::Hold);
    transport.add_peer("BB:BB:BB:BB:BB:BB", Some("second"), ConnectBehavior::Hold);
    let (session, mut rx) = session(&transport, LinkConfig::default());

    session.connect("AA:AA:AA:AA:AA:AA");
    expect_state(&mut rx, ConnectionState::Connecting).await;
    let first = transport.outbound_peer("AA:AA:AA:AA:AA:AA").unwrap();

    session.connect("BB:BB:BB:BB:BB:BB");
    assert!(first.is_closed());
    expect_quiet(&mut rx).await;

    // A late answer from the first board changes nothing.
    first.release();
    expect_quiet(&mut rx).await;

    transport.outbound_peer("BB:BB:BB:BB:BB:BB").unwrap().release();
    expect_peer(&mut rx, "second").await;
    expect_state(&mut rx, ConnectionState::ConnectedConfigured).await;
    assert_eq!(transport.max_live_handles(), 1);
}

#[tokio::test]
async fn test_inbound_wins_over_pending_connect() {
    let transport = MemoryTransport::new();
    transport.add_peer("11:22:33:44:55:66", None, ConnectBehavior::Hold);
    let (session, mut rx) = session(&transport, LinkConfig::default());

    session.start();
    expect_state(&mut rx, ConnectionState::Listening).await;
    session.connect("11:22:33:44:55:66");
    expect_state(&mut rx, ConnectionState::Connecting).await;
    let outbound = transport.outbound_peer("11:22:33:44:55:66").unwrap();

    transport.dial_in("CC:CC:CC:CC:CC:CC", Some("phone"));
    expect_peer(&mut rx, "phone").await;
    expect_state(&mut rx, ConnectionState::ConnectedConfigured).await;
    assert!(outbound.is_closed());

    expect_quiet(&mut rx).await;
    assert_eq!(transport.live_handles(), 1);
}

#[tokio::test]
async fn test_second_board_is_not_taken() {
    let transport = MemoryTransport::new();
    let (session, mut rx) = session(&transport, LinkConfig::default());
    connect_inbound(&transport, &session, &mut rx).await;

    transport.dial_in("66:77:88:99:AA:BB", Some("other"));
    expect_quiet(&mut rx).await;
    assert_eq!(transport.live_handles(), 1);
    assert_eq!(
        session.peer().map(|p| p.display_name().to_string()),
        Some("zum-core".to_string())
    );
}

#[tokio::test]
async fn test_simplex_never_reads() {
    let transport = MemoryTransport::new();
    let config = LinkConfig {
        duplex: false,
        ..LinkConfig::default()
    };
    let (session, mut rx) = session(&transport, config);
    let peer = connect_inbound(&transport, &session, &mut rx).await;

    peer.send(b"&&ignored%%");
    expect_quiet(&mut rx).await;
    assert_eq!(peer.read_calls(), 0);

    session.send_frame("go").unwrap();
    assert_eq!(peer.received(), b"&&go%%".to_vec());
}

#[tokio::test]
async fn test_duplex_change_applies_to_next_connection() {
    let transport = MemoryTransport::new();
    let (session, mut rx) = session(&transport, LinkConfig::default());
    let peer = connect_inbound(&transport, &session, &mut rx).await;

    session.set_duplex(false);
    assert!(!session.is_duplex());

    // The current connection keeps reading.
    peer.send(b"&&still%%");
    expect_message(&mut rx, "still").await;

    peer.fail(io::ErrorKind::ConnectionReset);
    expect_error(&mut rx).await;
    expect_state(&mut rx, ConnectionState::Disconnected).await;
    expect_state(&mut rx, ConnectionState::Listening).await;

    let next = transport.dial_in("66:77:88:99:AA:BB", None);
    expect_peer(&mut rx, "66:77:88:99:AA:BB").await;
    expect_state(&mut rx, ConnectionState::ConnectedConfigured).await;
    next.send(b"&&unread%%");
    expect_quiet(&mut rx).await;
    assert_eq!(next.read_calls(), 0);
}

#[tokio::test]
async fn test_listen_failure_reported_once() {
    let transport = MemoryTransport::new();
    transport.set_fail_listen(true);
    let (session, mut rx) = session(&transport, LinkConfig::default());

    session.start();
    expect_state(&mut rx, ConnectionState::Listening).await;
    let report = expect_error(&mut rx).await;
    assert!(matches!(*report.cause, LinkError::Listen { .. }));

    session.start();
    expect_quiet(&mut rx).await;
    assert_eq!(transport.listen_calls(), 1);

    // A stop clears the inert listener.
    session.stop();
    expect_state(&mut rx, ConnectionState::Disconnected).await;
    transport.set_fail_listen(false);
    session.start();
    expect_state(&mut rx, ConnectionState::Listening).await;
    wait_until(|| transport.open_endpoints() == 1).await;
}

#[tokio::test]
async fn test_listen_failure_not_repeated_after_lost_connection() {
    let transport = MemoryTransport::new();
    transport.set_fail_listen(true);
    transport.add_peer("11:22:33:44:55:66", Some("board"), ConnectBehavior::Accept);
    let (session, mut rx) = session(&transport, LinkConfig::default());

    session.start();
    expect_state(&mut rx, ConnectionState::Listening).await;
    let report = expect_error(&mut rx).await;
    assert!(matches!(*report.cause, LinkError::Listen { .. }));

    session.connect("11:22:33:44:55:66");
    expect_state(&mut rx, ConnectionState::Connecting).await;
    expect_peer(&mut rx, "board").await;
    expect_state(&mut rx, ConnectionState::ConnectedConfigured).await;

    let peer = transport.outbound_peer("11:22:33:44:55:66").unwrap();
    peer.fail(io::ErrorKind::ConnectionReset);
    let report = expect_error(&mut rx).await;
    assert!(matches!(*report.cause, LinkError::ConnectionLost { .. }));
    expect_state(&mut rx, ConnectionState::Disconnected).await;
    expect_state(&mut rx, ConnectionState::Listening).await;
    expect_quiet(&mut rx).await;
    assert_eq!(transport.listen_calls(), 1);

    // Reconnecting works and still does not retry listening.
    session.connect("11:22:33:44:55:66");
    expect_state(&mut rx, ConnectionState::Connecting).await;
    expect_peer(&mut rx, "board").await;
    expect_state(&mut rx, ConnectionState::ConnectedConfigured).await;
    expect_quiet(&mut rx).await;
    assert_eq!(transport.listen_calls(), 1);
}
