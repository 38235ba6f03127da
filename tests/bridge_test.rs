//! Peer bridge integration tests
//!
//! Most tests run over in-memory links with paused tokio time so backoff,
//! heartbeat and silence timers are exact. The last test runs a real
//! WebSocket listener on loopback.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Instant};

use coherence_node::bridge::listener::serve_link;
use coherence_node::bridge::{
    start_bridge, BridgeConfig, BridgeFrame, ConnectionState, LinkStatus, MemoryConnector,
    MemoryLink, PeerLink, PeerListener, Reachability, SessionEnd, WsConnector, PROTOCOL_VERSION,
};
use coherence_node::config::{FieldConfig, ScoringConfig, ValidationConfig};
use coherence_node::field::{FieldAggregator, NoNoise};
use coherence_node::{
    AccessTier, BridgeError, Clock, HarmonyCategory, ManualClock, MessageValidator, RawMessage,
};

// =============================================================================
// Helpers
// =============================================================================

fn start() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

fn node(id: &str) -> (Arc<FieldAggregator>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start()));
    let config = FieldConfig {
        fluctuation_amplitude: 0.0,
        noise_amplitude: 0.0,
        ..Default::default()
    };
    let field = Arc::new(FieldAggregator::new(
        id,
        config,
        ScoringConfig::default(),
        clock.clone(),
        Arc::new(NoNoise),
    ));
    (field, clock)
}

fn bridge_config() -> BridgeConfig {
    BridgeConfig {
        bridge_base_delay_ms: 100,
        bridge_max_delay_ms: 1000,
        heartbeat_interval_ms: 1000,
        connect_timeout_ms: 500,
        sync_interval_ms: 200,
        max_reconnect_attempts: 0,
        ..Default::default()
    }
}

fn gratitude(field: &FieldAggregator, clock: &ManualClock) {
    let validator = MessageValidator::new(&ValidationConfig::default()).unwrap();
    let raw = RawMessage::new(
        field.local_node(),
        "collective",
        "gratitude",
        "mutuality",
        "Thank you for holding the space today",
        clock.now(),
    );
    let message = validator.validate(&raw, AccessTier::Open, clock.now()).unwrap();
    field.apply(&message);
}

async fn wait_for(
    status: &mut watch::Receiver<LinkStatus>,
    mut predicate: impl FnMut(&LinkStatus) -> bool,
) -> LinkStatus {
    timeout(Duration::from_secs(600), status.wait_for(|s| predicate(s)))
        .await
        .expect("timed out waiting for bridge status")
        .expect("bridge status channel closed")
        .clone()
}

fn gaps(times: &[Instant]) -> Vec<Duration> {
    times.windows(2).map(|w| w[1] - w[0]).collect()
}

fn assert_gaps(times: &[Instant], expected_ms: &[u64]) {
    let observed = gaps(times);
    assert_eq!(observed.len(), expected_ms.len());
    for (gap, ms) in observed.iter().zip(expected_ms) {
        let expected = Duration::from_millis(*ms);
        assert!(
            *gap >= expected && *gap < expected + Duration::from_millis(10),
            "observed {observed:?}, expected {expected_ms:?}"
        );
    }
}

/// Serve every inbound memory link as an accepting peer.
fn spawn_acceptor(
    mut incoming: tokio::sync::mpsc::UnboundedReceiver<(String, MemoryLink)>,
    field: Arc<FieldAggregator>,
    stop: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<Vec<SessionEnd>> {
    tokio::spawn(async move {
        let mut ends = Vec::new();
        while let Some((_, mut link)) = incoming.recv().await {
            if let Ok(end) = serve_link(&mut link, field.clone(), bridge_config(), stop.clone()).await {
                ends.push(end);
            }
        }
        ends
    })
}

// =============================================================================
// Sync
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_two_nodes_converge() {
    let (field_a, clock_a) = node("node-a");
    let (field_b, clock_b) = node("node-b");
    let (connector, incoming) = MemoryConnector::new();
    let (_stop_tx, stop_rx) = watch::channel(false);
    let _acceptor = spawn_acceptor(incoming, field_b.clone(), stop_rx);

    let handle = start_bridge("mem://node-b", bridge_config(), field_a.clone(), Arc::new(connector));
    let mut status = handle.subscribe();
    let connected = wait_for(&mut status, |s| s.state == ConnectionState::Connected).await;
    assert_eq!(connected.remote_node.as_deref(), Some("node-b"));
    assert_eq!(connected.connected_url.as_deref(), Some("mem://node-b"));

    // A's update reaches B on the next sync push
    clock_a.advance(chrono::Duration::seconds(1));
    gratitude(&field_a, &clock_a);
    sleep(Duration::from_millis(500)).await;

    let b = field_b.snapshot();
    assert!((b.coherence - 75.35).abs() < 1e-9);
    assert!((b.harmonic(HarmonyCategory::Mutuality) - 0.35).abs() < 1e-9);
    assert_eq!(b.active_node_count, 2);

    // and B's newer update flows back
    clock_b.advance(chrono::Duration::seconds(2));
    gratitude(&field_b, &clock_b);
    sleep(Duration::from_millis(500)).await;

    let a = field_a.snapshot();
    assert!((a.coherence - 75.70).abs() < 1e-9);
    // snapshots one second apart merge by max instead of summing
    assert!((a.harmonic(HarmonyCategory::Mutuality) - 0.70).abs() < 1e-9);

    handle.close().await;
    assert_eq!(status.borrow().state, ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_close_sends_goodbye() {
    let (field_a, _) = node("node-a");
    let (connector, mut incoming) = MemoryConnector::new();

    let handle = start_bridge("mem://peer", bridge_config(), field_a, Arc::new(connector));
    let (_, mut peer) = incoming.recv().await.unwrap();

    assert!(matches!(peer.recv().await.unwrap(), Some(BridgeFrame::Hello { .. })));
    peer.send(&BridgeFrame::Welcome {
        node_id: "peer".into(),
        protocol_version: PROTOCOL_VERSION,
    })
    .await
    .unwrap();
    assert!(matches!(peer.recv().await.unwrap(), Some(BridgeFrame::Snapshot { .. })));

    handle.close().await;

    let mut saw_goodbye = false;
    while let Some(frame) = peer.recv().await.unwrap() {
        if let BridgeFrame::Goodbye { node_id } = frame {
            assert_eq!(node_id, "node-a");
            saw_goodbye = true;
        }
    }
    assert!(saw_goodbye);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_carries_field_clock_time() {
    let (field_a, clock_a) = node("node-a");
    clock_a.advance(chrono::Duration::hours(3));
    let expected = clock_a.now();
    let (connector, mut incoming) = MemoryConnector::new();

    let peer = tokio::spawn(async move {
        let (_, mut link) = incoming.recv().await.unwrap();
        let _hello = link.recv().await.unwrap();
        link.send(&BridgeFrame::Welcome {
            node_id: "node-b".into(),
            protocol_version: PROTOCOL_VERSION,
        })
        .await
        .unwrap();
        loop {
            match link.recv().await.unwrap() {
                Some(BridgeFrame::Heartbeat { sent_at, .. }) => return sent_at,
                Some(_) => continue,
                None => panic!("link closed before a heartbeat"),
            }
        }
    });

    let handle = start_bridge("mem://node-b", bridge_config(), field_a, Arc::new(connector));
    let sent_at = timeout(Duration::from_secs(600), peer).await.unwrap().unwrap();
    assert_eq!(sent_at, expected);

    handle.close().await;
}

// =============================================================================
// Failure and recovery
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_reconnects_after_failure_and_resets_attempts() {
    let (field_a, _) = node("node-a");
    let (field_b, _) = node("node-b");
    let (connector, incoming) = MemoryConnector::new();
    let connector = Arc::new(connector);
    connector.set_reachability("mem://b", Reachability::Refuse);
    let (stop_tx, stop_rx) = watch::channel(false);
    let _acceptor = spawn_acceptor(incoming, field_b, stop_rx);

    let handle = start_bridge("mem://b", bridge_config(), field_a, connector.clone());
    let mut status = handle.subscribe();

    let failing = wait_for(&mut status, |s| {
        s.state == ConnectionState::Backoff && s.reconnect_attempt >= 2
    })
    .await;
    assert!(matches!(failing.last_error, Some(BridgeError::ConnectFailed(_))));

    connector.set_reachability("mem://b", Reachability::Accept);
    let connected = wait_for(&mut status, |s| s.state == ConnectionState::Connected).await;
    assert_eq!(connected.reconnect_attempt, 0);

    // the peer leaves; counting starts again from the first attempt
    stop_tx.send(true).unwrap();
    let dropped = wait_for(&mut status, |s| s.state == ConnectionState::Backoff).await;
    assert_eq!(dropped.reconnect_attempt, 1);
    assert_eq!(dropped.last_error, Some(BridgeError::Closed));

    handle.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_observed_backoff_delays_double_up_to_cap() {
    let (field_a, _) = node("node-a");
    let (connector, _incoming) = MemoryConnector::new();
    let connector = Arc::new(connector);
    connector.set_reachability("mem://down", Reachability::Refuse);

    let handle = start_bridge("mem://down", bridge_config(), field_a, connector);
    let mut status = handle.subscribe();

    let mut failures = Vec::new();
    let mut last_attempt = 0;
    while failures.len() < 7 {
        let failed = wait_for(&mut status, |s| {
            s.state == ConnectionState::Backoff && s.reconnect_attempt > last_attempt
        })
        .await;
        last_attempt = failed.reconnect_attempt;
        failures.push(Instant::now());
    }
    assert_eq!(last_attempt, 7);

    assert_gaps(&failures, &[100, 200, 400, 800, 1000, 1000]);
    let observed = gaps(&failures);
    assert!(observed.windows(2).all(|w| w[0] <= w[1]));

    handle.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_backoff_restarts_after_each_connected_session() {
    let (field_a, _) = node("node-a");
    let (connector, mut incoming) = MemoryConnector::new();

    // welcome every dial, then hang up straight away
    let dials = tokio::spawn(async move {
        let mut at = Vec::new();
        while let Some((_, mut link)) = incoming.recv().await {
            at.push(Instant::now());
            let _hello = link.recv().await;
            let _ = link
                .send(&BridgeFrame::Welcome {
                    node_id: "node-b".into(),
                    protocol_version: PROTOCOL_VERSION,
                })
                .await;
            if at.len() == 5 {
                break;
            }
        }
        at
    });

    let handle = start_bridge("mem://flaky", bridge_config(), field_a, Arc::new(connector));
    let at = timeout(Duration::from_secs(600), dials).await.unwrap().unwrap();

    // every session reached Connected, so the delay never grows past base
    assert_gaps(&at, &[100, 100, 100, 100]);

    handle.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_silent_peer_is_dropped() {
    let (field_a, _) = node("node-a");
    let (connector, mut incoming) = MemoryConnector::new();

    let silent = tokio::spawn(async move {
        let (_, mut link) = incoming.recv().await.unwrap();
        let _hello = link.recv().await.unwrap();
        link.send(&BridgeFrame::Welcome {
            node_id: "silent".into(),
            protocol_version: PROTOCOL_VERSION,
        })
        .await
        .unwrap();
        // keep the link open without ever answering
        std::future::pending::<()>().await;
        drop(link);
    });

    let handle = start_bridge("mem://silent", bridge_config(), field_a, Arc::new(connector));
    let mut status = handle.subscribe();
    wait_for(&mut status, |s| s.state == ConnectionState::Connected).await;
    let connected_at = Instant::now();

    let dropped = wait_for(&mut status, |s| s.state == ConnectionState::Backoff).await;
    assert!(matches!(dropped.last_error, Some(BridgeError::Timeout(_))));
    // peer timeout defaults to three heartbeat intervals
    assert!(connected_at.elapsed() >= Duration::from_millis(3000));

    handle.close().await;
    silent.abort();
}

#[tokio::test(start_paused = true)]
async fn test_rejection_goes_through_backoff() {
    let (field_a, _) = node("node-a");
    let (connector, mut incoming) = MemoryConnector::new();

    tokio::spawn(async move {
        while let Some((_, mut link)) = incoming.recv().await {
            let _hello = link.recv().await;
            let _ = link
                .send(&BridgeFrame::Reject {
                    reason: "cluster is full".into(),
                })
                .await;
        }
    });

    let handle = start_bridge("mem://full", bridge_config(), field_a, Arc::new(connector));
    let mut status = handle.subscribe();

    let rejected = wait_for(&mut status, |s| s.state == ConnectionState::Backoff).await;
    assert_eq!(
        rejected.last_error,
        Some(BridgeError::PeerRejected("cluster is full".into()))
    );

    handle.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_gives_up_after_max_attempts() {
    let (field_a, _) = node("node-a");
    let (connector, _incoming) = MemoryConnector::new();
    let connector = Arc::new(connector);
    connector.set_reachability("mem://gone", Reachability::Refuse);

    let config = BridgeConfig {
        max_reconnect_attempts: 3,
        ..bridge_config()
    };
    let handle = start_bridge("mem://gone", config, field_a, connector.clone());
    let mut status = handle.subscribe();

    let stopped = wait_for(&mut status, |s| {
        s.state == ConnectionState::Disconnected && s.last_error.is_some()
    })
    .await;
    assert_eq!(stopped.reconnect_attempt, 3);
    assert_eq!(connector.dials(), 3);

    sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.dials(), 3);
    assert!(handle.is_finished());
    handle.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_fallback_url_used_when_primary_down() {
    let (field_a, _) = node("node-a");
    let (field_b, _) = node("node-b");
    let (connector, incoming) = MemoryConnector::new();
    let connector = Arc::new(connector);
    connector.set_reachability("mem://primary", Reachability::Refuse);
    let (_stop_tx, stop_rx) = watch::channel(false);
    let _acceptor = spawn_acceptor(incoming, field_b, stop_rx);

    let config = BridgeConfig {
        fallback_urls: vec!["mem://backup".into()],
        ..bridge_config()
    };
    let handle = start_bridge("mem://primary", config, field_a, connector.clone());
    let mut status = handle.subscribe();

    let connected = wait_for(&mut status, |s| s.state == ConnectionState::Connected).await;
    assert_eq!(connected.connected_url.as_deref(), Some("mem://backup"));
    assert_eq!(connector.dials(), 2);

    handle.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_hanging_connect_times_out() {
    let (field_a, _) = node("node-a");
    let (connector, _incoming) = MemoryConnector::new();
    let connector = Arc::new(connector);
    connector.set_reachability("mem://void", Reachability::Hang);

    let handle = start_bridge("mem://void", bridge_config(), field_a, connector);
    let mut status = handle.subscribe();

    let failed = wait_for(&mut status, |s| s.state == ConnectionState::Backoff).await;
    assert!(matches!(failed.last_error, Some(BridgeError::Timeout(_))));

    handle.close().await;
}

// =============================================================================
// Accept side
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_listener_rejects_wrong_protocol_version() {
    let (field_b, _) = node("node-b");
    let (mut client, mut server) = MemoryLink::pair();
    let (_stop_tx, stop_rx) = watch::channel(false);

    let serving = tokio::spawn(async move {
        serve_link(&mut server, field_b, bridge_config(), stop_rx).await
    });

    client
        .send(&BridgeFrame::Hello {
            node_id: "node-a".into(),
            protocol_version: PROTOCOL_VERSION + 1,
            subscribe: true,
        })
        .await
        .unwrap();

    assert!(matches!(client.recv().await.unwrap(), Some(BridgeFrame::Reject { .. })));
    assert!(matches!(
        serving.await.unwrap(),
        Err(BridgeError::PeerRejected(_))
    ));
}

#[tokio::test]
async fn test_listener_closes_with_idle_tcp_client() {
    let (field_b, _) = node("node-b");
    let config = BridgeConfig {
        connect_timeout_ms: 60_000,
        ..bridge_config()
    };
    let listener = PeerListener::bind("127.0.0.1:0", field_b, config).await.unwrap();

    // connects but never sends the WebSocket upgrade
    let _idle = tokio::net::TcpStream::connect(listener.local_addr()).await.unwrap();
    sleep(Duration::from_millis(100)).await;

    timeout(Duration::from_secs(5), listener.close())
        .await
        .expect("listener close blocked on an idle client");
}

#[tokio::test]
async fn test_listener_drops_idle_tcp_client_after_connect_timeout() {
    use tokio::io::AsyncReadExt;

    let (field_b, _) = node("node-b");
    let config = BridgeConfig {
        connect_timeout_ms: 200,
        ..bridge_config()
    };
    let listener = PeerListener::bind("127.0.0.1:0", field_b, config).await.unwrap();

    let mut idle = tokio::net::TcpStream::connect(listener.local_addr()).await.unwrap();
    let mut buf = [0u8; 16];
    let read = timeout(Duration::from_secs(5), idle.read(&mut buf))
        .await
        .expect("idle client was never dropped");
    assert!(matches!(read, Ok(0) | Err(_)));

    listener.close().await;
}

#[tokio::test]
async fn test_websocket_listener_round_trip() {
    let (field_a, clock_a) = node("node-a");
    let (field_b, _) = node("node-b");
    let config = BridgeConfig {
        sync_interval_ms: 50,
        heartbeat_interval_ms: 200,
        connect_timeout_ms: 2000,
        ..bridge_config()
    };

    let listener = PeerListener::bind("127.0.0.1:0", field_b.clone(), config.clone())
        .await
        .unwrap();
    let url = format!("ws://{}", listener.local_addr());

    let handle = start_bridge(&url, config, field_a.clone(), Arc::new(WsConnector));
    let mut status = handle.subscribe();
    let connected = timeout(
        Duration::from_secs(10),
        wait_for(&mut status, |s| s.state == ConnectionState::Connected),
    )
    .await
    .unwrap();
    assert_eq!(connected.remote_node.as_deref(), Some("node-b"));

    clock_a.advance(chrono::Duration::seconds(1));
    gratitude(&field_a, &clock_a);

    timeout(Duration::from_secs(10), async {
        while (field_b.snapshot().coherence - 75.35).abs() > 1e-9 {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("snapshot never reached the listener side");
    assert_eq!(listener.connected_peers(), vec!["node-a".to_string()]);

    handle.close().await;
    listener.close().await;
}
