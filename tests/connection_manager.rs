use std::sync::Arc;
use std::time::Duration;

use telemetry_ws::core::{TokioClock, WsFrame};
use telemetry_ws::storage::{KEY_AUTO_RECONNECT, LocalStorage, MemoryStorage};
use telemetry_ws::testing::{ConnectPlan, MockListener, MockServer, MockTransport, outbound_text};
use telemetry_ws::{
    ConnectOutcome, ConnectionLifecycleState, DashboardState, RealtimeClient, RealtimeConfig,
    RealtimeError,
};

const ENDPOINT: &str = "ws://telemetry.test/ws";

fn client_with(transport: MockTransport, storage: Arc<MemoryStorage>) -> RealtimeClient<MockTransport> {
    RealtimeClient::builder(RealtimeConfig::default().with_endpoint(ENDPOINT))
        .transport(transport)
        .storage(storage)
        .clock(Arc::new(TokioClock::new()))
        .spawn()
        .unwrap()
}

fn client(transport: MockTransport) -> RealtimeClient<MockTransport> {
    client_with(transport, MemoryStorage::shared())
}

fn lifecycle_is(expected: ConnectionLifecycleState) -> impl FnMut(&DashboardState) -> bool {
    move |s| s.connection.lifecycle == expected
}

async fn open(client: &RealtimeClient<MockTransport>, listener: &mut MockListener) -> MockServer {
    client.connect().await.unwrap();
    let server = listener.accept().await.unwrap();
    client
        .wait_until(lifecycle_is(ConnectionLifecycleState::Open))
        .await
        .unwrap();
    server
}

#[tokio::test(start_paused = true)]
async fn concurrent_connects_share_one_transport() {
    let (transport, mut listener) = MockTransport::new();
    let client = client(transport.clone());

    let callers: Vec<_> = (0..8)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.connect().await.unwrap() })
        })
        .collect();
    let mut outcomes = Vec::new();
    for caller in callers {
        outcomes.push(caller.await.unwrap());
    }

    let started = outcomes
        .iter()
        .filter(|o| **o == ConnectOutcome::Started)
        .count();
    assert_eq!(started, 1);
    assert!(
        outcomes
            .iter()
            .all(|o| matches!(o, ConnectOutcome::Started | ConnectOutcome::AlreadyActive))
    );

    let _server = listener.accept().await.unwrap();
    let (a, b) = tokio::join!(
        client.wait_until(lifecycle_is(ConnectionLifecycleState::Open)),
        client.wait_until(lifecycle_is(ConnectionLifecycleState::Open)),
    );
    assert_eq!(a.unwrap().connection, b.unwrap().connection);

    assert_eq!(client.connect().await.unwrap(), ConnectOutcome::AlreadyActive);
    assert_eq!(transport.connect_count(), 1);
    assert_eq!(transport.connected_urls(), vec![ENDPOINT.to_string()]);
}

#[tokio::test(start_paused = true)]
async fn abnormal_close_schedules_one_retry_after_base_plus_step() {
    let (transport, mut listener) = MockTransport::new();
    let client = client(transport.clone());
    let mut server = open(&client, &mut listener).await;

    server.drop_socket();
    let state = client
        .wait_until(lifecycle_is(ConnectionLifecycleState::Closed))
        .await
        .unwrap();
    assert_eq!(state.connection.attempt_count, 1);
    assert_eq!(state.connection.backoff_delay_ms, 2_000);
    assert!(state.connection.auto_reconnect);

    let _second = listener.accept().await.unwrap();
    let times = transport.attempt_times();
    assert_eq!(times.len(), 2);
    let gap = times[1] - times[0];
    assert!(gap >= Duration::from_millis(2_000), "retried after {gap:?}");
    assert!(gap < Duration::from_millis(2_100), "retried after {gap:?}");

    let state = client
        .wait_until(lifecycle_is(ConnectionLifecycleState::Open))
        .await
        .unwrap();
    assert_eq!(state.connection.attempt_count, 0);
    assert_eq!(state.connection.backoff_delay_ms, 1_000);
    assert_eq!(client.link_stats().await.unwrap().reconnects_scheduled, 1);
}

#[tokio::test(start_paused = true)]
async fn fifth_failure_trips_circuit_and_refuses_manual_connect() {
    let (transport, _listener) =
        MockTransport::with_fallback(ConnectPlan::Fail("connection refused".into()), None);
    let client = client(transport.clone());

    assert_eq!(client.connect().await.unwrap(), ConnectOutcome::Started);
    let state = client
        .wait_until(|s| s.connection.circuit_open)
        .await
        .unwrap();

    assert_eq!(transport.connect_count(), 5);
    assert_eq!(state.connection.attempt_count, 5);
    assert!(!state.connection.auto_reconnect);
    let error = state.connection.last_error.unwrap();
    assert!(error.contains("Circuit breaker open"), "{error}");
    assert!(error.contains("force reconnect"), "{error}");

    let delays: Vec<u64> = transport
        .attempt_times()
        .windows(2)
        .map(|w| (w[1] - w[0]).as_millis() as u64)
        .collect();
    for pair in delays.windows(2) {
        assert!(pair[0] <= pair[1], "delays shrank: {delays:?}");
    }

    match client.connect().await.unwrap() {
        ConnectOutcome::RefusedCircuitOpen { retry_in_ms } => {
            assert!(retry_in_ms > 0 && retry_in_ms <= 30_000)
        }
        other => panic!("expected refusal, got {other:?}"),
    }
    assert_eq!(transport.connect_count(), 5);
}

#[tokio::test(start_paused = true)]
async fn circuit_stays_quiet_until_cooldown_then_retry_restores_auto_reconnect() {
    let (transport, mut listener) = MockTransport::new();
    for _ in 0..5 {
        transport.push_plan(ConnectPlan::Fail("unreachable".into()));
    }
    let client = client(transport.clone());

    client.connect().await.unwrap();
    client
        .wait_until(|s| s.connection.circuit_open)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(29)).await;
    assert_eq!(transport.connect_count(), 5);

    let _server = listener.accept().await.unwrap();
    let state = client
        .wait_until(lifecycle_is(ConnectionLifecycleState::Open))
        .await
        .unwrap();
    assert_eq!(transport.connect_count(), 6);
    assert!(!state.connection.circuit_open);
    assert!(state.connection.auto_reconnect);
    assert_eq!(state.connection.attempt_count, 0);
    assert_eq!(state.connection.last_error, None);
}

#[tokio::test(start_paused = true)]
async fn failed_retry_after_cooldown_reopens_circuit_and_schedules_the_next() {
    let (transport, mut listener) =
        MockTransport::with_fallback(ConnectPlan::Fail("unreachable".into()), None);
    let client = client(transport.clone());

    client.connect().await.unwrap();
    client
        .wait_until(|s| s.connection.circuit_open)
        .await
        .unwrap();
    assert_eq!(transport.connect_count(), 5);

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(transport.connect_count(), 6);
    let state = client.snapshot();
    assert!(state.connection.circuit_open);
    assert!(!state.connection.auto_reconnect);
    assert_eq!(state.connection.attempt_count, 6);
    let error = state.connection.last_error.unwrap();
    assert!(error.contains("Circuit breaker open after 6"), "{error}");
    assert!(matches!(
        client.connect().await.unwrap(),
        ConnectOutcome::RefusedCircuitOpen { .. }
    ));

    transport.push_plan(ConnectPlan::Accept);
    let _server = listener.accept().await.unwrap();
    let state = client
        .wait_until(lifecycle_is(ConnectionLifecycleState::Open))
        .await
        .unwrap();
    assert_eq!(transport.connect_count(), 7);
    assert!(state.connection.auto_reconnect);
    assert!(!state.connection.circuit_open);

    let times = transport.attempt_times();
    let gap = times[6] - times[5];
    assert!(gap >= Duration::from_secs(30), "retried after {gap:?}");
    assert!(gap < Duration::from_millis(30_100), "retried after {gap:?}");
}

#[tokio::test(start_paused = true)]
async fn manual_connect_is_allowed_once_cooldown_elapses() {
    let (transport, mut listener) = MockTransport::new();
    for _ in 0..5 {
        transport.push_plan(ConnectPlan::Fail("unreachable".into()));
    }
    let client = client(transport.clone());

    client.connect().await.unwrap();
    client
        .wait_until(|s| s.connection.circuit_open)
        .await
        .unwrap();
    client.set_auto_reconnect(false).await.unwrap();
    assert!(matches!(
        client.connect().await.unwrap(),
        ConnectOutcome::RefusedCircuitOpen { .. }
    ));

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(transport.connect_count(), 5);

    assert_eq!(client.connect().await.unwrap(), ConnectOutcome::Started);
    let _server = listener.accept().await.unwrap();
    let state = client
        .wait_until(lifecycle_is(ConnectionLifecycleState::Open))
        .await
        .unwrap();
    assert_eq!(transport.connect_count(), 6);
    assert!(!state.connection.circuit_open);
    assert!(!state.connection.auto_reconnect);
    assert_eq!(state.connection.attempt_count, 0);
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_the_post_cooldown_retry() {
    let (transport, _listener) =
        MockTransport::with_fallback(ConnectPlan::Fail("unreachable".into()), None);
    let client = client(transport.clone());

    client.connect().await.unwrap();
    client
        .wait_until(|s| s.connection.circuit_open)
        .await
        .unwrap();
    client.disconnect().await.unwrap();

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(transport.connect_count(), 5);
    let state = client.snapshot();
    assert_eq!(state.connection.lifecycle, ConnectionLifecycleState::Closed);
    assert_eq!(state.connection.attempt_count, 0);
    assert_eq!(client.link_stats().await.unwrap().reconnects_scheduled, 4);
}

#[tokio::test(start_paused = true)]
async fn force_reconnect_resets_breaker_immediately() {
    let (transport, mut listener) = MockTransport::new();
    for _ in 0..5 {
        transport.push_plan(ConnectPlan::Fail("unreachable".into()));
    }
    let storage = MemoryStorage::shared();
    let client = client_with(transport.clone(), storage.clone());

    client.connect().await.unwrap();
    client
        .wait_until(|s| s.connection.circuit_open)
        .await
        .unwrap();

    assert_eq!(client.force_reconnect().await.unwrap(), ConnectOutcome::Started);
    let _server = listener.accept().await.unwrap();
    let state = client
        .wait_until(lifecycle_is(ConnectionLifecycleState::Open))
        .await
        .unwrap();

    assert!(!state.connection.circuit_open);
    assert!(state.connection.auto_reconnect);
    assert_eq!(state.connection.attempt_count, 0);
    assert_eq!(
        storage.get(KEY_AUTO_RECONNECT).unwrap().as_deref(),
        Some("true")
    );
    let reconnect = client.reconnect_state().await.unwrap();
    assert_eq!(reconnect.attempt_count, 0);
    assert_eq!(reconnect.backoff_delay_ms, 1_000);
}

#[tokio::test(start_paused = true)]
async fn clean_close_never_reconnects() {
    let (transport, mut listener) = MockTransport::new();
    let client = client(transport.clone());
    let server = open(&client, &mut listener).await;

    server.close(1000, "maintenance").unwrap();
    let state = client
        .wait_until(lifecycle_is(ConnectionLifecycleState::Closed))
        .await
        .unwrap();
    assert_eq!(state.connection.attempt_count, 0);
    assert_eq!(state.connection.last_error, None);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(transport.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn disconnect_sends_clean_close_and_cancels_retry() {
    let (transport, mut listener) = MockTransport::new();
    let client = client(transport.clone());
    let mut server = open(&client, &mut listener).await;

    client.disconnect().await.unwrap();
    let frame = server.recv_outbound().await.unwrap();
    assert_eq!(frame.close_code(), Some(1000));

    let state = client.snapshot();
    assert_eq!(state.connection.lifecycle, ConnectionLifecycleState::Closed);
    assert_eq!(state.connection.attempt_count, 0);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(transport.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn disconnect_during_backoff_cancels_pending_timer() {
    let (transport, mut listener) = MockTransport::new();
    let client = client(transport.clone());
    let mut server = open(&client, &mut listener).await;

    server.drop_socket();
    client
        .wait_until(|s| s.connection.attempt_count == 1)
        .await
        .unwrap();
    client.disconnect().await.unwrap();

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.connect_count(), 1);
    assert_eq!(client.snapshot().connection.attempt_count, 0);
}

#[tokio::test(start_paused = true)]
async fn connect_timeout_is_an_abnormal_close() {
    let (transport, _listener) = MockTransport::with_fallback(ConnectPlan::Hang, None);
    let client = RealtimeClient::builder(
        RealtimeConfig::default()
            .with_endpoint(ENDPOINT)
            .with_connect_timeout_ms(5_000),
    )
    .transport(transport.clone())
    .clock(Arc::new(TokioClock::new()))
    .spawn()
    .unwrap();

    client.connect().await.unwrap();
    let state = client
        .wait_until(|s| s.connection.attempt_count == 1)
        .await
        .unwrap();
    assert_eq!(state.connection.lifecycle, ConnectionLifecycleState::Closed);
    assert_eq!(
        state.connection.last_error.as_deref(),
        Some("connection timeout after 5000ms")
    );
    assert_eq!(state.connection.backoff_delay_ms, 2_000);
    assert_eq!(client.link_stats().await.unwrap().transport_errors, 1);
}

#[tokio::test(start_paused = true)]
async fn disabled_auto_reconnect_is_persisted_and_honoured() {
    let (transport, mut listener) = MockTransport::new();
    let storage = MemoryStorage::shared();
    let client = client_with(transport.clone(), storage.clone());
    let mut server = open(&client, &mut listener).await;

    client.set_auto_reconnect(false).await.unwrap();
    assert_eq!(
        storage.get(KEY_AUTO_RECONNECT).unwrap().as_deref(),
        Some("false")
    );

    server.drop_socket();
    let state = client
        .wait_until(lifecycle_is(ConnectionLifecycleState::Closed))
        .await
        .unwrap();
    assert_eq!(state.connection.attempt_count, 1);
    assert!(!state.connection.auto_reconnect);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.connect_count(), 1);

    // A later session starts from the stored preference.
    let (other, _l) = MockTransport::new();
    let restarted = client_with(other, storage.clone());
    restarted.reconnect_state().await.unwrap();
    assert!(!restarted.snapshot().connection.auto_reconnect);
    storage.set(KEY_AUTO_RECONNECT, "true").unwrap();
}

#[tokio::test(start_paused = true)]
async fn inbound_frames_reach_the_store_in_order() {
    let (transport, mut listener) = MockTransport::new();
    let client = client(transport);
    let server = open(&client, &mut listener).await;

    server
        .send_text(r#"{"message_type":"welcome","data":{"message":"hello"}}"#)
        .unwrap();
    server
        .send_text(r#"{"message_type":"initial_state","data":{"blocked_ips":["1.2.3.4"]}}"#)
        .unwrap();
    server.send_text("{not json").unwrap();
    server
        .send_text(r#"{"message_type":"threat_forecast","data":{"level":3}}"#)
        .unwrap();
    server
        .send_text(
            r#"{"message_type":"connections_update","data":{"active_connections":[],"blocked_ips":["1.2.3.4","5.6.7.8"]}}"#,
        )
        .unwrap();

    let state = client
        .wait_until(|s| s.blocked.len() == 2)
        .await
        .unwrap();
    assert_eq!(
        state.blocked.as_slice(),
        &["1.2.3.4".to_string(), "5.6.7.8".to_string()]
    );
    assert_eq!(state.connection.lifecycle, ConnectionLifecycleState::Open);

    let stats = client.link_stats().await.unwrap();
    assert_eq!(stats.frames_in, 5);
    assert_eq!(stats.malformed, 1);
    assert_eq!(stats.ignored, 2);
    assert_eq!(stats.applied, 2);
    assert_eq!(stats.protocol_errors, 1);
    assert_eq!(stats.transport_errors, 0);
}

#[tokio::test(start_paused = true)]
async fn server_reported_errors_are_counted_and_data_applied() {
    let (transport, mut listener) = MockTransport::new();
    let client = client(transport);
    let server = open(&client, &mut listener).await;

    server
        .send_text(
            r#"{"message_type":"alert_update","data":{"type":"ddos","timestamp":"2026-10-15T12:00:00Z","details":{"pps":9000}},"error":"feed lagging"}"#,
        )
        .unwrap();
    let state = client.wait_until(|s| !s.alerts.is_empty()).await.unwrap();
    assert_eq!(state.alerts[0].alert_type, "ddos");

    let stats = client.link_stats().await.unwrap();
    assert_eq!(stats.applied, 1);
    assert_eq!(stats.malformed, 0);
    assert_eq!(stats.protocol_errors, 1);
    assert_eq!(stats.errors, 1);
}

#[tokio::test(start_paused = true)]
async fn commands_require_an_open_link() {
    let (transport, mut listener) = MockTransport::new();
    let client = client(transport);
    let commands = client.commands();

    let err = commands.block_ip("203.0.113.9", None, None).await.unwrap_err();
    assert!(matches!(err, RealtimeError::NotOpen { ref command } if command == "block_ip"));

    let mut server = open(&client, &mut listener).await;
    commands
        .block_ip("203.0.113.9", Some("scanner".into()), Some(600))
        .await
        .unwrap();
    commands.request_metrics().await.unwrap();
    commands.block_port(23, "tcp", None).await.unwrap();

    let sent: Vec<WsFrame> = vec![
        server.recv_outbound().await.unwrap(),
        server.recv_outbound().await.unwrap(),
        server.recv_outbound().await.unwrap(),
    ];
    assert_eq!(
        outbound_text(&sent[0]),
        Some(r#"{"command":"block_ip","params":{"ip":"203.0.113.9","reason":"scanner","duration":600}}"#)
    );
    assert_eq!(outbound_text(&sent[1]), Some(r#"{"command":"get_metrics"}"#));
    assert_eq!(
        outbound_text(&sent[2]),
        Some(r#"{"command":"block_port","params":{"port":23,"protocol":"tcp"}}"#)
    );
    assert_eq!(client.link_stats().await.unwrap().frames_out, 3);
}

#[tokio::test(start_paused = true)]
async fn read_error_is_recorded_as_last_error() {
    let (transport, mut listener) = MockTransport::new();
    let client = client(transport);
    let server = open(&client, &mut listener).await;

    server.fail_read("connection reset by peer").unwrap();
    let state = client
        .wait_until(lifecycle_is(ConnectionLifecycleState::Closed))
        .await
        .unwrap();
    let error = state.connection.last_error.unwrap();
    assert!(error.contains("1006"), "{error}");
    assert!(error.contains("connection reset by peer"), "{error}");
}
