//! Server connection tracking, targeted sends and broadcasts against a
//! scripted engine.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use ws_reactor::{ConnectionHandle, Error, Server, ServerOptions, ServiceConfig, ServiceState};

use common::{FakeEngine, Recorder, fast_service, init_tracing, wait_until};

fn server_on(engine: &FakeEngine) -> Server {
    Server::with_engine(Arc::new(engine.clone())).with_service_config(fast_service())
}

/// Listening server with two peers, `1.1.1.1` and `2.2.2.2`.
fn two_peer_server(engine: &FakeEngine) -> (Server, ConnectionHandle, ConnectionHandle) {
    let mut server = server_on(engine);
    assert!(server.setup(9000, false));

    let a = engine.state.open_peer("1.1.1.1");
    let b = engine.state.open_peer("2.2.2.2");
    assert!(wait_until(|| server.connection_count() == 2));
    (server, a, b)
}

// ============================================================================
// Setup
// ============================================================================

#[test]
fn test_setup_reports_port_and_state() {
    init_tracing();
    let engine = FakeEngine::new();
    let mut server = server_on(&engine);

    assert!(server.setup(9000, false));
    assert_eq!(server.port(), 9000);
    assert!(!server.using_tls());
    assert_eq!(server.service_state(), ServiceState::Running);

    let config = engine.state.last_config.lock().clone().unwrap();
    assert_eq!(config.listen_port, Some(9000));
    assert!(config.tls.is_none());
}

#[test]
fn test_setup_failure_reports_false() {
    let engine = FakeEngine::new();
    engine.state.fail_context.store(true, Ordering::SeqCst);
    let mut server = server_on(&engine);

    assert!(!server.setup(9000, false));
    assert_eq!(server.service_state(), ServiceState::Stopped);
}

#[test]
fn test_setup_with_tls_passes_material() {
    let engine = FakeEngine::new();
    let mut server = server_on(&engine);

    assert!(server.setup_with(ServerOptions::new(8443).with_tls("cert.pem", "key.pem")));
    assert!(server.using_tls());

    let config = engine.state.last_config.lock().clone().unwrap();
    let tls = config.tls.unwrap();
    assert_eq!(tls.cert_path.to_str(), Some("cert.pem"));
    assert_eq!(tls.key_path.to_str(), Some("key.pem"));
}

// ============================================================================
// Connection Tracking
// ============================================================================

#[test]
fn test_open_and_close_events_track_connections() {
    let engine = FakeEngine::new();
    let recorder = Arc::new(Recorder::default());
    let mut server = server_on(&engine);
    server.add_listener(recorder.clone());
    assert!(server.setup(9000, false));

    let a = engine.state.open_peer("1.1.1.1");
    assert!(wait_until(|| recorder.count("connect:1.1.1.1") == 1));
    assert_eq!(server.connection_count(), 1);
    assert_eq!(server.connections()[0].peer_address(), "1.1.1.1");

    engine.state.close(a);
    assert!(wait_until(|| recorder.count("close:1.1.1.1") == 1));
    assert_eq!(server.connection_count(), 0);
}

#[test]
fn test_close_clears_connections() {
    let engine = FakeEngine::new();
    let (mut server, _, _) = two_peer_server(&engine);

    server.close();
    assert_eq!(server.connection_count(), 0);
    assert_eq!(server.service_state(), ServiceState::Stopped);
    assert_eq!(engine.state.contexts_destroyed.load(Ordering::SeqCst), 1);

    server.close();
    assert_eq!(engine.state.contexts_destroyed.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Sending
// ============================================================================

#[test]
fn test_send_to_reaches_only_matching_peer() {
    let engine = FakeEngine::new();
    let (server, a, b) = two_peer_server(&engine);

    server.send_to("x", "2.2.2.2").unwrap();

    assert_eq!(engine.state.write_count(), 1);
    assert_eq!(engine.state.texts_to(b), vec!["x"]);
    assert!(engine.state.texts_to(a).is_empty());
}

#[test]
fn test_send_to_unknown_peer_fails() {
    let engine = FakeEngine::new();
    let (server, _, _) = two_peer_server(&engine);

    let err = server.send_to("x", "9.9.9.9").unwrap_err();
    assert!(matches!(err, Error::TargetNotFound { .. }));
    assert_eq!(engine.state.write_count(), 0);
}

#[test]
fn test_send_fans_out_to_every_peer() {
    let engine = FakeEngine::new();
    let (server, a, b) = two_peer_server(&engine);

    server.send("all");
    server.send_binary(vec![7u8]);

    assert_eq!(engine.state.write_count(), 4);
    assert_eq!(engine.state.texts_to(a), vec!["all"]);
    assert_eq!(engine.state.texts_to(b), vec!["all"]);
}

#[test]
fn test_close_connection_removes_peer_before_next_send() {
    let engine = FakeEngine::new();
    let (server, a, b) = two_peer_server(&engine);

    assert_eq!(server.close_connection("1.1.1.1"), 1);
    assert_eq!(*engine.state.closes.lock(), vec![a]);
    assert_eq!(server.connection_count(), 1);

    server.send("after");
    assert_eq!(engine.state.write_count(), 1);
    assert_eq!(engine.state.texts_to(b), vec!["after"]);

    engine.state.close(a);
    engine.state.open_peer("3.3.3.3");
    assert!(wait_until(|| server.connection_count() == 2));

    assert_eq!(server.close_connection("1.1.1.1"), 0);
}

#[test]
fn test_protocol_broadcast_writes_and_notifies() {
    let engine = FakeEngine::new();
    let recorder = Arc::new(Recorder::default());
    let (server, a, b) = {
        let mut server = server_on(&engine);
        server.add_listener(recorder.clone());
        assert!(server.setup(9000, false));
        let a = engine.state.open_peer("1.1.1.1");
        let b = engine.state.open_peer("2.2.2.2");
        assert!(wait_until(|| server.connection_count() == 2));
        (server, a, b)
    };

    server.protocol().broadcast("tick");

    assert!(wait_until(|| recorder.count("broadcast:tick") == 2));
    assert_eq!(engine.state.texts_to(a), vec!["tick"]);
    assert_eq!(engine.state.texts_to(b), vec!["tick"]);
}

#[test]
fn test_periodic_hook_runs_on_service_thread() {
    let engine = FakeEngine::new();
    let mut server = server_on(&engine);

    let ticks = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ticks);
    server.protocol().set_periodic(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert!(server.setup(9000, false));
    assert!(wait_until(|| ticks.load(Ordering::SeqCst) >= 3));
}

#[test]
fn test_idle_report_reaches_listeners() {
    let engine = FakeEngine::new();
    let recorder = Arc::new(Recorder::default());
    let mut server = server_on(&engine);
    server.add_listener(recorder.clone());
    assert!(server.setup(9000, false));

    let a = engine.state.open_peer("1.1.1.1");
    engine.state.idle(a);

    assert!(wait_until(|| recorder.count("idle:1.1.1.1") == 1));
    assert_eq!(server.connection_count(), 1);
}

// ============================================================================
// Service Loop Faults
// ============================================================================

#[test]
fn test_failed_service_rounds_do_not_stop_loop() {
    let engine = FakeEngine::new();
    engine.state.fail_service.store(3, Ordering::SeqCst);
    let recorder = Arc::new(Recorder::default());
    let mut server = server_on(&engine);
    server.add_listener(recorder.clone());
    assert!(server.setup(9000, false));

    engine.state.open_peer("1.1.1.1");

    assert!(wait_until(|| recorder.count("connect:1.1.1.1") == 1));
    assert_eq!(engine.state.service_failures.load(Ordering::SeqCst), 3);
    assert_eq!(server.service_state(), ServiceState::Running);
    assert_eq!(server.connection_count(), 1);
}

#[test]
fn test_close_gives_up_on_stuck_service_round() {
    let engine = FakeEngine::new();
    let mut server = Server::with_engine(Arc::new(engine.clone())).with_service_config(
        ServiceConfig {
            shutdown_timeout: Duration::from_millis(50),
            ..fast_service()
        },
    );
    assert!(server.setup(9000, false));

    *engine.state.stall.lock() = Some(Duration::from_millis(500));
    assert!(wait_until(|| engine.state.stalled_rounds.load(Ordering::SeqCst) >= 1));

    let started = Instant::now();
    server.close();
    assert!(started.elapsed() < Duration::from_millis(400));
    assert_eq!(server.service_state(), ServiceState::Stopped);
    assert_eq!(engine.state.contexts_destroyed.load(Ordering::SeqCst), 0);
}
