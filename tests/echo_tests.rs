//! End-to-end traffic over the bundled engine on localhost.

mod common;

use std::net::TcpListener;
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tokio_tungstenite::tungstenite;
use ws_reactor::{Client, ClientOptions, Event, KeepAlive, Listener, Server, ServerOptions};

use common::{Echo, Recorder, fast_service, init_tracing, wait_until};

/// Sends a greeting as soon as the connection opens.
struct Greeter {
    greeting: &'static str,
}

impl Listener for Greeter {
    fn on_connect(&self, event: &Event) {
        let _ = event.connection.send(self.greeting);
    }
}

/// Collects text frames.
#[derive(Default)]
struct Inbox {
    messages: Mutex<Vec<String>>,
}

impl Listener for Inbox {
    fn on_message(&self, event: &Event) {
        if let Some(text) = event.message() {
            self.messages.lock().push(text.to_string());
        }
    }
}

/// Echo server that never answers with a sub-protocol.
fn plain_echo_server() -> anyhow::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();

    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            thread::spawn(move || {
                let Ok(mut socket) = tungstenite::accept(stream) else {
                    return;
                };
                while let Ok(message) = socket.read() {
                    if (message.is_text() || message.is_binary()) && socket.send(message).is_err() {
                        break;
                    }
                }
            });
        }
    });
    Ok(port)
}

fn listening_server() -> Server {
    let mut server = Server::new().with_service_config(fast_service());
    server.add_listener(Arc::new(Echo));
    assert!(server.setup_with(ServerOptions::new(0)));
    assert_ne!(server.port(), 0);
    server
}

#[test]
fn test_client_receives_echo() -> anyhow::Result<()> {
    init_tracing();
    let server = listening_server();

    let inbox = Arc::new(Inbox::default());
    let mut client = Client::new().with_service_config(fast_service());
    client.add_listener(Arc::new(Greeter { greeting: "ping" }));
    client.add_listener(inbox.clone());
    client.try_connect(
        ClientOptions::new("127.0.0.1")
            .with_port(server.port())
            .with_reconnect(false),
    )?;

    assert!(wait_until(|| client.is_connected()));
    assert!(wait_until(|| inbox.messages.lock().as_slice() == ["ping"]));
    assert_eq!(server.connection_count(), 1);

    client.close();
    assert!(wait_until(|| server.connection_count() == 0));
    Ok(())
}

#[test]
fn test_server_targets_peer_by_address() -> anyhow::Result<()> {
    let server = listening_server();

    let inbox = Arc::new(Inbox::default());
    let mut client = Client::new().with_service_config(fast_service());
    client.add_listener(inbox.clone());
    client.try_connect(
        ClientOptions::new("127.0.0.1")
            .with_port(server.port())
            .with_reconnect(false),
    )?;
    assert!(wait_until(|| server.connection_count() == 1));

    server.send_to("direct", "127.0.0.1")?;
    assert!(wait_until(|| inbox.messages.lock().as_slice() == ["direct"]));

    assert_eq!(server.close_connection("127.0.0.1"), 1);
    assert!(wait_until(|| !client.is_connected()));
    Ok(())
}

#[test]
fn test_unreachable_server_reports_close() {
    let recorder = Arc::new(Recorder::default());
    let mut client = Client::new().with_service_config(fast_service());
    client.add_listener(recorder.clone());

    // Port 1 is reserved and refuses connections on loopback.
    assert!(client.connect_with(
        ClientOptions::new("127.0.0.1")
            .with_port(1)
            .with_reconnect(false)
    ));
    assert!(!client.is_connected());
    assert!(wait_until(|| recorder.count("close:127.0.0.1") == 1));
    assert!(!client.is_connected());
}

#[test]
fn test_default_client_talks_to_server_without_subprotocol() -> anyhow::Result<()> {
    let port = plain_echo_server()?;

    let inbox = Arc::new(Inbox::default());
    let mut client = Client::new().with_service_config(fast_service());
    client.add_listener(Arc::new(Greeter { greeting: "hello" }));
    client.add_listener(inbox.clone());
    client.try_connect(
        ClientOptions::new("127.0.0.1")
            .with_port(port)
            .with_reconnect(false),
    )?;

    assert!(wait_until(|| client.is_connected()));
    assert!(wait_until(|| inbox.messages.lock().as_slice() == ["hello"]));
    assert_eq!(client.connection().map(|c| c.protocol_name().to_string()), Some("default".into()));
    Ok(())
}

#[test]
fn test_silent_connection_reports_idle() -> anyhow::Result<()> {
    let recorder = Arc::new(Recorder::default());
    let mut server = Server::new().with_service_config(fast_service());
    server.add_listener(recorder.clone());
    assert!(server.setup_with(ServerOptions::new(0).with_keep_alive(KeepAlive::new(1, 0, 1))));

    let mut client = Client::new().with_service_config(fast_service());
    client.try_connect(
        ClientOptions::new("127.0.0.1")
            .with_port(server.port())
            .with_reconnect(false),
    )?;

    assert!(wait_until(|| recorder.count("idle:127.0.0.1") >= 1));
    assert!(client.is_connected());
    assert_eq!(server.connection_count(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_setup_from_inside_tokio_runtime() -> anyhow::Result<()> {
    let server = listening_server();

    let inbox = Arc::new(Inbox::default());
    let mut client = Client::new().with_service_config(fast_service());
    client.add_listener(Arc::new(Greeter { greeting: "async" }));
    client.add_listener(inbox.clone());
    client.try_connect(
        ClientOptions::new("127.0.0.1")
            .with_port(server.port())
            .with_reconnect(false),
    )?;

    assert!(wait_until(|| inbox.messages.lock().as_slice() == ["async"]));
    assert_eq!(server.connection_count(), 1);
    Ok(())
}
