//! Engine built on tokio-tungstenite.
//!
//! Each context owns a current-thread tokio runtime. Socket tasks are only
//! polled while [`EngineContext::service`] is blocked on that runtime, so all
//! network progress happens inside `service`, on whichever thread holds the
//! exclusivity token. Writes are queued on per-connection channels and
//! flushed during the next service round.
//!
//! # Per-connection task
//!
//! ```text
//! ┌──────────────┐   PeerCommand    ┌──────────────┐   Message    ┌────────┐
//! │ write/close  │ ───────────────► │  run_peer    │ ◄──────────► │  peer  │
//! └──────────────┘                  │  (select!)   │              └────────┘
//!                                   └──────┬───────┘
//!                                          │ EngineEvent
//!                                          ▼
//!                                   service() drains
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::result::Result as StdResult;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::error::{Error as WsError, ProtocolError, SubProtocolError};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::ConnectionHandle;
use crate::options::KeepAlive;
use crate::protocol::Payload;

use super::{ConnectInfo, ContextConfig, Engine, EngineContext, EngineEvent};

// ============================================================================
// Constants
// ============================================================================

/// Handshake header carrying the negotiated sub-protocol.
const SUBPROTOCOL_HEADER: &str = "Sec-WebSocket-Protocol";

/// Back-off after a failed `accept`.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Stand-in deadline when keep-alive is off.
const NO_DEADLINE: Duration = Duration::from_secs(86_400);

/// WebSocket versions the handshake speaks; `-1` selects the latest.
const SUPPORTED_VERSIONS: [i32; 2] = [-1, 13];

// ============================================================================
// Types
// ============================================================================

/// Commands from the context to a connection task.
enum PeerCommand {
    /// Write one frame.
    Send(Message),
    /// Close gracefully.
    Close,
}

/// Context-side record of a live connection.
struct Peer {
    command_tx: mpsc::UnboundedSender<PeerCommand>,
    protocol: usize,
}

type PeerMap = Arc<Mutex<FxHashMap<ConnectionHandle, Peer>>>;

/// State shared by every task spawned from one context.
#[derive(Clone)]
struct TaskShared {
    protocols: Arc<Vec<Option<String>>>,
    peers: PeerMap,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    keep_alive: Option<KeepAlive>,
}

// ============================================================================
// TungsteniteEngine
// ============================================================================

/// WebSocket engine backed by tokio-tungstenite.
///
/// TLS is not provided; contexts asking for it are refused with
/// [`Error::Unsupported`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteEngine;

impl TungsteniteEngine {
    /// Creates the engine.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Engine for TungsteniteEngine {
    fn create_context(&self, config: &ContextConfig) -> Result<Box<dyn EngineContext>> {
        if config.tls.is_some() {
            return Err(Error::unsupported("TLS listening contexts"));
        }

        let protocols = Arc::new(config.protocol_names()?);

        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::context_creation(format!("runtime: {e}")))?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shared = TaskShared {
            protocols,
            peers: PeerMap::default(),
            events_tx,
            keep_alive: config.keep_alive,
        };

        let mut tasks = Vec::new();
        let mut local_port = None;

        if let Some(port) = config.listen_port {
            let (listener, bound) = match bind_listener(&runtime, port) {
                Ok(bound) => bound,
                Err(e) => {
                    runtime.shutdown_background();
                    return Err(e);
                }
            };
            local_port = Some(bound);

            tasks.push(runtime.spawn(accept_loop(listener, shared.clone())));
            info!(port = bound, "Engine listening");
        }

        Ok(Box::new(TungsteniteContext {
            runtime: Some(runtime),
            events_rx,
            shared,
            tasks,
            local_port,
        }))
    }
}

/// Binds `0.0.0.0:port` and registers the socket with `runtime`.
///
/// The bind itself is blocking std I/O, so this works on a thread that is
/// already driving some other tokio runtime.
fn bind_listener(runtime: &Runtime, port: u16) -> Result<(TcpListener, u16)> {
    let bind_error = |e: std::io::Error| Error::context_creation(format!("bind port {port}: {e}"));

    let std_listener = std::net::TcpListener::bind(("0.0.0.0", port)).map_err(bind_error)?;
    std_listener.set_nonblocking(true).map_err(bind_error)?;
    let bound = std_listener.local_addr().map_err(bind_error)?.port();

    let _guard = runtime.enter();
    let listener = TcpListener::from_std(std_listener).map_err(bind_error)?;
    Ok((listener, bound))
}

/// Builds the upgrade request, optionally asking for one sub-protocol.
fn client_request(url: &str, protocol: Option<&str>) -> Result<Request> {
    let mut request = url.into_client_request()?;
    if let Some(name) = protocol {
        let value = HeaderValue::from_str(name)
            .map_err(|e| Error::config(format!("sub-protocol {name:?}: {e}")))?;
        request.headers_mut().insert(SUBPROTOCOL_HEADER, value);
    }
    Ok(request)
}

/// Whether the server completed the handshake without choosing any of the
/// requested sub-protocols.
fn is_missing_subprotocol(error: &WsError) -> bool {
    matches!(
        error,
        WsError::Protocol(ProtocolError::SecWebSocketSubProtocolError(
            SubProtocolError::NoSubProtocol
        ))
    )
}

// ============================================================================
// TungsteniteContext
// ============================================================================

/// One engine context: runtime, listener and connection tasks.
struct TungsteniteContext {
    runtime: Option<Runtime>,
    events_rx: mpsc::UnboundedReceiver<EngineEvent>,
    shared: TaskShared,
    tasks: Vec<JoinHandle<()>>,
    local_port: Option<u16>,
}

impl TungsteniteContext {
    fn runtime(&self) -> Result<&Runtime> {
        self.runtime.as_ref().ok_or(Error::ConnectionClosed)
    }

    fn send_command(&self, handle: ConnectionHandle, command: PeerCommand) -> Result<()> {
        let peers = self.shared.peers.lock();
        let peer = peers
            .get(&handle)
            .ok_or_else(|| Error::unknown_connection(handle))?;
        peer.command_tx
            .send(command)
            .map_err(|_| Error::ConnectionClosed)
    }
}

impl EngineContext for TungsteniteContext {
    fn connect_client(&mut self, info: &ConnectInfo) -> Result<ConnectionHandle> {
        if info.use_tls {
            return Err(Error::unsupported("TLS client connections"));
        }

        if !SUPPORTED_VERSIONS.contains(&info.version) {
            return Err(Error::unsupported(format!(
                "WebSocket version {}",
                info.version
            )));
        }

        let url = info.url();
        let request = client_request(&url, info.protocol.as_deref())
            .map_err(|e| Error::connect_failed(info.address(), e.to_string()))?;
        let protocol = info
            .protocol
            .as_deref()
            .and_then(|name| self.shared.position(name))
            .unwrap_or(0);

        let handle = ConnectionHandle::next();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        self.shared
            .peers
            .lock()
            .insert(handle, Peer { command_tx, protocol });

        let task = self.runtime()?.spawn(connect_peer(
            request,
            url.clone(),
            info.host.clone(),
            handle,
            command_rx,
            self.shared.clone(),
        ));
        self.tasks.push(task);

        debug!(%handle, %url, "Client connection started");
        Ok(handle)
    }

    fn service(&mut self, wait: Duration, events: &mut Vec<EngineEvent>) -> Result<usize> {
        let runtime = self.runtime.as_ref().ok_or(Error::service(-1))?;
        let events_rx = &mut self.events_rx;
        let before = events.len();

        runtime.block_on(async {
            if let Ok(Some(event)) = timeout(wait, events_rx.recv()).await {
                events.push(event);
            }
            while let Ok(event) = events_rx.try_recv() {
                events.push(event);
            }
        });

        Ok(events.len() - before)
    }

    fn write(&mut self, handle: ConnectionHandle, payload: &Payload) -> Result<()> {
        let message = match payload {
            Payload::Text(text) => Message::Text(text.clone().into()),
            Payload::Binary(data) => Message::Binary(data.clone().into()),
        };
        self.send_command(handle, PeerCommand::Send(message))
    }

    fn close(&mut self, handle: ConnectionHandle) {
        if let Err(e) = self.send_command(handle, PeerCommand::Close) {
            debug!(%handle, error = %e, "Close on inactive connection");
        }
    }

    fn broadcast(&mut self, protocol: usize, payload: &Payload) -> Result<usize> {
        let peers = self.shared.peers.lock();
        let mut count = 0;
        for (handle, peer) in peers.iter().filter(|(_, peer)| peer.protocol == protocol) {
            let _ = self.shared.events_tx.send(EngineEvent::Broadcast {
                handle: *handle,
                payload: payload.clone(),
            });
            count += 1;
        }
        Ok(count)
    }

    fn local_port(&self) -> Option<u16> {
        self.local_port
    }

    fn destroy(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.shared.peers.lock().clear();

        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
            debug!("Engine context destroyed");
        }
    }
}

impl Drop for TungsteniteContext {
    fn drop(&mut self) {
        self.destroy();
    }
}

// ============================================================================
// Tasks
// ============================================================================

impl TaskShared {
    /// Table index of a named protocol.
    fn position(&self, name: &str) -> Option<usize> {
        self.protocols
            .iter()
            .position(|entry| entry.as_deref() == Some(name))
    }

    /// Picks the first requested protocol present in the table.
    fn negotiate(&self, requested: Option<&HeaderValue>) -> Option<(usize, String)> {
        let requested = requested?.to_str().ok()?;
        requested
            .split(',')
            .map(str::trim)
            .find_map(|name| self.position(name).map(|index| (index, name.to_string())))
    }

    fn emit(&self, event: EngineEvent) {
        if self.events_tx.send(event).is_err() {
            trace!("Event dropped, context is gone");
        }
    }
}

/// Accepts inbound connections until the context is destroyed.
async fn accept_loop(listener: TcpListener, shared: TaskShared) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tokio::spawn(accept_peer(stream, addr, shared.clone()));
            }
            Err(e) => {
                error!(error = %e, "Accept failed");
                sleep(ACCEPT_RETRY_DELAY).await;
            }
        }
    }
}

/// Upgrades one inbound TCP stream and runs it.
async fn accept_peer(stream: TcpStream, addr: SocketAddr, shared: TaskShared) {
    trace!(?addr, "TCP connection accepted");

    let mut protocol = 0;
    let callback =
        |request: &Request, mut response: Response| -> StdResult<Response, ErrorResponse> {
            let requested = request.headers().get(SUBPROTOCOL_HEADER);
            if let Some((index, name)) = shared.negotiate(requested)
                && let Ok(value) = HeaderValue::from_str(&name)
            {
                response.headers_mut().insert(SUBPROTOCOL_HEADER, value);
                protocol = index;
            }
            Ok(response)
        };

    let ws_stream = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws_stream) => ws_stream,
        Err(e) => {
            warn!(?addr, error = %e, "WebSocket upgrade failed");
            return;
        }
    };

    let handle = ConnectionHandle::next();
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    shared
        .peers
        .lock()
        .insert(handle, Peer { command_tx, protocol });

    debug!(%handle, ?addr, protocol, "WebSocket connection established");
    shared.emit(EngineEvent::Open {
        handle,
        peer: addr.ip().to_string(),
        protocol,
    });

    run_peer(ws_stream, handle, command_rx, shared).await;
}

/// Completes an outbound handshake and runs the connection.
///
/// A server that answers without any sub-protocol is retried once with a
/// plain request, and the connection then runs on table row 0.
async fn connect_peer(
    request: Request,
    url: String,
    host: String,
    handle: ConnectionHandle,
    command_rx: mpsc::UnboundedReceiver<PeerCommand>,
    shared: TaskShared,
) {
    let connected = match tokio_tungstenite::connect_async(request).await {
        Err(e) if is_missing_subprotocol(&e) => {
            debug!(%handle, %host, "Server chose no sub-protocol, retrying without one");
            match client_request(&url, None) {
                Ok(plain) => tokio_tungstenite::connect_async(plain)
                    .await
                    .map_err(Error::from),
                Err(e) => Err(e),
            }
        }
        other => other.map_err(Error::from),
    };

    let (ws_stream, response) = match connected {
        Ok(connected) => connected,
        Err(e) => {
            warn!(%handle, %host, error = %e, "Client handshake failed");
            shared.peers.lock().remove(&handle);
            shared.emit(EngineEvent::Close { handle });
            return;
        }
    };

    let protocol = shared
        .negotiate(response.headers().get(SUBPROTOCOL_HEADER))
        .map_or(0, |(index, _)| index);
    if let Some(peer) = shared.peers.lock().get_mut(&handle) {
        peer.protocol = protocol;
    }

    let mut peer = host;
    if let MaybeTlsStream::Plain(tcp) = ws_stream.get_ref()
        && let Ok(addr) = tcp.peer_addr()
    {
        peer = addr.ip().to_string();
    }

    shared.emit(EngineEvent::Open {
        handle,
        peer,
        protocol,
    });

    run_peer(ws_stream, handle, command_rx, shared).await;
}

/// Pumps one connection until either side closes.
async fn run_peer<S>(
    ws_stream: WebSocketStream<S>,
    handle: ConnectionHandle,
    mut command_rx: mpsc::UnboundedReceiver<PeerCommand>,
    shared: TaskShared,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut ws_write, mut ws_read) = ws_stream.split();

    let keep_alive = shared.keep_alive;
    let idle_period = keep_alive.map(|ka| Duration::from_secs(u64::from(ka.idle_seconds)));
    let mut deadline = idle_period.map(|period| Instant::now() + period);
    let mut probes_sent = 0u32;

    loop {
        let wake_at = deadline.unwrap_or_else(|| Instant::now() + NO_DEADLINE);

        tokio::select! {
            message = ws_read.next() => {
                if let Some(period) = idle_period {
                    deadline = Some(Instant::now() + period);
                    probes_sent = 0;
                }

                match message {
                    Some(Ok(Message::Text(text))) => {
                        shared.emit(EngineEvent::Message {
                            handle,
                            payload: Payload::Text(text.as_str().to_owned()),
                        });
                    }

                    Some(Ok(Message::Binary(data))) => {
                        shared.emit(EngineEvent::Message {
                            handle,
                            payload: Payload::Binary(data.to_vec()),
                        });
                    }

                    Some(Ok(Message::Close(_))) => {
                        debug!(%handle, "WebSocket closed by remote");
                        break;
                    }

                    Some(Err(e)) => {
                        warn!(%handle, error = %e, "WebSocket error");
                        break;
                    }

                    None => {
                        debug!(%handle, "WebSocket stream ended");
                        break;
                    }

                    // Ping, Pong and raw frames only refresh the idle timer
                    Some(Ok(_)) => {}
                }
            }

            command = command_rx.recv() => {
                match command {
                    Some(PeerCommand::Send(message)) => {
                        if let Err(e) = ws_write.send(message).await {
                            warn!(%handle, error = %e, "Write failed");
                            break;
                        }
                    }

                    Some(PeerCommand::Close) | None => {
                        let _ = ws_write.close().await;
                        debug!(%handle, "WebSocket closed locally");
                        break;
                    }
                }
            }

            _ = sleep_until(wake_at), if deadline.is_some() => {
                let Some(ka) = keep_alive else { break };

                if probes_sent == 0 {
                    shared.emit(EngineEvent::Idle { handle });
                }

                if ka.probe_count == 0 {
                    deadline = idle_period.map(|period| Instant::now() + period);
                    continue;
                }

                if probes_sent >= ka.probe_count {
                    debug!(%handle, probes = probes_sent, "Keep-alive probes unanswered");
                    break;
                }

                probes_sent += 1;
                if ws_write.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
                let interval = Duration::from_secs(u64::from(ka.probe_interval_seconds.max(1)));
                deadline = Some(Instant::now() + interval);
            }
        }
    }

    shared.peers.lock().remove(&handle);
    shared.emit(EngineEvent::Close { handle });
}

// ============================================================================
// Tests
// ============================================================================
