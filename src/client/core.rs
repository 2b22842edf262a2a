//! WebSocket client with automatic reconnection.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ws_reactor::{Client, Event, Listener};
//!
//! struct Printer;
//!
//! impl Listener for Printer {
//!     fn on_message(&self, event: &Event) {
//!         println!("got: {:?}", event.message());
//!     }
//! }
//!
//! let mut client = Client::new();
//! client.add_listener(Arc::new(Printer));
//!
//! if client.connect("echo.example.org", false) {
//!     let _ = client.send("hello");
//! }
//!
//! // Host update loop
//! loop {
//!     client.tick();
//!     std::thread::sleep(std::time::Duration::from_millis(16));
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info};

use crate::clock::{Clock, SystemClock};
use crate::engine::{ConnectInfo, ContextConfig, Engine, SharedContext, TungsteniteEngine};
use crate::error::{Error, Result};
use crate::identifiers::ConnectionHandle;
use crate::options::{ClientOptions, DEFAULT_PORT, DEFAULT_TLS_PORT};
use crate::protocol::{Listener, ListenerId, ProtocolHandler, ProtocolRegistry};
use crate::transport::{Connection, ConnectionSet, Reactor, ServiceConfig, ServiceState};

use super::reconnect::ReconnectPolicy;

// ============================================================================
// ClientSlot
// ============================================================================

/// The client's single connection, as seen by the service loop.
struct ClientSlot {
    connection: RwLock<Option<Arc<Connection>>>,
    reconnect: Arc<Mutex<ReconnectPolicy>>,
    clock: Arc<dyn Clock>,
}

impl ClientSlot {
    fn current(&self) -> Option<Arc<Connection>> {
        self.connection.read().clone()
    }

    fn set(&self, connection: Option<Arc<Connection>>) {
        *self.connection.write() = connection;
    }

    fn matching(&self, handle: ConnectionHandle) -> Option<Arc<Connection>> {
        self.current()
            .filter(|connection| connection.handle() == handle)
    }
}

impl ConnectionSet for ClientSlot {
    fn opened(
        &self,
        handle: ConnectionHandle,
        peer: &str,
        _protocol_name: &str,
        _protocol: &Arc<ProtocolHandler>,
        _context: &SharedContext,
    ) -> Option<Arc<Connection>> {
        let connection = self.matching(handle)?;
        connection.mark_open(peer);
        Some(connection)
    }

    fn get(&self, handle: ConnectionHandle) -> Option<Arc<Connection>> {
        self.matching(handle)
    }

    fn closed(&self, handle: ConnectionHandle) -> Option<Arc<Connection>> {
        let connection = self.matching(handle)?;
        // Stamp first so `is_connected() == false` implies the stamp is set.
        self.reconnect.lock().record_disconnect(self.clock.now_ms());
        connection.mark_closed();
        Some(connection)
    }

    fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.current().into_iter().collect()
    }
}

// ============================================================================
// Client
// ============================================================================

/// Outbound WebSocket connection serviced on a background thread.
///
/// Listeners registered with [`add_listener`](Self::add_listener) survive
/// reconnects. Reconnection is driven by [`tick`](Self::tick), which the
/// host calls from its own update loop.
pub struct Client {
    engine: Arc<dyn Engine>,
    clock: Arc<dyn Clock>,
    protocol: Arc<ProtocolHandler>,
    protocols: ProtocolRegistry,
    options: ClientOptions,
    service_config: ServiceConfig,
    reconnect: Arc<Mutex<ReconnectPolicy>>,
    slot: Arc<ClientSlot>,
    reactor: Option<Reactor>,
}

// ============================================================================
// Client - Constructors
// ============================================================================

impl Client {
    /// Creates a client using the bundled [`TungsteniteEngine`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_engine(Arc::new(TungsteniteEngine::new()))
    }

    /// Creates a client on a custom engine.
    #[must_use]
    pub fn with_engine(engine: Arc<dyn Engine>) -> Self {
        Self::with_engine_and_clock(engine, Arc::new(SystemClock::new()))
    }

    /// Creates a client on a custom engine and reconnect clock.
    #[must_use]
    pub fn with_engine_and_clock(engine: Arc<dyn Engine>, clock: Arc<dyn Clock>) -> Self {
        let options = ClientOptions::default();
        let reconnect = Arc::new(Mutex::new(ReconnectPolicy::new(
            options.reconnect_interval_ms,
        )));
        let slot = Arc::new(ClientSlot {
            connection: RwLock::new(None),
            reconnect: Arc::clone(&reconnect),
            clock: Arc::clone(&clock),
        });

        Self {
            engine,
            clock,
            protocol: Arc::new(ProtocolHandler::new()),
            protocols: ProtocolRegistry::new(),
            options,
            service_config: ServiceConfig::default(),
            reconnect,
            slot,
            reactor: None,
        }
    }

    /// Overrides service loop timing. Applies from the next connect.
    #[must_use]
    pub fn with_service_config(mut self, config: ServiceConfig) -> Self {
        self.service_config = config;
        self
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Client - Listeners & Protocols
// ============================================================================

impl Client {
    /// Primary protocol handler.
    #[inline]
    #[must_use]
    pub fn protocol(&self) -> &Arc<ProtocolHandler> {
        &self.protocol
    }

    /// Name the primary protocol is registered under on the next connect.
    #[inline]
    #[must_use]
    pub fn protocol_name(&self) -> &str {
        &self.options.protocol
    }

    /// Registers a listener on the primary protocol.
    pub fn add_listener(&self, listener: Arc<dyn Listener>) -> ListenerId {
        self.protocol.add_listener(listener)
    }

    /// Unregisters a listener from the primary protocol.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.protocol.remove_listener(id)
    }

    /// Adds an extra protocol to the table built on the next connect.
    pub fn add_protocol(&mut self, name: impl Into<String>, handler: Arc<ProtocolHandler>) {
        self.protocols.register(name, handler);
    }
}

// ============================================================================
// Client - Connection Lifecycle
// ============================================================================

impl Client {
    /// Connects to `address` on the default port for the scheme.
    ///
    /// Returns `false` and logs an error on setup failure.
    pub fn connect(&mut self, address: impl Into<String>, use_tls: bool) -> bool {
        let port = if use_tls { DEFAULT_TLS_PORT } else { DEFAULT_PORT };
        self.connect_to(address, port, use_tls)
    }

    /// Connects to `address:port`.
    ///
    /// Returns `false` and logs an error on setup failure.
    pub fn connect_to(&mut self, address: impl Into<String>, port: u16, use_tls: bool) -> bool {
        let mut options = self.options.clone();
        options.host = address.into();
        options.port = port;
        options.use_tls = use_tls;
        self.connect_with(options)
    }

    /// Connects with full options.
    ///
    /// Returns `false` and logs an error on setup failure.
    pub fn connect_with(&mut self, options: ClientOptions) -> bool {
        match self.try_connect(options) {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "Client connect failed");
                false
            }
        }
    }

    /// Connects with full options, returning the failure cause.
    ///
    /// Any existing session is torn down first. On success the service
    /// loop is running and a connection exists; on failure neither does.
    ///
    /// # Errors
    ///
    /// - [`Error::ContextCreation`] if the engine context cannot be created
    /// - [`Error::ConnectFailed`] if the outbound attempt cannot be started
    pub fn try_connect(&mut self, options: ClientOptions) -> Result<()> {
        self.teardown();

        self.reconnect.lock().arm(
            options.reconnect,
            options.reconnect_interval_ms,
            self.clock.now_ms(),
        );
        self.options = options;

        let mut registry = ProtocolRegistry::new();
        registry.register(self.options.protocol.clone(), Arc::clone(&self.protocol));
        for (name, handler) in self.protocols.iter() {
            registry.register(name, Arc::clone(handler));
        }

        let context_config = ContextConfig::client(registry.build_table(), self.options.keep_alive);
        let mut reactor = Reactor::create(
            self.engine.as_ref(),
            registry,
            &context_config,
            self.service_config,
        )?;
        debug!("Client engine context created");

        let info = ConnectInfo::from(&self.options);
        let handle = reactor.connect_client(&info).map_err(|e| match e {
            Error::ConnectFailed { .. } => e,
            other => Error::connect_failed(info.address(), other.to_string()),
        })?;

        let protocol_name = reactor
            .registry()
            .get_index(0)
            .map_or_else(|| self.options.protocol.clone(), |(name, _)| name.to_string());

        let connection = Arc::new(Connection::new(
            handle,
            self.options.host.clone(),
            protocol_name,
            Arc::clone(&self.protocol),
            Arc::clone(reactor.context()),
        ));
        self.slot.set(Some(connection));

        if let Err(e) = reactor.start(Arc::clone(&self.slot) as Arc<dyn ConnectionSet>) {
            self.slot.set(None);
            return Err(e);
        }

        info!(
            address = %info.host,
            port = info.port,
            path = %info.path,
            tls = info.use_tls,
            "Initiating connection"
        );
        self.reactor = Some(reactor);
        Ok(())
    }

    /// Closes the connection and disables reconnection.
    ///
    /// Idempotent.
    pub fn close(&mut self) {
        self.reconnect.lock().disable();

        if self.reactor.is_some() {
            info!("Client closing");
        }
        self.teardown();
    }

    /// Drives reconnection. Call periodically from the host's update loop.
    ///
    /// Returns `true` if a reconnect attempt was made.
    pub fn tick(&mut self) -> bool {
        let connected = self.is_connected();
        let due = self
            .reconnect
            .lock()
            .poll(connected, self.clock.now_ms());

        if !due {
            return false;
        }

        info!(address = %self.options.address(), "Reconnecting");
        let options = self.options.clone();
        self.connect_with(options);
        true
    }

    /// Stops the loop and destroys the context without touching the
    /// reconnect policy.
    fn teardown(&mut self) {
        if let Some(mut reactor) = self.reactor.take() {
            reactor.shutdown();
        }
        self.slot.set(None);
    }
}

// ============================================================================
// Client - Sending
// ============================================================================

impl Client {
    /// Sends a text frame. Nothing is written without a connection.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if no connection is open
    /// - the connection's write error otherwise; already logged
    pub fn send(&self, text: impl Into<String>) -> Result<()> {
        match self.slot.current() {
            Some(connection) => connection.send(text),
            None => {
                debug!("Send without connection ignored");
                Err(Error::NotConnected)
            }
        }
    }

    /// Sends a binary frame. Nothing is written without a connection.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub fn send_binary(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        match self.slot.current() {
            Some(connection) => connection.send_binary(data),
            None => {
                debug!("Send without connection ignored");
                Err(Error::NotConnected)
            }
        }
    }
}

// ============================================================================
// Client - Accessors
// ============================================================================

impl Client {
    /// Returns `true` once the engine has reported the connection open and
    /// it has not closed since.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.reactor.is_some() && self.slot.current().is_some_and(|c| c.is_open())
    }

    /// Active connection, open or pending.
    #[must_use]
    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.slot.current()
    }

    /// Effective options from the last connect.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Service loop state.
    #[must_use]
    pub fn service_state(&self) -> ServiceState {
        self.reactor
            .as_ref()
            .map_or(ServiceState::Stopped, Reactor::state)
    }

    /// Current reconnect policy state.
    #[must_use]
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        *self.reconnect.lock()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        debug!("Client dropped");
        self.close();
    }
}

// ============================================================================
// Tests
// ============================================================================
