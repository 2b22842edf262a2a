//! Listening WebSocket server.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ws_reactor::{Event, Listener, Server};
//!
//! struct Echo;
//!
//! impl Listener for Echo {
//!     fn on_message(&self, event: &Event) {
//!         if let Some(text) = event.message() {
//!             let _ = event.connection.send(text);
//!         }
//!     }
//! }
//!
//! let mut server = Server::new();
//! server.add_listener(Arc::new(Echo));
//! assert!(server.setup(9000, false));
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::engine::{ContextConfig, Engine, TlsPaths, TungsteniteEngine};
use crate::error::{Error, Result};
use crate::options::{DEFAULT_PORT, ServerOptions};
use crate::protocol::{Listener, ListenerId, Payload, ProtocolHandler, ProtocolRegistry};
use crate::transport::{Connection, ConnectionSet, Reactor, ServiceConfig, ServiceState};

use super::table::ConnectionTable;

// ============================================================================
// Server
// ============================================================================

/// Listening context with a dynamic set of connections.
///
/// Connections appear in [`connections`](Self::connections) when the engine
/// reports them open and disappear when it reports them closed or when
/// [`close_connection`](Self::close_connection) drops them.
pub struct Server {
    engine: Arc<dyn Engine>,
    protocol: Arc<ProtocolHandler>,
    protocols: ProtocolRegistry,
    options: ServerOptions,
    service_config: ServiceConfig,
    table: Arc<ConnectionTable>,
    reactor: Option<Reactor>,
}

// ============================================================================
// Server - Constructors
// ============================================================================

impl Server {
    /// Creates a server using the bundled [`TungsteniteEngine`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_engine(Arc::new(TungsteniteEngine::new()))
    }

    /// Creates a server on a custom engine.
    #[must_use]
    pub fn with_engine(engine: Arc<dyn Engine>) -> Self {
        Self {
            engine,
            protocol: Arc::new(ProtocolHandler::new()),
            protocols: ProtocolRegistry::new(),
            options: ServerOptions::default(),
            service_config: ServiceConfig::default(),
            table: Arc::new(ConnectionTable::new()),
            reactor: None,
        }
    }

    /// Overrides service loop timing. Applies from the next setup.
    #[must_use]
    pub fn with_service_config(mut self, config: ServiceConfig) -> Self {
        self.service_config = config;
        self
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Server - Listeners & Protocols
// ============================================================================

impl Server {
    /// Primary protocol handler.
    #[inline]
    #[must_use]
    pub fn protocol(&self) -> &Arc<ProtocolHandler> {
        &self.protocol
    }

    /// Name the primary protocol is registered under on the next setup.
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

    /// Adds an extra protocol to the table built on the next setup.
    pub fn add_protocol(&mut self, name: impl Into<String>, handler: Arc<ProtocolHandler>) {
        self.protocols.register(name, handler);
    }
}

// ============================================================================
// Server - Lifecycle
// ============================================================================

impl Server {
    /// Starts listening on `port`.
    ///
    /// Returns `false` and logs an error on setup failure.
    pub fn setup(&mut self, port: u16, use_tls: bool) -> bool {
        if use_tls && port == DEFAULT_PORT {
            warn!(port, "TLS requested on the plain-text default port");
        }

        let mut options = self.options.clone();
        options.port = port;
        options.use_tls = use_tls;
        self.setup_with(options)
    }

    /// Starts listening with full options.
    ///
    /// Returns `false` and logs an error on setup failure.
    pub fn setup_with(&mut self, options: ServerOptions) -> bool {
        match self.try_setup(options) {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "Server setup failed");
                false
            }
        }
    }

    /// Starts listening with full options, returning the failure cause.
    ///
    /// A running server is closed first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ContextCreation`] or [`Error::Unsupported`] if the
    /// engine cannot create the listening context.
    pub fn try_setup(&mut self, options: ServerOptions) -> Result<()> {
        self.close();
        self.options = options;

        let mut registry = ProtocolRegistry::new();
        registry.register(self.options.protocol.clone(), Arc::clone(&self.protocol));
        for (name, handler) in self.protocols.iter() {
            registry.register(name, Arc::clone(handler));
        }

        let tls = self.options.use_tls.then(|| TlsPaths {
            cert_path: self.options.tls_cert_path.clone(),
            key_path: self.options.tls_key_path.clone(),
        });
        let context_config = ContextConfig::server(
            registry.build_table(),
            self.options.port,
            tls,
            self.options.keep_alive,
        );

        let mut reactor = Reactor::create(
            self.engine.as_ref(),
            registry,
            &context_config,
            self.service_config,
        )?;
        reactor.start(Arc::clone(&self.table) as Arc<dyn ConnectionSet>)?;

        info!(
            port = reactor.local_port().unwrap_or(self.options.port),
            tls = self.options.use_tls,
            "Server listening"
        );
        self.reactor = Some(reactor);
        Ok(())
    }

    /// Stops the loop, destroys the context and forgets every connection.
    ///
    /// Idempotent.
    pub fn close(&mut self) {
        if let Some(mut reactor) = self.reactor.take() {
            info!("Server closing");
            reactor.shutdown();
        }

        for connection in self.table.snapshot() {
            connection.mark_closed();
        }
        self.table.clear();
    }

    /// Closes every connection from `peer` and stops tracking them.
    ///
    /// Returns how many connections were dropped. Close events the engine
    /// reports later for them are ignored.
    pub fn close_connection(&self, peer: &str) -> usize {
        let Some(reactor) = &self.reactor else {
            return 0;
        };

        let mut guard = reactor.context().lock();
        let removed = self.table.remove_peer(peer);

        for connection in &removed {
            if let Some(context) = guard.as_mut() {
                context.close(connection.handle());
            }
            connection.mark_closed();
        }
        drop(guard);

        if removed.is_empty() {
            debug!(peer, "No connection to close");
        } else {
            info!(peer, count = removed.len(), "Closed connections");
        }
        removed.len()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        debug!("Server dropped");
        self.close();
    }
}

// ============================================================================
// Server - Sending
// ============================================================================

impl Server {
    /// Sends a text frame to every connection.
    pub fn send(&self, text: impl Into<String>) {
        self.fan_out(&Payload::Text(text.into()));
    }

    /// Sends a binary frame to every connection.
    pub fn send_binary(&self, data: impl Into<Vec<u8>>) {
        self.fan_out(&Payload::Binary(data.into()));
    }

    /// Sends a text frame to the first connection from `peer`.
    ///
    /// # Errors
    ///
    /// - [`Error::TargetNotFound`] if no connection has that peer address
    /// - the connection's write error otherwise
    pub fn send_to(&self, text: impl Into<String>, peer: &str) -> Result<()> {
        self.deliver_to(&Payload::Text(text.into()), peer)
    }

    /// Sends a binary frame to the first connection from `peer`.
    ///
    /// # Errors
    ///
    /// See [`send_to`](Self::send_to).
    pub fn send_binary_to(&self, data: impl Into<Vec<u8>>, peer: &str) -> Result<()> {
        self.deliver_to(&Payload::Binary(data.into()), peer)
    }

    fn fan_out(&self, payload: &Payload) {
        for connection in self.table.snapshot() {
            let _ = connection.write(payload);
        }
    }

    fn deliver_to(&self, payload: &Payload, peer: &str) -> Result<()> {
        match self.table.find_peer(peer) {
            Some(connection) => connection.write(payload),
            None => {
                let err = Error::target_not_found(peer);
                error!(error = %err, "Send target missing");
                Err(err)
            }
        }
    }
}

// ============================================================================
// Server - Accessors
// ============================================================================

impl Server {
    /// Bound port while listening, otherwise the configured port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.reactor
            .as_ref()
            .and_then(Reactor::local_port)
            .unwrap_or(self.options.port)
    }

    /// Whether the last setup requested TLS.
    #[inline]
    #[must_use]
    pub fn using_tls(&self) -> bool {
        self.options.use_tls
    }

    /// Effective options from the last setup.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    /// Snapshot of live connections.
    #[must_use]
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.table.snapshot()
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.table.len()
    }

    /// Service loop state.
    #[must_use]
    pub fn service_state(&self) -> ServiceState {
        self.reactor
            .as_ref()
            .map_or(ServiceState::Stopped, Reactor::state)
    }
}

// ============================================================================
// Tests
// ============================================================================
