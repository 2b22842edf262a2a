//! Engine capability contracts.
//!
//! The engine owns the WebSocket wire protocol: handshakes, framing and
//! transport I/O. The reactor only drives it through the primitives below.
//!
//! # Contract
//!
//! - [`Engine::create_context`] builds a context from a protocol table.
//! - [`EngineContext::service`] runs one bounded round of network work and
//!   reports lifecycle callbacks as [`EngineEvent`]s.
//! - [`EngineContext::write`] queues a frame for one connection.
//!
//! `service` and `write` are not reentrant. The reactor keeps every context
//! behind a single mutex (the exclusivity token, [`SharedContext`]) and only
//! calls either primitive while holding it.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `tungstenite` | [`TungsteniteEngine`], the bundled tokio-tungstenite engine |

// ============================================================================
// Imports
// ============================================================================

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::identifiers::ConnectionHandle;
use crate::options::{ClientOptions, KeepAlive};
use crate::protocol::{Payload, ProtocolEntry};

// ============================================================================
// Submodules
// ============================================================================

/// Bundled engine built on tokio-tungstenite.
pub mod tungstenite;

pub use self::tungstenite::TungsteniteEngine;

// ============================================================================
// Types
// ============================================================================

/// Engine context guarded by the exclusivity token.
///
/// `None` once the context has been destroyed.
pub type SharedContext = Arc<Mutex<Option<Box<dyn EngineContext>>>>;

/// Certificate and key paths for a listening TLS context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    /// PEM certificate.
    pub cert_path: PathBuf,
    /// PEM private key.
    pub key_path: PathBuf,
}

/// Parameters for [`Engine::create_context`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextConfig {
    /// Protocol table, sentinel-terminated.
    pub protocols: Vec<ProtocolEntry>,
    /// Port to listen on. `None` for client-only contexts.
    pub listen_port: Option<u16>,
    /// TLS material for listening contexts.
    pub tls: Option<TlsPaths>,
    /// Keep-alive probing, only set when enabled.
    pub keep_alive: Option<KeepAlive>,
}

impl ContextConfig {
    /// Config for an outbound-only context.
    #[must_use]
    pub fn client(protocols: Vec<ProtocolEntry>, keep_alive: KeepAlive) -> Self {
        Self {
            protocols,
            listen_port: None,
            tls: None,
            keep_alive: keep_alive.is_enabled().then_some(keep_alive),
        }
    }

    /// Config for a listening context.
    #[must_use]
    pub fn server(
        protocols: Vec<ProtocolEntry>,
        port: u16,
        tls: Option<TlsPaths>,
        keep_alive: KeepAlive,
    ) -> Self {
        Self {
            protocols,
            listen_port: Some(port),
            tls,
            keep_alive: keep_alive.is_enabled().then_some(keep_alive),
        }
    }

    /// Named rows of the table, without the sentinel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ContextCreation`] if the table is not terminated by
    /// a sentinel or holds no protocol at all.
    pub fn protocol_names(&self) -> Result<Vec<Option<String>>> {
        match self.protocols.split_last() {
            Some((last, rows)) if last.is_sentinel() && !rows.is_empty() => {
                Ok(rows.iter().map(|row| row.name.clone()).collect())
            }
            Some((last, _)) if !last.is_sentinel() => Err(Error::context_creation(
                "protocol table is missing its sentinel entry",
            )),
            _ => Err(Error::context_creation("protocol table is empty")),
        }
    }
}

/// Parameters for [`EngineContext::connect_client`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectInfo {
    /// Remote host.
    pub host: String,
    /// Remote port.
    pub port: u16,
    /// Request path.
    pub path: String,
    /// Connect over TLS.
    pub use_tls: bool,
    /// Sub-protocol to request.
    pub protocol: Option<String>,
    /// WebSocket protocol version, `-1` for the engine's latest.
    pub version: i32,
}

impl ConnectInfo {
    /// Returns the `ws://` or `wss://` URL for this target.
    #[must_use]
    pub fn url(&self) -> String {
        let scheme = if self.use_tls { "wss" } else { "ws" };
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        format!("{scheme}://{}:{}{path}", self.host, self.port)
    }

    /// Returns `host:port/path`, used in logs and errors.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}{}", self.host, self.port, self.path)
    }
}

impl From<&ClientOptions> for ConnectInfo {
    fn from(options: &ClientOptions) -> Self {
        Self {
            host: options.host.clone(),
            port: options.port,
            path: options.path.clone(),
            use_tls: options.use_tls,
            protocol: options.requested_protocol().map(str::to_string),
            version: options.version,
        }
    }
}

/// Lifecycle callback reported by [`EngineContext::service`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Handshake completed.
    Open {
        /// Connection handle.
        handle: ConnectionHandle,
        /// Remote address.
        peer: String,
        /// Index into the protocol table.
        protocol: usize,
    },
    /// Frame received.
    Message {
        /// Connection handle.
        handle: ConnectionHandle,
        /// Frame body.
        payload: Payload,
    },
    /// Protocol broadcast reached this connection.
    Broadcast {
        /// Connection handle.
        handle: ConnectionHandle,
        /// Broadcast body.
        payload: Payload,
    },
    /// Connection closed or failed to open.
    Close {
        /// Connection handle.
        handle: ConnectionHandle,
    },
    /// Connection idle for the keep-alive period.
    Idle {
        /// Connection handle.
        handle: ConnectionHandle,
    },
}

impl EngineEvent {
    /// Handle the event refers to.
    #[inline]
    #[must_use]
    pub fn handle(&self) -> ConnectionHandle {
        match self {
            Self::Open { handle, .. }
            | Self::Message { handle, .. }
            | Self::Broadcast { handle, .. }
            | Self::Close { handle }
            | Self::Idle { handle } => *handle,
        }
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Factory for engine contexts.
pub trait Engine: Send + Sync {
    /// Creates a context for the given protocol table.
    ///
    /// # Errors
    ///
    /// Returns a setup error if the context cannot be created.
    fn create_context(&self, config: &ContextConfig) -> Result<Box<dyn EngineContext>>;
}

/// A live engine context.
///
/// All methods are called with the exclusivity token held.
pub trait EngineContext: Send {
    /// Starts an outbound connection and returns its handle.
    ///
    /// Completion is reported later through `Open` or `Close` events.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectFailed`] if the attempt cannot be started.
    fn connect_client(&mut self, info: &ConnectInfo) -> Result<ConnectionHandle>;

    /// Runs one round of network work, waiting at most `timeout`.
    ///
    /// Callbacks are appended to `events`; returns how many were appended.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Service`] if the round failed. The context stays
    /// usable.
    fn service(&mut self, timeout: Duration, events: &mut Vec<EngineEvent>) -> Result<usize>;

    /// Queues `payload` on one connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is unknown or already closed.
    fn write(&mut self, handle: ConnectionHandle, payload: &Payload) -> Result<()>;

    /// Requests a graceful close of one connection.
    fn close(&mut self, handle: ConnectionHandle);

    /// Queues a `Broadcast` event for every connection on `protocol`.
    ///
    /// Returns how many connections were targeted.
    ///
    /// # Errors
    ///
    /// The default implementation reports [`Error::Unsupported`].
    fn broadcast(&mut self, protocol: usize, payload: &Payload) -> Result<usize> {
        let _ = (protocol, payload);
        Err(Error::unsupported("broadcast"))
    }

    /// Port actually bound by a listening context.
    fn local_port(&self) -> Option<u16> {
        None
    }

    /// Releases all engine resources. Further calls are no-ops.
    fn destroy(&mut self);
}

// ============================================================================
// Tests
// ============================================================================
