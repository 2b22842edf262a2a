//! WebSocket reactor - event-driven WebSocket client and server.
//!
//! A background service loop drives a WebSocket engine, turns its callbacks
//! into typed events and dispatches them to registered listeners. The host
//! application only registers listeners and calls `send`.
//!
//! # Architecture
//!
//! - **Engine**: owns the wire protocol ([`Engine`], [`EngineContext`]);
//!   the bundled [`TungsteniteEngine`] runs on tokio-tungstenite
//! - **Service loop**: one background thread per context, servicing it in
//!   bounded rounds
//! - **Exclusivity token**: every engine call from any thread happens under
//!   one mutex per context
//! - **Protocols**: named [`ProtocolHandler`]s fanning events out to
//!   [`Listener`]s
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use ws_reactor::{Client, Event, Listener};
//!
//! struct Printer;
//!
//! impl Listener for Printer {
//!     fn on_connect(&self, event: &Event) {
//!         let _ = event.connection.send("hello");
//!     }
//!
//!     fn on_message(&self, event: &Event) {
//!         println!("{:?}", event.message());
//!     }
//! }
//!
//! let mut client = Client::new();
//! client.add_listener(Arc::new(Printer));
//! client.connect_to("localhost", 9000, false);
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`Client`] and [`ReconnectPolicy`] |
//! | [`server`] | [`Server`] and its connection table |
//! | [`protocol`] | Events, listeners, handlers and the registry |
//! | [`transport`] | [`Connection`], service loop and reactor |
//! | [`engine`] | Engine contracts and [`TungsteniteEngine`] |
//! | [`options`] | [`ClientOptions`], [`ServerOptions`], [`KeepAlive`] |
//! | [`clock`] | Millisecond clocks for reconnect timing |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | [`ConnectionHandle`] |

// ============================================================================
// Modules
// ============================================================================

/// Outbound client with reconnection.
pub mod client;

/// Millisecond clocks.
pub mod clock;

/// Engine capability contracts and the bundled engine.
pub mod engine;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Client and server options.
pub mod options;

/// Events, listeners and protocol handlers.
pub mod protocol;

/// Listening server.
pub mod server;

/// Connection, service loop and reactor plumbing.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Endpoints
pub use client::{Client, ReconnectPolicy};
pub use server::Server;

// Options
pub use options::{ClientOptions, KeepAlive, ServerOptions};

// Protocol types
pub use protocol::{
    Event, EventKind, Listener, ListenerId, Payload, ProtocolHandler, ProtocolRegistry,
};

// Transport types
pub use transport::{Connection, ServiceConfig, ServiceState};

// Engine types
pub use engine::{Engine, EngineContext, EngineEvent, TungsteniteEngine};

// Clocks
pub use clock::{Clock, ManualClock, SystemClock};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::ConnectionHandle;
