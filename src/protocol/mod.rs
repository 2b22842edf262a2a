//! Protocol dispatch layer.
//!
//! Applications talk to the reactor through protocol handlers: each named
//! sub-protocol has one [`ProtocolHandler`] that fans events out to its
//! [`Listener`]s. A [`ProtocolRegistry`] is built on every `connect`/`setup`
//! and turned into the engine's protocol table.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `event` | [`Event`], [`EventKind`], [`Payload`], [`Listener`] |
//! | `handler` | [`ProtocolHandler`] |
//! | `registry` | [`ProtocolRegistry`], [`ProtocolEntry`] |

// ============================================================================
// Submodules
// ============================================================================

/// Event and listener types.
pub mod event;

/// Per-protocol listener fan-out.
pub mod handler;

/// Protocol name to handler mapping.
pub mod registry;

// ============================================================================
// Re-exports
// ============================================================================

pub use event::{Event, EventKind, Listener, Payload};
pub use handler::{DEFAULT_RX_BUFFER_SIZE, ListenerId, PeriodicTask, ProtocolHandler};
pub use registry::{ProtocolEntry, ProtocolRegistry};
