//! Connection, service loop and reactor plumbing.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐  send()   ┌─────────────────────────────┐
//! │ application      │ ────────► │ Connection                  │
//! │ thread           │           │   └─ token ─┐               │
//! └──────────────────┘           └─────────────┼───────────────┘
//!                                              ▼
//!                                 ┌──────────────────────────┐
//!                                 │ SharedContext (Mutex)    │
//!                                 │   └─ EngineContext       │
//!                                 └──────────────────────────┘
//!                                              ▲
//! ┌──────────────────┐  service() ─────────────┘
//! │ ServiceLoop      │
//! │ worker thread    │ ──► ProtocolHandler::dispatch ──► Listener
//! └──────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | [`Connection`] and the [`ConnectionSet`] seam |
//! | `service` | [`ServiceLoop`] worker and [`ServiceState`] |
//! | `reactor` | [`Reactor`], context + loop composition |

// ============================================================================
// Submodules
// ============================================================================

/// One live socket-level session.
pub mod connection;

/// Engine context plus service loop.
pub mod reactor;

/// Background service loop.
pub mod service;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{Connection, ConnectionSet};
pub use reactor::Reactor;
pub use service::{ServiceConfig, ServiceLoop, ServiceState};
