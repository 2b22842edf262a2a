//! Listening WebSocket server.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `core` | [`Server`] lifecycle, fan-out and targeted sends |
//! | `table` | [`ConnectionTable`] keyed by engine handle |

// ============================================================================
// Submodules
// ============================================================================

/// Server lifecycle.
pub mod core;

/// Connection bookkeeping.
pub mod table;

// ============================================================================
// Re-exports
// ============================================================================

pub use self::core::Server;
pub use table::ConnectionTable;
