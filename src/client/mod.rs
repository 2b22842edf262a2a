//! Outbound WebSocket client.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `core` | [`Client`] lifecycle, sending and reconnect driving |
//! | `reconnect` | [`ReconnectPolicy`] interval gating |

// ============================================================================
// Submodules
// ============================================================================

/// Client lifecycle.
pub mod core;

/// Interval-gated reconnection.
pub mod reconnect;

// ============================================================================
// Re-exports
// ============================================================================

pub use self::core::Client;
pub use reconnect::ReconnectPolicy;
