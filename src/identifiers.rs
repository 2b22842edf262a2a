//! Type-safe identifiers.
//!
//! Engine handles are wrapped in a newtype so they cannot be confused with
//! protocol indices or ports.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

// ============================================================================
// ConnectionHandle
// ============================================================================

/// Global counter for handle allocation. Starts at 1.
static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Opaque engine handle for one socket-level session.
///
/// Handles are process-unique and never reused, so a stale handle can be
/// detected instead of aliasing a newer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionHandle(u64);

impl ConnectionHandle {
    /// Allocates the next process-unique handle.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    /// Wraps a raw value. Intended for engines that manage their own ids.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
