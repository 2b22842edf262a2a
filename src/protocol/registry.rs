//! Protocol name to handler mapping.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use crate::options::NULL_PROTOCOL;

use super::handler::ProtocolHandler;

// ============================================================================
// ProtocolEntry
// ============================================================================

/// One row of the protocol table handed to the engine.
///
/// The terminating row is tagged explicitly, so a nameless protocol with a
/// zero buffer hint is still a protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolEntry {
    /// Sub-protocol name. `None` for the `NULL` protocol and the sentinel.
    pub name: Option<String>,
    /// Receive buffer size hint.
    pub rx_buffer_size: usize,
    terminator: bool,
}

impl ProtocolEntry {
    /// A protocol row.
    #[inline]
    #[must_use]
    pub const fn new(name: Option<String>, rx_buffer_size: usize) -> Self {
        Self {
            name,
            rx_buffer_size,
            terminator: false,
        }
    }

    /// The terminating row: no name, zero buffer.
    #[inline]
    #[must_use]
    pub const fn sentinel() -> Self {
        Self {
            name: None,
            rx_buffer_size: 0,
            terminator: true,
        }
    }

    /// Returns `true` for the terminating row.
    #[inline]
    #[must_use]
    pub const fn is_sentinel(&self) -> bool {
        self.terminator
    }
}

// ============================================================================
// ProtocolRegistry
// ============================================================================

/// Ordered mapping from protocol name to handler.
///
/// Indices are stable for the lifetime of one registry: replacing a name
/// keeps its slot, new names append.
#[derive(Debug, Clone, Default)]
pub struct ProtocolRegistry {
    entries: Vec<(String, Arc<ProtocolHandler>)>,
}

impl ProtocolRegistry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `name`, replacing any previous mapping.
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<ProtocolHandler>) {
        let name = name.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = handler,
            None => self.entries.push((name, handler)),
        }
    }

    /// Looks up a handler by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<ProtocolHandler>> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, handler)| handler)
    }

    /// Looks up a protocol by table index.
    #[must_use]
    pub fn get_index(&self, index: usize) -> Option<(&str, &Arc<ProtocolHandler>)> {
        self.entries
            .get(index)
            .map(|(name, handler)| (name.as_str(), handler))
    }

    /// Table index of `name`.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(existing, _)| existing == name)
    }

    /// Iterates `(name, handler)` in table order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<ProtocolHandler>)> {
        self.entries
            .iter()
            .map(|(name, handler)| (name.as_str(), handler))
    }

    /// Number of registered protocols, excluding the sentinel.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Builds the engine's protocol table, terminated by a sentinel row.
    #[must_use]
    pub fn build_table(&self) -> Vec<ProtocolEntry> {
        let mut table = Vec::with_capacity(self.entries.len() + 1);
        for (name, handler) in &self.entries {
            table.push(ProtocolEntry::new(
                (name != NULL_PROTOCOL).then(|| name.clone()),
                handler.rx_buffer_size(),
            ));
        }
        table.push(ProtocolEntry::sentinel());
        table
    }
}

// ============================================================================
// Tests
// ============================================================================
