//! Live connection table for a listening context.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::engine::SharedContext;
use crate::identifiers::ConnectionHandle;
use crate::protocol::ProtocolHandler;
use crate::transport::{Connection, ConnectionSet};

// ============================================================================
// ConnectionTable
// ============================================================================

/// Server-side connections keyed by engine handle.
///
/// Entries are created on the engine's open report and removed on its close
/// report or an explicit [`remove_peer`](Self::remove_peer).
#[derive(Default)]
pub struct ConnectionTable {
    connections: RwLock<FxHashMap<ConnectionHandle, Arc<Connection>>>,
}

impl ConnectionTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked connections.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Returns `true` if nothing is tracked.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// First connection whose peer address equals `peer`.
    #[must_use]
    pub fn find_peer(&self, peer: &str) -> Option<Arc<Connection>> {
        self.connections
            .read()
            .values()
            .find(|connection| connection.peer_address() == peer)
            .cloned()
    }

    /// Removes every connection whose peer address equals `peer`.
    pub fn remove_peer(&self, peer: &str) -> Vec<Arc<Connection>> {
        let mut connections = self.connections.write();
        let handles: Vec<ConnectionHandle> = connections
            .iter()
            .filter(|(_, connection)| connection.peer_address() == peer)
            .map(|(handle, _)| *handle)
            .collect();

        handles
            .into_iter()
            .filter_map(|handle| connections.remove(&handle))
            .collect()
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.connections.write().clear();
    }
}

impl ConnectionSet for ConnectionTable {
    fn opened(
        &self,
        handle: ConnectionHandle,
        peer: &str,
        protocol_name: &str,
        protocol: &Arc<ProtocolHandler>,
        context: &SharedContext,
    ) -> Option<Arc<Connection>> {
        let connection = Arc::new(Connection::new(
            handle,
            peer,
            protocol_name,
            Arc::clone(protocol),
            Arc::clone(context),
        ));
        connection.mark_open(peer);

        self.connections
            .write()
            .insert(handle, Arc::clone(&connection));
        Some(connection)
    }

    fn get(&self, handle: ConnectionHandle) -> Option<Arc<Connection>> {
        self.connections.read().get(&handle).cloned()
    }

    fn closed(&self, handle: ConnectionHandle) -> Option<Arc<Connection>> {
        let connection = self.connections.write().remove(&handle)?;
        connection.mark_closed();
        Some(connection)
    }

    fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.read().values().cloned().collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
