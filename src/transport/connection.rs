//! One live socket-level session.
//!
//! A [`Connection`] pairs an engine handle with the protocol it speaks and
//! the exclusivity token of the context it lives in. Every write goes
//! through that token, so sends from the application thread never overlap
//! a service round.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::engine::SharedContext;
use crate::error::{Error, Result};
use crate::identifiers::ConnectionHandle;
use crate::protocol::{Payload, ProtocolHandler};

// ============================================================================
// Connection
// ============================================================================

/// A WebSocket session owned by a client or server.
pub struct Connection {
    handle: ConnectionHandle,
    peer: RwLock<String>,
    protocol_name: String,
    protocol: Arc<ProtocolHandler>,
    context: SharedContext,
    open: AtomicBool,
    pending_close: AtomicBool,
    ticks: AtomicU64,
}

impl Connection {
    /// Creates a connection bound to an engine context.
    #[must_use]
    pub fn new(
        handle: ConnectionHandle,
        peer: impl Into<String>,
        protocol_name: impl Into<String>,
        protocol: Arc<ProtocolHandler>,
        context: SharedContext,
    ) -> Self {
        Self {
            handle,
            peer: RwLock::new(peer.into()),
            protocol_name: protocol_name.into(),
            protocol,
            context,
            open: AtomicBool::new(false),
            pending_close: AtomicBool::new(false),
            ticks: AtomicU64::new(0),
        }
    }

    /// Creates a connection with no engine behind it.
    ///
    /// Sends fail with [`Error::ConnectionClosed`]. Useful for driving
    /// listeners directly.
    #[must_use]
    pub fn detached(
        handle: ConnectionHandle,
        peer: impl Into<String>,
        protocol_name: impl Into<String>,
        protocol: Arc<ProtocolHandler>,
    ) -> Self {
        Self::new(
            handle,
            peer,
            protocol_name,
            protocol,
            Arc::new(Mutex::new(None)),
        )
    }

    /// Engine handle.
    #[inline]
    #[must_use]
    pub fn handle(&self) -> ConnectionHandle {
        self.handle
    }

    /// Remote address captured when the engine reported the open.
    #[must_use]
    pub fn peer_address(&self) -> String {
        self.peer.read().clone()
    }

    /// Name the protocol was registered under.
    #[inline]
    #[must_use]
    pub fn protocol_name(&self) -> &str {
        &self.protocol_name
    }

    /// Handler receiving this connection's events.
    #[inline]
    #[must_use]
    pub fn protocol(&self) -> &Arc<ProtocolHandler> {
        &self.protocol
    }

    /// Returns `true` while the engine's last report for this handle was open.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Returns `true` once [`close`](Self::close) has been requested.
    #[inline]
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.pending_close.load(Ordering::SeqCst)
    }

    /// Service ticks seen since creation.
    #[inline]
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Sends a text frame.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the engine context is gone
    /// - [`Error::UnknownConnection`] if the engine dropped the handle
    pub fn send(&self, text: impl Into<String>) -> Result<()> {
        self.write(&Payload::Text(text.into()))
    }

    /// Sends a binary frame.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub fn send_binary(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.write(&Payload::Binary(data.into()))
    }

    /// Hands a payload to the engine's write primitive under the token.
    ///
    /// Failures are logged here; callers may ignore the result.
    pub fn write(&self, payload: &Payload) -> Result<()> {
        let mut guard = self.context.lock();
        let Some(context) = guard.as_mut() else {
            warn!(handle = %self.handle, "Send on connection without engine context");
            return Err(Error::ConnectionClosed);
        };

        let result = context.write(self.handle, payload);
        drop(guard);

        match &result {
            Ok(()) => trace!(handle = %self.handle, bytes = payload.len(), "Payload queued"),
            Err(e) => warn!(handle = %self.handle, error = %e, "Send failed"),
        }
        result
    }

    /// Requests a graceful close. The `Close` event follows from the engine.
    pub fn close(&self) {
        if self.pending_close.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut guard = self.context.lock();
        if let Some(context) = guard.as_mut() {
            context.close(self.handle);
            debug!(handle = %self.handle, "Close requested");
        }
    }

    /// Per-tick bookkeeping, called once per service-loop iteration.
    ///
    /// Marks the connection closed if its engine context has been torn down
    /// underneath it. Skips the check when the token is busy.
    pub fn update(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);

        if !self.is_open() {
            return;
        }

        if let Some(guard) = self.context.try_lock()
            && guard.is_none()
        {
            self.open.store(false, Ordering::SeqCst);
            debug!(handle = %self.handle, "Stale connection, engine context gone");
        }
    }

    /// Records an engine open report.
    pub(crate) fn mark_open(&self, peer: &str) {
        *self.peer.write() = peer.to_string();
        self.open.store(true, Ordering::SeqCst);
    }

    /// Records an engine close report or a local removal.
    pub(crate) fn mark_closed(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("handle", &self.handle)
            .field("peer", &*self.peer.read())
            .field("protocol", &self.protocol_name)
            .field("open", &self.is_open())
            .field("pending_close", &self.is_closing())
            .finish()
    }
}

// ============================================================================
// ConnectionSet
// ============================================================================

/// Connection bookkeeping the service loop drives.
///
/// A client tracks at most one connection, a server a dynamic set; the
/// loop only sees this trait.
pub trait ConnectionSet: Send + Sync {
    /// Engine reported an open. Returns the connection now tracked for it.
    fn opened(
        &self,
        handle: ConnectionHandle,
        peer: &str,
        protocol_name: &str,
        protocol: &Arc<ProtocolHandler>,
        context: &SharedContext,
    ) -> Option<Arc<Connection>>;

    /// Connection for `handle`, if tracked.
    fn get(&self, handle: ConnectionHandle) -> Option<Arc<Connection>>;

    /// Engine reported a close. Returns the connection it applied to.
    fn closed(&self, handle: ConnectionHandle) -> Option<Arc<Connection>>;

    /// All tracked connections.
    fn snapshot(&self) -> Vec<Arc<Connection>>;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn detached() -> Connection {
        Connection::detached(
            ConnectionHandle::next(),
            "10.0.0.1",
            "chat",
            Arc::new(ProtocolHandler::new()),
        )
    }

    #[test]
    fn test_send_without_context_fails_softly() {
        let conn = detached();
        assert!(matches!(conn.send("hi"), Err(Error::ConnectionClosed)));
        assert!(matches!(
            conn.send_binary(vec![1u8]),
            Err(Error::ConnectionClosed)
        ));
    }

    #[test]
    fn test_open_close_marks() {
        let conn = detached();
        assert!(!conn.is_open());
        conn.mark_open("10.0.0.2");
        assert!(conn.is_open());
        assert_eq!(conn.peer_address(), "10.0.0.2");
        conn.mark_closed();
        assert!(!conn.is_open());
    }

    #[test]
    fn test_update_detects_missing_context() {
        let conn = detached();
        conn.mark_open("10.0.0.1");
        conn.update();
        assert!(!conn.is_open());
        assert_eq!(conn.ticks(), 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let conn = detached();
        conn.close();
        conn.close();
        assert!(conn.is_closing());
    }
}
