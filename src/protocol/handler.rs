//! Per-protocol listener fan-out.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::{error, trace};

use crate::error::Error;

use super::event::{Event, EventKind, Listener, Payload};

// ============================================================================
// Constants
// ============================================================================

/// Receive buffer hint passed to the engine's protocol table.
pub const DEFAULT_RX_BUFFER_SIZE: usize = 65_536;

// ============================================================================
// Types
// ============================================================================

/// Periodic hook run once per service tick.
pub type PeriodicTask = Box<dyn FnMut() + Send>;

/// Token returned by [`ProtocolHandler::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

static NEXT_LISTENER: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// ProtocolHandler
// ============================================================================

/// Routes events for one sub-protocol to its listeners.
///
/// Handlers live as long as the client or server that owns them and
/// survive reconnects, so listeners only need to be registered once.
pub struct ProtocolHandler {
    rx_buffer_size: usize,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn Listener>)>>,
    periodic: Mutex<Option<PeriodicTask>>,
    broadcasts: Mutex<Vec<Payload>>,
}

impl ProtocolHandler {
    /// Creates a handler with the default receive buffer hint.
    #[must_use]
    pub fn new() -> Self {
        Self::with_rx_buffer_size(DEFAULT_RX_BUFFER_SIZE)
    }

    /// Creates a handler with a custom receive buffer hint.
    #[must_use]
    pub fn with_rx_buffer_size(rx_buffer_size: usize) -> Self {
        Self {
            rx_buffer_size,
            listeners: RwLock::new(Vec::new()),
            periodic: Mutex::new(None),
            broadcasts: Mutex::new(Vec::new()),
        }
    }

    /// Receive buffer size hint.
    #[inline]
    #[must_use]
    pub fn rx_buffer_size(&self) -> usize {
        self.rx_buffer_size
    }

    /// Registers a listener. Listeners are called in registration order.
    pub fn add_listener(&self, listener: Arc<dyn Listener>) -> ListenerId {
        let id = ListenerId(NEXT_LISTENER.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    /// Unregisters a listener. Returns `false` if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Number of registered listeners.
    #[inline]
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Delivers `event` to every listener, in registration order.
    ///
    /// The listener list is snapshotted first, so listeners added or removed
    /// during dispatch take effect from the next event. A panicking listener
    /// is logged and skipped. Returns the number of listeners that faulted.
    pub fn dispatch(&self, event: &Event) -> usize {
        let snapshot: Vec<Arc<dyn Listener>> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        trace!(
            kind = %event.kind,
            protocol = event.protocol(),
            listeners = snapshot.len(),
            "Dispatching event"
        );

        let mut faults = 0;
        for listener in snapshot {
            let outcome = catch_unwind(AssertUnwindSafe(|| match event.kind {
                EventKind::Connect => listener.on_connect(event),
                EventKind::Message => listener.on_message(event),
                EventKind::Broadcast => listener.on_broadcast(event),
                EventKind::Close => listener.on_close(event),
                EventKind::Idle => listener.on_idle(event),
            }));

            if let Err(payload) = outcome {
                let err = Error::listener_fault(event.protocol(), event.kind.as_str(), &*payload);
                error!(error = %err, "Listener fault");
                faults += 1;
            }
        }
        faults
    }

    /// Installs the periodic hook run by [`execute`](Self::execute).
    pub fn set_periodic(&self, task: impl FnMut() + Send + 'static) {
        *self.periodic.lock() = Some(Box::new(task));
    }

    /// Removes the periodic hook.
    pub fn clear_periodic(&self) {
        *self.periodic.lock() = None;
    }

    /// Runs per-tick protocol work. Called once per service-loop iteration.
    ///
    /// Returns `false` if the periodic hook panicked.
    pub fn execute(&self) -> bool {
        let mut periodic = self.periodic.lock();
        let Some(task) = periodic.as_mut() else {
            return true;
        };

        match catch_unwind(AssertUnwindSafe(task)) {
            Ok(()) => true,
            Err(payload) => {
                let err = Error::listener_fault("periodic", "execute", &*payload);
                error!(error = %err, "Periodic task fault");
                false
            }
        }
    }

    /// Queues a payload for every connection speaking this protocol.
    ///
    /// Delivered on the next service tick as a `Broadcast` event per
    /// connection.
    pub fn broadcast(&self, payload: impl Into<Payload>) {
        self.broadcasts.lock().push(payload.into());
    }

    /// Drains queued broadcasts.
    pub(crate) fn take_broadcasts(&self) -> Vec<Payload> {
        std::mem::take(&mut *self.broadcasts.lock())
    }
}

impl Default for ProtocolHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProtocolHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolHandler")
            .field("rx_buffer_size", &self.rx_buffer_size)
            .field("listeners", &self.listener_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
