//! Background service loop.
//!
//! The worker thread repeats four steps until asked to stop:
//!
//! 1. let every protocol handler run its periodic work
//! 2. call `update()` on every tracked connection
//! 3. take the exclusivity token, run one bounded engine service round,
//!    release the token
//! 4. dispatch the round's events to listeners, then yield briefly
//!
//! Events are dispatched after the token is released so listeners can
//! send from inside a callback.
//!
//! # States
//!
//! ```text
//! Stopped ──start()──► Starting ──► Running ──stop()──► StopRequested ──► Stopped
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use crate::engine::{EngineEvent, SharedContext};
use crate::error::{Error, Result};
use crate::identifiers::ConnectionHandle;
use crate::protocol::{Event, EventKind, Payload, ProtocolRegistry};

use super::connection::{Connection, ConnectionSet};

// ============================================================================
// Constants
// ============================================================================

/// Upper bound on one engine service round.
pub const DEFAULT_SERVICE_TIMEOUT: Duration = Duration::from_millis(10);

/// Pause between iterations.
pub const DEFAULT_YIELD: Duration = Duration::from_millis(1);

/// How long `stop()` waits for the worker before giving up.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// ServiceConfig
// ============================================================================

/// Timing knobs for a [`ServiceLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Maximum wait inside one engine service call.
    pub service_timeout: Duration,
    /// Sleep between iterations.
    pub yield_interval: Duration,
    /// Bound on joining the worker in `stop()`.
    pub shutdown_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_timeout: DEFAULT_SERVICE_TIMEOUT,
            yield_interval: DEFAULT_YIELD,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

// ============================================================================
// ServiceState
// ============================================================================

/// Lifecycle state of a [`ServiceLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServiceState {
    /// No worker.
    Stopped = 0,
    /// Worker spawned, not yet servicing.
    Starting = 1,
    /// Worker servicing the engine.
    Running = 2,
    /// Worker asked to exit.
    StopRequested = 3,
}

impl ServiceState {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::StopRequested,
            _ => Self::Stopped,
        }
    }
}

// ============================================================================
// LoopShared
// ============================================================================

/// Everything the worker needs, shared with the owner.
pub(crate) struct LoopShared {
    pub(crate) registry: Arc<ProtocolRegistry>,
    pub(crate) context: SharedContext,
    pub(crate) connections: Arc<dyn ConnectionSet>,
    pub(crate) config: ServiceConfig,
}

// ============================================================================
// ServiceLoop
// ============================================================================

/// Owner-side handle on the background worker.
pub struct ServiceLoop {
    state: Arc<AtomicU8>,
    worker: Option<JoinHandle<()>>,
    exited: Option<mpsc::Receiver<()>>,
    config: ServiceConfig,
}

impl ServiceLoop {
    /// Creates a stopped loop.
    #[must_use]
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            state: Arc::new(AtomicU8::new(ServiceState::Stopped as u8)),
            worker: None,
            exited: None,
            config,
        }
    }

    /// Current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ServiceState {
        ServiceState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Returns `true` while the worker is servicing.
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == ServiceState::Running
    }

    /// Spawns the worker.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the loop is not stopped
    /// - [`Error::Io`] if the thread cannot be spawned
    pub(crate) fn start(&mut self, shared: LoopShared) -> Result<()> {
        if self
            .state
            .compare_exchange(
                ServiceState::Stopped as u8,
                ServiceState::Starting as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Err(Error::config(format!(
                "service loop already {:?}",
                self.state()
            )));
        }

        let (exited_tx, exited_rx) = mpsc::channel();
        let state = Arc::clone(&self.state);

        let spawned = thread::Builder::new()
            .name("ws-reactor-service".to_string())
            .spawn(move || {
                run_worker(&state, &shared);
                let _ = exited_tx.send(());
            });

        match spawned {
            Ok(worker) => {
                self.worker = Some(worker);
                self.exited = Some(exited_rx);
                self.state
                    .store(ServiceState::Running as u8, Ordering::SeqCst);
                debug!("Service loop started");
                Ok(())
            }
            Err(e) => {
                self.state
                    .store(ServiceState::Stopped as u8, Ordering::SeqCst);
                Err(e.into())
            }
        }
    }

    /// Asks the worker to exit and waits up to the shutdown bound.
    ///
    /// On timeout the worker is detached and
    /// [`Error::ShutdownTimeout`] is returned after being logged; the loop
    /// is still reported as stopped.
    pub fn stop(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            self.state
                .store(ServiceState::Stopped as u8, Ordering::SeqCst);
            return Ok(());
        };

        self.state
            .store(ServiceState::StopRequested as u8, Ordering::SeqCst);

        let waited = self
            .exited
            .take()
            .map_or(Ok(()), |exited| exited.recv_timeout(self.config.shutdown_timeout));

        let result = match waited {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if worker.join().is_err() {
                    error!("Service thread panicked");
                }
                info!("Service thread stopped");
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                let err =
                    Error::shutdown_timeout(self.config.shutdown_timeout.as_millis() as u64);
                error!(error = %err, "Service thread left running, resources may leak");
                Err(err)
            }
        };

        self.state
            .store(ServiceState::Stopped as u8, Ordering::SeqCst);
        result
    }
}

impl Drop for ServiceLoop {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

// ============================================================================
// Worker
// ============================================================================

fn run_worker(state: &AtomicU8, shared: &LoopShared) {
    trace!("Service worker entered");

    loop {
        match ServiceState::from_u8(state.load(Ordering::SeqCst)) {
            ServiceState::Running => service_round(shared),
            ServiceState::Starting => {}
            ServiceState::StopRequested | ServiceState::Stopped => break,
        }
        thread::sleep(shared.config.yield_interval);
    }

    trace!("Service worker exiting");
}

/// Runs one full iteration of the loop body.
pub(crate) fn service_round(shared: &LoopShared) {
    let mut broadcasts: Vec<(usize, Payload)> = Vec::new();
    for (index, (_, handler)) in shared.registry.iter().enumerate() {
        handler.execute();
        broadcasts.extend(
            handler
                .take_broadcasts()
                .into_iter()
                .map(|payload| (index, payload)),
        );
    }

    for connection in shared.connections.snapshot() {
        connection.update();
    }

    let mut events = Vec::new();
    {
        let mut guard = shared.context.lock();
        let Some(context) = guard.as_mut() else {
            return;
        };

        for (index, payload) in &broadcasts {
            if let Err(e) = context.broadcast(*index, payload) {
                warn!(protocol = index, error = %e, "Broadcast failed");
            }
        }

        match context.service(shared.config.service_timeout, &mut events) {
            Ok(count) if count > 0 => trace!(count, "Service round"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Service round failed"),
        }
    }

    for event in events {
        dispatch_engine_event(shared, event);
    }
}

/// Translates one engine callback into a protocol dispatch.
fn dispatch_engine_event(shared: &LoopShared, event: EngineEvent) {
    match event {
        EngineEvent::Open {
            handle,
            peer,
            protocol,
        } => {
            let Some((name, handler)) = shared
                .registry
                .get_index(protocol)
                .or_else(|| shared.registry.get_index(0))
            else {
                warn!(%handle, protocol, "Open for unknown protocol index");
                return;
            };

            let Some(connection) =
                shared
                    .connections
                    .opened(handle, &peer, name, handler, &shared.context)
            else {
                debug!(%handle, "Open for untracked handle");
                return;
            };

            debug!(%handle, %peer, protocol = name, "Connection open");
            deliver(Event::new(EventKind::Connect, connection));
        }

        EngineEvent::Message { handle, payload } => {
            if let Some(connection) = lookup(shared, handle) {
                deliver(Event::with_payload(EventKind::Message, connection, payload));
            }
        }

        EngineEvent::Broadcast { handle, payload } => {
            if let Some(connection) = lookup(shared, handle) {
                let _ = connection.write(&payload);
                deliver(Event::with_payload(
                    EventKind::Broadcast,
                    connection,
                    payload,
                ));
            }
        }

        EngineEvent::Close { handle } => match shared.connections.closed(handle) {
            Some(connection) => {
                debug!(%handle, "Connection closed");
                deliver(Event::new(EventKind::Close, connection));
            }
            None => debug!(%handle, "Close for untracked handle"),
        },

        EngineEvent::Idle { handle } => {
            if let Some(connection) = lookup(shared, handle) {
                deliver(Event::new(EventKind::Idle, connection));
            }
        }
    }
}

fn lookup(shared: &LoopShared, handle: ConnectionHandle) -> Option<Arc<Connection>> {
    let connection = shared.connections.get(handle);
    if connection.is_none() {
        debug!(%handle, "Event for untracked handle");
    }
    connection
}

fn deliver(event: Event) {
    let handler = Arc::clone(event.connection.protocol());
    handler.dispatch(&event);
}

// ============================================================================
// Tests
// ============================================================================
