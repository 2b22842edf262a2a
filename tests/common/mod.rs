//! Shared fixtures for integration tests.
//!
//! [`FakeEngine`] is a scripted engine: tests queue the callbacks the next
//! service round should report, and inspect every write and close the
//! reactor issued. Each primitive flags itself while running so any overlap
//! between `service` and `write` is counted.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use ws_reactor::engine::{ConnectInfo, ContextConfig};
use ws_reactor::{
    ConnectionHandle, Engine, EngineContext, EngineEvent, Error, Event, Listener, Payload, Result,
    ServiceConfig,
};

// ============================================================================
// Constants
// ============================================================================

/// Upper bound for waiting on background effects.
pub const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// FakeState
// ============================================================================

/// Everything a [`FakeEngine`] observed, plus the script it replays.
#[derive(Default)]
pub struct FakeState {
    pub in_call: AtomicBool,
    pub overlaps: AtomicUsize,
    pub connects: AtomicUsize,
    pub contexts_created: AtomicUsize,
    pub contexts_destroyed: AtomicUsize,
    pub fail_context: AtomicBool,
    pub fail_connect: AtomicBool,
    pub auto_open: AtomicBool,
    /// Service rounds still to fail before the script resumes.
    pub fail_service: AtomicUsize,
    pub service_failures: AtomicUsize,
    /// Sleep inside every service round while set.
    pub stall: Mutex<Option<Duration>>,
    pub stalled_rounds: AtomicUsize,
    pub writes: Mutex<Vec<(ConnectionHandle, Payload)>>,
    pub closes: Mutex<Vec<ConnectionHandle>>,
    pub script: Mutex<VecDeque<EngineEvent>>,
    pub open: Mutex<Vec<(ConnectionHandle, usize)>>,
    pub last_config: Mutex<Option<ContextConfig>>,
}

impl FakeState {
    /// Queues an event for the next service round.
    pub fn push(&self, event: EngineEvent) {
        self.script.lock().push_back(event);
    }

    /// Queues an inbound open from `peer` on protocol 0.
    pub fn open_peer(&self, peer: &str) -> ConnectionHandle {
        let handle = ConnectionHandle::next();
        self.push(EngineEvent::Open {
            handle,
            peer: peer.to_string(),
            protocol: 0,
        });
        handle
    }

    /// Queues a text frame for `handle`.
    pub fn message(&self, handle: ConnectionHandle, text: &str) {
        self.push(EngineEvent::Message {
            handle,
            payload: Payload::from(text),
        });
    }

    /// Queues a keep-alive idle report for `handle`.
    pub fn idle(&self, handle: ConnectionHandle) {
        self.push(EngineEvent::Idle { handle });
    }

    /// Queues a close report for `handle`.
    pub fn close(&self, handle: ConnectionHandle) {
        self.push(EngineEvent::Close { handle });
    }

    /// Text payloads written to `handle`.
    pub fn texts_to(&self, handle: ConnectionHandle) -> Vec<String> {
        self.writes
            .lock()
            .iter()
            .filter(|(h, _)| *h == handle)
            .filter_map(|(_, payload)| payload.as_text().map(str::to_string))
            .collect()
    }

    /// Number of writes recorded so far.
    pub fn write_count(&self) -> usize {
        self.writes.lock().len()
    }

    fn enter(&self) -> CallGuard<'_> {
        if self.in_call.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        CallGuard { state: self }
    }
}

struct CallGuard<'a> {
    state: &'a FakeState,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.state.in_call.store(false, Ordering::SeqCst);
    }
}

// ============================================================================
// FakeEngine
// ============================================================================

/// Scripted engine sharing one [`FakeState`] across its contexts.
#[derive(Clone, Default)]
pub struct FakeEngine {
    pub state: Arc<FakeState>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine whose client connections report open on the next round.
    pub fn auto_open() -> Self {
        let engine = Self::new();
        engine.state.auto_open.store(true, Ordering::SeqCst);
        engine
    }
}

impl Engine for FakeEngine {
    fn create_context(&self, config: &ContextConfig) -> Result<Box<dyn EngineContext>> {
        if self.state.fail_context.load(Ordering::SeqCst) {
            return Err(Error::context_creation("scripted failure"));
        }
        config.protocol_names()?;

        self.state.contexts_created.fetch_add(1, Ordering::SeqCst);
        *self.state.last_config.lock() = Some(config.clone());

        Ok(Box::new(FakeContext {
            state: Arc::clone(&self.state),
            listen_port: config.listen_port,
            destroyed: false,
        }))
    }
}

struct FakeContext {
    state: Arc<FakeState>,
    listen_port: Option<u16>,
    destroyed: bool,
}

impl EngineContext for FakeContext {
    fn connect_client(&mut self, info: &ConnectInfo) -> Result<ConnectionHandle> {
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::connect_failed(info.address(), "scripted failure"));
        }

        self.state.connects.fetch_add(1, Ordering::SeqCst);
        let handle = ConnectionHandle::next();
        if self.state.auto_open.load(Ordering::SeqCst) {
            self.state.push(EngineEvent::Open {
                handle,
                peer: info.host.clone(),
                protocol: 0,
            });
        }
        Ok(handle)
    }

    fn service(&mut self, _timeout: Duration, events: &mut Vec<EngineEvent>) -> Result<usize> {
        let _guard = self.state.enter();
        // Widen the window a concurrent write would have to hit.
        thread::sleep(Duration::from_micros(200));

        let stall = *self.state.stall.lock();
        if let Some(stall) = stall {
            self.state.stalled_rounds.fetch_add(1, Ordering::SeqCst);
            thread::sleep(stall);
        }

        let failing = self
            .state
            .fail_service
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            self.state.service_failures.fetch_add(1, Ordering::SeqCst);
            return Err(Error::service(-1));
        }

        let before = events.len();
        let mut script = self.state.script.lock();
        while let Some(event) = script.pop_front() {
            let mut open = self.state.open.lock();
            match &event {
                EngineEvent::Open {
                    handle, protocol, ..
                } => open.push((*handle, *protocol)),
                EngineEvent::Close { handle } => open.retain(|(h, _)| h != handle),
                _ => {}
            }
            events.push(event);
        }
        Ok(events.len() - before)
    }

    fn write(&mut self, handle: ConnectionHandle, payload: &Payload) -> Result<()> {
        let _guard = self.state.enter();
        self.state.writes.lock().push((handle, payload.clone()));
        Ok(())
    }

    fn close(&mut self, handle: ConnectionHandle) {
        let _guard = self.state.enter();
        self.state.closes.lock().push(handle);
    }

    fn broadcast(&mut self, protocol: usize, payload: &Payload) -> Result<usize> {
        let targets: Vec<ConnectionHandle> = self
            .state
            .open
            .lock()
            .iter()
            .filter(|(_, p)| *p == protocol)
            .map(|(h, _)| *h)
            .collect();

        for handle in &targets {
            self.state.push(EngineEvent::Broadcast {
                handle: *handle,
                payload: payload.clone(),
            });
        }
        Ok(targets.len())
    }

    fn local_port(&self) -> Option<u16> {
        self.listen_port
    }

    fn destroy(&mut self) {
        if !self.destroyed {
            self.destroyed = true;
            self.state.contexts_destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

// ============================================================================
// Listeners
// ============================================================================

/// Records every callback as `kind:detail`.
#[derive(Default)]
pub struct Recorder {
    pub log: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn entries(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.log.lock().iter().filter(|e| *e == entry).count()
    }
}

impl Listener for Recorder {
    fn on_connect(&self, event: &Event) {
        self.log
            .lock()
            .push(format!("connect:{}", event.connection.peer_address()));
    }

    fn on_message(&self, event: &Event) {
        self.log
            .lock()
            .push(format!("message:{}", event.message().unwrap_or_default()));
    }

    fn on_broadcast(&self, event: &Event) {
        self.log
            .lock()
            .push(format!("broadcast:{}", event.message().unwrap_or_default()));
    }

    fn on_close(&self, event: &Event) {
        self.log
            .lock()
            .push(format!("close:{}", event.connection.peer_address()));
    }

    fn on_idle(&self, event: &Event) {
        self.log
            .lock()
            .push(format!("idle:{}", event.connection.peer_address()));
    }
}

/// Echoes text frames back from inside the callback.
pub struct Echo;

impl Listener for Echo {
    fn on_message(&self, event: &Event) {
        if let Some(text) = event.message() {
            let _ = event.connection.send(text);
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Tight loop timing so tests settle quickly.
pub fn fast_service() -> ServiceConfig {
    ServiceConfig {
        service_timeout: Duration::from_millis(1),
        yield_interval: Duration::from_millis(1),
        shutdown_timeout: Duration::from_secs(2),
    }
}

/// Polls `condition` until it holds or [`WAIT`] elapses.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Installs a test subscriber honoring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
