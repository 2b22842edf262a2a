//! Engine context plus service loop, shared by client and server.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::engine::{ConnectInfo, ContextConfig, Engine, SharedContext};
use crate::error::{Error, Result};
use crate::identifiers::ConnectionHandle;
use crate::protocol::ProtocolRegistry;

use super::connection::ConnectionSet;
use super::service::{LoopShared, ServiceConfig, ServiceLoop, ServiceState};

// ============================================================================
// Reactor
// ============================================================================

/// One engine context, its protocol registry and the loop servicing it.
///
/// Built once per `connect`/`setup` call. Teardown stops the loop before
/// the context is destroyed, so no service call can still be using it.
pub struct Reactor {
    context: SharedContext,
    registry: Arc<ProtocolRegistry>,
    service: ServiceLoop,
    config: ServiceConfig,
    local_port: Option<u16>,
}

impl Reactor {
    /// Creates the engine context.
    ///
    /// # Errors
    ///
    /// Returns the engine's setup error if the context cannot be created.
    pub fn create(
        engine: &dyn Engine,
        registry: ProtocolRegistry,
        context_config: &ContextConfig,
        config: ServiceConfig,
    ) -> Result<Self> {
        let context = engine.create_context(context_config)?;
        let local_port = context.local_port();

        Ok(Self {
            context: Arc::new(Mutex::new(Some(context))),
            registry: Arc::new(registry),
            service: ServiceLoop::new(config),
            config,
            local_port,
        })
    }

    /// Exclusivity token guarding the context.
    #[inline]
    #[must_use]
    pub fn context(&self) -> &SharedContext {
        &self.context
    }

    /// Registry the context was built from.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<ProtocolRegistry> {
        &self.registry
    }

    /// Port bound by a listening context.
    #[inline]
    #[must_use]
    pub fn local_port(&self) -> Option<u16> {
        self.local_port
    }

    /// Service loop state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ServiceState {
        self.service.state()
    }

    /// Starts an outbound connection on the context.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the context is already destroyed
    /// - the engine's error if the attempt cannot be started
    pub fn connect_client(&self, info: &ConnectInfo) -> Result<ConnectionHandle> {
        let mut guard = self.context.lock();
        let context = guard.as_mut().ok_or(Error::ConnectionClosed)?;
        context.connect_client(info)
    }

    /// Starts the service loop over `connections`.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker thread cannot be started.
    pub fn start(&mut self, connections: Arc<dyn ConnectionSet>) -> Result<()> {
        self.service.start(LoopShared {
            registry: Arc::clone(&self.registry),
            context: Arc::clone(&self.context),
            connections,
            config: self.config,
        })
    }

    /// Stops the loop, then destroys the context.
    ///
    /// Safe to call more than once. If the token cannot be taken within the
    /// shutdown bound the context is leaked rather than blocking forever.
    pub fn shutdown(&mut self) {
        if self.service.stop().is_err() {
            debug!("Proceeding with teardown after shutdown timeout");
        }

        let Some(mut guard) = self.context.try_lock_for(self.config.shutdown_timeout) else {
            error!(
                error = %Error::shutdown_timeout(self.config.shutdown_timeout.as_millis() as u64),
                "Engine context still in use, leaking it"
            );
            return;
        };

        if let Some(mut context) = guard.take() {
            context.destroy();
            debug!("Engine context destroyed");
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
