//! Error types for the WebSocket reactor.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use ws_reactor::{Client, ClientOptions, Result};
//!
//! fn example(client: &mut Client) -> Result<()> {
//!     client.try_connect(ClientOptions::from_url("ws://localhost:9000/")?)?;
//!     client.send("hello")?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Setup | [`Error::ContextCreation`], [`Error::Config`], [`Error::Unsupported`] |
//! | Connect | [`Error::ConnectFailed`] |
//! | Service | [`Error::Service`], [`Error::ShutdownTimeout`] |
//! | Delivery | [`Error::TargetNotFound`], [`Error::NotConnected`] |
//! | Connection | [`Error::ConnectionClosed`], [`Error::UnknownConnection`] |
//! | Dispatch | [`Error::ListenerFault`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::any::Any;
use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::ConnectionHandle;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// None of these are fatal to the host process. Setup failures are returned
/// to the caller; everything raised on the service thread is logged.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Setup Errors
    // ========================================================================
    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Engine context could not be created.
    ///
    /// Returned by `connect`/`setup` when the engine refuses the protocol
    /// table, cannot bind the listen port, or cannot start its runtime.
    #[error("Context creation failed: {message}")]
    ContextCreation {
        /// Description of the failure.
        message: String,
    },

    /// Outbound connection could not be initiated.
    #[error("Connection to {address} failed: {message}")]
    ConnectFailed {
        /// Target address (`host:port/path`).
        address: String,
        /// Description of the failure.
        message: String,
    },

    /// Feature not provided by the engine in use.
    #[error("Unsupported: {feature}")]
    Unsupported {
        /// Name of the missing feature.
        feature: String,
    },

    // ========================================================================
    // Service Errors
    // ========================================================================
    /// A single service round failed.
    ///
    /// Transient: the service loop logs it and keeps running.
    #[error("Service round failed with code {code}")]
    Service {
        /// Negative engine status code.
        code: i32,
    },

    /// Service thread did not exit within the shutdown bound.
    #[error("Service thread did not stop within {timeout_ms}ms")]
    ShutdownTimeout {
        /// Milliseconds waited before giving up.
        timeout_ms: u64,
    },

    // ========================================================================
    // Delivery Errors
    // ========================================================================
    /// No tracked connection matches the requested peer.
    #[error("Connection not found at peer address: {peer}")]
    TargetNotFound {
        /// Peer address that had no match.
        peer: String,
    },

    /// No active connection to send on.
    #[error("Not connected")]
    NotConnected,

    /// Engine context is gone (closed or never created).
    #[error("Connection closed")]
    ConnectionClosed,

    /// Engine does not know the given handle.
    #[error("Unknown connection handle: {handle}")]
    UnknownConnection {
        /// The stale handle.
        handle: ConnectionHandle,
    },

    // ========================================================================
    // Dispatch Errors
    // ========================================================================
    /// Application listener panicked during dispatch.
    #[error("Listener fault in protocol '{protocol}' during {event}: {message}")]
    ListenerFault {
        /// Protocol whose listener failed.
        protocol: String,
        /// Event kind being dispatched.
        event: String,
        /// Panic message, if it carried one.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// URL parse error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a context creation error.
    #[inline]
    pub fn context_creation(message: impl Into<String>) -> Self {
        Self::ContextCreation {
            message: message.into(),
        }
    }

    /// Creates a connect failure error.
    #[inline]
    pub fn connect_failed(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectFailed {
            address: address.into(),
            message: message.into(),
        }
    }

    /// Creates an unsupported feature error.
    #[inline]
    pub fn unsupported(feature: impl Into<String>) -> Self {
        Self::Unsupported {
            feature: feature.into(),
        }
    }

    /// Creates a service round error.
    #[inline]
    pub fn service(code: i32) -> Self {
        Self::Service { code }
    }

    /// Creates a shutdown timeout error.
    #[inline]
    pub fn shutdown_timeout(timeout_ms: u64) -> Self {
        Self::ShutdownTimeout { timeout_ms }
    }

    /// Creates a target not found error.
    #[inline]
    pub fn target_not_found(peer: impl Into<String>) -> Self {
        Self::TargetNotFound { peer: peer.into() }
    }

    /// Creates an unknown connection error.
    #[inline]
    pub fn unknown_connection(handle: ConnectionHandle) -> Self {
        Self::UnknownConnection { handle }
    }

    /// Creates a listener fault from a caught panic payload.
    pub fn listener_fault(
        protocol: impl Into<String>,
        event: impl Into<String>,
        payload: &(dyn Any + Send),
    ) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());

        Self::ListenerFault {
            protocol: protocol.into(),
            event: event.into(),
            message,
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this error came from context or connection setup.
    #[inline]
    #[must_use]
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            Self::Config { .. }
                | Self::ContextCreation { .. }
                | Self::ConnectFailed { .. }
                | Self::Unsupported { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailed { .. }
                | Self::NotConnected
                | Self::ConnectionClosed
                | Self::UnknownConnection { .. }
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailed { .. }
                | Self::Service { .. }
                | Self::NotConnected
                | Self::TargetNotFound { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::connect_failed("localhost:80/", "refused");
        assert_eq!(err.to_string(), "Connection to localhost:80/ failed: refused");
    }

    #[test]
    fn test_target_not_found_display() {
        let err = Error::target_not_found("2.2.2.2");
        assert_eq!(
            err.to_string(),
            "Connection not found at peer address: 2.2.2.2"
        );
    }

    #[test]
    fn test_is_setup_failure() {
        assert!(Error::context_creation("bind").is_setup_failure());
        assert!(Error::connect_failed("a", "b").is_setup_failure());
        assert!(!Error::service(-1).is_setup_failure());
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::NotConnected.is_connection_error());
        assert!(Error::ConnectionClosed.is_connection_error());
        assert!(!Error::config("test").is_connection_error());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::service(-1).is_recoverable());
        assert!(!Error::shutdown_timeout(5000).is_recoverable());
    }

    #[test]
    fn test_listener_fault_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        let err = Error::listener_fault("chat", "message", payload.as_ref());
        assert!(err.to_string().contains("boom"));

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned boom"));
        let err = Error::listener_fault("chat", "message", payload.as_ref());
        assert!(err.to_string().contains("owned boom"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::AddrInUse, "port taken");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
