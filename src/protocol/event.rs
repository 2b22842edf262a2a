//! Event and listener types.
//!
//! Engine callbacks are translated into [`Event`]s and handed to every
//! [`Listener`] registered on the connection's protocol.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::transport::Connection;

// ============================================================================
// EventKind
// ============================================================================

/// The five lifecycle notifications a listener can receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Connection opened.
    Connect,
    /// Frame received from the peer.
    Message,
    /// Protocol-wide broadcast delivered to this connection.
    Broadcast,
    /// Connection closed or failed to open.
    Close,
    /// Connection has been silent for the keep-alive idle period.
    Idle,
}

impl EventKind {
    /// Returns the lowercase event name.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Message => "message",
            Self::Broadcast => "broadcast",
            Self::Close => "close",
            Self::Idle => "idle",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Payload
// ============================================================================

/// A text or binary frame body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
}

impl Payload {
    /// Returns `true` for binary payloads.
    #[inline]
    #[must_use]
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }

    /// Returns the text, if this is a text payload.
    #[inline]
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    /// Returns the raw bytes of either variant.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(data) => data,
        }
    }

    /// Payload length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Returns `true` if the payload is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self {
        Self::Binary(data)
    }
}

impl From<&[u8]> for Payload {
    fn from(data: &[u8]) -> Self {
        Self::Binary(data.to_vec())
    }
}

// ============================================================================
// Event
// ============================================================================

/// One lifecycle notification for one connection.
#[derive(Debug, Clone)]
pub struct Event {
    /// What happened.
    pub kind: EventKind,
    /// The connection it happened on.
    pub connection: Arc<Connection>,
    /// Frame body for `Message` and `Broadcast` events.
    pub payload: Option<Payload>,
}

impl Event {
    /// Creates an event without a payload.
    #[inline]
    #[must_use]
    pub fn new(kind: EventKind, connection: Arc<Connection>) -> Self {
        Self {
            kind,
            connection,
            payload: None,
        }
    }

    /// Creates an event carrying a payload.
    #[inline]
    #[must_use]
    pub fn with_payload(kind: EventKind, connection: Arc<Connection>, payload: Payload) -> Self {
        Self {
            kind,
            connection,
            payload: Some(payload),
        }
    }

    /// Text of the payload, if it is a text frame.
    #[inline]
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.payload.as_ref().and_then(Payload::as_text)
    }

    /// Raw bytes of the payload, if any.
    #[inline]
    #[must_use]
    pub fn data(&self) -> Option<&[u8]> {
        self.payload.as_ref().map(Payload::as_bytes)
    }

    /// Parses a text payload as JSON. `None` when absent or not JSON.
    #[must_use]
    pub fn json(&self) -> Option<Value> {
        self.message()
            .and_then(|text| serde_json::from_str(text).ok())
    }

    /// Name of the protocol the connection speaks.
    #[inline]
    #[must_use]
    pub fn protocol(&self) -> &str {
        self.connection.protocol_name()
    }
}

// ============================================================================
// Listener
// ============================================================================

/// Observer for protocol events.
///
/// Every method defaults to a no-op so implementors only override what they
/// need. Methods run on the service thread; a panic inside one is caught and
/// logged without affecting other listeners.
///
/// # Example
///
/// ```
/// use ws_reactor::{Event, Listener};
///
/// struct Echo;
///
/// impl Listener for Echo {
///     fn on_message(&self, event: &Event) {
///         if let Some(text) = event.message() {
///             let _ = event.connection.send(text);
///         }
///     }
/// }
/// ```
pub trait Listener: Send + Sync {
    /// Called when a connection opens.
    fn on_connect(&self, _event: &Event) {}

    /// Called for each inbound frame.
    fn on_message(&self, _event: &Event) {}

    /// Called for each protocol broadcast delivered to a connection.
    fn on_broadcast(&self, _event: &Event) {}

    /// Called when a connection closes.
    fn on_close(&self, _event: &Event) {}

    /// Called when a connection goes idle.
    fn on_idle(&self, _event: &Event) {}
}

// ============================================================================
// Tests
// ============================================================================
