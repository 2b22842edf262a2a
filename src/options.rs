//! Client and server connection options.
//!
//! Options are copied into the owning [`Client`](crate::Client) or
//! [`Server`](crate::Server) when `connect`/`setup` starts, and that copy is
//! what later reconnect attempts use.
//!
//! # Example
//!
//! ```
//! use ws_reactor::{ClientOptions, KeepAlive};
//!
//! let options = ClientOptions::new("echo.example.org")
//!     .with_port(8080)
//!     .with_path("/chat")
//!     .with_reconnect_interval(2_000)
//!     .with_keep_alive(KeepAlive::new(1, 1, 1));
//!
//! assert_eq!(options.address(), "echo.example.org:8080/chat");
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Protocol name registered when the application does not pick one.
pub const DEFAULT_PROTOCOL: &str = "default";

/// Protocol name meaning "do not request a sub-protocol".
pub const NULL_PROTOCOL: &str = "NULL";

/// Plain WebSocket port.
pub const DEFAULT_PORT: u16 = 80;

/// TLS WebSocket port.
pub const DEFAULT_TLS_PORT: u16 = 443;

/// Default client reconnect interval.
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 1000;

// ============================================================================
// KeepAlive
// ============================================================================

/// Keep-alive probing parameters.
///
/// Probing is disabled while `idle_seconds` is zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KeepAlive {
    /// Seconds of silence before the first probe.
    pub idle_seconds: u32,
    /// Unanswered probes tolerated before the connection is dropped.
    pub probe_count: u32,
    /// Seconds between probes.
    pub probe_interval_seconds: u32,
}

impl KeepAlive {
    /// Creates keep-alive parameters.
    #[inline]
    #[must_use]
    pub const fn new(idle_seconds: u32, probe_count: u32, probe_interval_seconds: u32) -> Self {
        Self {
            idle_seconds,
            probe_count,
            probe_interval_seconds,
        }
    }

    /// Returns `true` if probing should be configured on the engine.
    #[inline]
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.idle_seconds != 0
    }
}

// ============================================================================
// ClientOptions
// ============================================================================

/// Options for an outbound connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientOptions {
    /// Remote host name or address.
    pub host: String,
    /// Remote port.
    pub port: u16,
    /// Request path.
    pub path: String,
    /// Sub-protocol to request; [`NULL_PROTOCOL`] requests none.
    pub protocol: String,
    /// Connect over TLS.
    pub use_tls: bool,
    /// WebSocket protocol version, `-1` for latest.
    pub version: i32,
    /// Reconnect automatically after the connection drops.
    pub reconnect: bool,
    /// Minimum milliseconds between reconnect attempts.
    pub reconnect_interval_ms: u64,
    /// Keep-alive probing.
    pub keep_alive: KeepAlive,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            path: "/".to_string(),
            protocol: DEFAULT_PROTOCOL.to_string(),
            use_tls: false,
            version: -1,
            reconnect: true,
            reconnect_interval_ms: DEFAULT_RECONNECT_INTERVAL_MS,
            keep_alive: KeepAlive::new(0, 0, 10),
        }
    }
}

impl ClientOptions {
    /// Creates default options targeting `host`.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    /// Parses a `ws://` or `wss://` URL.
    ///
    /// # Errors
    ///
    /// - [`Error::Url`] if the URL is malformed
    /// - [`Error::Config`] if the scheme is not `ws`/`wss` or there is no host
    pub fn from_url(url: &str) -> Result<Self> {
        let parsed = Url::parse(url)?;

        let use_tls = match parsed.scheme() {
            "ws" => false,
            "wss" => true,
            other => return Err(Error::config(format!("unsupported scheme '{other}'"))),
        };

        let host = parsed
            .host_str()
            .ok_or_else(|| Error::config(format!("no host in '{url}'")))?;

        let port = parsed.port_or_known_default().unwrap_or(if use_tls {
            DEFAULT_TLS_PORT
        } else {
            DEFAULT_PORT
        });

        let path = match parsed.query() {
            Some(query) => format!("{}?{query}", parsed.path()),
            None => parsed.path().to_string(),
        };

        Ok(Self {
            host: host.to_string(),
            port,
            path,
            use_tls,
            ..Default::default()
        })
    }

    /// Parses options from JSON. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the document is malformed.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Returns `host:port/path`, used in logs and errors.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}{}", self.host, self.port, self.path)
    }

    /// Returns the protocol to request, or `None` for [`NULL_PROTOCOL`].
    #[must_use]
    pub fn requested_protocol(&self) -> Option<&str> {
        if self.protocol.is_empty() || self.protocol == NULL_PROTOCOL {
            None
        } else {
            Some(&self.protocol)
        }
    }
}

impl ClientOptions {
    /// Sets the port.
    #[inline]
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the request path.
    #[inline]
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Sets the sub-protocol name.
    #[inline]
    #[must_use]
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    /// Enables or disables TLS.
    #[inline]
    #[must_use]
    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    /// Enables or disables automatic reconnection.
    #[inline]
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Sets the reconnect interval in milliseconds.
    #[inline]
    #[must_use]
    pub fn with_reconnect_interval(mut self, interval_ms: u64) -> Self {
        self.reconnect_interval_ms = interval_ms;
        self
    }

    /// Sets keep-alive parameters.
    #[inline]
    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: KeepAlive) -> Self {
        self.keep_alive = keep_alive;
        self
    }
}

// ============================================================================
// ServerOptions
// ============================================================================

/// Options for a listening server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerOptions {
    /// Listen port. `0` lets the engine pick one.
    pub port: u16,
    /// Primary protocol name.
    pub protocol: String,
    /// Serve over TLS.
    pub use_tls: bool,
    /// Certificate path, read only when `use_tls` is set.
    pub tls_cert_path: PathBuf,
    /// Private key path, read only when `use_tls` is set.
    pub tls_key_path: PathBuf,
    /// Root for HTTP fallback document serving.
    pub document_root: PathBuf,
    /// Keep-alive probing.
    pub keep_alive: KeepAlive,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            protocol: DEFAULT_PROTOCOL.to_string(),
            use_tls: false,
            tls_cert_path: PathBuf::from("ssl/libwebsockets-test-server.pem"),
            tls_key_path: PathBuf::from("ssl/libwebsockets-test-server.key.pem"),
            document_root: PathBuf::from("web"),
            keep_alive: KeepAlive::default(),
        }
    }
}

impl ServerOptions {
    /// Creates default options listening on `port`.
    #[must_use]
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    /// Parses options from JSON. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the document is malformed.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Sets the primary protocol name.
    #[inline]
    #[must_use]
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    /// Enables TLS with the given certificate and key.
    #[inline]
    #[must_use]
    pub fn with_tls(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.use_tls = true;
        self.tls_cert_path = cert.into();
        self.tls_key_path = key.into();
        self
    }

    /// Sets the document root.
    #[inline]
    #[must_use]
    pub fn with_document_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.document_root = root.into();
        self
    }

    /// Sets keep-alive parameters.
    #[inline]
    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: KeepAlive) -> Self {
        self.keep_alive = keep_alive;
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_defaults() {
        let opts = ClientOptions::default();
        assert_eq!(opts.host, "localhost");
        assert_eq!(opts.port, 80);
        assert_eq!(opts.path, "/");
        assert_eq!(opts.protocol, "default");
        assert!(opts.reconnect);
        assert_eq!(opts.reconnect_interval_ms, 1000);
        assert_eq!(opts.keep_alive, KeepAlive::new(0, 0, 10));
        assert!(!opts.keep_alive.is_enabled());
    }

    #[test]
    fn test_server_defaults() {
        let opts = ServerOptions::default();
        assert_eq!(opts.port, 80);
        assert_eq!(opts.protocol, "default");
        assert!(!opts.use_tls);
        assert_eq!(opts.document_root, PathBuf::from("web"));
    }

    #[test]
    fn test_from_url_plain() {
        let opts = ClientOptions::from_url("ws://example.org:9000/chat?room=1").unwrap();
        assert_eq!(opts.host, "example.org");
        assert_eq!(opts.port, 9000);
        assert_eq!(opts.path, "/chat?room=1");
        assert!(!opts.use_tls);
    }

    #[test]
    fn test_from_url_tls_default_port() {
        let opts = ClientOptions::from_url("wss://example.org").unwrap();
        assert_eq!(opts.port, 443);
        assert_eq!(opts.path, "/");
        assert!(opts.use_tls);
    }

    #[test]
    fn test_from_url_rejects_http() {
        let err = ClientOptions::from_url("http://example.org").unwrap_err();
        assert!(err.is_setup_failure());
    }

    #[test]
    fn test_from_json_partial() {
        let opts =
            ClientOptions::from_json_str(r#"{"host":"h","reconnectIntervalMs":250}"#).unwrap();
        assert_eq!(opts.host, "h");
        assert_eq!(opts.reconnect_interval_ms, 250);
        assert_eq!(opts.port, 80);

        let server = ServerOptions::from_json_str(r#"{"port":0,"protocol":"chat"}"#).unwrap();
        assert_eq!(server.port, 0);
        assert_eq!(server.protocol, "chat");
    }

    #[test]
    fn test_requested_protocol() {
        assert_eq!(ClientOptions::default().requested_protocol(), Some("default"));
        let opts = ClientOptions::default().with_protocol(NULL_PROTOCOL);
        assert_eq!(opts.requested_protocol(), None);
    }
}
