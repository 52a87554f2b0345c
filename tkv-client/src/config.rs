//! # Client Configuration
//!
//! Connection parameters supplied by the host program. The crate never reads
//! files or the environment; `ClientConfig` derives `Deserialize` so the host
//! can load it from whatever format it already uses.

use std::time::Duration;

use serde::Deserialize;

/// Configuration for a connection and the extra sessions it opens for
/// blocking pops.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Optional TCP connect timeout in milliseconds.
    pub connect_timeout_ms: Option<u64>,
    /// Disable Nagle's algorithm on the socket.
    pub nodelay: bool,
    /// Initial capacity of the reply buffer in bytes.
    pub read_buffer_capacity: usize,
}

impl ClientConfig {
    /// Creates a configuration for `addr` with default settings.
    pub fn new(addr: impl Into<String>) -> Self {
        ClientConfig {
            addr: addr.into(),
            ..ClientConfig::default()
        }
    }

    /// Connect timeout as a `Duration`.
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            addr: "127.0.0.1:6379".to_string(),
            connect_timeout_ms: None,
            nodelay: true,
            read_buffer_capacity: 8 * 1024,
        }
    }
}
