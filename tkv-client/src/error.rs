//! # Client Errors
//!
//! Purpose: Separate the three ways a command can fail (transport, store,
//! decode) so callers can tell a broken connection from a rejected request
//! from a reply of the wrong shape.
//!
//! ## Design Principles
//! 1. **Failure vs. Empty**: Unmet write conditions and missing keys are
//!    values (`false`, `None`), never errors.
//! 2. **Cloneable Transport Errors**: One socket failure is fanned out to
//!    every pending operation, so `TransportError` is `Clone`.
//! 3. **Raw Store Messages**: Store errors keep the exact bytes sent by the
//!    server.

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

use tkv_common::CodecError;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Connection-level failure. Fatal to every operation in flight on the
/// connection; never retried by this crate.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Network or IO failure while reading/writing.
    #[error("io error: {0}")]
    Io(Arc<io::Error>),
    /// The connection was closed locally or by the peer.
    #[error("connection closed")]
    Closed,
    /// RESP2 framing error, or a reply with no matching request.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Address could not be resolved or parsed.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    /// Connect did not finish within the configured timeout.
    #[error("connect timed out")]
    ConnectTimeout,
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        TransportError::Io(Arc::new(err))
    }
}

/// The store rejected a well-formed request (wrong type, syntax, ...).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("store error: {}", String::from_utf8_lossy(.message))]
pub struct StoreError {
    /// Error line exactly as sent by the store, without the `-` marker.
    pub message: Bytes,
}

impl StoreError {
    /// Error kind prefix, e.g. `WRONGTYPE` or `ERR`.
    pub fn kind(&self) -> &[u8] {
        let end = self
            .message
            .iter()
            .position(|&b| b == b' ')
            .unwrap_or(self.message.len());
        &self.message[..end]
    }
}

/// A reply did not have the shape the command's decoder expects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unexpected reply: expected {expected}, found {found}")]
pub struct DecodeError {
    /// Shape the decoder expected.
    pub expected: &'static str,
    /// Short description of what arrived instead.
    pub found: String,
}

/// Errors surfaced by client operations.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Connection failure.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Store-reported error reply.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Reply shape mismatch.
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// Text conversion failure in a caller-side mapping.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// Arguments rejected before anything was sent.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

impl ClientError {
    /// Returns the store error, if this is one.
    pub fn as_store(&self) -> Option<&StoreError> {
        match self {
            ClientError::Store(err) => Some(err),
            _ => None,
        }
    }

    /// True when the connection itself failed.
    pub fn is_transport(&self) -> bool {
        matches!(self, ClientError::Transport(_))
    }
}
