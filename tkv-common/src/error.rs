//! # Shared Errors
//!
//! Errors raised by the transport-independent data model.

use thiserror::Error;

use crate::codec::Encoding;

/// Result alias for byte codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Failure converting between text and binary strings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The bytes are not a valid sequence under the requested encoding.
    #[error("invalid {encoding} byte sequence at offset {offset}")]
    InvalidBytes { encoding: Encoding, offset: usize },
    /// The text contains a character the encoding cannot represent.
    #[error("character {ch:?} cannot be represented in {encoding}")]
    Unrepresentable { encoding: Encoding, ch: char },
    /// Encoding label did not name a supported encoding.
    #[error("unknown encoding label {0:?}")]
    UnknownEncoding(String),
}

/// Failure parsing a score from its wire form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid score {raw:?}")]
pub struct ScoreParseError {
    /// Raw text that failed to parse (lossy view of the reply bytes).
    pub raw: String,
}
