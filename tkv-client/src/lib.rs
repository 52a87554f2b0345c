//! # tkv Async Client
//!
//! Purpose: Provide a typed, asynchronous client for a Redis-compatible
//! (RESP2) key-value store, covering strings, hashes, lists, sorted sets,
//! blocking pops and cursor scans.
//!
//! ## Design Principles
//! 1. **One Primitive**: Every command is an `Operation<T>`: a future that is
//!    already in flight, with at-most-once completion and idempotent
//!    cancellation.
//! 2. **Pipelining by Default**: One connection carries any number of
//!    outstanding commands; replies are paired with requests in FIFO order.
//! 3. **Typed Edges**: Replies are decoded per command into concrete types;
//!    a reply of the wrong shape is an error, never a silent default.
//! 4. **Bytes In, Bytes Out**: Keys and values are binary. Text conversion
//!    goes through `tkv_common::codec` with an explicit encoding.
//!
//! ## Usage
//!
//! ```text
//! let conn = Connection::connect(&ClientConfig::new("127.0.0.1:6379")).await?;
//! conn.set("k", "v", SetOptions::default()).await?;
//! let value = conn.get("k").await?;
//! ```

mod blocking;
mod command;
mod commands;
mod config;
mod connection;
pub mod decode;
mod error;
mod operation;
pub mod resp;
mod scan;

pub use command::Command;
pub use config::ClientConfig;
pub use connection::Connection;
pub use error::{ClientError, ClientResult, DecodeError, StoreError, TransportError};
pub use operation::{CancelToken, Operation};
pub use resp::Reply;
pub use scan::{ScanBatch, ScanCursor, ScanStream};

// Re-export the shared data model so callers need a single dependency.
pub use tkv_common::{
    flatten_scored, to_bytes, to_text, BlockTimeout, CodecError, Encoding, Expire, FieldValue, KeyMemberScore,
    KeyValue, LexBound, Limit, MemberScore, ScanOptions, Score, ScoreBound, ScoreParseError, SetCondition,
    SetOptions, Ttl, ZaddReturn, ZaddWrite, MAX_SAFE_INTEGER,
};
