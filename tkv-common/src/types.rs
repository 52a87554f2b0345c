//! # Command Option and Result Types
//!
//! Typed arguments and records shared by the command layer: write options,
//! sorted-set modes, blocking timeouts, scan options, and the small records
//! that pair keys, fields and members with their values.
//!
//! ## Design Principles
//!
//! 1. **Tagged Choices**: Mutually exclusive protocol flags are enum variants,
//!    so invalid combinations (e.g. `NX` with `XX`) cannot be expressed.
//! 2. **No Magic Zero**: An indefinite blocking timeout is its own variant;
//!    a `BlockTimeout` can never silently mean "do not wait".
//! 3. **Binary Records**: Every key, field, member and value is `Bytes`.

use std::num::NonZeroU64;
use std::time::Duration;

use bytes::Bytes;

use crate::score::Score;

/// Expiration attached to a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Expire {
    /// Relative expiry in seconds (`EX`).
    Seconds(u64),
    /// Relative expiry in milliseconds (`PX`).
    Milliseconds(u64),
    /// Absolute unix time in seconds (`EXAT`).
    UnixSeconds(u64),
    /// Absolute unix time in milliseconds (`PXAT`).
    UnixMilliseconds(u64),
    /// Retain the TTL already associated with the key (`KEEPTTL`).
    KeepTtl,
}

impl Expire {
    /// Builds a relative expiry, choosing milliseconds when the duration is
    /// not a whole number of seconds.
    pub fn after(duration: Duration) -> Self {
        if duration.subsec_nanos() == 0 {
            Expire::Seconds(duration.as_secs())
        } else {
            Expire::Milliseconds(ceil_millis(duration))
        }
    }
}

/// Whole milliseconds in `duration`, rounded up.
///
/// A non-zero duration never becomes `0`, which the store would treat as
/// already expired.
pub fn ceil_millis(duration: Duration) -> u64 {
    let millis = duration.as_millis() + u128::from(duration.subsec_nanos() % 1_000_000 != 0);
    u64::try_from(millis).unwrap_or(u64::MAX)
}

/// Existence precondition for a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SetCondition {
    /// Write regardless of existence.
    #[default]
    Always,
    /// Write only when the key already exists (`XX`).
    IfExists,
    /// Write only when the key does not exist (`NX`).
    IfAbsent,
}

/// Options for `set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetOptions {
    /// Optional expiration directive.
    pub expire: Option<Expire>,
    /// Existence precondition.
    pub condition: SetCondition,
}

impl SetOptions {
    /// Options with an expiration and no precondition.
    pub fn expire(expire: Expire) -> Self {
        SetOptions {
            expire: Some(expire),
            condition: SetCondition::Always,
        }
    }

    /// Options with a precondition and no expiration.
    pub fn condition(condition: SetCondition) -> Self {
        SetOptions {
            expire: None,
            condition,
        }
    }
}

/// Write mode for `zadd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ZaddWrite {
    /// Insert new members and update existing ones.
    #[default]
    Always,
    /// Only update members that already exist (`XX`).
    IfExists,
    /// Only insert members that do not exist yet (`NX`).
    IfAbsent,
}

/// Which count `zadd` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ZaddReturn {
    /// Number of newly added members.
    #[default]
    Added,
    /// Number of added or updated members (`CH`).
    Changed,
}

/// `LIMIT offset count` clause for range-by-score queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Limit {
    /// Number of matching elements to skip.
    pub offset: i64,
    /// Maximum number of elements to return; negative means all.
    pub count: i64,
}

/// Server-side timeout for blocking pops.
///
/// There is no zero-second variant: a non-blocking pop is
/// `lpop`/`rpop`, while `Indefinite` encodes the protocol's `0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockTimeout {
    /// Give up after this many seconds.
    Seconds(NonZeroU64),
    /// Block until an element becomes available.
    Indefinite,
}

impl BlockTimeout {
    /// Builds a bounded timeout; `None` when `seconds` is zero.
    pub fn seconds(seconds: u64) -> Option<Self> {
        NonZeroU64::new(seconds).map(BlockTimeout::Seconds)
    }

    /// Seconds value written on the wire (`0` means indefinite).
    pub fn wire_seconds(self) -> u64 {
        match self {
            BlockTimeout::Seconds(seconds) => seconds.get(),
            BlockTimeout::Indefinite => 0,
        }
    }
}

/// Options shared by all scan variants.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScanOptions {
    /// Glob-style `MATCH` pattern.
    pub pattern: Option<Bytes>,
    /// `COUNT` hint for the batch size.
    pub count: Option<u64>,
}

impl ScanOptions {
    /// Options with a `MATCH` pattern.
    pub fn matching(pattern: impl Into<Bytes>) -> Self {
        ScanOptions {
            pattern: Some(pattern.into()),
            count: None,
        }
    }

    /// Sets the `COUNT` hint.
    pub fn with_count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }
}

/// Element popped by a blocking list pop, with the list it came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyValue {
    /// List key that yielded the element.
    pub key: Bytes,
    /// Popped element.
    pub value: Bytes,
}

/// Hash field and its value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldValue {
    /// Field name.
    pub field: Bytes,
    /// Field value.
    pub value: Bytes,
}

/// Member popped by a blocking sorted-set pop, with its key and score.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyMemberScore {
    /// Sorted-set key that yielded the member.
    pub key: Bytes,
    /// Popped member.
    pub member: Bytes,
    /// Score of the popped member.
    pub score: Score,
}

/// TTL state of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Key is missing or already expired.
    Missing,
    /// Key exists without expiration.
    NoExpiry,
    /// Key expires after the provided duration.
    ExpiresIn(Duration),
}
