//! # Reply Decoders
//!
//! Purpose: Turn an untyped `Reply` into the typed result of one command
//! shape.
//!
//! ## Design Principles
//! 1. **One Function per Shape**: Commands pick a decoder; nothing inspects
//!    reply types at call sites.
//! 2. **Never Coerce**: A reply of the wrong shape is a `DecodeError`, even
//!    when a default value would be plausible.
//! 3. **Nil Is Data**: Wherever the store uses nil to mean "nothing", the
//!    decoder returns `None`/`false` instead of failing.
//!
//! Store error replies never reach these functions; `Operation` turns them
//! into `StoreError` first.

use std::time::Duration;

use bytes::Bytes;

use tkv_common::{FieldValue, KeyMemberScore, KeyValue, MemberScore, Score, Ttl};

use crate::error::{ClientResult, DecodeError};
use crate::resp::Reply;

fn mismatch<T>(expected: &'static str, found: &Reply) -> ClientResult<T> {
    Err(DecodeError {
        expected,
        found: found.describe(),
    }
    .into())
}

/// `+OK`.
pub fn ok(reply: Reply) -> ClientResult<()> {
    match reply {
        Reply::Status(ref text) if &text[..] == b"OK" => Ok(()),
        other => mismatch("status OK", &other),
    }
}

/// `+OK` when a conditional write happened, nil when the condition was not
/// met.
pub fn conditional_ok(reply: Reply) -> ClientResult<bool> {
    match reply {
        Reply::Nil => Ok(false),
        other => ok(other).map(|()| true),
    }
}

/// Integer reply.
pub fn integer(reply: Reply) -> ClientResult<i64> {
    match reply {
        Reply::Integer(value) => Ok(value),
        other => mismatch("integer", &other),
    }
}

/// Integer reply restricted to `0`/`1`.
pub fn boolean(reply: Reply) -> ClientResult<bool> {
    match reply {
        Reply::Integer(0) => Ok(false),
        Reply::Integer(1) => Ok(true),
        other => mismatch("integer 0 or 1", &other),
    }
}

/// Integer reply, or nil for "no such element".
pub fn optional_integer(reply: Reply) -> ClientResult<Option<i64>> {
    match reply {
        Reply::Nil => Ok(None),
        Reply::Integer(value) => Ok(Some(value)),
        other => mismatch("integer or nil", &other),
    }
}

/// Bulk string or status text.
pub fn bytes(reply: Reply) -> ClientResult<Bytes> {
    match reply {
        Reply::Bulk(data) | Reply::Status(data) => Ok(data),
        other => mismatch("bulk string", &other),
    }
}

/// Bulk string, or nil for a missing key/field/element.
pub fn optional_bytes(reply: Reply) -> ClientResult<Option<Bytes>> {
    match reply {
        Reply::Nil => Ok(None),
        Reply::Bulk(data) => Ok(Some(data)),
        other => mismatch("bulk string or nil", &other),
    }
}

/// Array of bulk strings.
pub fn bytes_list(reply: Reply) -> ClientResult<Vec<Bytes>> {
    let items = array(reply, "array of bulk strings")?;
    items.into_iter().map(bulk_item).collect()
}

/// Array of bulk strings or nils, one slot per requested key.
pub fn optional_bytes_list(reply: Reply) -> ClientResult<Vec<Option<Bytes>>> {
    let items = array(reply, "array of bulk strings or nils")?;
    items.into_iter().map(optional_bytes).collect()
}

/// Flat `field value field value ...` array.
pub fn field_values(reply: Reply) -> ClientResult<Vec<FieldValue>> {
    let items = array(reply, "array of field/value pairs")?;
    field_value_items(items)
}

/// Flat `member score member score ...` array, order preserved.
pub fn member_scores(reply: Reply) -> ClientResult<Vec<MemberScore>> {
    let items = array(reply, "array of member/score pairs")?;
    member_score_items(items)
}

/// Score as a bulk string.
pub fn score(reply: Reply) -> ClientResult<Score> {
    match reply {
        Reply::Bulk(ref data) => parse_score(data, &reply),
        other => mismatch("score", &other),
    }
}

/// Score as a bulk string, or nil when the member is absent.
pub fn optional_score(reply: Reply) -> ClientResult<Option<Score>> {
    match reply {
        Reply::Nil => Ok(None),
        other => score(other).map(Some),
    }
}

/// `[key, value]` from a blocking list pop, or nil on timeout.
pub fn optional_key_value(reply: Reply) -> ClientResult<Option<KeyValue>> {
    let [key, value] = match reply {
        Reply::Nil => return Ok(None),
        Reply::Array(items) => fixed::<2>(items, "[key, value] or nil")?,
        other => return mismatch("[key, value] or nil", &other),
    };
    Ok(Some(KeyValue {
        key: bulk_item(key)?,
        value: bulk_item(value)?,
    }))
}

/// `[key, member, score]` from a blocking sorted-set pop, or nil on timeout.
pub fn optional_key_member_score(reply: Reply) -> ClientResult<Option<KeyMemberScore>> {
    let [key, member, raw_score] = match reply {
        Reply::Nil => return Ok(None),
        Reply::Array(items) => fixed::<3>(items, "[key, member, score] or nil")?,
        other => return mismatch("[key, member, score] or nil", &other),
    };
    Ok(Some(KeyMemberScore {
        key: bulk_item(key)?,
        member: bulk_item(member)?,
        score: score(raw_score)?,
    }))
}

/// `TTL` integer: `-2` missing, `-1` no expiry, otherwise seconds left.
pub fn ttl(reply: Reply) -> ClientResult<Ttl> {
    match reply {
        Reply::Integer(-2) => Ok(Ttl::Missing),
        Reply::Integer(-1) => Ok(Ttl::NoExpiry),
        Reply::Integer(value) if value >= 0 => Ok(Ttl::ExpiresIn(Duration::from_secs(value as u64))),
        other => mismatch("ttl integer", &other),
    }
}

/// Splits a scan reply into its next cursor and raw element array.
pub fn scan_page(reply: Reply) -> ClientResult<(Bytes, Vec<Reply>)> {
    let [cursor, elements] = match reply {
        Reply::Array(items) => fixed::<2>(items, "[cursor, elements]")?,
        other => return mismatch("[cursor, elements]", &other),
    };
    match elements {
        Reply::Array(elements) => Ok((bulk_item(cursor)?, elements)),
        other => mismatch("scan element array", &other),
    }
}

/// Elements of a `SCAN` page.
pub fn key_items(items: Vec<Reply>) -> ClientResult<Vec<Bytes>> {
    items.into_iter().map(bulk_item).collect()
}

/// Pairs a flat array positionally: even index = field, odd = value.
pub fn field_value_items(items: Vec<Reply>) -> ClientResult<Vec<FieldValue>> {
    Ok(pairs(items, "even number of field/value elements")?
        .into_iter()
        .map(|(field, value)| FieldValue { field, value })
        .collect())
}

/// Pairs a flat array positionally: even index = member, odd = score.
pub fn member_score_items(items: Vec<Reply>) -> ClientResult<Vec<MemberScore>> {
    let mut out = Vec::with_capacity(items.len() / 2);
    for (member, raw_score) in pairs(items, "even number of member/score elements")? {
        let score = Score::parse(&raw_score).map_err(|err| DecodeError {
            expected: "score",
            found: format!("{:?}", err.raw),
        })?;
        out.push(MemberScore { member, score });
    }
    Ok(out)
}

fn array(reply: Reply, expected: &'static str) -> ClientResult<Vec<Reply>> {
    match reply {
        Reply::Array(items) => Ok(items),
        other => mismatch(expected, &other),
    }
}

fn fixed<const N: usize>(items: Vec<Reply>, expected: &'static str) -> ClientResult<[Reply; N]> {
    <[Reply; N]>::try_from(items).or_else(|items| mismatch(expected, &Reply::Array(items)))
}

fn bulk_item(reply: Reply) -> ClientResult<Bytes> {
    match reply {
        Reply::Bulk(data) => Ok(data),
        other => mismatch("bulk string element", &other),
    }
}

fn pairs(items: Vec<Reply>, expected: &'static str) -> ClientResult<Vec<(Bytes, Bytes)>> {
    if items.len() % 2 != 0 {
        return Err(DecodeError {
            expected,
            found: format!("{} elements", items.len()),
        }
        .into());
    }
    let mut out = Vec::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(first), Some(second)) = (iter.next(), iter.next()) {
        out.push((bulk_item(first)?, bulk_item(second)?));
    }
    Ok(out)
}

fn parse_score(data: &[u8], reply: &Reply) -> ClientResult<Score> {
    Score::parse(data).or_else(|_| mismatch("score", reply))
}
