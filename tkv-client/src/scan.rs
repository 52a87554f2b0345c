//! # Scan Streams
//!
//! Purpose: Walk the keyspace (`SCAN`), a hash (`HSCAN`) or a sorted set
//! (`ZSCAN`) one cursor page at a time as a lazy `futures::Stream`.
//!
//! ## Design Principles
//! 1. **Lazy**: Nothing is sent until the first poll; each later poll sends
//!    exactly one request with the cursor returned by the previous page.
//! 2. **Last Page Is Yielded**: The page that carries the complete cursor
//!    (`"0"`) is still produced, even when empty, and only then does the
//!    stream end.
//! 3. **Errors End the Stream**: A failure is yielded once as `Some(Err)`,
//!    after which the stream returns `None`.
//!
//! ## Consistency
//!
//! Guarantees are the store's: every element present for the whole scan is
//! returned at least once, elements may repeat, and elements added or
//! removed mid-scan may or may not appear. Pages are not deduplicated here.
//!
//! ```text
//! Idle("0") --poll--> InFlight --page(cursor != "0")--> Idle(cursor)
//!                        |----page(cursor == "0")----> Done
//!                        '----error------------------> Done
//! ```

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::{FusedStream, Stream};
use tracing::trace;

use tkv_common::{FieldValue, MemberScore, ScanOptions};

use crate::command::Command;
use crate::connection::Connection;
use crate::decode;
use crate::error::{ClientError, ClientResult};
use crate::operation::Operation;
use crate::resp::Reply;

/// Opaque continuation returned by the store with each page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanCursor(Bytes);

impl ScanCursor {
    pub(crate) fn start() -> Self {
        ScanCursor(Bytes::from_static(b"0"))
    }

    /// True when the scan has visited the whole collection.
    pub fn is_complete(&self) -> bool {
        &self.0[..] == b"0"
    }

    /// Raw cursor bytes as sent by the store.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// One page of a scan together with the cursor that follows it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanBatch<T> {
    pub items: Vec<T>,
    pub cursor: ScanCursor,
}

type ItemDecoder<T> = fn(Vec<Reply>) -> ClientResult<Vec<T>>;

enum ScanState<T> {
    Idle(ScanCursor),
    InFlight(Operation<ScanBatch<T>>),
    Done,
}

/// Lazy cursor walk; see the module docs for termination rules.
#[must_use = "streams do nothing unless polled"]
pub struct ScanStream<'a, T> {
    conn: &'a Connection,
    name: &'static str,
    key: Option<Bytes>,
    options: ScanOptions,
    items: ItemDecoder<T>,
    state: ScanState<T>,
}

impl<'a, T: Send + 'static> ScanStream<'a, T> {
    fn new(
        conn: &'a Connection,
        name: &'static str,
        key: Option<Bytes>,
        options: ScanOptions,
        items: ItemDecoder<T>,
    ) -> Self {
        ScanStream {
            conn,
            name,
            key,
            options,
            items,
            state: ScanState::Idle(ScanCursor::start()),
        }
    }

    /// True once the stream has produced its final item.
    pub fn is_terminated(&self) -> bool {
        matches!(self.state, ScanState::Done)
    }

    fn request(&self, cursor: &ScanCursor) -> Operation<ScanBatch<T>> {
        let mut command = Command::new(self.name);
        if let Some(key) = &self.key {
            command = command.arg(key);
        }
        command = command.arg(cursor.as_bytes());
        if let Some(pattern) = &self.options.pattern {
            command = command.arg("MATCH").arg(pattern);
        }
        if let Some(count) = self.options.count {
            command = command.arg("COUNT").arg_uint(count);
        }
        trace!(
            conn = self.conn.id(),
            command = self.name,
            cursor = %String::from_utf8_lossy(cursor.as_bytes()),
            "scan page"
        );

        let items = self.items;
        self.conn.execute(command, move |reply| {
            let (cursor, raw) = decode::scan_page(reply)?;
            Ok(ScanBatch {
                items: items(raw)?,
                cursor: ScanCursor(cursor),
            })
        })
    }
}

impl<T: Send + 'static> Stream for ScanStream<'_, T> {
    type Item = Result<ScanBatch<T>, ClientError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let ScanState::Idle(cursor) = &this.state {
            let op = this.request(cursor);
            this.state = ScanState::InFlight(op);
        }
        let op = match &mut this.state {
            ScanState::InFlight(op) => op,
            ScanState::Idle(_) | ScanState::Done => return Poll::Ready(None),
        };

        let result = futures::ready!(Pin::new(op).poll(cx));
        this.state = match &result {
            Ok(batch) if !batch.cursor.is_complete() => ScanState::Idle(batch.cursor.clone()),
            _ => ScanState::Done,
        };
        Poll::Ready(Some(result))
    }
}

impl<T: Send + 'static> FusedStream for ScanStream<'_, T> {
    fn is_terminated(&self) -> bool {
        ScanStream::is_terminated(self)
    }
}

impl Connection {
    /// Iterates keys, optionally filtered by a glob `MATCH` pattern.
    pub fn scan(&self, options: ScanOptions) -> ScanStream<'_, Bytes> {
        ScanStream::new(self, "SCAN", None, options, decode::key_items)
    }

    /// Iterates the field/value pairs of a hash.
    pub fn hscan(&self, key: impl AsRef<[u8]>, options: ScanOptions) -> ScanStream<'_, FieldValue> {
        let key = Bytes::copy_from_slice(key.as_ref());
        ScanStream::new(self, "HSCAN", Some(key), options, decode::field_value_items)
    }

    /// Iterates the member/score pairs of a sorted set.
    pub fn zscan(&self, key: impl AsRef<[u8]>, options: ScanOptions) -> ScanStream<'_, MemberScore> {
        let key = Bytes::copy_from_slice(key.as_ref());
        ScanStream::new(self, "ZSCAN", Some(key), options, decode::member_score_items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_zero_is_complete() {
        assert!(ScanCursor::start().is_complete());
        assert!(!ScanCursor(Bytes::from_static(b"17")).is_complete());
        assert!(!ScanCursor(Bytes::from_static(b"00")).is_complete());
        assert_eq!(ScanCursor(Bytes::from_static(b"42")).as_bytes(), b"42");
    }
}
