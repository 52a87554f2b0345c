//! List commands: push, pop, `LRANGE`, `LTRIM`, `LLEN`.

use bytes::Bytes;

use crate::command::Command;
use crate::connection::Connection;
use crate::decode;
use crate::operation::Operation;

impl Connection {
    /// Prepends a value; resolves to the new length.
    pub fn lpush(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Operation<i64> {
        self.execute(Command::new("LPUSH").arg(key).arg(value), decode::integer)
    }

    /// Appends a value; resolves to the new length.
    pub fn rpush(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Operation<i64> {
        self.execute(Command::new("RPUSH").arg(key).arg(value), decode::integer)
    }

    /// Removes and returns the head, or `None` for an empty list.
    pub fn lpop(&self, key: impl AsRef<[u8]>) -> Operation<Option<Bytes>> {
        self.execute(Command::new("LPOP").arg(key), decode::optional_bytes)
    }

    /// Removes and returns the tail, or `None` for an empty list.
    pub fn rpop(&self, key: impl AsRef<[u8]>) -> Operation<Option<Bytes>> {
        self.execute(Command::new("RPOP").arg(key), decode::optional_bytes)
    }

    /// Elements between `start` and `stop` inclusive; negative indices
    /// count from the tail.
    pub fn lrange(&self, key: impl AsRef<[u8]>, start: i64, stop: i64) -> Operation<Vec<Bytes>> {
        self.execute(
            Command::new("LRANGE").arg(key).arg_int(start).arg_int(stop),
            decode::bytes_list,
        )
    }

    /// Keeps only the elements between `start` and `stop`. A range that
    /// selects nothing (e.g. `start > stop`) empties the list.
    pub fn ltrim(&self, key: impl AsRef<[u8]>, start: i64, stop: i64) -> Operation<()> {
        self.execute(
            Command::new("LTRIM").arg(key).arg_int(start).arg_int(stop),
            decode::ok,
        )
    }

    /// Length of a list.
    pub fn llen(&self, key: impl AsRef<[u8]>) -> Operation<i64> {
        self.execute(Command::new("LLEN").arg(key), decode::integer)
    }
}
