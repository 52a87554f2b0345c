//! Keyspace commands: `DEL`, `EXISTS`, `KEYS`, `EXPIRE`, `TTL`, `PING`.

use std::time::Duration;

use bytes::Bytes;

use tkv_common::{ceil_millis, Ttl};

use crate::command::Command;
use crate::commands::require_non_empty;
use crate::connection::Connection;
use crate::decode;
use crate::operation::Operation;

impl Connection {
    /// Deletes `keys`.
    ///
    /// An empty key list completes immediately without a round trip.
    pub fn del<K: AsRef<[u8]>>(&self, keys: &[K]) -> Operation<()> {
        if keys.is_empty() {
            return Operation::ready(());
        }
        self.execute(Command::new("DEL").args(keys), |reply| {
            decode::integer(reply).map(|_| ())
        })
    }

    /// Counts how many of `keys` exist (duplicates counted twice).
    pub fn exists<K: AsRef<[u8]>>(&self, keys: &[K]) -> Operation<i64> {
        if let Err(op) = require_non_empty(keys, "exists requires at least one key") {
            return op;
        }
        self.execute(Command::new("EXISTS").args(keys), decode::integer)
    }

    /// Lists keys matching a glob pattern. Order is unspecified.
    pub fn keys(&self, pattern: impl AsRef<[u8]>) -> Operation<Vec<Bytes>> {
        self.execute(Command::new("KEYS").arg(pattern), decode::bytes_list)
    }

    /// Sets a time-to-live on a key. Returns `true` when the TTL was set.
    ///
    /// Whole seconds use `EXPIRE`; anything finer uses `PEXPIRE`, rounded up
    /// to the next millisecond.
    pub fn expire(&self, key: impl AsRef<[u8]>, ttl: Duration) -> Operation<bool> {
        let command = if ttl.subsec_nanos() == 0 {
            Command::new("EXPIRE").arg(key).arg_uint(ttl.as_secs())
        } else {
            Command::new("PEXPIRE").arg(key).arg_uint(ceil_millis(ttl))
        };
        self.execute(command, decode::boolean)
    }

    /// Returns TTL status for a key.
    pub fn ttl(&self, key: impl AsRef<[u8]>) -> Operation<Ttl> {
        self.execute(Command::new("TTL").arg(key), decode::ttl)
    }

    /// Pings the server. Returns `PONG` or the echoed payload.
    pub fn ping(&self, payload: Option<&[u8]>) -> Operation<Bytes> {
        let command = match payload {
            Some(data) => Command::new("PING").arg(data),
            None => Command::new("PING"),
        };
        self.execute(command, decode::bytes)
    }
}
