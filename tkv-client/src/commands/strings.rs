//! String commands: `GET`, `SET`, `INCR`, `INCRBY`, `MGET`.

use bytes::Bytes;

use tkv_common::{Expire, SetCondition, SetOptions};

use crate::command::Command;
use crate::commands::require_non_empty;
use crate::connection::Connection;
use crate::decode;
use crate::operation::Operation;

impl Connection {
    /// Fetches a value by key.
    ///
    /// Returns `None` when the key is missing.
    pub fn get(&self, key: impl AsRef<[u8]>) -> Operation<Option<Bytes>> {
        self.execute(Command::new("GET").arg(key), decode::optional_bytes)
    }

    /// Sets a value, with optional expiry and existence precondition.
    ///
    /// Resolves to `true` when the value was written and `false` when an
    /// `IfExists`/`IfAbsent` condition was not met. An unmet condition is
    /// not an error.
    pub fn set(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>, options: SetOptions) -> Operation<bool> {
        let mut command = Command::new("SET").arg(key).arg(value);
        command = match options.condition {
            SetCondition::Always => command,
            SetCondition::IfExists => command.flag_if(true, "XX"),
            SetCondition::IfAbsent => command.flag_if(true, "NX"),
        };
        command = match options.expire {
            None => command,
            Some(Expire::Seconds(n)) => command.arg("EX").arg_uint(n),
            Some(Expire::Milliseconds(n)) => command.arg("PX").arg_uint(n),
            Some(Expire::UnixSeconds(n)) => command.arg("EXAT").arg_uint(n),
            Some(Expire::UnixMilliseconds(n)) => command.arg("PXAT").arg_uint(n),
            Some(Expire::KeepTtl) => command.arg("KEEPTTL"),
        };

        match options.condition {
            // Without a condition the store always answers OK; nil would be drift.
            SetCondition::Always => self.execute(command, |reply| decode::ok(reply).map(|()| true)),
            SetCondition::IfExists | SetCondition::IfAbsent => self.execute(command, decode::conditional_ok),
        }
    }

    /// Increments the integer at `key` by one, creating it at 0 first.
    pub fn incr(&self, key: impl AsRef<[u8]>) -> Operation<i64> {
        self.execute(Command::new("INCR").arg(key), decode::integer)
    }

    /// Increments the integer at `key` by `delta`.
    pub fn incr_by(&self, key: impl AsRef<[u8]>, delta: i64) -> Operation<i64> {
        self.execute(Command::new("INCRBY").arg(key).arg_int(delta), decode::integer)
    }

    /// Fetches several keys; one slot per key, in request order.
    pub fn mget<K: AsRef<[u8]>>(&self, keys: &[K]) -> Operation<Vec<Option<Bytes>>> {
        if let Err(op) = require_non_empty(keys, "mget requires at least one key") {
            return op;
        }
        self.execute(Command::new("MGET").args(keys), decode::optional_bytes_list)
    }
}
