//! Hash commands: `HSET`, `HGET`, `HGETALL`, `HDEL`, `HLEN`.

use bytes::Bytes;

use tkv_common::FieldValue;

use crate::command::Command;
use crate::commands::require_non_empty;
use crate::connection::Connection;
use crate::decode;
use crate::operation::Operation;

impl Connection {
    /// Sets one hash field.
    ///
    /// Resolves to 1 when the field was created and 0 when an existing
    /// field was overwritten, whether or not the value changed.
    pub fn hset(&self, key: impl AsRef<[u8]>, field: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Operation<i64> {
        self.execute(Command::new("HSET").arg(key).arg(field).arg(value), decode::integer)
    }

    /// Fetches one hash field.
    pub fn hget(&self, key: impl AsRef<[u8]>, field: impl AsRef<[u8]>) -> Operation<Option<Bytes>> {
        self.execute(Command::new("HGET").arg(key).arg(field), decode::optional_bytes)
    }

    /// Fetches every field/value pair of a hash.
    pub fn hgetall(&self, key: impl AsRef<[u8]>) -> Operation<Vec<FieldValue>> {
        self.execute(Command::new("HGETALL").arg(key), decode::field_values)
    }

    /// Removes fields; resolves to the number actually removed.
    pub fn hdel<F: AsRef<[u8]>>(&self, key: impl AsRef<[u8]>, fields: &[F]) -> Operation<i64> {
        if let Err(op) = require_non_empty(fields, "hdel requires at least one field") {
            return op;
        }
        self.execute(Command::new("HDEL").arg(key).args(fields), decode::integer)
    }

    /// Number of fields in a hash.
    pub fn hlen(&self, key: impl AsRef<[u8]>) -> Operation<i64> {
        self.execute(Command::new("HLEN").arg(key), decode::integer)
    }
}
