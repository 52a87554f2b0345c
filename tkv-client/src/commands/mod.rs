//! # Typed Commands
//!
//! One file per data-structure family. Every method builds its request,
//! validates argument shape, and attaches the matching decoder; all of them
//! return an `Operation` that is already in flight.
//!
//! | family       | file              |
//! |--------------|-------------------|
//! | keyspace     | `generic.rs`      |
//! | strings      | `strings.rs`      |
//! | hashes       | `hashes.rs`       |
//! | lists        | `lists.rs`        |
//! | sorted sets  | `sorted_sets.rs`  |
//!
//! Blocking pops live in `crate::blocking`, cursor scans in `crate::scan`.

mod generic;
mod hashes;
mod lists;
mod sorted_sets;
mod strings;

use crate::error::ClientError;
use crate::operation::Operation;

/// Fails an operation client-side when a variadic argument list is empty.
pub(crate) fn require_non_empty<T, K>(items: &[K], message: &'static str) -> Result<(), Operation<T>>
where
    T: Send + 'static,
{
    if items.is_empty() {
        return Err(Operation::failed(ClientError::InvalidArgument(message)));
    }
    Ok(())
}
