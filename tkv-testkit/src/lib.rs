// tkv-testkit - Test servers for the tkv client
//
// An in-memory store speaking the client's RESP2 command subset, a scripted
// single-connection fake server for wire-level assertions, and a tracing
// hook for test output.

pub mod frame;
pub mod scripted;
pub mod server;
pub mod store;

pub use frame::{Args, Frame};
pub use scripted::{Action, ScriptedServer};
pub use server::{serve_stream, StoreServer};
pub use store::Store;

use tracing_subscriber::EnvFilter;

/// Installs a test-friendly subscriber once; later calls are no-ops.
///
/// Honours `RUST_LOG`, defaulting to `warn`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
