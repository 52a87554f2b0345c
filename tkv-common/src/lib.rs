// tkv-common - Shared data model for the tkv client
//
// Transport-independent types: the byte codec, sorted-set scores, command
// option enums and the errors they can raise.

pub mod codec;
pub mod error;
pub mod score;
pub mod types;

// Re-export for convenience
pub use codec::*;
pub use error::*;
pub use score::*;
pub use types::*;
