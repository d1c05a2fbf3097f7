// CBOR (RFC 8949) well-formedness reader.
//
// This is the decoder the crate exports over the C ABI (see `ffi`) and the
// default implementation under test. It validates one complete data item
// without materialising a value tree.
//
// # Modules
//
// - `head`: Initial byte and argument parsing
// - `reader`: Nested item validation with depth and strictness limits

pub mod head;
pub mod reader;

pub use head::{Argument, Head, Major};
pub use reader::{Limits, ReadError, Reader, Strictness, read};

/// Maximum nesting level accepted by the reader.
pub const MAX_NESTING_LEVEL: usize = 64;
