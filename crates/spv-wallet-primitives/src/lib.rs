//! SPV wallet primitives.
//!
//! Foundational building blocks shared by the script, transaction and
//! engine crates:
//! - Hash functions (SHA-256, SHA-256d, RIPEMD-160, Hash160)
//! - Chain hash type for transaction identifiers
//! - Variable-length integers and a little-endian reader/writer
//! - Base58Check encoding/decoding

pub mod base58;
pub mod chainhash;
pub mod hash;
pub mod util;

mod error;
pub use error::PrimitivesError;
