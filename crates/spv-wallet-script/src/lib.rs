//! Script handling for the SPV wallet engine.
//!
//! Provides the `Script` type with push-data encoding and classification,
//! the opcode constants needed to build and recognise standard locking
//! scripts, and P2PKH address parsing/encoding.

pub mod address;
pub mod opcodes;
pub mod script;

mod error;
pub use address::{Address, Network};
pub use error::ScriptError;
pub use script::{Script, ScriptType};
