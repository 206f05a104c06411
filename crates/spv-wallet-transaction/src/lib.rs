//! Transaction model for the SPV wallet engine.
//!
//! Provides the `Transaction` type with its wire codec, the Extended Format
//! (EF) serialization preferred by ARC, and BEEF V1 assembly for paymail
//! receivers that want ancestry alongside the transaction.

pub mod beef;
pub mod input;
pub mod output;
pub mod transaction;

mod error;
pub use beef::Beef;
pub use error::TransactionError;
pub use input::TransactionInput;
pub use output::TransactionOutput;
pub use transaction::Transaction;

#[cfg(test)]
mod tests;
