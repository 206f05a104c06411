#![deny(missing_docs)]

//! SPV wallet - complete engine.
//!
//! Re-exports all SPV wallet components for convenient single-crate usage.

pub use spv_wallet_arc as arc;
pub use spv_wallet_engine as engine;
pub use spv_wallet_paymail as paymail;
pub use spv_wallet_primitives as primitives;
pub use spv_wallet_script as script;
pub use spv_wallet_transaction as transaction;

pub use spv_wallet_engine::{DraftConfig, Engine, EngineConfig, EngineError, OutputSpec};
