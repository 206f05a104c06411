#![deny(missing_docs)]

//! # spv-wallet-engine
//!
//! Draft-transaction engine for an SPV wallet. It turns payment requests
//! into funded, fee-correct unsigned transactions, holds the UTXOs they
//! spend, records the signed result and sees it through P2P delivery,
//! broadcast and mining.
//!
//! The flow for one payment:
//!
//! 1. [`Engine::build_draft`] resolves the outputs (addresses, paymails,
//!    scripts, data), reserves inputs and settles fee and change.
//! 2. An external [`TransactionSigner`] signs the draft.
//! 3. [`Engine::record`] checks the signed transaction against the draft,
//!    spends its inputs, credits known outputs, then notifies P2P receivers
//!    and broadcasts.
//!
//! Storage is behind the [`Datastore`] trait; [`MemoryStore`] is provided.

pub mod builder;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod fee;
pub mod model;
pub mod outputs;
pub mod recorder;
pub mod reservation;
pub mod resolver;
pub mod signer;
pub mod store;
pub mod tasks;

pub use config::{EngineConfig, RetryConfig};
pub use coordinator::{BroadcastReceipt, PendingSummary};
pub use engine::Engine;
pub use error::{EngineError, ErrorKind, StoreError};
pub use fee::{FeeCalculation, FeeUnit};
pub use model::{
    Account, Destination, DraftStatus, DraftTransaction, Metadata, Outpoint, RecordedTransaction,
    SyncStatus, SyncTransaction, Utxo, UtxoState,
};
pub use outputs::{DraftConfig, OpReturn, OutputSpec};
pub use recorder::RecordOutcome;
pub use reservation::{Reservation, ReservationManager};
pub use signer::TransactionSigner;
pub use store::{Datastore, MemoryStore};
pub use tasks::{spawn_background_tasks, BackgroundHandle};
