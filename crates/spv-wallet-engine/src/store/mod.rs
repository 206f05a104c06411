//! Persistence boundary.
//!
//! The engine only talks to storage through [`Datastore`]. Single-record
//! reads and writes are independent; [`Datastore::apply`] is the one
//! multi-record write and must be all-or-nothing.

mod memory;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

pub use memory::MemoryStore;

use crate::error::StoreError;
use crate::model::{
    Account, Destination, DraftStatus, DraftTransaction, Outpoint, RecordedTransaction,
    SyncTransaction, Utxo,
};
use spv_wallet_script::Script;

/// Everything a recorded transaction changes, written as one unit.
#[derive(Debug, Clone)]
pub struct RecordBatch {
    /// Spent inputs, with their new state.
    pub spent_utxos: Vec<Utxo>,
    /// Outputs paying known destinations.
    pub new_utxos: Vec<Utxo>,
    /// Signed balance change per account.
    pub balance_deltas: BTreeMap<String, i64>,
    /// The recorded transaction.
    pub transaction: RecordedTransaction,
    /// Its freshly opened obligations.
    pub sync: SyncTransaction,
    /// The draft, with its final status.
    pub draft: DraftTransaction,
}

/// Durable storage for accounts, UTXOs, drafts and transactions.
pub trait Datastore: Send + Sync {
    /// Look up an account.
    fn get_account(&self, account_id: &str) -> Result<Option<Account>, StoreError>;
    /// Insert or replace an account.
    fn put_account(&self, account: Account) -> Result<(), StoreError>;

    /// Register a locking script as belonging to an account.
    fn put_destination(&self, destination: Destination) -> Result<(), StoreError>;
    /// The account a locking script pays, if it is ours.
    fn destination_by_script(&self, script: &Script) -> Result<Option<Destination>, StoreError>;

    /// Look up a UTXO in any state.
    fn get_utxo(&self, outpoint: &Outpoint) -> Result<Option<Utxo>, StoreError>;
    /// Every UTXO of an account, in any state.
    fn utxos_for_account(&self, account_id: &str) -> Result<Vec<Utxo>, StoreError>;
    /// UTXOs currently reserved by `draft_id`.
    fn utxos_reserved_by(&self, draft_id: &str) -> Result<Vec<Utxo>, StoreError>;
    /// Reserved UTXOs whose reservation ran out at or before `now`.
    fn expired_reservations(&self, now: DateTime<Utc>) -> Result<Vec<Utxo>, StoreError>;
    /// Insert or replace UTXOs, all or none.
    fn put_utxos(&self, utxos: Vec<Utxo>) -> Result<(), StoreError>;

    /// Look up a draft.
    fn get_draft(&self, draft_id: &str) -> Result<Option<DraftTransaction>, StoreError>;
    /// Insert or replace a draft.
    fn put_draft(&self, draft: DraftTransaction) -> Result<(), StoreError>;
    /// Drafts currently in `status`.
    fn drafts_with_status(&self, status: DraftStatus) -> Result<Vec<DraftTransaction>, StoreError>;
    /// Write a closed draft together with the UTXOs its closing released,
    /// all or none.
    fn close_draft(&self, draft: DraftTransaction, released: Vec<Utxo>) -> Result<(), StoreError>;

    /// Look up a recorded or imported transaction.
    fn get_transaction(&self, txid: &str) -> Result<Option<RecordedTransaction>, StoreError>;
    /// Store a transaction that did not come from a draft (e.g. a funding
    /// transaction), or update block data on a recorded one.
    fn put_transaction(&self, transaction: RecordedTransaction) -> Result<(), StoreError>;

    /// Obligations of a recorded transaction.
    fn get_sync_transaction(&self, txid: &str) -> Result<Option<SyncTransaction>, StoreError>;
    /// Insert or replace a sync record.
    fn put_sync_transaction(&self, sync: SyncTransaction) -> Result<(), StoreError>;
    /// Every sync record, oldest first.
    fn sync_transactions(&self) -> Result<Vec<SyncTransaction>, StoreError>;

    /// Apply a recorded transaction's effects atomically.
    ///
    /// Nothing is written if any delta names an unknown account or would
    /// take a balance below zero.
    fn apply(&self, batch: RecordBatch) -> Result<(), StoreError>;
}
