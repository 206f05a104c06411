use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use spv_wallet_script::Script;

use super::{Datastore, RecordBatch};
use crate::error::StoreError;
use crate::model::{
    Account, Destination, DraftStatus, DraftTransaction, Outpoint, RecordedTransaction,
    SyncTransaction, Utxo, UtxoState,
};

#[derive(Debug, Default)]
struct Tables {
    accounts: HashMap<String, Account>,
    destinations: HashMap<Script, Destination>,
    utxos: HashMap<Outpoint, Utxo>,
    drafts: HashMap<String, DraftTransaction>,
    transactions: HashMap<String, RecordedTransaction>,
    syncs: HashMap<String, SyncTransaction>,
}

/// In-memory [`Datastore`]. Every call takes one lock over all tables, so
/// [`Datastore::apply`] is trivially atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl Datastore for MemoryStore {
    fn get_account(&self, account_id: &str) -> Result<Option<Account>, StoreError> {
        Ok(self.tables()?.accounts.get(account_id).cloned())
    }

    fn put_account(&self, account: Account) -> Result<(), StoreError> {
        self.tables()?.accounts.insert(account.id.clone(), account);
        Ok(())
    }

    fn put_destination(&self, destination: Destination) -> Result<(), StoreError> {
        self.tables()?
            .destinations
            .insert(destination.locking_script.clone(), destination);
        Ok(())
    }

    fn destination_by_script(&self, script: &Script) -> Result<Option<Destination>, StoreError> {
        Ok(self.tables()?.destinations.get(script).cloned())
    }

    fn get_utxo(&self, outpoint: &Outpoint) -> Result<Option<Utxo>, StoreError> {
        Ok(self.tables()?.utxos.get(outpoint).cloned())
    }

    fn utxos_for_account(&self, account_id: &str) -> Result<Vec<Utxo>, StoreError> {
        Ok(self
            .tables()?
            .utxos
            .values()
            .filter(|u| u.account_id == account_id)
            .cloned()
            .collect())
    }

    fn utxos_reserved_by(&self, draft_id: &str) -> Result<Vec<Utxo>, StoreError> {
        Ok(self
            .tables()?
            .utxos
            .values()
            .filter(|u| u.reserved_by() == Some(draft_id))
            .cloned()
            .collect())
    }

    fn expired_reservations(&self, now: DateTime<Utc>) -> Result<Vec<Utxo>, StoreError> {
        Ok(self
            .tables()?
            .utxos
            .values()
            .filter(|u| matches!(&u.state, UtxoState::Reserved { reserved_until, .. } if *reserved_until <= now))
            .cloned()
            .collect())
    }

    fn put_utxos(&self, utxos: Vec<Utxo>) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        for utxo in utxos {
            tables.utxos.insert(utxo.outpoint, utxo);
        }
        Ok(())
    }

    fn get_draft(&self, draft_id: &str) -> Result<Option<DraftTransaction>, StoreError> {
        Ok(self.tables()?.drafts.get(draft_id).cloned())
    }

    fn put_draft(&self, draft: DraftTransaction) -> Result<(), StoreError> {
        self.tables()?.drafts.insert(draft.id.clone(), draft);
        Ok(())
    }

    fn drafts_with_status(&self, status: DraftStatus) -> Result<Vec<DraftTransaction>, StoreError> {
        Ok(self
            .tables()?
            .drafts
            .values()
            .filter(|d| d.status == status)
            .cloned()
            .collect())
    }

    fn close_draft(&self, draft: DraftTransaction, released: Vec<Utxo>) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        for utxo in released {
            tables.utxos.insert(utxo.outpoint, utxo);
        }
        tables.drafts.insert(draft.id.clone(), draft);
        Ok(())
    }

    fn get_transaction(&self, txid: &str) -> Result<Option<RecordedTransaction>, StoreError> {
        Ok(self.tables()?.transactions.get(txid).cloned())
    }

    fn put_transaction(&self, transaction: RecordedTransaction) -> Result<(), StoreError> {
        self.tables()?
            .transactions
            .insert(transaction.id.clone(), transaction);
        Ok(())
    }

    fn get_sync_transaction(&self, txid: &str) -> Result<Option<SyncTransaction>, StoreError> {
        Ok(self.tables()?.syncs.get(txid).cloned())
    }

    fn put_sync_transaction(&self, sync: SyncTransaction) -> Result<(), StoreError> {
        self.tables()?.syncs.insert(sync.id.clone(), sync);
        Ok(())
    }

    fn sync_transactions(&self) -> Result<Vec<SyncTransaction>, StoreError> {
        let mut syncs: Vec<_> = self.tables()?.syncs.values().cloned().collect();
        syncs.sort_by_key(|s| s.created_at);
        Ok(syncs)
    }

    fn apply(&self, batch: RecordBatch) -> Result<(), StoreError> {
        let mut tables = self.tables()?;

        // Check every delta before touching anything.
        let mut balances = Vec::with_capacity(batch.balance_deltas.len());
        for (account_id, delta) in &batch.balance_deltas {
            let account = tables
                .accounts
                .get(account_id)
                .ok_or_else(|| StoreError::UnknownAccount(account_id.clone()))?;
            let balance = i128::from(account.current_balance) + i128::from(*delta);
            let balance = u64::try_from(balance).map_err(|_| StoreError::NegativeBalance {
                account_id: account_id.clone(),
                balance: account.current_balance,
                delta: *delta,
            })?;
            balances.push((account_id.clone(), balance));
        }

        for (account_id, balance) in balances {
            if let Some(account) = tables.accounts.get_mut(&account_id) {
                account.current_balance = balance;
            }
        }
        for utxo in batch.spent_utxos.into_iter().chain(batch.new_utxos) {
            tables.utxos.insert(utxo.outpoint, utxo);
        }
        tables
            .transactions
            .insert(batch.transaction.id.clone(), batch.transaction);
        tables.syncs.insert(batch.sync.id.clone(), batch.sync);
        tables.drafts.insert(batch.draft.id.clone(), batch.draft);
        Ok(())
    }
}
