//! Transaction recorder: applies a signed draft to the ledger.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use spv_wallet_transaction::Transaction;
use tracing::{error, info};

use crate::error::EngineError;
use crate::model::{
    DraftStatus, DraftTransaction, Metadata, Outpoint, RecordedTransaction, SyncStatus,
    SyncTransaction, Utxo, METADATA_BROADCAST_EXTERNALLY,
};
use crate::reservation::{CommitOutcome, ReservationManager};
use crate::store::{Datastore, RecordBatch};

/// What [`Recorder::record_at`] produced.
#[derive(Debug, Clone)]
pub struct RecordOutcome {
    /// The ledger entry.
    pub transaction: RecordedTransaction,
    /// Its obligations as they stand after the call.
    pub sync: SyncTransaction,
    /// The same transaction had been recorded before; nothing was written.
    pub already_recorded: bool,
}

/// Applies signed drafts to the ledger in one store write.
pub struct Recorder<'a> {
    store: &'a dyn Datastore,
    reservations: &'a ReservationManager,
}

impl<'a> Recorder<'a> {
    /// Borrow the store and the reservation locks.
    pub fn new(store: &'a dyn Datastore, reservations: &'a ReservationManager) -> Self {
        Recorder {
            store,
            reservations,
        }
    }

    /// Record `signed_hex` as the signed form of draft `draft_id`.
    ///
    /// Spends the draft's reserved inputs, creates UTXOs for outputs that
    /// pay known destinations, adjusts balances and opens the sync record,
    /// all in one store write. Recording the same transaction again returns
    /// the existing records.
    pub fn record_at(
        &self,
        signed_hex: &str,
        draft_id: &str,
        metadata: Metadata,
        now: DateTime<Utc>,
    ) -> Result<RecordOutcome, EngineError> {
        let tx = Transaction::from_hex(signed_hex)?;
        let txid = tx.tx_id_hex();
        let mut draft = self
            .store
            .get_draft(draft_id)?
            .ok_or_else(|| EngineError::NotFound(format!("draft {draft_id}")))?;

        match draft.status {
            DraftStatus::Complete => return self.existing(&draft, &txid),
            DraftStatus::Canceled => {
                return Err(EngineError::ReservationConflict(format!(
                    "draft {draft_id} was canceled"
                )))
            }
            DraftStatus::Expired => return Err(EngineError::Expired(draft_id.to_string())),
            DraftStatus::Draft if draft.is_expired_at(now) => {
                return Err(EngineError::Expired(draft_id.to_string()))
            }
            DraftStatus::Draft => {}
        }

        if let Err(e) = check_matches_draft(&tx, &draft) {
            error!(draft_id, txid = %txid, error = %e, "signed transaction does not match draft");
            return Err(e);
        }

        let tx_hash = tx.tx_id();
        let mut deltas: BTreeMap<String, i64> = BTreeMap::new();
        *deltas.entry(draft.account_id.clone()).or_default() -= to_delta(draft.total_input_satoshis)?;

        let mut new_utxos = Vec::new();
        for (vout, output) in tx.outputs.iter().enumerate() {
            if output.satoshis == 0 {
                continue;
            }
            let Some(destination) = self.store.destination_by_script(&output.locking_script)? else {
                continue;
            };
            let vout = u32::try_from(vout)
                .map_err(|_| EngineError::InvalidInput("too many outputs".to_string()))?;
            new_utxos.push(Utxo::new(
                Outpoint::new(tx_hash, vout),
                destination.account_id.clone(),
                output.satoshis,
                output.locking_script.clone(),
                now,
            ));
            *deltas.entry(destination.account_id).or_default() += to_delta(output.satoshis)?;
        }

        let mut merged = draft.metadata.clone();
        merged.extend(metadata);
        let broadcast_externally = merged
            .get(METADATA_BROADCAST_EXTERNALLY)
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let sync = SyncTransaction {
            id: txid.clone(),
            draft_id: draft.id.clone(),
            broadcast_status: if broadcast_externally {
                SyncStatus::Ready
            } else {
                SyncStatus::Pending
            },
            p2p_status: if draft.has_p2p_obligation() {
                SyncStatus::Pending
            } else {
                SyncStatus::Ready
            },
            sync_status: if broadcast_externally {
                SyncStatus::Ready
            } else {
                SyncStatus::Pending
            },
            p2p_delivered: Vec::new(),
            results: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        let transaction = RecordedTransaction {
            id: txid.clone(),
            draft_id: draft.id.clone(),
            hex: signed_hex.to_string(),
            account_deltas: deltas.clone(),
            fee: draft.fee,
            block_hash: None,
            block_height: None,
            merkle_path: None,
            metadata: merged,
            created_at: now,
        };

        let inputs = draft.outpoints();
        draft.status = DraftStatus::Complete;
        let batch = RecordBatch {
            spent_utxos: Vec::new(),
            new_utxos,
            balance_deltas: deltas,
            transaction: transaction.clone(),
            sync: sync.clone(),
            draft: draft.clone(),
        };

        match self.reservations.commit_recorded(batch, &inputs)? {
            CommitOutcome::Committed => {
                info!(
                    draft_id,
                    txid = %txid,
                    fee = draft.fee,
                    p2p = %sync.p2p_status,
                    broadcast = %sync.broadcast_status,
                    "recorded transaction"
                );
                Ok(RecordOutcome {
                    transaction,
                    sync,
                    already_recorded: false,
                })
            }
            // A concurrent record of the same transaction won the lock.
            CommitOutcome::AlreadyCommitted => self.existing(&draft, &txid),
        }
    }

    fn existing(&self, draft: &DraftTransaction, txid: &str) -> Result<RecordOutcome, EngineError> {
        let transaction = self
            .store
            .get_transaction(txid)?
            .filter(|t| t.draft_id == draft.id)
            .ok_or_else(|| {
                EngineError::ReservationMismatch(format!(
                    "draft {} was recorded with a different transaction",
                    draft.id
                ))
            })?;
        let sync = self
            .store
            .get_sync_transaction(txid)?
            .ok_or_else(|| EngineError::NotFound(format!("sync record {txid}")))?;
        Ok(RecordOutcome {
            transaction,
            sync,
            already_recorded: true,
        })
    }
}

/// The signed transaction must spend exactly the draft's inputs and pay
/// exactly its outputs, in order.
fn check_matches_draft(tx: &Transaction, draft: &DraftTransaction) -> Result<(), EngineError> {
    let expected: HashSet<Outpoint> = draft.outpoints().into_iter().collect();
    let spent: HashSet<Outpoint> = tx
        .inputs
        .iter()
        .map(|i| Outpoint::new(i.source_txid, i.source_tx_out_index))
        .collect();
    if tx.inputs.len() != draft.inputs.len() || spent != expected {
        return Err(EngineError::ReservationMismatch(format!(
            "inputs differ from the {} reserved by draft {}",
            draft.inputs.len(),
            draft.id
        )));
    }

    let outputs: Vec<_> = draft.script_outputs().collect();
    if outputs.len() != tx.outputs.len() {
        return Err(EngineError::ReservationMismatch(format!(
            "draft {} has {} outputs, transaction has {}",
            draft.id,
            outputs.len(),
            tx.outputs.len()
        )));
    }
    for (index, (want, got)) in outputs.iter().zip(&tx.outputs).enumerate() {
        if want.satoshis != got.satoshis || want.script != got.locking_script {
            return Err(EngineError::ReservationMismatch(format!(
                "output {index} differs from draft {}",
                draft.id
            )));
        }
    }
    Ok(())
}

fn to_delta(satoshis: u64) -> Result<i64, EngineError> {
    i64::try_from(satoshis)
        .map_err(|_| EngineError::InvariantViolation(format!("{satoshis} satoshis overflows a delta")))
}
