//! UTXO reservation manager.
//!
//! Every state change of an account's UTXOs (reserve, release, commit,
//! sweep) runs under that account's lock and re-reads current state from
//! the store inside it. No lock is ever held across an `.await`; all
//! methods here are synchronous.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::fee::{input_size, FeeUnit};
use crate::model::{DraftStatus, DraftTransaction, Outpoint, Utxo, UtxoState};
use crate::store::{Datastore, RecordBatch};

/// What to reserve.
#[derive(Debug, Clone)]
pub struct ReservationRequest<'a> {
    /// Owner of the UTXOs.
    pub account_id: &'a str,
    /// Draft the reservation is held for.
    pub draft_id: &'a str,
    /// Satoshis the selected inputs must cover before their own fee.
    pub minimum_satoshis: u64,
    /// Rate used to cost each selected input.
    pub fee_unit: FeeUnit,
    /// When the reservation lapses.
    pub reserved_until: DateTime<Utc>,
    /// When non-empty, select only among these.
    pub from_utxos: &'a [Outpoint],
    /// Always reserved, whether needed or not.
    pub include_utxos: &'a [Outpoint],
}

/// UTXOs held by one draft.
#[derive(Debug, Clone)]
pub struct Reservation {
    /// Owner of the UTXOs.
    pub account_id: String,
    /// Holder of the reservation.
    pub draft_id: String,
    /// Reserved UTXOs, in selection order.
    pub utxos: Vec<Utxo>,
}

impl Reservation {
    /// Satoshis held by the reserved UTXOs.
    pub fn total_satoshis(&self) -> u64 {
        self.utxos.iter().fold(0, |total, u| total.saturating_add(u.satoshis))
    }
}

/// Result of committing a draft's inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The inputs were spent by this call.
    Committed,
    /// The inputs were already spent by the same transaction.
    AlreadyCommitted,
}

/// Result of [`ReservationManager::close_draft`].
#[derive(Debug, Clone)]
pub enum DraftClosing {
    /// The draft moved to the requested status and its UTXOs were released.
    Closed {
        /// The draft as written.
        draft: DraftTransaction,
        /// Number of UTXOs returned to `Available`.
        released: usize,
    },
    /// The draft had already left `Draft`; nothing was written.
    Unchanged(DraftTransaction),
}

/// Owns reservation state for all accounts.
pub struct ReservationManager {
    store: Arc<dyn Datastore>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ReservationManager {
    /// Manager over `store`, with no locks taken yet.
    pub fn new(store: Arc<dyn Datastore>) -> Self {
        ReservationManager {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn account_lock(&self, account_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn lock(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
        // The guarded value is `()`, so a poisoned lock carries no broken state.
        lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reserve inputs covering `minimum_satoshis` plus the fee of the
    /// inputs themselves.
    ///
    /// Candidates are taken smallest first. UTXOs already reserved by the
    /// same draft count as candidates, so a draft can grow its reservation;
    /// any it held but no longer needs are released in the same write.
    ///
    /// # Returns
    /// The reservation, or `InsufficientFunds` with nothing reserved.
    pub fn reserve_at(
        &self,
        req: &ReservationRequest<'_>,
        now: DateTime<Utc>,
    ) -> Result<Reservation, EngineError> {
        let lock = self.account_lock(req.account_id);
        let _guard = Self::lock(&lock);

        let owned = self.store.utxos_for_account(req.account_id)?;
        let usable = |u: &Utxo| u.is_spendable_at(now) || u.reserved_by() == Some(req.draft_id);

        let mut selected: Vec<Utxo> = Vec::new();
        let mut included = HashSet::with_capacity(req.include_utxos.len());
        for outpoint in req.include_utxos {
            if !included.insert(*outpoint) {
                continue;
            }
            let utxo = owned
                .iter()
                .find(|u| u.outpoint == *outpoint)
                .ok_or_else(|| EngineError::NotFound(format!("utxo {outpoint}")))?;
            if !usable(utxo) {
                return Err(EngineError::ReservationConflict(format!(
                    "utxo {outpoint} is not available"
                )));
            }
            selected.push(utxo.clone());
        }
        for outpoint in req.from_utxos {
            if !owned.iter().any(|u| u.outpoint == *outpoint) {
                return Err(EngineError::NotFound(format!("utxo {outpoint}")));
            }
        }

        let chosen: HashSet<Outpoint> = selected.iter().map(|u| u.outpoint).collect();
        let mut candidates: Vec<&Utxo> = owned
            .iter()
            .filter(|u| usable(*u) && !chosen.contains(&u.outpoint))
            .filter(|u| req.from_utxos.is_empty() || req.from_utxos.contains(&u.outpoint))
            .collect();
        candidates.sort_by_key(|u| (u.satoshis, u.outpoint));

        let mut candidates = candidates.into_iter();
        loop {
            let total = selected.iter().fold(0u64, |t, u| t.saturating_add(u.satoshis));
            let sizes: u64 = selected.iter().map(|u| input_size(&u.locking_script)).sum();
            let required = req.minimum_satoshis.saturating_add(req.fee_unit.fee_for(sizes));
            if !selected.is_empty() && total >= required {
                break;
            }
            match candidates.next() {
                Some(utxo) => selected.push(utxo.clone()),
                None => {
                    let available = total.saturating_add(candidates_total(&owned, &selected, &usable));
                    debug!(
                        account_id = req.account_id,
                        draft_id = req.draft_id,
                        required,
                        available,
                        "not enough spendable utxos"
                    );
                    return Err(EngineError::InsufficientFunds {
                        required,
                        available,
                    });
                }
            }
        }

        let selected_set: HashSet<Outpoint> = selected.iter().map(|u| u.outpoint).collect();
        let mut writes = Vec::with_capacity(selected.len());
        for mut utxo in selected.iter().cloned() {
            utxo.state = UtxoState::Reserved {
                draft_id: req.draft_id.to_string(),
                reserved_until: req.reserved_until,
            };
            writes.push(utxo);
        }
        for utxo in owned.iter().filter(|u| {
            u.reserved_by() == Some(req.draft_id) && !selected_set.contains(&u.outpoint)
        }) {
            let mut released = utxo.clone();
            released.state = UtxoState::Available;
            writes.push(released);
        }
        self.store.put_utxos(writes.clone())?;

        let utxos: Vec<Utxo> = writes
            .into_iter()
            .filter(|u| selected_set.contains(&u.outpoint))
            .collect();
        info!(
            account_id = req.account_id,
            draft_id = req.draft_id,
            inputs = utxos.len(),
            satoshis = utxos.iter().fold(0u64, |t, u| t.saturating_add(u.satoshis)),
            "reserved utxos"
        );
        Ok(Reservation {
            account_id: req.account_id.to_string(),
            draft_id: req.draft_id.to_string(),
            utxos,
        })
    }

    /// Return every UTXO still reserved by `draft_id` to `Available`.
    pub fn release(&self, account_id: &str, draft_id: &str) -> Result<usize, EngineError> {
        let lock = self.account_lock(account_id);
        let _guard = Self::lock(&lock);

        let released: Vec<Utxo> = self
            .store
            .utxos_reserved_by(draft_id)?
            .into_iter()
            .map(|mut u| {
                u.state = UtxoState::Available;
                u
            })
            .collect();
        let count = released.len();
        if count > 0 {
            self.store.put_utxos(released)?;
            debug!(account_id, draft_id, count, "released reservation");
        }
        Ok(count)
    }

    /// Move a draft out of `Draft` (to `Canceled` or `Expired`) and release
    /// its UTXOs, in one store write under the account lock.
    ///
    /// The draft is re-read inside the lock; if it has already been
    /// recorded, canceled or expired it is returned untouched.
    pub fn close_draft(
        &self,
        account_id: &str,
        draft_id: &str,
        status: DraftStatus,
    ) -> Result<DraftClosing, EngineError> {
        let lock = self.account_lock(account_id);
        let _guard = Self::lock(&lock);

        let mut draft = self
            .store
            .get_draft(draft_id)?
            .ok_or_else(|| EngineError::NotFound(format!("draft {draft_id}")))?;
        if draft.account_id != account_id {
            return Err(EngineError::InvariantViolation(format!(
                "draft {draft_id} belongs to {}, not {account_id}",
                draft.account_id
            )));
        }
        if draft.status != DraftStatus::Draft {
            return Ok(DraftClosing::Unchanged(draft));
        }

        let released: Vec<Utxo> = self
            .store
            .utxos_reserved_by(draft_id)?
            .into_iter()
            .map(|mut u| {
                u.state = UtxoState::Available;
                u
            })
            .collect();
        let count = released.len();
        draft.status = status;
        self.store.close_draft(draft.clone(), released)?;
        debug!(account_id, draft_id, status = ?status, released = count, "closed draft");
        Ok(DraftClosing::Closed {
            draft,
            released: count,
        })
    }

    /// Mark a draft's reserved inputs as spent by `spending_txid`.
    ///
    /// Calling again with the same transaction is a no-op.
    pub fn commit(
        &self,
        account_id: &str,
        draft_id: &str,
        spending_txid: &str,
        inputs: &[Outpoint],
    ) -> Result<CommitOutcome, EngineError> {
        let lock = self.account_lock(account_id);
        let _guard = Self::lock(&lock);

        match self.spend_transition(draft_id, spending_txid, inputs)? {
            None => Ok(CommitOutcome::AlreadyCommitted),
            Some(spent) => {
                self.store.put_utxos(spent)?;
                Ok(CommitOutcome::Committed)
            }
        }
    }

    /// Commit the draft's inputs and apply `batch` in one store write,
    /// under the account lock.
    ///
    /// The draft's current status is checked inside the lock: a draft
    /// canceled or expired since the caller read it is refused.
    pub fn commit_recorded(
        &self,
        mut batch: RecordBatch,
        inputs: &[Outpoint],
    ) -> Result<CommitOutcome, EngineError> {
        let lock = self.account_lock(&batch.draft.account_id);
        let _guard = Self::lock(&lock);

        let draft_id = batch.draft.id.clone();
        let current = self
            .store
            .get_draft(&draft_id)?
            .ok_or_else(|| EngineError::NotFound(format!("draft {draft_id}")))?;
        match current.status {
            // A recorded draft still goes through the spend check, which
            // tells a repeat of the same transaction from a different one.
            DraftStatus::Draft | DraftStatus::Complete => {}
            DraftStatus::Canceled => {
                return Err(EngineError::ReservationConflict(format!(
                    "draft {draft_id} was canceled"
                )))
            }
            DraftStatus::Expired => return Err(EngineError::Expired(draft_id)),
        }

        match self.spend_transition(&batch.draft.id, &batch.transaction.id, inputs)? {
            None => Ok(CommitOutcome::AlreadyCommitted),
            Some(spent) => {
                batch.spent_utxos = spent;
                self.store.apply(batch)?;
                Ok(CommitOutcome::Committed)
            }
        }
    }

    /// Compute the `Spent` versions of `inputs`. `None` when all of them are
    /// already spent by `spending_txid`. Caller holds the account lock.
    fn spend_transition(
        &self,
        draft_id: &str,
        spending_txid: &str,
        inputs: &[Outpoint],
    ) -> Result<Option<Vec<Utxo>>, EngineError> {
        let mut spent = Vec::with_capacity(inputs.len());
        for outpoint in inputs {
            let utxo = self
                .store
                .get_utxo(outpoint)?
                .ok_or_else(|| EngineError::ReservationMismatch(format!("unknown input {outpoint}")))?;
            match &utxo.state {
                UtxoState::Reserved { draft_id: holder, .. } if holder == draft_id => {
                    let mut utxo = utxo.clone();
                    utxo.state = UtxoState::Spent {
                        spending_txid: spending_txid.to_string(),
                    };
                    spent.push(utxo);
                }
                UtxoState::Spent { spending_txid: by } if by == spending_txid => {}
                UtxoState::Spent { spending_txid: by } => {
                    return Err(EngineError::ReservationMismatch(format!(
                        "input {outpoint} already spent by {by}"
                    )));
                }
                UtxoState::Reserved { draft_id: holder, .. } => {
                    return Err(EngineError::ReservationConflict(format!(
                        "input {outpoint} is reserved by draft {holder}"
                    )));
                }
                UtxoState::Available => {
                    return Err(EngineError::ReservationConflict(format!(
                        "input {outpoint} is not reserved by draft {draft_id}"
                    )));
                }
            }
        }
        Ok((!spent.is_empty()).then_some(spent))
    }

    /// Add newly received UTXOs and credit their owners' balances, one
    /// account at a time under that account's lock. Outpoints already known
    /// are skipped.
    ///
    /// # Returns
    /// The UTXOs actually added.
    pub fn credit(&self, utxos: Vec<Utxo>) -> Result<Vec<Utxo>, EngineError> {
        let mut by_account: BTreeMap<String, Vec<Utxo>> = BTreeMap::new();
        for utxo in utxos {
            by_account.entry(utxo.account_id.clone()).or_default().push(utxo);
        }

        let mut added = Vec::new();
        for (account_id, utxos) in by_account {
            let lock = self.account_lock(&account_id);
            let _guard = Self::lock(&lock);

            let mut account = self
                .store
                .get_account(&account_id)?
                .ok_or_else(|| EngineError::NotFound(format!("account {account_id}")))?;
            let mut fresh = Vec::with_capacity(utxos.len());
            for utxo in utxos {
                if self.store.get_utxo(&utxo.outpoint)?.is_none() {
                    fresh.push(utxo);
                }
            }
            if fresh.is_empty() {
                continue;
            }
            let credited: u64 = fresh.iter().map(|u| u.satoshis).sum();
            account.current_balance = account.current_balance.checked_add(credited).ok_or_else(|| {
                EngineError::InvariantViolation(format!("balance of {account_id} overflows"))
            })?;
            self.store.put_utxos(fresh.clone())?;
            self.store.put_account(account)?;
            debug!(account_id, count = fresh.len(), satoshis = credited, "credited utxos");
            added.extend(fresh);
        }
        Ok(added)
    }

    /// Release reservations that ran out at or before `now`.
    ///
    /// Each UTXO's state is re-read under its account lock, so an output
    /// committed since the scan is left alone.
    ///
    /// # Returns
    /// The IDs of the drafts whose reservations were released.
    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> Result<Vec<String>, EngineError> {
        let mut by_account: BTreeMap<String, Vec<Outpoint>> = BTreeMap::new();
        for utxo in self.store.expired_reservations(now)? {
            by_account
                .entry(utxo.account_id.clone())
                .or_default()
                .push(utxo.outpoint);
        }

        let mut drafts = Vec::new();
        for (account_id, outpoints) in by_account {
            let lock = self.account_lock(&account_id);
            let _guard = Self::lock(&lock);

            let mut released = Vec::new();
            for outpoint in outpoints {
                let Some(mut utxo) = self.store.get_utxo(&outpoint)? else {
                    continue;
                };
                if let UtxoState::Reserved {
                    draft_id,
                    reserved_until,
                } = &utxo.state
                {
                    if *reserved_until <= now {
                        if !drafts.contains(draft_id) {
                            drafts.push(draft_id.clone());
                        }
                        utxo.state = UtxoState::Available;
                        released.push(utxo);
                    }
                }
            }
            if !released.is_empty() {
                debug!(account_id, count = released.len(), "swept expired reservations");
                self.store.put_utxos(released)?;
            }
        }
        Ok(drafts)
    }
}

fn candidates_total(owned: &[Utxo], selected: &[Utxo], usable: &impl Fn(&Utxo) -> bool) -> u64 {
    owned
        .iter()
        .filter(|u| usable(*u) && !selected.iter().any(|s| s.outpoint == u.outpoint))
        .fold(0, |total, u| total.saturating_add(u.satoshis))
}

/// Releases a draft's reservation when dropped, unless [`keep`](Self::keep)
/// was called.
pub struct ReservationGuard<'a> {
    manager: &'a ReservationManager,
    account_id: String,
    draft_id: String,
    armed: bool,
}

impl<'a> ReservationGuard<'a> {
    /// Guard the reservation `draft_id` is about to take.
    pub fn new(manager: &'a ReservationManager, account_id: &str, draft_id: &str) -> Self {
        ReservationGuard {
            manager,
            account_id: account_id.to_string(),
            draft_id: draft_id.to_string(),
            armed: true,
        }
    }

    /// Keep the reservation past this guard.
    pub fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for ReservationGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = self.manager.release(&self.account_id, &self.draft_id) {
            warn!(
                account_id = %self.account_id,
                draft_id = %self.draft_id,
                error = %e,
                "failed to release reservation"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use spv_wallet_primitives::chainhash::ChainHash;
    use spv_wallet_script::Script;

    use super::*;
    use crate::outputs::DraftConfig;
    use crate::store::MemoryStore;

    fn script() -> Script {
        Script::from_hex("76a914eb0bd5edba389198e73f8efabddfc61666969ff788ac").unwrap()
    }

    fn seeded(amounts: &[u64]) -> (Arc<MemoryStore>, ReservationManager, Vec<Outpoint>) {
        let store = Arc::new(MemoryStore::new());
        let mut outpoints = Vec::new();
        let utxos = amounts
            .iter()
            .enumerate()
            .map(|(i, sats)| {
                let outpoint = Outpoint::new(ChainHash::new([i as u8 + 1; 32]), 0);
                outpoints.push(outpoint);
                Utxo::new(outpoint, "alice", *sats, script(), Utc::now())
            })
            .collect();
        store.put_utxos(utxos).unwrap();
        let manager = ReservationManager::new(store.clone());
        (store, manager, outpoints)
    }

    fn put_draft(store: &MemoryStore, draft_id: &str) {
        let now = Utc::now();
        store
            .put_draft(DraftTransaction {
                id: draft_id.to_string(),
                account_id: "alice".to_string(),
                config: DraftConfig::default(),
                fee_unit: FeeUnit::default(),
                outputs: Vec::new(),
                inputs: Vec::new(),
                fee: 0,
                total_input_satoshis: 0,
                total_output_satoshis: 0,
                change_satoshis: 0,
                estimated_size: 0,
                hex: String::new(),
                status: DraftStatus::Draft,
                metadata: Default::default(),
                created_at: now,
                expires_at: now + Duration::seconds(20),
            })
            .unwrap();
    }

    fn request<'a>(draft_id: &'a str, minimum: u64, until: DateTime<Utc>) -> ReservationRequest<'a> {
        ReservationRequest {
            account_id: "alice",
            draft_id,
            minimum_satoshis: minimum,
            fee_unit: FeeUnit::default(),
            reserved_until: until,
            from_utxos: &[],
            include_utxos: &[],
        }
    }

    #[test]
    fn test_reserve_smallest_first_including_input_fee() {
        let (store, manager, _) = seeded(&[5_000, 1_000, 2_000]);
        let now = Utc::now();
        let until = now + Duration::seconds(20);

        // 1_000 + 2_000 covers 2_500 plus 2 × 148 of input fee.
        let reservation = manager.reserve_at(&request("d1", 2_500, until), now).unwrap();
        let amounts: Vec<u64> = reservation.utxos.iter().map(|u| u.satoshis).collect();
        assert_eq!(amounts, vec![1_000, 2_000]);
        assert_eq!(store.utxos_reserved_by("d1").unwrap().len(), 2);
    }

    #[test]
    fn test_insufficient_funds_reserves_nothing() {
        let (store, manager, _) = seeded(&[300, 200]);
        let now = Utc::now();
        let err = manager
            .reserve_at(&request("d1", 1_000, now + Duration::seconds(20)), now)
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientFunds { available: 500, .. }));
        assert!(store.utxos_reserved_by("d1").unwrap().is_empty());
    }

    #[test]
    fn test_reserved_utxos_are_not_selected_twice() {
        let (_, manager, _) = seeded(&[10_000]);
        let now = Utc::now();
        let until = now + Duration::seconds(20);
        manager.reserve_at(&request("d1", 1_000, until), now).unwrap();
        let err = manager.reserve_at(&request("d2", 1_000, until), now).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientFunds { .. }));

        // Once released, the other draft can have it.
        assert_eq!(manager.release("alice", "d1").unwrap(), 1);
        assert!(manager.reserve_at(&request("d2", 1_000, until), now).is_ok());
    }

    #[test]
    fn test_expired_reservation_is_selectable_and_swept() {
        let (store, manager, outpoints) = seeded(&[10_000]);
        let now = Utc::now();
        manager
            .reserve_at(&request("d1", 1_000, now + Duration::seconds(20)), now)
            .unwrap();

        let later = now + Duration::seconds(21);
        assert_eq!(manager.sweep_expired_at(later).unwrap(), vec!["d1".to_string()]);
        assert_eq!(store.get_utxo(&outpoints[0]).unwrap().unwrap().state, UtxoState::Available);
    }

    #[test]
    fn test_sweep_leaves_committed_utxos() {
        let (store, manager, outpoints) = seeded(&[10_000]);
        let now = Utc::now();
        manager
            .reserve_at(&request("d1", 1_000, now + Duration::seconds(20)), now)
            .unwrap();
        manager.commit("alice", "d1", "tx1", &outpoints).unwrap();

        assert!(manager.sweep_expired_at(now + Duration::seconds(60)).unwrap().is_empty());
        assert!(store.get_utxo(&outpoints[0]).unwrap().unwrap().is_spent());
    }

    #[test]
    fn test_commit_is_idempotent() {
        let (store, manager, outpoints) = seeded(&[10_000]);
        let now = Utc::now();
        manager
            .reserve_at(&request("d1", 1_000, now + Duration::seconds(20)), now)
            .unwrap();

        assert_eq!(
            manager.commit("alice", "d1", "tx1", &outpoints).unwrap(),
            CommitOutcome::Committed
        );
        let after_first = store.get_utxo(&outpoints[0]).unwrap();
        assert_eq!(
            manager.commit("alice", "d1", "tx1", &outpoints).unwrap(),
            CommitOutcome::AlreadyCommitted
        );
        assert_eq!(store.get_utxo(&outpoints[0]).unwrap(), after_first);

        let err = manager.commit("alice", "d1", "tx2", &outpoints).unwrap_err();
        assert!(matches!(err, EngineError::ReservationMismatch(_)));
    }

    #[test]
    fn test_commit_of_foreign_reservation_conflicts() {
        let (_, manager, outpoints) = seeded(&[10_000]);
        let now = Utc::now();
        manager
            .reserve_at(&request("d1", 1_000, now + Duration::seconds(20)), now)
            .unwrap();
        let err = manager.commit("alice", "d2", "tx1", &outpoints).unwrap_err();
        assert!(matches!(err, EngineError::ReservationConflict(_)));
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let (store, manager, _) = seeded(&[10_000]);
        let now = Utc::now();
        {
            let _guard = ReservationGuard::new(&manager, "alice", "d1");
            manager
                .reserve_at(&request("d1", 1_000, now + Duration::seconds(20)), now)
                .unwrap();
        }
        assert!(store.utxos_reserved_by("d1").unwrap().is_empty());

        let guard = ReservationGuard::new(&manager, "alice", "d2");
        manager
            .reserve_at(&request("d2", 1_000, now + Duration::seconds(20)), now)
            .unwrap();
        guard.keep();
        assert_eq!(store.utxos_reserved_by("d2").unwrap().len(), 1);
    }

    #[test]
    fn test_from_and_include_utxos() {
        let (_, manager, outpoints) = seeded(&[1_000, 2_000, 50_000]);
        let now = Utc::now();
        let until = now + Duration::seconds(20);

        let mut req = request("d1", 500, until);
        let from = [outpoints[2]];
        req.from_utxos = &from;
        let reservation = manager.reserve_at(&req, now).unwrap();
        assert_eq!(reservation.total_satoshis(), 50_000);

        let mut req = request("d2", 100, until);
        let include = [outpoints[1]];
        req.include_utxos = &include;
        let reservation = manager.reserve_at(&req, now).unwrap();
        assert_eq!(reservation.utxos[0].outpoint, outpoints[1]);
        assert_eq!(reservation.utxos.len(), 1);
    }

    #[test]
    fn test_repeated_include_counts_once() {
        let (_, manager, outpoints) = seeded(&[10_000]);
        let now = Utc::now();
        let include = [outpoints[0], outpoints[0]];
        let mut req = request("d1", 15_000, now + Duration::seconds(20));
        req.include_utxos = &include;
        let err = manager.reserve_at(&req, now).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientFunds { available: 10_000, .. }));

        req.minimum_satoshis = 5_000;
        let reservation = manager.reserve_at(&req, now).unwrap();
        assert_eq!(reservation.utxos.len(), 1);
        assert_eq!(reservation.total_satoshis(), 10_000);
    }

    #[test]
    fn test_close_draft_releases_once() {
        let (store, manager, outpoints) = seeded(&[10_000]);
        let now = Utc::now();
        put_draft(&store, "d1");
        manager
            .reserve_at(&request("d1", 1_000, now + Duration::seconds(20)), now)
            .unwrap();

        match manager.close_draft("alice", "d1", DraftStatus::Canceled).unwrap() {
            DraftClosing::Closed { draft, released } => {
                assert_eq!(draft.status, DraftStatus::Canceled);
                assert_eq!(released, 1);
            }
            other => panic!("expected the draft to close, got {other:?}"),
        }
        assert_eq!(store.get_utxo(&outpoints[0]).unwrap().unwrap().state, UtxoState::Available);
        assert_eq!(store.get_draft("d1").unwrap().unwrap().status, DraftStatus::Canceled);

        // A later expiry finds the draft already closed and leaves it be.
        match manager.close_draft("alice", "d1", DraftStatus::Expired).unwrap() {
            DraftClosing::Unchanged(draft) => assert_eq!(draft.status, DraftStatus::Canceled),
            other => panic!("expected no change, got {other:?}"),
        }
    }

    #[test]
    fn test_close_draft_leaves_recorded_draft() {
        let (store, manager, outpoints) = seeded(&[10_000]);
        let now = Utc::now();
        put_draft(&store, "d1");
        manager
            .reserve_at(&request("d1", 1_000, now + Duration::seconds(20)), now)
            .unwrap();
        manager.commit("alice", "d1", "tx1", &outpoints).unwrap();
        let mut draft = store.get_draft("d1").unwrap().unwrap();
        draft.status = DraftStatus::Complete;
        store.put_draft(draft).unwrap();

        assert!(matches!(
            manager.close_draft("alice", "d1", DraftStatus::Canceled).unwrap(),
            DraftClosing::Unchanged(_)
        ));
        assert_eq!(store.get_draft("d1").unwrap().unwrap().status, DraftStatus::Complete);
        assert!(store.get_utxo(&outpoints[0]).unwrap().unwrap().is_spent());
    }
}
