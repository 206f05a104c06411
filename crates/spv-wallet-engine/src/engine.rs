//! The engine: one entry point tying reservation, resolution, building,
//! recording and broadcast together.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use spv_wallet_arc::{ArcClient, AsyncBroadcaster};
use spv_wallet_paymail::PaymailClient;
use spv_wallet_transaction::Transaction;
use tracing::{info, warn};

use crate::builder::{BuildSettings, DraftBuilder};
use crate::config::EngineConfig;
use crate::coordinator::{BroadcastReceipt, InFlight, PendingSummary, SyncCoordinator};
use crate::error::EngineError;
use crate::model::{
    Account, Destination, DraftStatus, DraftTransaction, Metadata, Outpoint, RecordedTransaction,
    SyncStatus, SyncTransaction, Utxo,
};
use crate::outputs::DraftConfig;
use crate::recorder::{RecordOutcome, Recorder};
use crate::reservation::{DraftClosing, ReservationManager};
use crate::resolver::PaymailResolver;
use crate::signer::TransactionSigner;
use crate::store::Datastore;

/// Draft-transaction engine.
///
/// Generic over the broadcaster so tests can swap ARC for a fake.
pub struct Engine<B = ArcClient> {
    config: EngineConfig,
    store: Arc<dyn Datastore>,
    reservations: ReservationManager,
    resolver: PaymailResolver,
    broadcaster: B,
    in_flight: InFlight,
}

impl Engine<ArcClient> {
    /// Create an engine talking to real paymail providers and ARC.
    pub fn from_config(config: EngineConfig, store: Arc<dyn Datastore>) -> Result<Self, EngineError> {
        config.validate()?;
        let paymail = PaymailClient::new(config.paymail.clone())
            .map_err(|e| EngineError::InvalidInput(format!("paymail client: {e}")))?;
        let arc = ArcClient::new(config.arc.clone());
        Ok(Engine::new(config, store, paymail, arc))
    }
}

impl<B: AsyncBroadcaster + Send + Sync> Engine<B> {
    /// Assemble an engine from its collaborators.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn Datastore>,
        paymail: PaymailClient,
        broadcaster: B,
    ) -> Self {
        let resolver = PaymailResolver::new(paymail, config.p2p_minimum_satoshis);
        let reservations = ReservationManager::new(store.clone());
        Engine {
            config,
            store,
            reservations,
            resolver,
            broadcaster,
            in_flight: InFlight::default(),
        }
    }

    /// Settings the engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<dyn Datastore> {
        &self.store
    }

    /// The reservation manager shared by every draft.
    pub fn reservations(&self) -> &ReservationManager {
        &self.reservations
    }

    /// The broadcaster transactions are sent through.
    pub fn broadcaster(&self) -> &B {
        &self.broadcaster
    }

    // -----------------------------------------------------------------------
    // Accounts and funding
    // -----------------------------------------------------------------------

    /// Register an account. Its change script becomes a known destination.
    pub fn add_account(&self, account: Account) -> Result<(), EngineError> {
        self.store.put_destination(Destination {
            locking_script: account.change_locking_script.clone(),
            account_id: account.id.clone(),
            address: None,
        })?;
        info!(account_id = %account.id, "added account");
        self.store.put_account(account)?;
        Ok(())
    }

    /// Register another receiving script for an existing account.
    pub fn add_destination(&self, destination: Destination) -> Result<(), EngineError> {
        if self.store.get_account(&destination.account_id)?.is_none() {
            return Err(EngineError::NotFound(format!("account {}", destination.account_id)));
        }
        self.store.put_destination(destination)?;
        Ok(())
    }

    /// Current balance of an account.
    pub fn balance(&self, account_id: &str) -> Result<u64, EngineError> {
        self.store
            .get_account(account_id)?
            .map(|a| a.current_balance)
            .ok_or_else(|| EngineError::NotFound(format!("account {account_id}")))
    }

    /// Store a transaction received from outside the engine and credit its
    /// outputs that pay known destinations.
    ///
    /// Mined ancestors should carry their merkle path so drafts spending
    /// them can be delivered as BEEF.
    pub fn import_transaction_at(
        &self,
        transaction: RecordedTransaction,
        now: DateTime<Utc>,
    ) -> Result<Vec<Utxo>, EngineError> {
        let tx = Transaction::from_hex(&transaction.hex)?;
        let txid = tx.tx_id();
        if txid.to_string() != transaction.id {
            return Err(EngineError::InvalidInput(format!(
                "transaction id {} does not match its hex ({txid})",
                transaction.id
            )));
        }

        let mut utxos = Vec::new();
        for (vout, output) in tx.outputs.iter().enumerate() {
            if output.satoshis == 0 {
                continue;
            }
            if let Some(destination) = self.store.destination_by_script(&output.locking_script)? {
                let vout = u32::try_from(vout)
                    .map_err(|_| EngineError::InvalidInput("too many outputs".to_string()))?;
                utxos.push(Utxo::new(
                    Outpoint::new(txid, vout),
                    destination.account_id,
                    output.satoshis,
                    output.locking_script.clone(),
                    now,
                ));
            }
        }

        self.store.put_transaction(transaction)?;
        let added = self.reservations.credit(utxos)?;
        info!(txid = %txid, credited = added.len(), "imported transaction");
        Ok(added)
    }

    /// [`import_transaction_at`](Self::import_transaction_at) at the current time.
    pub fn import_transaction(&self, transaction: RecordedTransaction) -> Result<Vec<Utxo>, EngineError> {
        self.import_transaction_at(transaction, Utc::now())
    }

    // -----------------------------------------------------------------------
    // Drafts
    // -----------------------------------------------------------------------

    /// Build a draft paying `config.outputs` from `account_id`.
    pub async fn build_draft(
        &self,
        account_id: &str,
        config: DraftConfig,
        metadata: Metadata,
    ) -> Result<DraftTransaction, EngineError> {
        self.build_draft_at(account_id, config, metadata, Utc::now()).await
    }

    /// [`build_draft`](Self::build_draft) with an explicit creation time.
    pub async fn build_draft_at(
        &self,
        account_id: &str,
        config: DraftConfig,
        metadata: Metadata,
        now: DateTime<Utc>,
    ) -> Result<DraftTransaction, EngineError> {
        self.builder().build_at(account_id, config, metadata, now).await
    }

    /// Look up a draft.
    pub fn get_draft(&self, draft_id: &str) -> Result<DraftTransaction, EngineError> {
        self.store
            .get_draft(draft_id)?
            .ok_or_else(|| EngineError::NotFound(format!("draft {draft_id}")))
    }

    /// Abandon a draft and release its reservation. Canceling twice is a no-op.
    pub fn cancel_draft(&self, draft_id: &str) -> Result<DraftTransaction, EngineError> {
        let account_id = self.get_draft(draft_id)?.account_id;
        match self
            .reservations
            .close_draft(&account_id, draft_id, DraftStatus::Canceled)?
        {
            DraftClosing::Closed { draft, released } => {
                info!(draft_id, released, "canceled draft");
                Ok(draft)
            }
            DraftClosing::Unchanged(draft) if draft.status == DraftStatus::Complete => {
                Err(EngineError::ReservationConflict(format!(
                    "draft {draft_id} is already recorded"
                )))
            }
            DraftClosing::Unchanged(draft) => Ok(draft),
        }
    }

    /// [`sweep_expired_at`](Self::sweep_expired_at) at the current time.
    pub fn sweep_expired(&self) -> Result<Vec<String>, EngineError> {
        self.sweep_expired_at(Utc::now())
    }

    /// Expire drafts past their deadline and release every lapsed
    /// reservation.
    ///
    /// # Returns
    /// IDs of the drafts marked expired.
    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> Result<Vec<String>, EngineError> {
        let swept = self.reservations.sweep_expired_at(now)?;

        let mut expired = Vec::new();
        for draft in self.store.drafts_with_status(DraftStatus::Draft)? {
            if !draft.is_expired_at(now) {
                continue;
            }
            if let DraftClosing::Closed { .. } =
                self.reservations
                    .close_draft(&draft.account_id, &draft.id, DraftStatus::Expired)?
            {
                expired.push(draft.id);
            }
        }
        if !expired.is_empty() || !swept.is_empty() {
            info!(drafts = expired.len(), reservations = swept.len(), "expired drafts");
        }
        Ok(expired)
    }

    // -----------------------------------------------------------------------
    // Recording and broadcast
    // -----------------------------------------------------------------------

    /// Record a signed draft, deliver it to P2P receivers, then broadcast it.
    ///
    /// A P2P failure is returned; the transaction stays recorded. A
    /// broadcast failure is logged and left for the background task.
    pub async fn record(
        &self,
        signed_hex: &str,
        draft_id: &str,
        metadata: Metadata,
    ) -> Result<RecordOutcome, EngineError> {
        self.record_at(signed_hex, draft_id, metadata, Utc::now()).await
    }

    /// [`record`](Self::record) at an explicit time.
    pub async fn record_at(
        &self,
        signed_hex: &str,
        draft_id: &str,
        metadata: Metadata,
        now: DateTime<Utc>,
    ) -> Result<RecordOutcome, EngineError> {
        let mut outcome =
            Recorder::new(self.store.as_ref(), &self.reservations).record_at(signed_hex, draft_id, metadata, now)?;
        if outcome.already_recorded {
            return Ok(outcome);
        }

        let coordinator = self.coordinator();
        let txid = outcome.sync.id.clone();
        if outcome.sync.p2p_status == SyncStatus::Pending {
            outcome.sync = coordinator.notify_p2p_at(&txid, now).await?;
        }
        if outcome.sync.ready_to_broadcast() {
            if let Err(e) = coordinator.broadcast_at(&txid, now).await {
                warn!(txid = %txid, error = %e, "broadcast deferred");
            }
            outcome.sync = self.get_sync_transaction(&txid)?;
        }
        Ok(outcome)
    }

    /// Sign a draft with `signer` and record the result.
    pub async fn sign_and_record<S: TransactionSigner + ?Sized>(
        &self,
        draft_id: &str,
        signer: &S,
        metadata: Metadata,
    ) -> Result<RecordOutcome, EngineError> {
        let draft = self.get_draft(draft_id)?;
        let signed_hex = signer.sign(&draft)?;
        self.record(&signed_hex, draft_id, metadata).await
    }

    /// Broadcast a recorded transaction whose P2P delivery is done.
    pub async fn broadcast(&self, txid: &str) -> Result<BroadcastReceipt, EngineError> {
        self.broadcast_at(txid, Utc::now()).await
    }

    /// [`broadcast`](Self::broadcast) at an explicit time.
    pub async fn broadcast_at(&self, txid: &str, now: DateTime<Utc>) -> Result<BroadcastReceipt, EngineError> {
        self.coordinator().broadcast_at(txid, now).await
    }

    /// Check whether a broadcast transaction has been mined.
    pub async fn sync_chain_state(&self, txid: &str) -> Result<SyncTransaction, EngineError> {
        self.sync_chain_state_at(txid, Utc::now()).await
    }

    /// [`sync_chain_state`](Self::sync_chain_state) at an explicit time.
    pub async fn sync_chain_state_at(
        &self,
        txid: &str,
        now: DateTime<Utc>,
    ) -> Result<SyncTransaction, EngineError> {
        self.coordinator().sync_chain_state_at(txid, now).await
    }

    /// One pass over every open obligation.
    pub async fn process_pending(&self) -> Result<PendingSummary, EngineError> {
        self.process_pending_at(Utc::now()).await
    }

    /// [`process_pending`](Self::process_pending) at an explicit time.
    pub async fn process_pending_at(&self, now: DateTime<Utc>) -> Result<PendingSummary, EngineError> {
        self.coordinator().process_pending_at(now).await
    }

    /// Look up a recorded or imported transaction.
    pub fn get_transaction(&self, txid: &str) -> Result<RecordedTransaction, EngineError> {
        self.store
            .get_transaction(txid)?
            .ok_or_else(|| EngineError::NotFound(format!("transaction {txid}")))
    }

    /// Obligations of a recorded transaction.
    pub fn get_sync_transaction(&self, txid: &str) -> Result<SyncTransaction, EngineError> {
        self.store
            .get_sync_transaction(txid)?
            .ok_or_else(|| EngineError::NotFound(format!("sync record {txid}")))
    }

    fn builder(&self) -> DraftBuilder<'_> {
        DraftBuilder::new(
            self.store.as_ref(),
            &self.reservations,
            &self.resolver,
            BuildSettings {
                fee_unit: self.config.fee_unit,
                dust_limit: self.config.dust_limit,
                draft_expiry_secs: self.config.draft_expiry_secs,
                max_fee_rounds: self.config.max_fee_rounds,
            },
        )
    }

    fn coordinator(&self) -> SyncCoordinator<'_, B> {
        SyncCoordinator::new(
            self.store.as_ref(),
            self.resolver.client(),
            &self.broadcaster,
            &self.in_flight,
            self.config.retry,
        )
    }
}
