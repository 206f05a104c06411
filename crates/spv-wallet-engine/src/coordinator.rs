//! Post-recording obligations: P2P delivery to paymail receivers, broadcast
//! through ARC and following the transaction until it is mined.
//!
//! P2P delivery always runs before broadcast. A receiver rejecting the
//! transaction stops it from being broadcast.

use std::collections::HashSet;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use spv_wallet_arc::{ArcError, ArcResponse, ArcStatus, AsyncBroadcaster};
use spv_wallet_paymail::{P2PMetadata, P2PTransaction, PaymailClient, PaymailError, PayloadFormat};
use spv_wallet_primitives::chainhash::ChainHash;
use spv_wallet_transaction::{Beef, Transaction};
use tracing::{debug, error, info, warn};

use crate::config::RetryConfig;
use crate::error::EngineError;
use crate::model::{PaymailP4, RecordedTransaction, SyncAction, SyncStatus, SyncTransaction};
use crate::store::Datastore;

/// Provider name recorded for broadcaster results.
pub const BROADCAST_PROVIDER: &str = "arc";

/// Transaction IDs whose obligations some task is working on.
///
/// The foreground record path and the background sweep share one set, so
/// a transaction is never notified or broadcast by two tasks at once.
#[derive(Debug, Default)]
pub struct InFlight {
    txids: Mutex<HashSet<String>>,
}

impl InFlight {
    /// Claim `txid`, or `None` while another task holds it.
    pub fn claim(&self, txid: &str) -> Option<InFlightClaim<'_>> {
        let mut txids = self.txids.lock().unwrap_or_else(PoisonError::into_inner);
        if !txids.insert(txid.to_string()) {
            return None;
        }
        Some(InFlightClaim {
            owner: self,
            txid: txid.to_string(),
        })
    }

    /// Whether some task holds `txid`.
    pub fn is_claimed(&self, txid: &str) -> bool {
        self.txids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(txid)
    }
}

/// Held while working on a transaction; releases the claim on drop.
#[derive(Debug)]
pub struct InFlightClaim<'a> {
    owner: &'a InFlight,
    txid: String,
}

impl Drop for InFlightClaim<'_> {
    fn drop(&mut self) {
        self.owner
            .txids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.txid);
    }
}

/// Result of a broadcast attempt that reached the broadcaster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastReceipt {
    /// Transaction ID (display hex).
    pub txid: String,
    /// Broadcast obligation after the attempt.
    pub broadcast_status: SyncStatus,
    /// Chain-sync obligation after the attempt.
    pub sync_status: SyncStatus,
    /// Status reported by the broadcaster, if any.
    pub arc_status: Option<ArcStatus>,
}

/// Counts from one [`SyncCoordinator::process_pending_at`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingSummary {
    /// Transactions whose P2P delivery finished.
    pub notified: usize,
    /// Transactions accepted by the broadcaster.
    pub broadcast: usize,
    /// Transactions found mined.
    pub mined: usize,
    /// Attempts that failed and stay outstanding.
    pub failed: usize,
}

/// Drives the obligations of recorded transactions against the store.
pub struct SyncCoordinator<'a, B> {
    store: &'a dyn Datastore,
    paymail: &'a PaymailClient,
    broadcaster: &'a B,
    in_flight: &'a InFlight,
    retry: RetryConfig,
}

impl<'a, B: AsyncBroadcaster + Sync> SyncCoordinator<'a, B> {
    /// Borrow everything one pass needs.
    pub fn new(
        store: &'a dyn Datastore,
        paymail: &'a PaymailClient,
        broadcaster: &'a B,
        in_flight: &'a InFlight,
        retry: RetryConfig,
    ) -> Self {
        SyncCoordinator {
            store,
            paymail,
            broadcaster,
            in_flight,
            retry,
        }
    }

    // -----------------------------------------------------------------------
    // P2P delivery
    // -----------------------------------------------------------------------

    /// Send the signed transaction to every P2P receiver of its draft.
    ///
    /// A receiver rejecting it marks P2P as failed; a receiver that stays
    /// unreachable after retries leaves it pending for the next pass.
    /// Receivers that already accepted are not contacted again. While
    /// another task works on `txid` the current record is returned as is.
    pub async fn notify_p2p_at(
        &self,
        txid: &str,
        now: DateTime<Utc>,
    ) -> Result<SyncTransaction, EngineError> {
        let Some(_claim) = self.in_flight.claim(txid) else {
            debug!(txid, "P2P delivery already in progress");
            return self.sync_record(txid);
        };
        let mut sync = self.sync_record(txid)?;
        if sync.p2p_status != SyncStatus::Pending {
            return Ok(sync);
        }
        let transaction = self.transaction(txid)?;
        let draft = self
            .store
            .get_draft(&sync.draft_id)?
            .ok_or_else(|| EngineError::NotFound(format!("draft {}", sync.draft_id)))?;

        let receivers: Vec<&PaymailP4> = draft.p2p_outputs().collect();
        let mut beef_hex = None;
        for p4 in receivers {
            if sync.p2p_delivered.contains(&p4.reference_id) {
                debug!(txid, receiver = %p4.address(), "P2P receiver already accepted");
                continue;
            }
            let payload = match self.p2p_payload(p4, &transaction, &mut beef_hex) {
                Ok(payload) => payload,
                Err(e) => {
                    error!(txid, domain = %p4.domain, error = %e, "cannot build P2P payload");
                    sync.p2p_status = SyncStatus::Error;
                    sync.add_result(SyncAction::P2p, &p4.domain, e.to_string(), now);
                    self.store.put_sync_transaction(sync)?;
                    return Err(e);
                }
            };

            let sent = with_retry(self.retry, "p2p notification", PaymailError::is_retryable, || {
                self.paymail.submit_p2p_transaction(&p4.receive_endpoint, &payload)
            })
            .await;

            match sent {
                Ok(response) => {
                    info!(txid, receiver = %p4.address(), "P2P receiver accepted transaction");
                    let message = if response.note.is_empty() {
                        "accepted".to_string()
                    } else {
                        format!("accepted: {}", response.note)
                    };
                    sync.add_result(SyncAction::P2p, &p4.domain, message, now);
                    sync.p2p_delivered.push(p4.reference_id.clone());
                }
                Err(PaymailError::Duplicate(message)) => {
                    debug!(txid, receiver = %p4.address(), "P2P receiver already had transaction");
                    sync.add_result(SyncAction::P2p, &p4.domain, format!("already received: {message}"), now);
                    sync.p2p_delivered.push(p4.reference_id.clone());
                }
                Err(source) => {
                    if source.is_retryable() {
                        warn!(txid, receiver = %p4.address(), error = %source, "P2P receiver unreachable");
                    } else {
                        error!(txid, receiver = %p4.address(), error = %source, "P2P receiver rejected transaction");
                        sync.p2p_status = SyncStatus::Error;
                    }
                    sync.add_result(SyncAction::P2p, &p4.domain, source.to_string(), now);
                    self.store.put_sync_transaction(sync)?;
                    return Err(EngineError::P2PNotification {
                        domain: p4.domain.clone(),
                        source,
                    });
                }
            }
        }

        sync.p2p_status = SyncStatus::Complete;
        sync.updated_at = now;
        self.store.put_sync_transaction(sync.clone())?;
        Ok(sync)
    }

    fn p2p_payload(
        &self,
        p4: &PaymailP4,
        transaction: &RecordedTransaction,
        beef_hex: &mut Option<String>,
    ) -> Result<P2PTransaction, EngineError> {
        let (hex, beef) = match p4.format {
            PayloadFormat::Basic => (Some(transaction.hex.clone()), None),
            PayloadFormat::Beef => {
                if beef_hex.is_none() {
                    *beef_hex = Some(self.assemble_beef(&transaction.hex)?.to_hex()?);
                }
                (None, beef_hex.clone())
            }
        };
        Ok(P2PTransaction {
            hex,
            beef,
            reference: p4.reference_id.clone(),
            metadata: P2PMetadata {
                sender: p4.from_paymail.clone(),
                note: p4.note.clone(),
                pubkey: None,
                signature: None,
            },
        })
    }

    /// Build a BEEF for `signed_hex`: the transaction plus every stored
    /// ancestor back to the first mined ones, which carry their merkle path.
    ///
    /// An ancestor missing from the store makes the BEEF unbuildable.
    pub fn assemble_beef(&self, signed_hex: &str) -> Result<Beef, EngineError> {
        let tx = Transaction::from_hex(signed_hex)?;
        let mut beef = Beef::new();
        let mut seen: HashSet<ChainHash> = HashSet::new();
        let mut pending: Vec<ChainHash> = tx.inputs.iter().map(|i| i.source_txid).collect();

        while let Some(txid) = pending.pop() {
            if !seen.insert(txid) {
                continue;
            }
            let ancestor = self
                .store
                .get_transaction(&txid.to_string())?
                .ok_or_else(|| EngineError::NotFound(format!("ancestor transaction {txid}")))?;
            let parent = Transaction::from_hex(&ancestor.hex)?;
            match &ancestor.merkle_path {
                Some(path) => {
                    let bump = hex::decode(path).map_err(|e| {
                        EngineError::InvalidInput(format!("merkle path of {txid}: {e}"))
                    })?;
                    beef.add_transaction(parent, Some(bump));
                }
                None => {
                    pending.extend(parent.inputs.iter().map(|i| i.source_txid));
                    beef.add_transaction(parent, None);
                }
            }
        }

        beef.add_transaction(tx, None);
        Ok(beef)
    }

    // -----------------------------------------------------------------------
    // Broadcast
    // -----------------------------------------------------------------------

    /// Broadcast a recorded transaction once P2P delivery allows it.
    ///
    /// Transient failures leave the broadcast pending; a rejection marks it
    /// failed. Either way the error is returned after the status is saved.
    /// While another task works on `txid` nothing is sent.
    pub async fn broadcast_at(
        &self,
        txid: &str,
        now: DateTime<Utc>,
    ) -> Result<BroadcastReceipt, EngineError> {
        let Some(_claim) = self.in_flight.claim(txid) else {
            debug!(txid, "broadcast already in progress");
            return Ok(receipt(&self.sync_record(txid)?, None));
        };
        let mut sync = self.sync_record(txid)?;
        if !sync.ready_to_broadcast() {
            return Ok(receipt(&sync, None));
        }

        let mut transaction = self.transaction(txid)?;
        let mut tx = Transaction::from_hex(&transaction.hex)?;
        if let Some(draft) = self.store.get_draft(&transaction.draft_id)? {
            draft.attach_source_outputs(&mut tx);
        }

        let result = with_retry(self.retry, "broadcast", ArcError::is_retryable, || {
            self.broadcaster.broadcast(&tx)
        })
        .await;

        match result {
            Ok(response) => {
                sync.broadcast_status = SyncStatus::Complete;
                sync.add_result(SyncAction::Broadcast, BROADCAST_PROVIDER, response.description(), now);
                if response.is_mined() {
                    apply_block_data(&mut transaction, &response);
                    self.store.put_transaction(transaction)?;
                    sync.sync_status = SyncStatus::Complete;
                } else if sync.sync_status == SyncStatus::Pending {
                    sync.sync_status = SyncStatus::Ready;
                }
                info!(txid, status = ?response.arc_status(), "broadcast transaction");
                self.store.put_sync_transaction(sync.clone())?;
                Ok(receipt(&sync, response.arc_status()))
            }
            Err(source) => {
                if source.is_retryable() {
                    warn!(txid, error = %source, "broadcast failed, will retry");
                } else {
                    error!(txid, error = %source, "broadcast rejected");
                    sync.broadcast_status = SyncStatus::Error;
                }
                sync.add_result(SyncAction::Broadcast, BROADCAST_PROVIDER, source.to_string(), now);
                self.store.put_sync_transaction(sync)?;
                Err(EngineError::Broadcast {
                    txid: txid.to_string(),
                    source,
                })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Chain state
    // -----------------------------------------------------------------------

    /// Ask the broadcaster whether a broadcast transaction has been mined.
    pub async fn sync_chain_state_at(
        &self,
        txid: &str,
        now: DateTime<Utc>,
    ) -> Result<SyncTransaction, EngineError> {
        let Some(_claim) = self.in_flight.claim(txid) else {
            return self.sync_record(txid);
        };
        let mut sync = self.sync_record(txid)?;
        if sync.sync_status != SyncStatus::Ready {
            return Ok(sync);
        }

        let response = self
            .broadcaster
            .status(txid)
            .await
            .map_err(|source| EngineError::Broadcast {
                txid: txid.to_string(),
                source,
            })?;

        if response.is_mined() {
            let mut transaction = self.transaction(txid)?;
            apply_block_data(&mut transaction, &response);
            self.store.put_transaction(transaction)?;
            sync.sync_status = SyncStatus::Complete;
            sync.add_result(SyncAction::Sync, BROADCAST_PROVIDER, response.description(), now);
            info!(txid, block_height = ?response.block_height, "transaction mined");
        } else if response.is_rejected() {
            sync.sync_status = SyncStatus::Error;
            sync.add_result(SyncAction::Sync, BROADCAST_PROVIDER, response.description(), now);
            error!(txid, status = ?response.tx_status, "transaction dropped by the network");
        } else {
            return Ok(sync);
        }
        self.store.put_sync_transaction(sync.clone())?;
        Ok(sync)
    }

    /// Work through every open obligation once, in recording order.
    pub async fn process_pending_at(&self, now: DateTime<Utc>) -> Result<PendingSummary, EngineError> {
        let mut summary = PendingSummary::default();
        for sync in self.store.sync_transactions()? {
            let txid = sync.id.as_str();
            if sync.p2p_status == SyncStatus::Pending {
                match self.notify_p2p_at(txid, now).await {
                    Ok(s) if s.p2p_status == SyncStatus::Complete => summary.notified += 1,
                    Ok(_) => continue,
                    Err(e) => {
                        debug!(txid, error = %e, "P2P notification still outstanding");
                        summary.failed += 1;
                        continue;
                    }
                }
            }

            let sync = self.sync_record(txid)?;
            if sync.ready_to_broadcast() {
                match self.broadcast_at(txid, now).await {
                    Ok(r) if r.broadcast_status == SyncStatus::Complete => summary.broadcast += 1,
                    Ok(_) => continue,
                    Err(e) => {
                        debug!(txid, error = %e, "broadcast still outstanding");
                        summary.failed += 1;
                        continue;
                    }
                }
            }

            let sync = self.sync_record(txid)?;
            if sync.sync_status == SyncStatus::Ready {
                match self.sync_chain_state_at(txid, now).await {
                    Ok(s) if s.sync_status == SyncStatus::Complete => summary.mined += 1,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(txid, error = %e, "status query failed");
                        summary.failed += 1;
                    }
                }
            }
        }
        Ok(summary)
    }

    fn sync_record(&self, txid: &str) -> Result<SyncTransaction, EngineError> {
        self.store
            .get_sync_transaction(txid)?
            .ok_or_else(|| EngineError::NotFound(format!("sync record {txid}")))
    }

    fn transaction(&self, txid: &str) -> Result<RecordedTransaction, EngineError> {
        self.store
            .get_transaction(txid)?
            .ok_or_else(|| EngineError::NotFound(format!("transaction {txid}")))
    }
}

fn receipt(sync: &SyncTransaction, arc_status: Option<ArcStatus>) -> BroadcastReceipt {
    BroadcastReceipt {
        txid: sync.id.clone(),
        broadcast_status: sync.broadcast_status,
        sync_status: sync.sync_status,
        arc_status,
    }
}

fn apply_block_data(transaction: &mut RecordedTransaction, response: &ArcResponse) {
    transaction.block_hash = response.block_hash.clone();
    transaction.block_height = response.block_height;
    if response.merkle_path.is_some() {
        transaction.merkle_path = response.merkle_path.clone();
    }
}

/// Run `op` up to `retry.attempts` times, doubling the delay between
/// attempts, for as long as `retryable` says the error is transient.
pub async fn with_retry<T, E, F, Fut>(
    retry: RetryConfig,
    what: &str,
    retryable: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut delay = retry.initial_backoff();
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < retry.attempts && retryable(&e) => {
                warn!(what, attempt, error = %e, "attempt failed, retrying");
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn test_in_flight_claim_is_exclusive() {
        let in_flight = InFlight::default();
        let claim = in_flight.claim("aa").unwrap();
        assert!(in_flight.is_claimed("aa"));
        assert!(in_flight.claim("aa").is_none());
        assert!(in_flight.claim("bb").is_some());

        drop(claim);
        assert!(!in_flight.is_claimed("aa"));
        assert!(in_flight.claim("aa").is_some());
    }

    #[tokio::test]
    async fn test_with_retry_stops_on_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let retry = RetryConfig {
            attempts: 3,
            initial_backoff_ms: 1,
        };
        let result: Result<u32, String> = with_retry(retry, "test", |_| true, move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 2 {
                Err("transient".to_string())
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_with_retry_gives_up() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let retry = RetryConfig {
            attempts: 3,
            initial_backoff_ms: 1,
        };
        let result: Result<(), String> = with_retry(retry, "test", |_| true, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err("down".to_string())
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        calls.store(0, Ordering::SeqCst);
        let result: Result<(), String> = with_retry(retry, "test", |_| false, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err("fatal".to_string())
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
