//! Recorded transactions and the post-signing obligations tracked for them.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::Metadata;

/// Progress of one obligation (broadcast, P2P notification, chain sync).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Work is outstanding.
    Pending,
    /// Nothing is owed by us yet, or the step was handed off.
    Ready,
    /// Done.
    Complete,
    /// Failed permanently; needs manual intervention.
    Error,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Ready => "ready",
            SyncStatus::Complete => "complete",
            SyncStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Which obligation a [`SyncResult`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    /// Delivery to a paymail P2P receiver.
    P2p,
    /// Submission to the broadcaster.
    Broadcast,
    /// Chain-state query.
    Sync,
}

/// Outcome of one attempt at an obligation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    /// Obligation this attempt was for.
    pub action: SyncAction,
    /// Who was contacted: a paymail domain or the broadcaster.
    pub provider: String,
    /// Response or error text.
    pub status_message: String,
    /// When the attempt finished.
    pub executed_at: DateTime<Utc>,
}

/// Post-signing obligations of a recorded transaction. Never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTransaction {
    /// Transaction ID (display hex).
    pub id: String,
    /// Draft the transaction was signed from.
    pub draft_id: String,
    /// Submission to the broadcaster.
    pub broadcast_status: SyncStatus,
    /// Delivery to paymail P2P receivers.
    pub p2p_status: SyncStatus,
    /// Following the transaction until it is mined.
    pub sync_status: SyncStatus,
    /// Reference IDs of the P2P receivers that already accepted the
    /// transaction. They are skipped when delivery is retried.
    #[serde(default)]
    pub p2p_delivered: Vec<String>,
    /// Every attempt, oldest first.
    #[serde(default)]
    pub results: Vec<SyncResult>,
    /// When the transaction was recorded.
    pub created_at: DateTime<Utc>,
    /// Last change to any status.
    pub updated_at: DateTime<Utc>,
}

impl SyncTransaction {
    /// Append an attempt and bump `updated_at`.
    pub fn add_result(
        &mut self,
        action: SyncAction,
        provider: impl Into<String>,
        status_message: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        self.results.push(SyncResult {
            action,
            provider: provider.into(),
            status_message: status_message.into(),
            executed_at: now,
        });
        self.updated_at = now;
    }

    /// Broadcast is due: still pending and not blocked behind P2P delivery.
    pub fn ready_to_broadcast(&self) -> bool {
        self.broadcast_status == SyncStatus::Pending
            && matches!(self.p2p_status, SyncStatus::Ready | SyncStatus::Complete)
    }
}

/// A signed transaction applied to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedTransaction {
    /// Transaction ID (display hex).
    pub id: String,
    /// Empty for transactions imported from outside the engine.
    #[serde(default)]
    pub draft_id: String,
    /// Raw transaction hex.
    pub hex: String,
    /// Signed satoshi delta per account.
    #[serde(default)]
    pub account_deltas: BTreeMap<String, i64>,
    /// Fee paid, zero for imported transactions.
    #[serde(default)]
    pub fee: u64,
    /// Set once the transaction is mined.
    #[serde(default)]
    pub block_hash: Option<String>,
    /// Set once the transaction is mined.
    #[serde(default)]
    pub block_height: Option<u64>,
    /// Serialized BUMP hex once mined.
    #[serde(default)]
    pub merkle_path: Option<String>,
    /// Caller metadata merged with the draft's.
    #[serde(default)]
    pub metadata: Metadata,
    /// When the transaction entered the store.
    pub created_at: DateTime<Utc>,
}

impl RecordedTransaction {
    /// A transaction known to the store but not produced by a draft, such
    /// as an incoming payment or a funding transaction.
    pub fn imported(id: impl Into<String>, hex: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        RecordedTransaction {
            id: id.into(),
            draft_id: String::new(),
            hex: hex.into(),
            account_deltas: BTreeMap::new(),
            fee: 0,
            block_hash: None,
            block_height: None,
            merkle_path: None,
            metadata: Metadata::new(),
            created_at,
        }
    }

    /// Attach a mined merkle path.
    pub fn with_merkle_path(mut self, merkle_path: impl Into<String>) -> Self {
        self.merkle_path = Some(merkle_path.into());
        self
    }
}
