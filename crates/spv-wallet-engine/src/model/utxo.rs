//! Unspent outputs and their reservation state.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spv_wallet_primitives::chainhash::ChainHash;
use spv_wallet_script::Script;

/// Reference to a transaction output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Outpoint {
    /// Transaction holding the output.
    pub txid: ChainHash,
    /// Output index.
    pub vout: u32,
}

impl Outpoint {
    /// Point at output `vout` of `txid`.
    pub fn new(txid: ChainHash, vout: u32) -> Self {
        Outpoint { txid, vout }
    }
}

impl fmt::Display for Outpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

/// Spend state of a UTXO.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UtxoState {
    /// Free to be reserved.
    Available,
    /// Held by a draft.
    Reserved {
        /// The holding draft.
        draft_id: String,
        /// After this the hold has lapsed.
        reserved_until: DateTime<Utc>,
    },
    /// Consumed by a recorded transaction.
    Spent {
        /// Transaction ID (display hex) of the spender.
        spending_txid: String,
    },
}

/// An output owned by an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    /// Where the output lives.
    pub outpoint: Outpoint,
    /// Owning account.
    pub account_id: String,
    /// Value of the output.
    pub satoshis: u64,
    /// Script the output pays to.
    pub locking_script: Script,
    /// Spend state.
    pub state: UtxoState,
    /// When the output entered the store.
    pub created_at: DateTime<Utc>,
}

impl Utxo {
    /// A fresh, available UTXO.
    pub fn new(
        outpoint: Outpoint,
        account_id: impl Into<String>,
        satoshis: u64,
        locking_script: Script,
        created_at: DateTime<Utc>,
    ) -> Self {
        Utxo {
            outpoint,
            account_id: account_id.into(),
            satoshis,
            locking_script,
            state: UtxoState::Available,
            created_at,
        }
    }

    /// True if the output can be reserved at `now`: available, or held by a
    /// reservation that has run out.
    pub fn is_spendable_at(&self, now: DateTime<Utc>) -> bool {
        match &self.state {
            UtxoState::Available => true,
            UtxoState::Reserved { reserved_until, .. } => *reserved_until <= now,
            UtxoState::Spent { .. } => false,
        }
    }

    /// The draft currently holding this output, if any.
    pub fn reserved_by(&self) -> Option<&str> {
        match &self.state {
            UtxoState::Reserved { draft_id, .. } => Some(draft_id),
            _ => None,
        }
    }

    /// True once a recorded transaction consumed it.
    pub fn is_spent(&self) -> bool {
        matches!(self.state, UtxoState::Spent { .. })
    }
}
