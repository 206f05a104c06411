//! Accounts and the destinations they own.

use serde::{Deserialize, Serialize};
use spv_wallet_script::Script;

/// A wallet account: the owner of UTXOs and drafts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Unique account ID.
    pub id: String,
    /// Sum of the account's unspent outputs, in satoshis.
    pub current_balance: u64,
    /// Script change outputs pay back to.
    pub change_locking_script: Script,
    /// Paymail used as sender handle in P2P exchanges.
    #[serde(default)]
    pub paymail: Option<String>,
}

impl Account {
    /// An account with a zero balance and no paymail.
    pub fn new(id: impl Into<String>, change_locking_script: Script) -> Self {
        Account {
            id: id.into(),
            current_balance: 0,
            change_locking_script,
            paymail: None,
        }
    }

    /// Set the sender paymail.
    pub fn with_paymail(mut self, paymail: impl Into<String>) -> Self {
        self.paymail = Some(paymail.into());
        self
    }
}

/// A locking script known to belong to an account.
///
/// The recorder turns outputs paying a known destination into new UTXOs
/// credited to its account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    /// Script the destination is paid through.
    pub locking_script: Script,
    /// Account credited with outputs paying this script.
    pub account_id: String,
    /// Address form of the script, if it has one.
    #[serde(default)]
    pub address: Option<String>,
}
