//! Draft transactions: a funded, fee-correct, unsigned transaction waiting
//! for an external signer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spv_wallet_paymail::PayloadFormat;
use spv_wallet_script::{Script, ScriptType};
use spv_wallet_transaction::{Transaction, TransactionInput, TransactionOutput};

use crate::fee::FeeUnit;
use crate::model::{Metadata, Outpoint};
use crate::outputs::{DraftConfig, OpReturn};

/// Lifecycle of a draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
    /// Built and holding its reservations.
    Draft,
    /// Recorded; its inputs are spent.
    Complete,
    /// Abandoned by the caller; reservations released.
    Canceled,
    /// Swept after its expiry; reservations released.
    Expired,
}

/// How a paymail destination was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionType {
    /// Basic address resolution; nothing owed to the receiver afterwards.
    Basic,
    /// P2P destination; the signed transaction must be sent to the receiver.
    P2p,
}

/// Paymail negotiation state for one output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymailP4 {
    /// Part of the paymail before `@`.
    pub alias: String,
    /// Part of the paymail after `@`.
    pub domain: String,
    /// Sender paymail placed in P2P metadata.
    #[serde(default)]
    pub from_paymail: String,
    /// Free-text note for the receiver.
    #[serde(default)]
    pub note: String,
    /// Expanded P2P destination URL that issued `reference_id`.
    #[serde(default)]
    pub destination_endpoint: String,
    /// Expanded URL the signed transaction is submitted to.
    #[serde(default)]
    pub receive_endpoint: String,
    /// Reference the receiver issued with its destination.
    #[serde(default)]
    pub reference_id: String,
    /// Whether the receiver takes raw hex or BEEF.
    pub format: PayloadFormat,
    /// How the destination was resolved.
    pub resolution_type: ResolutionType,
    /// The requested amount was not positive and the minimum was used instead.
    #[serde(default)]
    pub amount_substituted: bool,
}

impl PaymailP4 {
    /// True if the receiver expects the signed transaction from us.
    pub fn needs_notification(&self) -> bool {
        self.resolution_type == ResolutionType::P2p
    }

    /// The full paymail, `alias@domain`.
    pub fn address(&self) -> String {
        format!("{}@{}", self.alias, self.domain)
    }
}

/// One concrete transaction output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptOutput {
    /// Address the script was derived from, if any.
    #[serde(default)]
    pub address: Option<String>,
    /// Value of the output.
    pub satoshis: u64,
    /// Locking script.
    pub script: Script,
    /// Template the script matches.
    pub script_type: ScriptType,
}

impl ScriptOutput {
    /// An output paying `satoshis` to `script`, with its type detected.
    pub fn new(script: Script, satoshis: u64) -> Self {
        let script_type = script.script_type();
        ScriptOutput {
            address: None,
            satoshis,
            script,
            script_type,
        }
    }
}

/// A requested output after resolution. A P2P paymail output may expand
/// into several script outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftOutput {
    /// Destination as given by the caller, if any.
    #[serde(default)]
    pub to: Option<String>,
    /// Total value across `scripts`.
    pub satoshis: u64,
    /// Concrete outputs, in transaction order.
    pub scripts: Vec<ScriptOutput>,
    /// Paymail negotiation state for paymail destinations.
    #[serde(default)]
    pub paymail_p4: Option<PaymailP4>,
    /// Data carried by an OP_RETURN output.
    #[serde(default)]
    pub op_return: Option<OpReturn>,
    /// Change back to the owning account.
    #[serde(default)]
    pub use_for_change: bool,
}

/// A reserved input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftInput {
    /// Output being spent.
    pub outpoint: Outpoint,
    /// Its value.
    pub satoshis: u64,
    /// Its locking script, needed for signing.
    pub locking_script: Script,
}

/// A draft transaction.
///
/// Invariant: `total_input_satoshis == total_output_satoshis + change_satoshis + fee`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftTransaction {
    /// Unique draft ID.
    pub id: String,
    /// Account paying for the draft.
    pub account_id: String,
    /// The request the draft was built from.
    pub config: DraftConfig,
    /// Fee rate the draft was priced at.
    pub fee_unit: FeeUnit,
    /// Payment outputs followed by change outputs.
    pub outputs: Vec<DraftOutput>,
    /// Reserved inputs.
    pub inputs: Vec<DraftInput>,
    /// Fee paid to miners.
    pub fee: u64,
    /// Sum of the inputs.
    pub total_input_satoshis: u64,
    /// Sum of the non-change outputs.
    pub total_output_satoshis: u64,
    /// Sum of the change outputs.
    pub change_satoshis: u64,
    /// Estimated size of the signed transaction.
    pub estimated_size: u64,
    /// Unsigned transaction hex.
    pub hex: String,
    /// Lifecycle state.
    pub status: DraftStatus,
    /// Caller metadata, carried onto the recorded transaction.
    #[serde(default)]
    pub metadata: Metadata,
    /// When the draft was built.
    pub created_at: DateTime<Utc>,
    /// When its reservations lapse.
    pub expires_at: DateTime<Utc>,
}

impl DraftTransaction {
    /// All script outputs in transaction order.
    pub fn script_outputs(&self) -> impl Iterator<Item = &ScriptOutput> {
        self.outputs.iter().flat_map(|o| o.scripts.iter())
    }

    /// Outputs still owed to a P2P receiver after recording.
    pub fn p2p_outputs(&self) -> impl Iterator<Item = &PaymailP4> {
        self.outputs
            .iter()
            .filter_map(|o| o.paymail_p4.as_ref())
            .filter(|p4| p4.needs_notification())
    }

    /// True if some receiver expects the signed transaction from us.
    pub fn has_p2p_obligation(&self) -> bool {
        self.p2p_outputs().next().is_some()
    }

    /// True if the draft is expired, or still open past its deadline.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == DraftStatus::Expired || (self.status == DraftStatus::Draft && self.expires_at <= now)
    }

    /// Outpoints of the reserved inputs.
    pub fn outpoints(&self) -> Vec<Outpoint> {
        self.inputs.iter().map(|i| i.outpoint).collect()
    }

    /// Build the unsigned transaction, with source outputs attached so it
    /// can be serialized as EF once signed.
    pub fn to_transaction(&self) -> Transaction {
        let mut tx = Transaction::new();
        for input in &self.inputs {
            tx.add_input(
                TransactionInput::new(input.outpoint.txid, input.outpoint.vout)
                    .with_source_output(input.satoshis, input.locking_script.clone()),
            );
        }
        for output in &self.outputs {
            for script in &output.scripts {
                let tx_output = if output.use_for_change {
                    TransactionOutput::change(script.satoshis, script.script.clone())
                } else {
                    TransactionOutput::new(script.satoshis, script.script.clone())
                };
                tx.add_output(tx_output);
            }
        }
        tx
    }

    /// Attach this draft's source outputs to a (signed) transaction spending
    /// the same inputs.
    pub fn attach_source_outputs(&self, tx: &mut Transaction) {
        for input in tx.inputs.iter_mut() {
            let outpoint = Outpoint::new(input.source_txid, input.source_tx_out_index);
            if let Some(source) = self.inputs.iter().find(|i| i.outpoint == outpoint) {
                input.source_output = Some(TransactionOutput::new(
                    source.satoshis,
                    source.locking_script.clone(),
                ));
            }
        }
    }
}
