//! Paymail data types: configuration, capability document and the request
//! and response bodies of the endpoints used when paying.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Basic address resolution (`paymentDestination`).
pub const BRFC_BASIC_ADDRESS_RESOLUTION: &str = "paymentDestination";
/// P2P payment destination.
pub const BRFC_P2P_PAYMENT_DESTINATION: &str = "2a40af698840";
/// P2P receive transaction (raw hex payload).
pub const BRFC_P2P_TRANSACTION: &str = "5f1323cddf31";
/// P2P receive transaction with a BEEF payload.
pub const BRFC_BEEF_TRANSACTION: &str = "5c55a7fdb7bb";

/// Configuration for a [`PaymailClient`](crate::PaymailClient).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymailConfig {
    /// URL scheme used for capability discovery.
    pub scheme: String,
    /// Port appended to the domain for capability discovery, if not the default.
    pub port: Option<u16>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// User agent sent with every request.
    pub user_agent: String,
    /// Paymail of the sender, sent in resolution requests and P2P metadata.
    pub sender_paymail: String,
    /// Display name of the sender.
    pub sender_name: String,
    /// Default note attached to P2P transactions.
    pub note: String,
}

impl Default for PaymailConfig {
    fn default() -> Self {
        Self {
            scheme: "https".to_string(),
            port: None,
            timeout_secs: 15,
            user_agent: concat!("spv-wallet-paymail/", env!("CARGO_PKG_VERSION")).to_string(),
            sender_paymail: String::new(),
            sender_name: String::new(),
            note: String::new(),
        }
    }
}

/// The `.well-known/bsvalias` capability document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    /// Protocol version, `1.0` in practice.
    pub bsvalias: String,
    /// Capability BRFC IDs (or names) mapped to URL templates or flags.
    pub capabilities: HashMap<String, serde_json::Value>,
}

impl Capabilities {
    /// URL template for a capability, if advertised as a string.
    pub fn get_string(&self, brfc: &str) -> Option<&str> {
        self.capabilities.get(brfc).and_then(|v| v.as_str())
    }

    /// True if the capability is advertised with a non-empty URL.
    pub fn has(&self, brfc: &str) -> bool {
        self.get_string(brfc).is_some_and(|s| !s.is_empty())
    }
}

/// Serialization a P2P receiver expects the transaction in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    /// Raw transaction hex.
    Basic,
    /// BEEF with ancestry.
    Beef,
}

/// Request body for basic address resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveAddressRequest {
    /// Paymail of the sender.
    pub sender_handle: String,
    /// RFC 3339 timestamp of the request.
    pub dt: String,
    /// Intended amount in satoshis.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<u64>,
    /// Free-form purpose of the payment.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub purpose: String,
    /// Display name of the sender.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sender_name: String,
}

/// Response body for basic address resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveAddressResponse {
    /// Locking script hex to pay.
    pub output: String,
}

/// One output of a P2P payment destination response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentOutput {
    /// Address form of the script, when the provider sends one.
    #[serde(default)]
    pub address: Option<String>,
    /// Satoshis the provider suggests for this output.
    #[serde(default)]
    pub satoshis: u64,
    /// Locking script hex.
    pub script: String,
}

/// Response body for a P2P payment destination request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct P2PDestinationResponse {
    /// Outputs to pay.
    pub outputs: Vec<PaymentOutput>,
    /// Reference the provider uses to match the later transaction.
    pub reference: String,
}

/// Sender metadata attached to a P2P transaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct P2PMetadata {
    /// Paymail of the sender.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub sender: String,
    /// Note for the receiver.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub note: String,
    /// Sender public key, when signed.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pubkey: Option<String>,
    /// Signature over the txid, when signed.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub signature: Option<String>,
}

/// Request body for P2P transaction submission.
///
/// Exactly one of `hex` and `beef` is set, depending on the negotiated format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct P2PTransaction {
    /// Raw transaction hex.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub hex: Option<String>,
    /// BEEF hex.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub beef: Option<String>,
    /// Reference issued by the destination request.
    pub reference: String,
    /// Sender metadata.
    pub metadata: P2PMetadata,
}

/// Response body for P2P transaction submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct P2PTransactionResponse {
    /// Transaction ID as seen by the receiver.
    pub txid: String,
    /// Optional note from the receiver.
    #[serde(default)]
    pub note: String,
}
