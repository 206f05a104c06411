//! ARC data types: configuration, status codes, and API response structures.

use serde::{Deserialize, Serialize};

/// Lifecycle states ARC reports for a submitted transaction, in the order
/// they are normally reached. `as_code` gives the numeric form used by the
/// `X-WaitForStatus` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArcStatus {
    /// Refused by ARC or the network.
    Rejected,
    /// Accepted into ARC's queue.
    Queued,
    /// Received and being validated.
    Received,
    /// Validated and stored by ARC.
    Stored,
    /// Announced to peers by inventory message.
    AnnouncedToNetwork,
    /// A peer asked for the transaction.
    RequestedByNetwork,
    /// Sent to at least one peer.
    SentToNetwork,
    /// A peer accepted it into its mempool.
    AcceptedByNetwork,
    /// Seen in the mempool of other nodes.
    SeenOnNetwork,
    /// Included in a block.
    Mined,
    /// Buried deep enough to be considered final.
    Confirmed,
    /// A conflicting spend of the same inputs was seen.
    DoubleSpendAttempted,
    /// Seen only in an orphan mempool, missing a parent.
    SeenInOrphanMempool,
}

impl ArcStatus {
    /// Numeric code of this status.
    pub fn as_code(&self) -> i32 {
        match self {
            Self::Rejected => 0,
            Self::Queued => 1,
            Self::Received => 2,
            Self::Stored => 3,
            Self::AnnouncedToNetwork => 4,
            Self::RequestedByNetwork => 5,
            Self::SentToNetwork => 6,
            Self::AcceptedByNetwork => 7,
            Self::SeenOnNetwork => 8,
            Self::Mined => 9,
            Self::Confirmed => 10,
            Self::DoubleSpendAttempted => 11,
            Self::SeenInOrphanMempool => 12,
        }
    }

    /// True once the transaction is in a block.
    pub fn is_mined(&self) -> bool {
        matches!(self, Self::Mined | Self::Confirmed)
    }

    /// True for terminal failure states.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Rejected | Self::DoubleSpendAttempted)
    }
}

impl std::fmt::Display for ArcStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_default();
        write!(f, "{s}")
    }
}

/// Serialization used for a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    /// Plain transaction bytes.
    Raw,
    /// Extended Format with source outputs.
    Extended,
}

/// Configuration for an [`ArcClient`](crate::ArcClient).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArcConfig {
    /// Base URL for the ARC API (e.g. `https://arc.taal.com/v1`).
    pub base_url: String,
    /// Optional Bearer token for authentication.
    pub api_key: Option<String>,
    /// Callback URL for status notifications.
    pub callback_url: Option<String>,
    /// Token sent with callbacks for verification.
    pub callback_token: Option<String>,
    /// Wait for transaction to reach this status before returning.
    pub wait_for_status: Option<ArcStatus>,
    /// Skip fee validation.
    pub skip_fee_validation: bool,
    /// Skip script validation.
    pub skip_script_validation: bool,
    /// Skip transaction validation.
    pub skip_tx_validation: bool,
    /// Maximum timeout in seconds.
    pub max_timeout: Option<u32>,
    /// Submit Extended Format when every input has its source output.
    pub prefer_extended_format: bool,
    /// Client-side request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ArcConfig {
    fn default() -> Self {
        Self {
            base_url: "https://arc.taal.com/v1".to_string(),
            api_key: None,
            callback_url: None,
            callback_token: None,
            wait_for_status: None,
            skip_fee_validation: false,
            skip_script_validation: false,
            skip_tx_validation: false,
            max_timeout: None,
            prefer_extended_format: true,
            request_timeout_secs: 30,
        }
    }
}

/// Response from the ARC API.
///
/// Error bodies (4xx) share this shape, with `status` holding the error
/// code and `detail` the reason.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArcResponse {
    /// Transaction ID.
    #[serde(default)]
    pub txid: String,
    /// Transaction status string (e.g. `MINED`).
    #[serde(default)]
    pub tx_status: Option<String>,
    /// Numeric status code.
    #[serde(default)]
    pub status: Option<i32>,
    /// Response title.
    #[serde(default)]
    pub title: Option<String>,
    /// Block hash if mined.
    #[serde(default)]
    pub block_hash: Option<String>,
    /// Block height if mined.
    #[serde(default)]
    pub block_height: Option<u64>,
    /// Extra information from the node.
    #[serde(default)]
    pub extra_info: Option<String>,
    /// Detail/error message.
    #[serde(default)]
    pub detail: Option<String>,
    /// Merkle path (BUMP hex) once mined.
    #[serde(default)]
    pub merkle_path: Option<String>,
}

impl ArcResponse {
    /// The `txStatus` field parsed into an [`ArcStatus`], if recognized.
    pub fn arc_status(&self) -> Option<ArcStatus> {
        self.tx_status
            .as_deref()
            .and_then(|s| serde_json::from_value(serde_json::Value::String(s.to_string())).ok())
    }

    /// True when ARC refused the transaction.
    pub fn is_rejected(&self) -> bool {
        self.status == Some(0) || self.arc_status().is_some_and(|s| s.is_failure())
    }

    /// True once ARC reports the transaction in a block.
    pub fn is_mined(&self) -> bool {
        self.arc_status().is_some_and(|s| s.is_mined())
    }

    /// True when ARC reports that it already has this transaction.
    pub fn is_already_known(&self) -> bool {
        [&self.title, &self.detail, &self.extra_info]
            .into_iter()
            .flatten()
            .map(|s| s.to_lowercase())
            .any(|s| s.contains("already") || s.contains("duplicate"))
    }

    /// Best available human-readable description.
    pub fn description(&self) -> String {
        self.detail
            .clone()
            .or_else(|| self.extra_info.clone().filter(|s| !s.is_empty()))
            .or_else(|| self.title.clone())
            .or_else(|| self.tx_status.clone())
            .unwrap_or_else(|| "rejected".to_string())
    }
}
