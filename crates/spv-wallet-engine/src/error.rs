//! Error types for the draft-transaction engine.

use spv_wallet_arc::ArcError;
use spv_wallet_paymail::PaymailError;
use spv_wallet_script::ScriptError;
use spv_wallet_transaction::TransactionError;

/// Caller-facing classification of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Available UTXOs cannot cover the outputs and fee.
    InsufficientFunds,
    /// A paymail destination could not be resolved.
    PaymailResolution,
    /// A reservation is held by another draft or in the wrong state.
    ReservationConflict,
    /// A signed transaction does not match its draft's reservation.
    ReservationMismatch,
    /// Broadcast or P2P delivery failed.
    Broadcast,
    /// The draft expired before it was recorded.
    Expired,
    /// Bad caller input, rejected before any reservation.
    InvalidInput,
    /// An internal accounting invariant did not hold.
    InvariantViolation,
    /// A referenced record does not exist.
    NotFound,
    /// The store rejected or failed a write.
    Storage,
}

/// Errors from the persistence boundary.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A balance delta refers to an account the store does not know.
    #[error("unknown account: {0}")]
    UnknownAccount(String),

    /// Applying a delta would drive a balance below zero.
    #[error("balance of {account_id} would become negative ({balance} {delta:+})")]
    NegativeBalance {
        /// The account.
        account_id: String,
        /// Current balance.
        balance: u64,
        /// Rejected delta.
        delta: i64,
    },

    /// The store's lock was poisoned by a panicking writer.
    #[error("store lock poisoned")]
    Poisoned,
}

/// Errors returned by engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Available UTXOs cannot cover the outputs and fee.
    #[error("insufficient funds: need {required} satoshis, {available} available")]
    InsufficientFunds {
        /// Satoshis the draft needs.
        required: u64,
        /// Satoshis the account could offer.
        available: u64,
    },

    /// A paymail destination could not be resolved.
    #[error("paymail resolution failed for {domain}: {source}")]
    PaymailResolution {
        /// Domain of the paymail.
        domain: String,
        /// Underlying paymail client error.
        #[source]
        source: PaymailError,
    },

    /// A P2P receiver did not take the transaction.
    #[error("P2P notification to {domain} failed: {source}")]
    P2PNotification {
        /// Domain of the receiver.
        domain: String,
        /// Underlying paymail client error.
        #[source]
        source: PaymailError,
    },

    /// A UTXO or draft is held by another operation.
    #[error("reservation conflict: {0}")]
    ReservationConflict(String),

    /// A signed transaction does not match its draft.
    #[error("reservation mismatch: {0}")]
    ReservationMismatch(String),

    /// The broadcaster failed or refused the transaction.
    #[error("broadcast of {txid} failed: {source}")]
    Broadcast {
        /// Transaction ID (display hex).
        txid: String,
        /// Underlying broadcaster error.
        #[source]
        source: ArcError,
    },

    /// The draft passed its deadline.
    #[error("draft {0} has expired")]
    Expired(String),

    /// Caller-supplied values are malformed or out of range.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Stored state contradicts itself.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// No such account, draft, transaction or record.
    #[error("not found: {0}")]
    NotFound(String),

    /// The datastore failed.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// Transaction decoding or encoding failed.
    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),

    /// Script decoding or address parsing failed.
    #[error("script error: {0}")]
    Script(#[from] ScriptError),
}

impl EngineError {
    /// The caller-facing kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            EngineError::PaymailResolution { .. } => ErrorKind::PaymailResolution,
            EngineError::P2PNotification { .. } | EngineError::Broadcast { .. } => {
                ErrorKind::Broadcast
            }
            EngineError::ReservationConflict(_) => ErrorKind::ReservationConflict,
            EngineError::ReservationMismatch(_) => ErrorKind::ReservationMismatch,
            EngineError::Expired(_) => ErrorKind::Expired,
            EngineError::InvalidInput(_)
            | EngineError::Transaction(_)
            | EngineError::Script(_) => ErrorKind::InvalidInput,
            EngineError::InvariantViolation(_) => ErrorKind::InvariantViolation,
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// True when the failure is transient and the operation may be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::PaymailResolution { source, .. }
            | EngineError::P2PNotification { source, .. } => source.is_retryable(),
            EngineError::Broadcast { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}
