//! Error types for ARC operations.

/// Errors that can occur when interacting with the ARC API.
#[derive(Debug, thiserror::Error)]
pub enum ArcError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Failed to serialize or deserialize data.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Transaction was rejected by ARC.
    #[error("transaction rejected ({code}): {description}")]
    Rejected {
        /// The rejection status code.
        code: i32,
        /// Human-readable rejection description.
        description: String,
    },

    /// ARC answered with a non-2xx status and no usable body.
    #[error("server error ({status_code}): {message}")]
    ServerError {
        /// HTTP status code.
        status_code: u16,
        /// Body returned by ARC.
        message: String,
    },

    /// The transaction could not be serialized for submission.
    #[error("transaction error: {0}")]
    Transaction(#[from] spv_wallet_transaction::TransactionError),
}

impl ArcError {
    /// True for failures worth retrying: timeouts, connection errors,
    /// rate limiting and 5xx responses.
    pub fn is_retryable(&self) -> bool {
        match self {
            ArcError::HttpError(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ArcError::ServerError { status_code, .. } => {
                *status_code == 429 || *status_code >= 500
            }
            _ => false,
        }
    }
}
