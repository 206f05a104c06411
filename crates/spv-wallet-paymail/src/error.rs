//! Error types for paymail operations.

/// Errors that can occur while resolving or paying a paymail address.
#[derive(Debug, thiserror::Error)]
pub enum PaymailError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Failed to serialize or deserialize data.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The provider answered with a non-2xx status.
    #[error("server error ({status_code}): {message}")]
    ServerError {
        /// HTTP status code.
        status_code: u16,
        /// Body returned by the provider.
        message: String,
    },

    /// The requested resource does not exist (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// The address is not a valid paymail.
    #[error("invalid paymail: {0}")]
    InvalidPaymail(String),

    /// The capability document is missing or malformed.
    #[error("invalid capabilities document: {0}")]
    InvalidCapabilities(String),

    /// The domain does not advertise a capability we need.
    #[error("missing capability: {0}")]
    MissingCapability(String),

    /// The provider answered 2xx with an unusable body.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The provider already has this transaction.
    #[error("transaction already received: {0}")]
    Duplicate(String),
}

impl PaymailError {
    /// True for failures worth retrying: timeouts, connection errors,
    /// rate limiting and 5xx responses.
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymailError::HttpError(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            PaymailError::ServerError { status_code, .. } => {
                *status_code == 429 || *status_code >= 500
            }
            _ => false,
        }
    }
}
