/// Error types for transaction operations.
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    /// The transaction structure is invalid.
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),
    /// Binary or hex decoding failed.
    #[error("serialization error: {0}")]
    SerializationError(String),
    /// Extended Format needs the previous output of every input.
    #[error("input {index} has no source output")]
    MissingSourceOutput { index: usize },
    /// A BEEF container could not be built or parsed.
    #[error("invalid beef: {0}")]
    InvalidBeef(String),
    #[error("script error: {0}")]
    Script(#[from] spv_wallet_script::ScriptError),
    #[error("primitives error: {0}")]
    Primitives(#[from] spv_wallet_primitives::PrimitivesError),
}

impl TransactionError {
    pub(crate) fn reading(what: &str, err: spv_wallet_primitives::PrimitivesError) -> Self {
        TransactionError::SerializationError(format!("reading {what}: {err}"))
    }
}
