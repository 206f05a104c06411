//! Signing boundary. Keys never enter the engine; a signer turns a draft
//! into a signed transaction.

use crate::error::EngineError;
use crate::model::DraftTransaction;

/// Produces the signed form of a draft.
pub trait TransactionSigner: Send + Sync {
    /// Sign every input of `draft` and return the signed transaction hex.
    ///
    /// The signed transaction must spend the draft's inputs and pay its
    /// outputs unchanged, or recording it fails.
    fn sign(&self, draft: &DraftTransaction) -> Result<String, EngineError>;
}

impl<F> TransactionSigner for F
where
    F: Fn(&DraftTransaction) -> Result<String, EngineError> + Send + Sync,
{
    fn sign(&self, draft: &DraftTransaction) -> Result<String, EngineError> {
        self(draft)
    }
}
