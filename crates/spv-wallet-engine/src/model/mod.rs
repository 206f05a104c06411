//! Records the engine reads and writes through the [`Datastore`](crate::store::Datastore).

pub mod account;
pub mod draft;
pub mod sync;
pub mod utxo;

pub use account::{Account, Destination};
pub use draft::{
    DraftInput, DraftOutput, DraftStatus, DraftTransaction, PaymailP4, ResolutionType, ScriptOutput,
};
pub use sync::{RecordedTransaction, SyncAction, SyncResult, SyncStatus, SyncTransaction};
pub use utxo::{Outpoint, Utxo, UtxoState};

/// Free-form key/value metadata attached to drafts and transactions.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Metadata key marking a transaction as already broadcast by someone else.
pub const METADATA_BROADCAST_EXTERNALLY: &str = "broadcast_externally";
