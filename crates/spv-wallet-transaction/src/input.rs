//! Transaction input referencing a previous output.

use spv_wallet_primitives::chainhash::ChainHash;
use spv_wallet_primitives::util::{BsvReader, BsvWriter};
use spv_wallet_script::Script;

use crate::output::TransactionOutput;
use crate::TransactionError;

/// Default sequence number indicating a finalized input.
pub const DEFAULT_SEQUENCE_NUMBER: u32 = 0xFFFF_FFFF;

/// A single input.
///
/// The outpoint (`source_txid`, `source_tx_out_index`) names the output being
/// spent. `source_output` optionally carries that output's value and locking
/// script; it is never part of the standard serialization but is required to
/// produce the Extended Format.
///
/// # Wire format (standard)
///
/// | Field               | Size          |
/// |---------------------|---------------|
/// | source_txid         | 32 bytes      |
/// | source_tx_out_index | 4 bytes (LE)  |
/// | script length       | VarInt        |
/// | unlocking_script    | variable      |
/// | sequence_number     | 4 bytes (LE)  |
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionInput {
    pub source_txid: ChainHash,
    pub source_tx_out_index: u32,
    pub sequence_number: u32,
    /// `None` until the input has been signed.
    pub unlocking_script: Option<Script>,
    pub source_output: Option<TransactionOutput>,
}

impl TransactionInput {
    /// An unsigned input spending `txid:vout`.
    pub fn new(source_txid: ChainHash, source_tx_out_index: u32) -> Self {
        TransactionInput {
            source_txid,
            source_tx_out_index,
            sequence_number: DEFAULT_SEQUENCE_NUMBER,
            unlocking_script: None,
            source_output: None,
        }
    }

    /// Attach the previous output's value and locking script.
    pub fn with_source_output(mut self, satoshis: u64, locking_script: Script) -> Self {
        self.source_output = Some(TransactionOutput::new(satoshis, locking_script));
        self
    }

    /// Value of the output being spent, if known.
    pub fn source_satoshis(&self) -> Option<u64> {
        self.source_output.as_ref().map(|o| o.satoshis)
    }

    /// `txid:vout` of the spent output.
    pub fn outpoint(&self) -> (ChainHash, u32) {
        (self.source_txid, self.source_tx_out_index)
    }

    pub fn read_from(reader: &mut BsvReader) -> Result<Self, TransactionError> {
        let txid = reader
            .read_array::<32>()
            .map_err(|e| TransactionError::reading("source txid", e))?;
        let source_tx_out_index = reader
            .read_u32_le()
            .map_err(|e| TransactionError::reading("output index", e))?;
        let script = reader
            .read_var_bytes()
            .map_err(|e| TransactionError::reading("unlocking script", e))?;
        let sequence_number = reader
            .read_u32_le()
            .map_err(|e| TransactionError::reading("sequence number", e))?;

        Ok(TransactionInput {
            source_txid: ChainHash::new(txid),
            source_tx_out_index,
            sequence_number,
            unlocking_script: (!script.is_empty()).then(|| Script::from_bytes(script)),
            source_output: None,
        })
    }

    pub fn write_to(&self, writer: &mut BsvWriter) {
        self.write_outpoint_and_script(writer);
        writer.write_u32_le(self.sequence_number);
    }

    /// Extended Format: the standard fields followed by the previous output's
    /// satoshis and locking script.
    pub(crate) fn write_extended_to(
        &self,
        writer: &mut BsvWriter,
        index: usize,
    ) -> Result<(), TransactionError> {
        let source = self
            .source_output
            .as_ref()
            .ok_or(TransactionError::MissingSourceOutput { index })?;
        self.write_to(writer);
        writer.write_u64_le(source.satoshis);
        writer.write_var_bytes(source.locking_script.as_bytes());
        Ok(())
    }

    fn write_outpoint_and_script(&self, writer: &mut BsvWriter) {
        writer.write_bytes(self.source_txid.as_bytes());
        writer.write_u32_le(self.source_tx_out_index);
        match &self.unlocking_script {
            Some(script) => writer.write_var_bytes(script.as_bytes()),
            None => writer.write_var_bytes(&[]),
        }
    }
}
