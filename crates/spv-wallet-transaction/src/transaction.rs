//! Core transaction type.
//!
//! Handles the standard wire codec, transaction IDs, value totals and the
//! Extended Format (BRC-30) serialization.

use std::fmt;

use spv_wallet_primitives::chainhash::ChainHash;
use spv_wallet_primitives::util::{BsvReader, BsvWriter, VarInt};
use spv_wallet_script::Script;

use crate::input::TransactionInput;
use crate::output::TransactionOutput;
use crate::TransactionError;

/// Marker written after the version in Extended Format transactions.
pub const EF_MARKER: [u8; 6] = [0x00, 0x00, 0x00, 0x00, 0x00, 0xEF];

/// A transaction consisting of a version, inputs, outputs and a lock time.
///
/// # Wire format
///
/// | Field        | Size             |
/// |--------------|------------------|
/// | version      | 4 bytes (LE)     |
/// | input count  | VarInt           |
/// | inputs       | variable         |
/// | output count | VarInt           |
/// | outputs      | variable         |
/// | lock_time    | 4 bytes (LE)     |
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub lock_time: u32,
}

impl Transaction {
    /// An empty version 1 transaction.
    pub fn new() -> Self {
        Transaction {
            version: 1,
            inputs: Vec::new(),
            outputs: Vec::new(),
            lock_time: 0,
        }
    }

    // -----------------------------------------------------------------
    // Deserialization
    // -----------------------------------------------------------------

    pub fn from_hex(hex_str: &str) -> Result<Self, TransactionError> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| TransactionError::SerializationError(format!("invalid hex: {e}")))?;
        Self::from_bytes(&bytes)
    }

    /// Parse exactly one transaction; trailing bytes are an error.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TransactionError> {
        let mut reader = BsvReader::new(bytes);
        let tx = Self::read_from(&mut reader)?;
        if reader.remaining() != 0 {
            return Err(TransactionError::SerializationError(format!(
                "trailing {} bytes after transaction",
                reader.remaining()
            )));
        }
        Ok(tx)
    }

    pub fn read_from(reader: &mut BsvReader) -> Result<Self, TransactionError> {
        let version = reader
            .read_u32_le()
            .map_err(|e| TransactionError::reading("version", e))?;

        let input_count = reader
            .read_varint()
            .map_err(|e| TransactionError::reading("input count", e))?
            .value();
        // Each input is at least 41 bytes; cap preallocation by what is left.
        let mut inputs = Vec::with_capacity((input_count as usize).min(reader.remaining() / 41));
        for _ in 0..input_count {
            inputs.push(TransactionInput::read_from(reader)?);
        }

        let output_count = reader
            .read_varint()
            .map_err(|e| TransactionError::reading("output count", e))?
            .value();
        let mut outputs = Vec::with_capacity((output_count as usize).min(reader.remaining() / 9));
        for _ in 0..output_count {
            outputs.push(TransactionOutput::read_from(reader)?);
        }

        let lock_time = reader
            .read_u32_le()
            .map_err(|e| TransactionError::reading("lock time", e))?;

        Ok(Transaction {
            version,
            inputs,
            outputs,
            lock_time,
        })
    }

    // -----------------------------------------------------------------
    // Serialization
    // -----------------------------------------------------------------

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = BsvWriter::with_capacity(self.estimated_capacity());
        writer.write_u32_le(self.version);
        writer.write_varint(VarInt::from(self.inputs.len()));
        for input in &self.inputs {
            input.write_to(&mut writer);
        }
        self.write_outputs_and_lock_time(&mut writer);
        writer.into_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Serialize in Extended Format (BRC-30).
    ///
    /// Every input must carry its source output, otherwise
    /// `MissingSourceOutput` names the first input that does not.
    pub fn to_ef_bytes(&self) -> Result<Vec<u8>, TransactionError> {
        let mut writer = BsvWriter::with_capacity(self.estimated_capacity() + 64 * self.inputs.len());
        writer.write_u32_le(self.version);
        writer.write_bytes(&EF_MARKER);
        writer.write_varint(VarInt::from(self.inputs.len()));
        for (index, input) in self.inputs.iter().enumerate() {
            input.write_extended_to(&mut writer, index)?;
        }
        self.write_outputs_and_lock_time(&mut writer);
        Ok(writer.into_bytes())
    }

    pub fn to_ef_hex(&self) -> Result<String, TransactionError> {
        Ok(hex::encode(self.to_ef_bytes()?))
    }

    fn write_outputs_and_lock_time(&self, writer: &mut BsvWriter) {
        writer.write_varint(VarInt::from(self.outputs.len()));
        for output in &self.outputs {
            output.write_to(writer);
        }
        writer.write_u32_le(self.lock_time);
    }

    fn estimated_capacity(&self) -> usize {
        10 + self.inputs.len() * 148 + self.outputs.len() * 34
    }

    // -----------------------------------------------------------------
    // Identity and totals
    // -----------------------------------------------------------------

    /// SHA-256d of the standard serialization.
    pub fn tx_id(&self) -> ChainHash {
        ChainHash::digest(&self.to_bytes())
    }

    /// The transaction ID in display (byte-reversed hex) form.
    pub fn tx_id_hex(&self) -> String {
        self.tx_id().to_string()
    }

    pub fn size(&self) -> usize {
        self.to_bytes().len()
    }

    pub fn total_output_satoshis(&self) -> u64 {
        self.outputs.iter().map(|o| o.satoshis).sum()
    }

    /// Sum of the values being spent.
    ///
    /// # Returns
    /// `MissingSourceOutput` if any input lacks its source output.
    pub fn total_input_satoshis(&self) -> Result<u64, TransactionError> {
        self.inputs
            .iter()
            .enumerate()
            .try_fold(0u64, |acc, (index, input)| {
                input
                    .source_satoshis()
                    .map(|sats| acc + sats)
                    .ok_or(TransactionError::MissingSourceOutput { index })
            })
    }

    // -----------------------------------------------------------------
    // Builders
    // -----------------------------------------------------------------

    pub fn add_input(&mut self, input: TransactionInput) {
        self.inputs.push(input);
    }

    pub fn add_output(&mut self, output: TransactionOutput) {
        self.outputs.push(output);
    }

    /// Add an unsigned input spending `prev_tx_id:vout`, remembering the
    /// spent output's locking script and value.
    ///
    /// # Arguments
    /// * `prev_tx_id` - Display-order hex txid of the previous transaction.
    /// * `vout` - Output index being spent.
    /// * `prev_locking_script_hex` - Locking script of the spent output.
    /// * `satoshis` - Value of the spent output.
    pub fn add_input_from(
        &mut self,
        prev_tx_id: &str,
        vout: u32,
        prev_locking_script_hex: &str,
        satoshis: u64,
    ) -> Result<(), TransactionError> {
        let txid = ChainHash::from_hex(prev_tx_id)?;
        let script = Script::from_hex(prev_locking_script_hex)?;
        self.inputs
            .push(TransactionInput::new(txid, vout).with_source_output(satoshis, script));
        Ok(())
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
