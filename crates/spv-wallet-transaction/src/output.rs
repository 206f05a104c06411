//! Transaction output: a satoshi value locked by a script.

use spv_wallet_primitives::util::{BsvReader, BsvWriter};
use spv_wallet_script::Script;

use crate::TransactionError;

/// A single output.
///
/// # Wire format
///
/// | Field          | Size         |
/// |----------------|--------------|
/// | satoshis       | 8 bytes (LE) |
/// | script length  | VarInt       |
/// | locking_script | variable     |
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransactionOutput {
    pub satoshis: u64,
    pub locking_script: Script,
    /// Marks an output paying back to the sender. Not serialized.
    pub change: bool,
}

impl TransactionOutput {
    pub fn new(satoshis: u64, locking_script: Script) -> Self {
        TransactionOutput {
            satoshis,
            locking_script,
            change: false,
        }
    }

    pub fn change(satoshis: u64, locking_script: Script) -> Self {
        TransactionOutput {
            satoshis,
            locking_script,
            change: true,
        }
    }

    pub fn read_from(reader: &mut BsvReader) -> Result<Self, TransactionError> {
        let satoshis = reader
            .read_u64_le()
            .map_err(|e| TransactionError::reading("satoshis", e))?;
        let script = reader
            .read_var_bytes()
            .map_err(|e| TransactionError::reading("locking script", e))?;
        Ok(TransactionOutput::new(satoshis, Script::from_bytes(script)))
    }

    pub fn write_to(&self, writer: &mut BsvWriter) {
        writer.write_u64_le(self.satoshis);
        writer.write_var_bytes(self.locking_script.as_bytes());
    }

    /// Serialized size in bytes.
    pub fn size(&self) -> usize {
        let len = self.locking_script.len();
        8 + spv_wallet_primitives::util::VarInt::from(len).length() + len
    }
}
