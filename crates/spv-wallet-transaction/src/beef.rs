//! BEEF V1 (BRC-62) container: a transaction together with the ancestors
//! and merkle paths (BUMPs) a receiver needs to validate it by SPV.
//!
//! BUMPs are carried as opaque serialized bytes. Transactions are always
//! written parents-first regardless of insertion order.

use std::collections::{HashMap, HashSet};

use spv_wallet_primitives::chainhash::ChainHash;
use spv_wallet_primitives::util::{BsvReader, BsvWriter, VarInt};

use crate::transaction::Transaction;
use crate::TransactionError;

/// BEEF V1 version number (`01 00 BE EF` on the wire).
pub const BEEF_V1: u32 = 4022206465;

/// A transaction inside a BEEF, optionally proven by one of the BUMPs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeefTx {
    pub transaction: Transaction,
    pub bump_index: Option<usize>,
}

/// A set of transactions and the merkle paths proving the mined ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Beef {
    pub version: u32,
    pub bumps: Vec<Vec<u8>>,
    transactions: Vec<BeefTx>,
}

impl Beef {
    pub fn new() -> Self {
        Beef {
            version: BEEF_V1,
            bumps: Vec::new(),
            transactions: Vec::new(),
        }
    }

    /// Add a serialized BUMP, returning its index. Identical BUMPs are stored once.
    pub fn add_bump(&mut self, bump: Vec<u8>) -> usize {
        if let Some(pos) = self.bumps.iter().position(|b| *b == bump) {
            return pos;
        }
        self.bumps.push(bump);
        self.bumps.len() - 1
    }

    /// Add a transaction, proven by `bump` when it is already mined.
    ///
    /// Adding a transaction that is already present only upgrades it with a
    /// BUMP if it had none.
    pub fn add_transaction(&mut self, transaction: Transaction, bump: Option<Vec<u8>>) {
        let bump_index = bump.map(|b| self.add_bump(b));
        let txid = transaction.tx_id();
        if let Some(existing) = self
            .transactions
            .iter_mut()
            .find(|t| t.transaction.tx_id() == txid)
        {
            if existing.bump_index.is_none() {
                existing.bump_index = bump_index;
            }
            return;
        }
        self.transactions.push(BeefTx {
            transaction,
            bump_index,
        });
    }

    pub fn transactions(&self) -> &[BeefTx] {
        &self.transactions
    }

    pub fn find_transaction(&self, txid: &ChainHash) -> Option<&BeefTx> {
        self.transactions.iter().find(|t| t.transaction.tx_id() == *txid)
    }

    /// True when every unproven transaction has all of its parents present.
    pub fn is_complete(&self) -> bool {
        let known: HashSet<ChainHash> =
            self.transactions.iter().map(|t| t.transaction.tx_id()).collect();
        self.transactions
            .iter()
            .filter(|t| t.bump_index.is_none())
            .all(|t| {
                t.transaction
                    .inputs
                    .iter()
                    .all(|input| known.contains(&input.source_txid))
            })
    }

    // -----------------------------------------------------------------
    // Serialization
    // -----------------------------------------------------------------

    pub fn to_bytes(&self) -> Result<Vec<u8>, TransactionError> {
        let mut writer = BsvWriter::new();
        writer.write_u32_le(self.version);

        writer.write_varint(VarInt::from(self.bumps.len()));
        for bump in &self.bumps {
            writer.write_bytes(bump);
        }

        let ordered = self.dependency_order();
        writer.write_varint(VarInt::from(ordered.len()));
        for idx in ordered {
            let beef_tx = &self.transactions[idx];
            writer.write_bytes(&beef_tx.transaction.to_bytes());
            match beef_tx.bump_index {
                Some(bump_index) => {
                    if bump_index >= self.bumps.len() {
                        return Err(TransactionError::InvalidBeef(format!(
                            "bump index {bump_index} out of range"
                        )));
                    }
                    writer.write_u8(1);
                    writer.write_varint(VarInt::from(bump_index));
                }
                None => writer.write_u8(0),
            }
        }
        Ok(writer.into_bytes())
    }

    pub fn to_hex(&self) -> Result<String, TransactionError> {
        Ok(hex::encode(self.to_bytes()?))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TransactionError> {
        let mut reader = BsvReader::new(bytes);
        let version = reader
            .read_u32_le()
            .map_err(|e| TransactionError::reading("beef version", e))?;
        if version != BEEF_V1 {
            return Err(TransactionError::InvalidBeef(format!(
                "unsupported version {version:#x}"
            )));
        }

        let bump_count = reader
            .read_varint()
            .map_err(|e| TransactionError::reading("bump count", e))?
            .value();
        let mut bumps = Vec::new();
        for _ in 0..bump_count {
            bumps.push(read_bump(&mut reader)?);
        }

        let tx_count = reader
            .read_varint()
            .map_err(|e| TransactionError::reading("transaction count", e))?
            .value();
        let mut transactions = Vec::new();
        for _ in 0..tx_count {
            let transaction = Transaction::read_from(&mut reader)?;
            let has_bump = reader
                .read_u8()
                .map_err(|e| TransactionError::reading("bump flag", e))?;
            let bump_index = match has_bump {
                0 => None,
                1 => {
                    let idx = reader
                        .read_varint()
                        .map_err(|e| TransactionError::reading("bump index", e))?
                        .value() as usize;
                    if idx >= bumps.len() {
                        return Err(TransactionError::InvalidBeef(format!(
                            "bump index {idx} out of range"
                        )));
                    }
                    Some(idx)
                }
                other => {
                    return Err(TransactionError::InvalidBeef(format!(
                        "invalid bump flag {other}"
                    )))
                }
            };
            transactions.push(BeefTx {
                transaction,
                bump_index,
            });
        }

        if reader.remaining() != 0 {
            return Err(TransactionError::InvalidBeef(format!(
                "trailing {} bytes",
                reader.remaining()
            )));
        }

        Ok(Beef {
            version,
            bumps,
            transactions,
        })
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, TransactionError> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| TransactionError::SerializationError(format!("invalid hex: {e}")))?;
        Self::from_bytes(&bytes)
    }

    /// Indices of `transactions` ordered so parents precede children.
    fn dependency_order(&self) -> Vec<usize> {
        let by_id: HashMap<ChainHash, usize> = self
            .transactions
            .iter()
            .enumerate()
            .map(|(i, t)| (t.transaction.tx_id(), i))
            .collect();

        let mut visited = vec![false; self.transactions.len()];
        let mut ordered = Vec::with_capacity(self.transactions.len());

        fn visit(
            idx: usize,
            beef: &Beef,
            by_id: &HashMap<ChainHash, usize>,
            visited: &mut [bool],
            ordered: &mut Vec<usize>,
        ) {
            if visited[idx] {
                return;
            }
            visited[idx] = true;
            for input in &beef.transactions[idx].transaction.inputs {
                if let Some(&parent) = by_id.get(&input.source_txid) {
                    visit(parent, beef, by_id, visited, ordered);
                }
            }
            ordered.push(idx);
        }

        for idx in 0..self.transactions.len() {
            visit(idx, self, &by_id, &mut visited, &mut ordered);
        }
        ordered
    }
}

impl Default for Beef {
    fn default() -> Self {
        Self::new()
    }
}

/// Read one BUMP (BRC-74) and return it re-serialized.
///
/// Layout: block height (VarInt), tree height (u8), then per level a leaf
/// count and leaves of `offset (VarInt) | flags (u8) | [hash (32)]`. The
/// hash is absent when flag bit 0 (duplicate) is set.
fn read_bump(reader: &mut BsvReader) -> Result<Vec<u8>, TransactionError> {
    let err = |e| TransactionError::reading("bump", e);
    let mut out = BsvWriter::new();

    out.write_varint(reader.read_varint().map_err(err)?);
    let tree_height = reader.read_u8().map_err(err)?;
    out.write_u8(tree_height);

    for _ in 0..tree_height {
        let leaves = reader.read_varint().map_err(err)?;
        out.write_varint(leaves);
        for _ in 0..leaves.value() {
            out.write_varint(reader.read_varint().map_err(err)?);
            let flags = reader.read_u8().map_err(err)?;
            out.write_u8(flags);
            if flags & 0x01 == 0 {
                out.write_bytes(reader.read_bytes(32).map_err(err)?);
            }
        }
    }
    Ok(out.into_bytes())
}
