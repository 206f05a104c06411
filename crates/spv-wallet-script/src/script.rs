//! Bitcoin Script as a byte vector newtype.
//!
//! Only the subset the wallet engine needs: building P2PKH and
//! `OP_FALSE OP_RETURN` data scripts, minimal push-data encoding, and
//! classifying a locking script so fees and ownership can be decided.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::address::Address;
use crate::opcodes::*;
use crate::ScriptError;

/// Standard locking script classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScriptType {
    /// `OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG`
    #[serde(rename = "pubkeyhash")]
    PubKeyHash,
    /// `<pubkey> OP_CHECKSIG`
    #[serde(rename = "pubkey")]
    PubKey,
    /// `OP_HASH160 <20> OP_EQUAL`
    #[serde(rename = "scripthash")]
    ScriptHash,
    /// `OP_RETURN ...` or `OP_FALSE OP_RETURN ...`
    #[serde(rename = "nulldata")]
    NullData,
    #[serde(rename = "nonstandard")]
    NonStandard,
}

impl ScriptType {
    /// Name as used in stored records and API payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptType::PubKeyHash => "pubkeyhash",
            ScriptType::PubKey => "pubkey",
            ScriptType::ScriptHash => "scripthash",
            ScriptType::NullData => "nulldata",
            ScriptType::NonStandard => "nonstandard",
        }
    }
}

impl fmt::Display for ScriptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A Bitcoin script.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Script(Vec<u8>);

impl Script {
    // -----------------------------------------------------------------------
    // Constructors
    // -----------------------------------------------------------------------

    pub fn new() -> Self {
        Script(Vec::new())
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Script(bytes.to_vec())
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, ScriptError> {
        Ok(Script(hex::decode(hex_str)?))
    }

    /// Build a P2PKH locking script for a 20-byte public key hash.
    pub fn p2pkh_from_hash(pkh: &[u8; 20]) -> Self {
        let mut b = Vec::with_capacity(25);
        b.extend_from_slice(&[OP_DUP, OP_HASH160, OP_DATA_20]);
        b.extend_from_slice(pkh);
        b.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
        Script(b)
    }

    /// Build the P2PKH locking script paying `address`.
    pub fn p2pkh(address: &Address) -> Self {
        Self::p2pkh_from_hash(&address.public_key_hash)
    }

    /// Build a provably unspendable data script: `OP_FALSE OP_RETURN` followed
    /// by one push per part.
    ///
    /// # Arguments
    /// * `parts` - Data payloads, each pushed with the minimal prefix.
    ///
    /// # Returns
    /// The script, or `DataTooBig` if a part exceeds the PUSHDATA4 range.
    pub fn op_return<P: AsRef<[u8]>>(parts: &[P]) -> Result<Self, ScriptError> {
        let mut script = Script(vec![OP_FALSE, OP_RETURN]);
        for part in parts {
            script.append_push_data(part.as_ref())?;
        }
        Ok(script)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    // -----------------------------------------------------------------------
    // Building
    // -----------------------------------------------------------------------

    /// Append `data` with the smallest push prefix that fits it.
    pub fn append_push_data(&mut self, data: &[u8]) -> Result<(), ScriptError> {
        let len = data.len();
        match len {
            0..=75 => self.0.push(len as u8),
            76..=0xff => self.0.extend_from_slice(&[OP_PUSHDATA1, len as u8]),
            0x100..=0xffff => {
                self.0.push(OP_PUSHDATA2);
                self.0.extend_from_slice(&(len as u16).to_le_bytes());
            }
            _ => {
                let len32 = u32::try_from(len).map_err(|_| ScriptError::DataTooBig(len))?;
                self.0.push(OP_PUSHDATA4);
                self.0.extend_from_slice(&len32.to_le_bytes());
            }
        }
        self.0.extend_from_slice(data);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Classification
    // -----------------------------------------------------------------------

    pub fn is_p2pkh(&self) -> bool {
        let b = &self.0;
        b.len() == 25
            && b[0] == OP_DUP
            && b[1] == OP_HASH160
            && b[2] == OP_DATA_20
            && b[23] == OP_EQUALVERIFY
            && b[24] == OP_CHECKSIG
    }

    pub fn is_p2sh(&self) -> bool {
        let b = &self.0;
        b.len() == 23 && b[0] == OP_HASH160 && b[1] == OP_DATA_20 && b[22] == OP_EQUAL
    }

    pub fn is_p2pk(&self) -> bool {
        let b = &self.0;
        match b.first() {
            Some(&OP_DATA_33) => {
                b.len() == 35 && matches!(b[1], 0x02 | 0x03) && b[34] == OP_CHECKSIG
            }
            Some(&OP_DATA_65) => b.len() == 67 && b[1] == 0x04 && b[66] == OP_CHECKSIG,
            _ => false,
        }
    }

    /// True for `OP_RETURN ...` and `OP_FALSE OP_RETURN ...`.
    pub fn is_data(&self) -> bool {
        let b = &self.0;
        b.first() == Some(&OP_RETURN) || (b.len() > 1 && b[0] == OP_FALSE && b[1] == OP_RETURN)
    }

    pub fn script_type(&self) -> ScriptType {
        if self.is_p2pkh() {
            ScriptType::PubKeyHash
        } else if self.is_data() {
            ScriptType::NullData
        } else if self.is_p2sh() {
            ScriptType::ScriptHash
        } else if self.is_p2pk() {
            ScriptType::PubKey
        } else {
            ScriptType::NonStandard
        }
    }

    /// The 20-byte hash locked by a P2PKH script.
    pub fn public_key_hash(&self) -> Result<[u8; 20], ScriptError> {
        if !self.is_p2pkh() {
            return Err(ScriptError::NotP2PKH);
        }
        let mut pkh = [0u8; 20];
        pkh.copy_from_slice(&self.0[3..23]);
        Ok(pkh)
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Script({})", self.to_hex())
    }
}

impl Serialize for Script {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Script {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Script::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const P2PKH_HEX: &str = "76a9148fe80c75c9560e8b56ed64ea3c26e18d2c52211b88ac";

    #[test]
    fn test_p2pkh_from_address() {
        let addr = Address::from_string("1E7ucTTWRTahCyViPhxSMor2pj4VGQdFMr").unwrap();
        let script = Script::p2pkh(&addr);
        assert_eq!(script.to_hex(), P2PKH_HEX);
        assert_eq!(script.script_type(), ScriptType::PubKeyHash);
        assert_eq!(script.public_key_hash().unwrap(), addr.public_key_hash);
    }

    #[test]
    fn test_op_return_parts() {
        let script = Script::op_return(&[b"hello".as_slice(), b"world".as_slice()]).unwrap();
        assert_eq!(script.to_hex(), "006a0568656c6c6f05776f726c64");
        assert_eq!(script.script_type(), ScriptType::NullData);
    }

    #[test]
    fn test_push_data_prefixes() {
        let mut s = Script::new();
        s.append_push_data(&[0u8; 75]).unwrap();
        assert_eq!(s.as_bytes()[0], 75);

        let mut s = Script::new();
        s.append_push_data(&[0u8; 76]).unwrap();
        assert_eq!(&s.as_bytes()[..2], &[OP_PUSHDATA1, 76]);

        let mut s = Script::new();
        s.append_push_data(&[0u8; 256]).unwrap();
        assert_eq!(&s.as_bytes()[..3], &[OP_PUSHDATA2, 0x00, 0x01]);
        assert_eq!(s.len(), 259);
    }

    #[test]
    fn test_classification() {
        let p2sh = Script::from_hex("a914000000000000000000000000000000000000000087").unwrap();
        assert_eq!(p2sh.script_type(), ScriptType::ScriptHash);

        let mut p2pk = vec![OP_DATA_33, 0x02];
        p2pk.extend_from_slice(&[0x11; 32]);
        p2pk.push(OP_CHECKSIG);
        assert_eq!(Script::from_bytes(&p2pk).script_type(), ScriptType::PubKey);

        let bare_return = Script::from_hex("6a0568656c6c6f").unwrap();
        assert_eq!(bare_return.script_type(), ScriptType::NullData);

        assert_eq!(Script::from_hex("51").unwrap().script_type(), ScriptType::NonStandard);
        assert!(Script::new().public_key_hash().is_err());
    }

    #[test]
    fn test_serde_as_hex() {
        let script = Script::from_hex(P2PKH_HEX).unwrap();
        let json = serde_json::to_string(&script).unwrap();
        assert_eq!(json, format!("\"{P2PKH_HEX}\""));
        let back: Script = serde_json::from_str(&json).unwrap();
        assert_eq!(back, script);
        assert_eq!(serde_json::to_string(&ScriptType::NullData).unwrap(), "\"nulldata\"");
    }
}
