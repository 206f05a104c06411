//! 32-byte chain hash used for transaction identifiers.
//!
//! The bytes are held in internal (little-endian) order, the order they
//! appear on the wire inside an input outpoint. The string form is the
//! byte-reversed hex that explorers and APIs display.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::hash::sha256d;
use crate::PrimitivesError;

/// Size of a chain hash in bytes.
pub const HASH_SIZE: usize = 32;

/// A transaction or block hash in internal byte order.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainHash([u8; HASH_SIZE]);

impl ChainHash {
    /// Wrap bytes that are already in internal order.
    pub fn new(bytes: [u8; HASH_SIZE]) -> Self {
        ChainHash(bytes)
    }

    /// Build from a slice in internal order.
    ///
    /// # Returns
    /// An error unless the slice is exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, PrimitivesError> {
        let arr: [u8; HASH_SIZE] = bytes.try_into().map_err(|_| {
            PrimitivesError::InvalidHash(format!(
                "expected {} bytes, got {}",
                HASH_SIZE,
                bytes.len()
            ))
        })?;
        Ok(ChainHash(arr))
    }

    /// Parse the display (byte-reversed) hex form.
    pub fn from_hex(hex_str: &str) -> Result<Self, PrimitivesError> {
        if hex_str.len() != HASH_SIZE * 2 {
            return Err(PrimitivesError::InvalidHash(format!(
                "expected {} hex characters, got {}",
                HASH_SIZE * 2,
                hex_str.len()
            )));
        }
        let mut bytes = hex::decode(hex_str)?;
        bytes.reverse();
        Self::from_slice(&bytes)
    }

    /// Hash `data` with SHA-256d.
    pub fn digest(data: &[u8]) -> Self {
        ChainHash(sha256d(data))
    }

    /// Bytes in internal order.
    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }
}

impl fmt::Display for ChainHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut reversed = self.0;
        reversed.reverse();
        f.write_str(&hex::encode(reversed))
    }
}

impl fmt::Debug for ChainHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChainHash({self})")
    }
}

impl FromStr for ChainHash {
    type Err = PrimitivesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for ChainHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ChainHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ChainHash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
