//! P2PKH address handling.
//!
//! Parses and produces Base58Check P2PKH addresses for mainnet and
//! testnet. Other address versions are rejected.

use std::fmt;

use spv_wallet_primitives::base58;

use crate::script::Script;
use crate::ScriptError;

/// Mainnet P2PKH address version byte.
const MAINNET_P2PKH: u8 = 0x00;
/// Testnet P2PKH address version byte.
const TESTNET_P2PKH: u8 = 0x6f;

/// Network an address belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Network {
    /// Version 0x00, addresses start with '1'.
    Mainnet,
    /// Version 0x6f, addresses start with 'm' or 'n'.
    Testnet,
}

impl Network {
    fn version_byte(self) -> u8 {
        match self {
            Network::Mainnet => MAINNET_P2PKH,
            Network::Testnet => TESTNET_P2PKH,
        }
    }
}

/// A P2PKH address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Address {
    /// Base58Check string form.
    pub address_string: String,
    /// RIPEMD-160(SHA-256(pubkey)).
    pub public_key_hash: [u8; 20],
    pub network: Network,
}

impl Address {
    /// Parse and validate a Base58Check address.
    ///
    /// # Arguments
    /// * `addr` - The address string, surrounding whitespace is not trimmed.
    ///
    /// # Returns
    /// The address, or an error describing why it is not a P2PKH address.
    pub fn from_string(addr: &str) -> Result<Self, ScriptError> {
        let payload =
            base58::check_decode(addr).map_err(|e| ScriptError::from_base58(addr, e))?;

        if payload.len() != 21 {
            return Err(ScriptError::InvalidAddressLength(addr.to_string()));
        }

        let network = match payload[0] {
            MAINNET_P2PKH => Network::Mainnet,
            TESTNET_P2PKH => Network::Testnet,
            _ => return Err(ScriptError::UnsupportedAddress(addr.to_string())),
        };

        let mut public_key_hash = [0u8; 20];
        public_key_hash.copy_from_slice(&payload[1..]);

        Ok(Address {
            address_string: addr.to_string(),
            public_key_hash,
            network,
        })
    }

    /// Encode a public key hash as an address on `network`.
    pub fn from_public_key_hash(hash: &[u8; 20], network: Network) -> Self {
        let mut payload = Vec::with_capacity(21);
        payload.push(network.version_byte());
        payload.extend_from_slice(hash);
        Address {
            address_string: base58::check_encode(&payload),
            public_key_hash: *hash,
            network,
        }
    }

    /// Recover the address paid by a P2PKH locking script.
    pub fn from_locking_script(script: &Script, network: Network) -> Result<Self, ScriptError> {
        Ok(Self::from_public_key_hash(&script.public_key_hash()?, network))
    }

    /// P2PKH locking script paying this address.
    pub fn locking_script(&self) -> Script {
        Script::p2pkh(self)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address_string)
    }
}
