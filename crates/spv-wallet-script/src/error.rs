use spv_wallet_primitives::PrimitivesError;

/// Error types for script and address operations.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    /// Invalid address string.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Decoded address payload is not 21 bytes.
    #[error("invalid address length for '{0}'")]
    InvalidAddressLength(String),

    /// Version byte is neither mainnet nor testnet P2PKH.
    #[error("address not supported {0}")]
    UnsupportedAddress(String),

    /// Base58Check checksum did not match.
    #[error("checksum failed for address '{0}'")]
    ChecksumFailed(String),

    /// Hex decoding error.
    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),

    /// Push data exceeds the largest PUSHDATA4 payload.
    #[error("data too big: {0} bytes")]
    DataTooBig(usize),

    /// Script is not a P2PKH script.
    #[error("not a P2PKH")]
    NotP2PKH,
}

impl ScriptError {
    pub(crate) fn from_base58(addr: &str, err: PrimitivesError) -> Self {
        match err {
            PrimitivesError::ChecksumMismatch => ScriptError::ChecksumFailed(addr.to_string()),
            other => ScriptError::InvalidAddress(format!("'{addr}': {other}")),
        }
    }
}
