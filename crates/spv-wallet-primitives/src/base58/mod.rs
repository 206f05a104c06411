//! Base58Check encoding with a 4-byte double-SHA-256 checksum, as used
//! by P2PKH addresses.

use crate::hash::sha256d;
use crate::PrimitivesError;

const CHECKSUM_LEN: usize = 4;

/// Encode `payload` followed by its checksum.
///
/// # Arguments
/// * `payload` - Version byte plus body (e.g. `0x00 || hash160`).
///
/// # Returns
/// The Base58 string of `payload || sha256d(payload)[..4]`.
pub fn check_encode(payload: &[u8]) -> String {
    let checksum = sha256d(payload);
    let mut data = Vec::with_capacity(payload.len() + CHECKSUM_LEN);
    data.extend_from_slice(payload);
    data.extend_from_slice(&checksum[..CHECKSUM_LEN]);
    bs58::encode(data).with_alphabet(bs58::Alphabet::BITCOIN).into_string()
}

/// Decode a Base58Check string and verify its checksum.
///
/// # Returns
/// The payload without the trailing checksum.
pub fn check_decode(s: &str) -> Result<Vec<u8>, PrimitivesError> {
    let decoded = bs58::decode(s)
        .with_alphabet(bs58::Alphabet::BITCOIN)
        .into_vec()
        .map_err(|e| PrimitivesError::InvalidBase58(e.to_string()))?;

    if decoded.len() < CHECKSUM_LEN {
        return Err(PrimitivesError::InvalidBase58(format!(
            "{} bytes is too short to carry a checksum",
            decoded.len()
        )));
    }

    let (payload, checksum) = decoded.split_at(decoded.len() - CHECKSUM_LEN);
    if checksum != &sha256d(payload)[..CHECKSUM_LEN] {
        return Err(PrimitivesError::ChecksumMismatch);
    }
    Ok(payload.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_decode_known_address() {
        let payload = check_decode("1E7ucTTWRTahCyViPhxSMor2pj4VGQdFMr").unwrap();
        assert_eq!(payload.len(), 21);
        assert_eq!(payload[0], 0x00);
        assert_eq!(
            hex::encode(&payload[1..]),
            "8fe80c75c9560e8b56ed64ea3c26e18d2c52211b"
        );
    }

    #[test]
    fn test_check_encode_matches_decode() {
        let payload = check_decode("mtdruWYVEV1wz5yL7GvpBj4MgifCB7yhPd").unwrap();
        assert_eq!(check_encode(&payload), "mtdruWYVEV1wz5yL7GvpBj4MgifCB7yhPd");
    }

    #[test]
    fn test_check_decode_bad_checksum() {
        // Last character altered.
        let err = check_decode("1E7ucTTWRTahCyViPhxSMor2pj4VGQdFMs").unwrap_err();
        assert!(matches!(err, PrimitivesError::ChecksumMismatch));
    }

    #[test]
    fn test_check_decode_rejects_non_alphabet() {
        assert!(check_decode("0OIl").is_err());
    }

    #[test]
    fn test_check_decode_too_short() {
        assert!(matches!(
            check_decode("1"),
            Err(PrimitivesError::InvalidBase58(_))
        ));
    }
}
