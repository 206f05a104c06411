use proptest::prelude::*;

use spv_wallet_primitives::base58::check_decode;
use spv_wallet_primitives::util::{BsvReader, VarInt};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn varint_length_matches_encoding(value in any::<u64>()) {
        let vi = VarInt(value);
        prop_assert_eq!(vi.to_bytes().len(), vi.length());
    }

    #[test]
    fn reader_never_panics_on_arbitrary_input(data in prop::collection::vec(any::<u8>(), 0..64)) {
        let mut reader = BsvReader::new(&data);
        while reader.remaining() > 0 {
            if reader.read_var_bytes().is_err() {
                break;
            }
        }
    }

    #[test]
    fn check_decode_never_panics(s in "[1-9A-HJ-NP-Za-km-z]{0,40}") {
        let _ = check_decode(&s);
    }
}
