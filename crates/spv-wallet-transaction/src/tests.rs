//! Tests for the transaction crate: wire codec against known vectors,
//! Extended Format layout and BEEF assembly.

use spv_wallet_primitives::chainhash::ChainHash;
use spv_wallet_script::Script;

use crate::beef::{Beef, BEEF_V1};
use crate::input::{TransactionInput, DEFAULT_SEQUENCE_NUMBER};
use crate::output::TransactionOutput;
use crate::transaction::{Transaction, EF_MARKER};
use crate::TransactionError;

/// One input, two outputs (1500 sats to a P2PKH-with-data script, 3498 sats P2PKH).
const SOURCE_RAW_TX: &str = "010000000138c7c61c14ffb063c3bb2664041a3e29ea6ea0412a0c18ff725ba4e9e12afae2030000006a47304402203e9ab8e4c14addf3b4741540b556cfb0e0efb67dc1a7b5ce84c3ac56b3fd447802203c9f49f7bd893ebd7060176dfc36bcaff9d2c443d9a0dd6cd2d59b372c024d20412102798913bc057b344de675dac34faafe3dc2f312c758cd9068209f810877306d66ffffffff02dc050000000000002076a914eb0bd5edba389198e73f8efabddfc61666969ff788ac6a0568656c6c6faa0d0000000000001976a914eb0bd5edba389198e73f8efabddfc61666969ff788ac00000000";

const P2PKH_HEX: &str = "76a914eb0bd5edba389198e73f8efabddfc61666969ff788ac";

fn spend_of(parent: &Transaction, vout: u32) -> Transaction {
    let out = &parent.outputs[vout as usize];
    let mut tx = Transaction::new();
    tx.add_input(
        TransactionInput::new(parent.tx_id(), vout)
            .with_source_output(out.satoshis, out.locking_script.clone()),
    );
    tx.add_output(TransactionOutput::new(
        out.satoshis - 200,
        Script::from_hex(P2PKH_HEX).unwrap(),
    ));
    tx
}

fn synthetic_bump() -> Vec<u8> {
    let mut bump = vec![0x01, 0x01, 0x02, 0x00, 0x02];
    bump.extend_from_slice(&[0xaa; 32]);
    bump.extend_from_slice(&[0x01, 0x00]);
    bump.extend_from_slice(&[0xbb; 32]);
    bump
}

// -----------------------------------------------------------------------
// Wire codec
// -----------------------------------------------------------------------

#[test]
fn test_parse_known_transaction() {
    let tx = Transaction::from_hex(SOURCE_RAW_TX).expect("should parse");
    assert_eq!(tx.version, 1);
    assert_eq!(tx.inputs.len(), 1);
    assert_eq!(tx.inputs[0].source_tx_out_index, 3);
    assert_eq!(tx.inputs[0].sequence_number, DEFAULT_SEQUENCE_NUMBER);
    assert!(tx.inputs[0].unlocking_script.is_some());
    assert_eq!(tx.outputs.len(), 2);
    assert_eq!(tx.outputs[0].satoshis, 1500);
    assert_eq!(tx.outputs[1].satoshis, 3498);
    assert_eq!(tx.outputs[1].locking_script.to_hex(), P2PKH_HEX);
    assert_eq!(tx.total_output_satoshis(), 4998);
    assert_eq!(tx.to_hex(), SOURCE_RAW_TX);
}

#[test]
fn test_tx_id_display_is_reversed_digest() {
    let tx = Transaction::from_hex(SOURCE_RAW_TX).unwrap();
    let id = tx.tx_id();
    let mut reversed = *id.as_bytes();
    reversed.reverse();
    assert_eq!(tx.tx_id_hex(), hex::encode(reversed));
    assert_eq!(ChainHash::from_hex(&tx.tx_id_hex()).unwrap(), id);
}

#[test]
fn test_rejects_trailing_and_truncated_bytes() {
    let with_trailing = format!("{SOURCE_RAW_TX}00");
    assert!(matches!(
        Transaction::from_hex(&with_trailing),
        Err(TransactionError::SerializationError(_))
    ));
    let truncated = &SOURCE_RAW_TX[..SOURCE_RAW_TX.len() - 10];
    assert!(Transaction::from_hex(truncated).is_err());
    assert!(Transaction::from_hex("zz").is_err());
}

#[test]
fn test_empty_transaction_is_ten_bytes() {
    let tx = Transaction::new();
    assert_eq!(tx.size(), 10);
}

// -----------------------------------------------------------------------
// Extended Format
// -----------------------------------------------------------------------

#[test]
fn test_ef_layout() {
    let parent = Transaction::from_hex(SOURCE_RAW_TX).unwrap();
    let tx = spend_of(&parent, 1);

    let raw = tx.to_bytes();
    let ef = tx.to_ef_bytes().unwrap();

    assert_eq!(&ef[..4], &raw[..4]);
    assert_eq!(&ef[4..10], &EF_MARKER);
    // One input: 8 bytes of value, 1 byte length, 25 byte P2PKH script.
    assert_eq!(ef.len(), raw.len() + EF_MARKER.len() + 8 + 1 + 25);
    assert!(tx.to_ef_hex().unwrap().starts_with("010000000000000000ef"));
}

#[test]
fn test_ef_requires_source_outputs() {
    let mut tx = Transaction::new();
    tx.add_input(TransactionInput::new(ChainHash::default(), 0));
    assert!(matches!(
        tx.to_ef_bytes(),
        Err(TransactionError::MissingSourceOutput { index: 0 })
    ));
    assert!(tx.total_input_satoshis().is_err());
}

#[test]
fn test_add_input_from_records_source() {
    let parent = Transaction::from_hex(SOURCE_RAW_TX).unwrap();
    let mut tx = Transaction::new();
    tx.add_input_from(&parent.tx_id_hex(), 1, P2PKH_HEX, 3498).unwrap();
    assert_eq!(tx.total_input_satoshis().unwrap(), 3498);
    assert_eq!(tx.inputs[0].outpoint(), (parent.tx_id(), 1));
    assert!(tx.add_input_from("not-a-txid", 0, P2PKH_HEX, 1).is_err());
}

// -----------------------------------------------------------------------
// BEEF
// -----------------------------------------------------------------------

#[test]
fn test_beef_orders_parents_first() {
    let parent = Transaction::from_hex(SOURCE_RAW_TX).unwrap();
    let child = spend_of(&parent, 1);

    let mut beef = Beef::new();
    beef.add_transaction(child.clone(), None);
    beef.add_transaction(parent.clone(), Some(synthetic_bump()));
    assert!(beef.is_complete());

    let bytes = beef.to_bytes().unwrap();
    assert_eq!(&bytes[..4], &BEEF_V1.to_le_bytes());
    assert_eq!(&bytes[..4], &[0x01, 0x00, 0xbe, 0xef]);

    let parsed = Beef::from_bytes(&bytes).unwrap();
    assert_eq!(parsed.bumps, vec![synthetic_bump()]);
    assert_eq!(parsed.transactions().len(), 2);
    assert_eq!(parsed.transactions()[0].transaction.tx_id(), parent.tx_id());
    assert_eq!(parsed.transactions()[0].bump_index, Some(0));
    assert_eq!(parsed.transactions()[1].transaction.tx_id(), child.tx_id());
    assert_eq!(parsed.transactions()[1].bump_index, None);
}

#[test]
fn test_beef_incomplete_without_parent() {
    let parent = Transaction::from_hex(SOURCE_RAW_TX).unwrap();
    let mut beef = Beef::new();
    beef.add_transaction(spend_of(&parent, 1), None);
    assert!(!beef.is_complete());
}

#[test]
fn test_beef_dedupes_transactions_and_bumps() {
    let parent = Transaction::from_hex(SOURCE_RAW_TX).unwrap();
    let mut beef = Beef::new();
    beef.add_transaction(parent.clone(), None);
    beef.add_transaction(parent.clone(), Some(synthetic_bump()));
    assert_eq!(beef.add_bump(synthetic_bump()), 0);
    assert_eq!(beef.transactions().len(), 1);
    assert_eq!(beef.find_transaction(&parent.tx_id()).unwrap().bump_index, Some(0));
}

#[test]
fn test_beef_rejects_unknown_version() {
    let mut bytes = Beef::new().to_bytes().unwrap();
    bytes[0] = 0x02;
    assert!(matches!(
        Beef::from_bytes(&bytes),
        Err(TransactionError::InvalidBeef(_))
    ));
}
