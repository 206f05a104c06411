//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use spv_wallet_arc::{ArcError, ArcResponse, AsyncBroadcaster};
use spv_wallet_engine::{
    Account, DraftTransaction, Engine, EngineConfig, EngineError, MemoryStore,
    RecordedTransaction, RetryConfig, Utxo,
};
use spv_wallet_paymail::{PaymailClient, PaymailConfig};
use spv_wallet_primitives::chainhash::ChainHash;
use spv_wallet_script::Script;
use spv_wallet_transaction::{Transaction, TransactionInput, TransactionOutput};

pub const ALICE: &str = "alice";
pub const BOB: &str = "bob";
/// A legacy address outside the wallet.
pub const EXTERNAL_ADDRESS: &str = "1E7ucTTWRTahCyViPhxSMor2pj4VGQdFMr";
/// Opaque merkle path attached to funding transactions.
pub const FUNDING_BUMP: &str = "0101020002aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa0100bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

/// P2PKH locking script for a 20-byte hash made of `byte`.
pub fn p2pkh(byte: u8) -> Script {
    Script::p2pkh_from_hash(&[byte; 20])
}

pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        attempts: 2,
        initial_backoff_ms: 1,
    }
}

/// Broadcaster that records what it was given.
#[derive(Debug, Default)]
pub struct MockBroadcaster {
    pub broadcasts: Mutex<Vec<String>>,
    pub reject: AtomicBool,
    pub unavailable: AtomicBool,
    pub mined: AtomicBool,
}

impl MockBroadcaster {
    pub fn broadcast_txids(&self) -> Vec<String> {
        self.broadcasts.lock().unwrap().clone()
    }
}

impl AsyncBroadcaster for MockBroadcaster {
    async fn broadcast(&self, tx: &Transaction) -> Result<ArcResponse, ArcError> {
        let txid = tx.tx_id_hex();
        self.broadcasts.lock().unwrap().push(txid.clone());
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ArcError::ServerError {
                status_code: 503,
                message: "unavailable".to_string(),
            });
        }
        if self.reject.load(Ordering::SeqCst) {
            return Err(ArcError::Rejected {
                code: 465,
                description: "fee too low".to_string(),
            });
        }
        Ok(ArcResponse {
            txid,
            tx_status: Some("SEEN_ON_NETWORK".to_string()),
            ..Default::default()
        })
    }

    async fn status(&self, txid: &str) -> Result<ArcResponse, ArcError> {
        if self.mined.load(Ordering::SeqCst) {
            return Ok(ArcResponse {
                txid: txid.to_string(),
                tx_status: Some("MINED".to_string()),
                block_hash: Some("00000000000000000a1b2c".to_string()),
                block_height: Some(850_000),
                merkle_path: Some(FUNDING_BUMP.to_string()),
                ..Default::default()
            });
        }
        Ok(ArcResponse {
            txid: txid.to_string(),
            tx_status: Some("SEEN_ON_NETWORK".to_string()),
            ..Default::default()
        })
    }
}

pub type TestEngine = Engine<MockBroadcaster>;

pub fn engine_with(config: EngineConfig, paymail: PaymailConfig) -> TestEngine {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    Engine::new(
        config,
        Arc::new(MemoryStore::new()),
        PaymailClient::new(paymail).unwrap(),
        MockBroadcaster::default(),
    )
}

/// Engine with default settings and accounts for Alice and Bob.
pub fn engine() -> TestEngine {
    let config = EngineConfig {
        retry: fast_retry(),
        ..EngineConfig::default()
    };
    let engine = engine_with(config, PaymailConfig::default());
    add_accounts(&engine);
    engine
}

pub fn add_accounts(engine: &TestEngine) {
    engine
        .add_account(Account::new(ALICE, p2pkh(0xa1)).with_paymail("alice@wallet.example"))
        .unwrap();
    engine.add_account(Account::new(BOB, p2pkh(0xb0))).unwrap();
}

/// A mined transaction paying `amounts` to `script`, from an outpoint
/// derived from `seed`.
pub fn funding_tx(script: &Script, amounts: &[u64], seed: u8) -> Transaction {
    let mut tx = Transaction::new();
    let mut input = TransactionInput::new(ChainHash::new([seed; 32]), 0);
    input.unlocking_script = Some(Script::from_bytes(&[0x51]));
    tx.add_input(input);
    for amount in amounts {
        tx.add_output(TransactionOutput::new(*amount, script.clone()));
    }
    tx
}

/// Fund `script`'s owner with one UTXO per amount.
pub fn fund(engine: &TestEngine, script: &Script, amounts: &[u64], seed: u8) -> Vec<Utxo> {
    let tx = funding_tx(script, amounts, seed);
    let recorded = RecordedTransaction::imported(tx.tx_id_hex(), tx.to_hex(), Utc::now())
        .with_merkle_path(FUNDING_BUMP);
    engine.import_transaction(recorded).unwrap()
}

/// Stand-in signer: fills every input with a placeholder unlocking script
/// of signature size.
pub fn sign(draft: &DraftTransaction) -> Result<String, EngineError> {
    let mut tx = draft.to_transaction();
    for input in tx.inputs.iter_mut() {
        input.unlocking_script = Some(Script::from_bytes(&[0x51; 106]));
    }
    Ok(tx.to_hex())
}
