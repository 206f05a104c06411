//! Concurrent drafts against one account never share an input, and
//! concurrent transitions of one draft or transaction apply once.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use std::sync::atomic::Ordering;

use spv_wallet_engine::{
    DraftConfig, DraftStatus, ErrorKind, Metadata, OutputSpec, SyncStatus, UtxoState,
};
use tokio::sync::Barrier;

use common::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_drafts_reserve_disjoint_inputs() {
    let engine = Arc::new(engine());
    fund(&engine, &p2pkh(0xa1), &[2_000; 10], 1);

    let mut handles = Vec::new();
    for _ in 0..12 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .build_draft(
                    ALICE,
                    DraftConfig::with_outputs(vec![OutputSpec::to(EXTERNAL_ADDRESS, 1_000)]),
                    Metadata::new(),
                )
                .await
        }));
    }

    let mut drafts = Vec::new();
    let mut short = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(draft) => drafts.push(draft),
            Err(e) => {
                assert_eq!(e.kind(), ErrorKind::InsufficientFunds);
                short += 1;
            }
        }
    }
    assert_eq!(drafts.len(), 10);
    assert_eq!(short, 2);

    let mut seen = HashSet::new();
    for draft in &drafts {
        assert_eq!(draft.inputs.len(), 1);
        for outpoint in draft.outpoints() {
            assert!(seen.insert(outpoint), "{outpoint} reserved twice");
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_records_of_one_draft_apply_once() {
    let engine = Arc::new(engine());
    fund(&engine, &p2pkh(0xa1), &[10_000], 1);
    let draft = engine
        .build_draft(
            ALICE,
            DraftConfig::with_outputs(vec![OutputSpec::to(EXTERNAL_ADDRESS, 1_000)]),
            Metadata::new(),
        )
        .await
        .unwrap();
    let signed = sign(&draft).unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        let signed = signed.clone();
        let draft_id = draft.id.clone();
        handles.push(tokio::spawn(async move {
            engine.record(&signed, &draft_id, Metadata::new()).await
        }));
    }

    let mut fresh = 0;
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        if !outcome.already_recorded {
            fresh += 1;
        }
    }
    assert_eq!(fresh, 1);
    assert_eq!(engine.balance(ALICE).unwrap(), 8_774);
    assert_eq!(engine.get_draft(&draft.id).unwrap().status, DraftStatus::Complete);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_racing_record_has_one_winner() {
    for _ in 0..25 {
        let engine = Arc::new(engine());
        let funding = fund(&engine, &p2pkh(0xa1), &[10_000], 1);
        let draft = engine
            .build_draft(
                ALICE,
                DraftConfig::with_outputs(vec![OutputSpec::to(EXTERNAL_ADDRESS, 1_000)]),
                Metadata::new(),
            )
            .await
            .unwrap();
        let signed = sign(&draft).unwrap();
        let barrier = Arc::new(Barrier::new(2));

        let recording = {
            let (engine, barrier, draft_id) = (engine.clone(), barrier.clone(), draft.id.clone());
            tokio::spawn(async move {
                barrier.wait().await;
                engine.record(&signed, &draft_id, Metadata::new()).await
            })
        };
        let canceling = {
            let (engine, barrier, draft_id) = (engine.clone(), barrier.clone(), draft.id.clone());
            tokio::spawn(async move {
                barrier.wait().await;
                engine.cancel_draft(&draft_id)
            })
        };
        let recorded = recording.await.unwrap();
        let canceled = canceling.await.unwrap();

        let status = engine.get_draft(&draft.id).unwrap().status;
        let input = engine
            .store()
            .get_utxo(&funding[0].outpoint)
            .unwrap()
            .unwrap();
        match (recorded, canceled) {
            (Ok(outcome), Err(e)) => {
                assert_eq!(e.kind(), ErrorKind::ReservationConflict);
                assert_eq!(status, DraftStatus::Complete);
                assert!(matches!(input.state, UtxoState::Spent { ref spending_txid }
                    if *spending_txid == outcome.transaction.id));
                assert_eq!(engine.balance(ALICE).unwrap(), 8_774);
            }
            (Err(_), Ok(draft)) => {
                assert_eq!(draft.status, DraftStatus::Canceled);
                assert_eq!(status, DraftStatus::Canceled);
                assert_eq!(input.state, UtxoState::Available);
                assert_eq!(engine.balance(ALICE).unwrap(), 10_000);
            }
            (recorded, canceled) => panic!(
                "expected exactly one winner, got record {:?} and cancel {:?}",
                recorded.map(|o| o.transaction.id),
                canceled.map(|d| d.status)
            ),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_broadcasts_submit_once() {
    let engine = Arc::new(engine());
    fund(&engine, &p2pkh(0xa1), &[10_000], 1);
    let draft = engine
        .build_draft(
            ALICE,
            DraftConfig::with_outputs(vec![OutputSpec::to(EXTERNAL_ADDRESS, 1_000)]),
            Metadata::new(),
        )
        .await
        .unwrap();

    engine.broadcaster().unavailable.store(true, Ordering::SeqCst);
    let outcome = engine.sign_and_record(&draft.id, &sign, Metadata::new()).await.unwrap();
    let txid = outcome.transaction.id.clone();
    assert_eq!(outcome.sync.broadcast_status, SyncStatus::Pending);
    let attempts = engine.broadcaster().broadcast_txids().len();
    engine.broadcaster().unavailable.store(false, Ordering::SeqCst);

    let barrier = Arc::new(Barrier::new(8));
    let mut handles = Vec::new();
    for i in 0..8 {
        let (engine, barrier, txid) = (engine.clone(), barrier.clone(), txid.clone());
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            if i % 2 == 0 {
                engine.broadcast(&txid).await.map(|_| ())
            } else {
                engine.process_pending().await.map(|_| ())
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // One more submission, whichever task got there first.
    assert_eq!(engine.broadcaster().broadcast_txids().len(), attempts + 1);
    let sync = engine.get_sync_transaction(&txid).unwrap();
    assert_eq!(sync.broadcast_status, SyncStatus::Complete);
}

#[tokio::test]
async fn test_background_tasks_expire_drafts() {
    let config = spv_wallet_engine::EngineConfig {
        draft_expiry_secs: 1,
        retry: fast_retry(),
        ..Default::default()
    };
    let engine = Arc::new(engine_with(config, spv_wallet_paymail::PaymailConfig::default()));
    add_accounts(&engine);
    fund(&engine, &p2pkh(0xa1), &[10_000], 1);

    let draft = engine
        .build_draft(
            ALICE,
            DraftConfig::with_outputs(vec![OutputSpec::to(EXTERNAL_ADDRESS, 1_000)]),
            Metadata::new(),
        )
        .await
        .unwrap();

    let handle = engine.spawn_background_tasks(Duration::from_millis(50));
    let mut status = DraftStatus::Draft;
    for _ in 0..60 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        status = engine.get_draft(&draft.id).unwrap().status;
        if status == DraftStatus::Expired {
            break;
        }
    }
    handle.shutdown().await;
    assert_eq!(status, DraftStatus::Expired);
}
