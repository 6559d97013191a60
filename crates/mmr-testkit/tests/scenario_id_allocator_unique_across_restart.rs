//! Scenario: Component State Ids Are Never Reused
//!
//! # Invariant under test
//! Ids dispensed by `IdAllocator` are unique across concurrent callers and
//! across process restarts sharing the same durable sequence row. A
//! restart abandons the rest of its block (gaps are fine, reuse is not).
//! A failed refill leaves the allocator able to retry.
//!
//! All tests are pure in-process; no DB required.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::join_all;
use mmr_ledger::{IdAllocator, COMPONENT_STATE_SEQ};
use mmr_testkit::MemSequences;

#[tokio::test]
async fn fresh_sequence_starts_at_default_block() {
    let seq = Arc::new(MemSequences::new());
    let ids = IdAllocator::new(COMPONENT_STATE_SEQ, seq.clone());

    assert_eq!(ids.next_id().await.unwrap(), 1001);
    assert_eq!(seq.next_block_start(COMPONENT_STATE_SEQ), Some(1101));
}

#[tokio::test]
async fn concurrent_callers_never_share_an_id() {
    let seq = Arc::new(MemSequences::with_row(COMPONENT_STATE_SEQ, 1, 7));
    let ids = Arc::new(IdAllocator::new(COMPONENT_STATE_SEQ, seq.clone()));

    let calls = (0..200).map(|_| {
        let ids = ids.clone();
        async move { ids.next_id().await.unwrap() }
    });
    let got = join_all(calls).await;

    let unique: HashSet<i64> = got.iter().copied().collect();
    assert_eq!(unique.len(), 200);
    // 200 ids from blocks of 7 need exactly ceil(200 / 7) refills.
    assert_eq!(seq.reservations(), 29);
}

#[tokio::test]
async fn concurrent_allocators_on_one_sequence_get_disjoint_blocks() {
    let seq = Arc::new(MemSequences::with_row(COMPONENT_STATE_SEQ, 1, 5));
    let a = Arc::new(IdAllocator::new(COMPONENT_STATE_SEQ, seq.clone()));
    let b = Arc::new(IdAllocator::new(COMPONENT_STATE_SEQ, seq.clone()));

    let calls = (0..60).map(|i| {
        let ids = if i % 2 == 0 { a.clone() } else { b.clone() };
        async move { ids.next_id().await.unwrap() }
    });
    let got = join_all(calls).await;

    let unique: HashSet<i64> = got.iter().copied().collect();
    assert_eq!(unique.len(), 60);
}

#[tokio::test]
async fn restart_skips_the_unused_tail_of_the_block() {
    let seq = Arc::new(MemSequences::new());

    let before = IdAllocator::new(COMPONENT_STATE_SEQ, seq.clone());
    let mut first_run = Vec::new();
    for _ in 0..3 {
        first_run.push(before.next_id().await.unwrap());
    }
    assert_eq!(first_run, vec![1001, 1002, 1003]);
    drop(before);

    let after = IdAllocator::new(COMPONENT_STATE_SEQ, seq.clone());
    let next = after.next_id().await.unwrap();
    assert_eq!(next, 1101);
    assert!(!first_run.contains(&next));
}

#[tokio::test]
async fn block_boundary_triggers_exactly_one_refill() {
    let seq = Arc::new(MemSequences::with_row(COMPONENT_STATE_SEQ, 1001, 100));
    let ids = IdAllocator::new(COMPONENT_STATE_SEQ, seq.clone());

    let mut last = 0;
    for _ in 0..100 {
        last = ids.next_id().await.unwrap();
    }
    assert_eq!(last, 1100);
    assert_eq!(seq.reservations(), 1);

    assert_eq!(ids.next_id().await.unwrap(), 1101);
    assert_eq!(seq.reservations(), 2);
    assert_eq!(seq.next_block_start(COMPONENT_STATE_SEQ), Some(1201));
}

#[tokio::test]
async fn failed_refill_is_retryable_without_skipping() {
    let seq = Arc::new(MemSequences::with_row(COMPONENT_STATE_SEQ, 500, 2));
    let ids = IdAllocator::new(COMPONENT_STATE_SEQ, seq.clone());

    assert_eq!(ids.next_id().await.unwrap(), 500);
    assert_eq!(ids.next_id().await.unwrap(), 501);

    seq.set_failing(true);
    assert!(ids.next_id().await.is_err());
    assert!(ids.next_id().await.is_err());
    assert_eq!(seq.next_block_start(COMPONENT_STATE_SEQ), Some(502));

    seq.set_failing(false);
    assert_eq!(ids.next_id().await.unwrap(), 502);
}
