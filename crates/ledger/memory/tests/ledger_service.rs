use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use mediagate_core::{AttachmentId, Clock, ConversationId, Fingerprint, ManualClock};
use mediagate_ledger::HashLedger;
use mediagate_ledger_memory::MemoryLedgerStore;

fn fp(hex: &str) -> Fingerprint {
    Fingerprint::from_hex(hex).unwrap()
}

fn ledger() -> (HashLedger, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let ledger = HashLedger::with_clock(Arc::new(MemoryLedgerStore::new()), clock.clone());
    (ledger, clock)
}

#[tokio::test]
async fn record_inherits_block_state() {
    let (ledger, _) = ledger();
    let conversation = ConversationId::new("thread-1");
    let hash = fp("ffff0000");

    let first = ledger.record(&hash, &conversation, None, None).await.unwrap();
    assert!(!first.blocked);

    assert_eq!(ledger.block(&hash).await.unwrap(), 1);
    let second = ledger
        .record(&hash, &conversation, Some(&AttachmentId::new("a2")), Some("b.png"))
        .await
        .unwrap();
    assert!(second.blocked, "a blocked hash stays blocked for new sightings");
    assert!(ledger.is_blocked(&hash).await);

    assert_eq!(ledger.unblock(&hash).await.unwrap(), 2);
    assert!(!ledger.is_blocked(&hash).await);
}

#[tokio::test]
async fn block_before_first_sighting_applies() {
    let (ledger, _) = ledger();
    let conversation = ConversationId::new("thread-1");
    let hash = fp("0f0f0f0f");

    assert_eq!(ledger.block(&hash).await.unwrap(), 0);
    assert!(ledger.is_blocked(&hash).await);

    let first = ledger.record(&hash, &conversation, None, None).await.unwrap();
    assert!(first.blocked, "a hash blocked before it was seen starts blocked");

    assert_eq!(ledger.unblock(&hash).await.unwrap(), 1);
    let second = ledger.record(&hash, &conversation, None, None).await.unwrap();
    assert!(!second.blocked);
}

#[tokio::test]
async fn find_similar_threshold_is_inclusive() {
    let (ledger, _) = ledger();
    let conversation = ConversationId::new("thread-1");

    // Distances from the query 00000000: 0, 2, 3, and a different length.
    for hex in ["00000000", "00000003", "00000007", "0000"] {
        ledger.record(&fp(hex), &conversation, None, None).await.unwrap();
    }

    let query = fp("00000000");
    let matches = ledger.find_similar(&query, 2).await;
    let distances: Vec<u32> = matches.iter().map(|m| m.distance).collect();
    assert_eq!(distances, vec![0, 2], "distance T is included, T+1 excluded");

    let wider = ledger.find_similar(&query, 3).await;
    assert_eq!(wider.len(), 3, "different-length fingerprints never match");
}

#[tokio::test]
async fn prune_removes_old_unblocked_only() {
    let (ledger, clock) = ledger();
    let conversation = ConversationId::new("thread-1");
    let stale = fp("11111111");
    let blocked = fp("22222222");

    ledger.record(&stale, &conversation, None, None).await.unwrap();
    ledger.record(&blocked, &conversation, None, None).await.unwrap();
    ledger.block(&blocked).await.unwrap();

    clock.advance(Duration::from_secs(31 * 86_400));
    let fresh = fp("33333333");
    ledger.record(&fresh, &conversation, None, None).await.unwrap();

    let cutoff = clock.now() - chrono::Duration::days(30);
    let removed = ledger.prune(cutoff).await.unwrap();
    assert_eq!(removed, 1);

    let remaining: Vec<_> = ledger
        .find_similar(&stale, 32)
        .await
        .into_iter()
        .map(|m| m.record.hash)
        .collect();
    assert!(!remaining.contains(&stale));
    assert!(remaining.contains(&blocked));
    assert!(remaining.contains(&fresh));
}
