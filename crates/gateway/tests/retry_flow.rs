mod common;

use std::time::Duration;

use mediagate_blocklist::BlocklistBackend;
use mediagate_core::{AttachmentId, Clock, ContentHash, offset};
use mediagate_gateway::GateDecision;
use mediagate_ledger::{LedgerError, LedgerStore};

use common::{config, harness};

const HOUR: Duration = Duration::from_secs(3600);

#[tokio::test(start_paused = true)]
async fn denied_download_is_released_after_unblock() {
    let h = harness(config());
    let a1 = AttachmentId::new("A1");
    let h1 = ContentHash::of(b"H1 bytes");
    h.guard.blocklist().store(&h1).await.unwrap();
    h.guard.start();

    let decision = h.guard.validate_download(&a1, Some(&h1)).await;
    assert_eq!(decision, GateDecision::Deny);

    let records = h.store.retry_records().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].attachment_id, a1);
    assert_eq!(records[0].retry_attempt, 0);

    assert!(h.guard.blocklist().delete(&h1).await.unwrap());
    assert!(h.pipeline.wait_for_ready(1, HOUR).await, "A1 was never released");

    assert_eq!(h.pipeline.ready(), vec![a1.clone()]);
    assert!(h.store.retry_record(&a1).await.unwrap().is_none());
    assert!(h.pipeline.begin_calls() >= 1);

    tokio::time::sleep(HOUR).await;
    assert_eq!(h.pipeline.ready().len(), 1, "released exactly once");
    assert_eq!(h.guard.metrics().releases, 1);
    h.guard.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn concurrent_starts_spawn_one_loop() {
    let h = harness(config());
    let later = offset(h.clock.now(), HOUR);
    h.store
        .upsert_retry(&AttachmentId::new("a"), &ContentHash::of(b"x"), later)
        .await
        .unwrap();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let scheduler = h.guard.scheduler().clone();
            tokio::spawn(async move { scheduler.start_if_needed() })
        })
        .collect();
    let mut started = 0;
    for handle in handles {
        if handle.await.unwrap() {
            started += 1;
        }
    }
    assert_eq!(started, 1);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(h.guard.scheduler().is_running());
    assert!(!h.guard.scheduler().start_if_needed());
    h.guard.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn overlapping_cycles_release_once() {
    let h = harness(config());
    let id = AttachmentId::new("a");
    h.store
        .upsert_retry(&id, &ContentHash::of(b"x"), h.clock.now())
        .await
        .unwrap();

    let scheduler = h.guard.scheduler();
    let (a, b, c) = tokio::join!(
        scheduler.run_cycle(),
        scheduler.run_cycle(),
        scheduler.run_cycle()
    );
    let released = a.unwrap().released + b.unwrap().released + c.unwrap().released;
    assert_eq!(released, 1);
    assert_eq!(h.pipeline.ready(), vec![id]);
}

#[tokio::test(start_paused = true)]
async fn still_blocked_schedule_moves_forward() {
    let h = harness(config());
    let id = AttachmentId::new("a");
    let hash = ContentHash::of(b"blocked");
    h.guard.blocklist().store(&hash).await.unwrap();
    h.guard.start();
    assert_eq!(h.guard.validate_download(&id, Some(&hash)).await, GateDecision::Deny);

    let cap = Duration::from_secs(h.guard.config().retry.max_delay_secs);
    let mut previous = h.store.retry_record(&id).await.unwrap().unwrap();
    for _ in 0..5 {
        let wait = mediagate_core::until(h.clock.now(), previous.next_retry_at);
        tokio::time::sleep(wait + Duration::from_secs(1)).await;

        let current = h.store.retry_record(&id).await.unwrap().unwrap();
        assert_eq!(current.retry_attempt, previous.retry_attempt + 1);
        assert!(current.next_retry_at > previous.next_retry_at);
        assert!(current.next_retry_at <= offset(h.clock.now(), cap));
        previous = current;
    }
    assert!(h.pipeline.ready().is_empty());
    h.guard.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn new_record_wakes_sleeping_loop() {
    let h = harness(config());
    let blocked = ContentHash::of(b"blocked");
    h.guard.blocklist().store(&blocked).await.unwrap();
    h.guard.start();
    h.guard
        .validate_download(&AttachmentId::new("slow"), Some(&blocked))
        .await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(h.guard.scheduler().is_running());

    let fast = AttachmentId::new("fast");
    h.store
        .upsert_retry(&fast, &ContentHash::of(b"clear"), h.clock.now())
        .await
        .unwrap();

    assert!(
        h.pipeline.wait_for_ready(1, Duration::from_secs(1)).await,
        "loop slept through a due record"
    );
    assert_eq!(h.pipeline.ready(), vec![fast]);
    h.guard.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn empty_queue_goes_idle() {
    let h = harness(config());
    h.guard.start();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(!h.guard.scheduler().is_running());
    assert!(h.guard.metrics().scheduler_cycles >= 1);

    assert!(h.guard.scheduler().start_if_needed(), "an idle loop can restart");
    h.guard.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_interrupts_sleep() {
    let h = harness(config());
    let later = offset(h.clock.now(), Duration::from_secs(86_400));
    h.store
        .upsert_retry(&AttachmentId::new("a"), &ContentHash::of(b"x"), later)
        .await
        .unwrap();
    h.guard.start();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(h.guard.scheduler().is_running());

    tokio::time::timeout(Duration::from_secs(5), h.guard.shutdown())
        .await
        .expect("shutdown should not wait for the sleep");
    assert!(!h.guard.scheduler().is_running());
    assert!(!h.guard.scheduler().start_if_needed());
}

#[tokio::test(start_paused = true)]
async fn blocklist_outage_allows_download() {
    let h = harness(config());
    let hash = ContentHash::of(b"x");
    h.guard.blocklist().store(&hash).await.unwrap();
    h.backend.set_down(true);

    let decision = h
        .guard
        .validate_download(&AttachmentId::new("a"), Some(&hash))
        .await;
    assert_eq!(decision, GateDecision::Allow);
    assert!(h.store.retry_records().await.unwrap().is_empty());

    let metrics = h.guard.metrics();
    assert_eq!(metrics.gate_fail_open, 1);
    assert_eq!(metrics.gate_denied, 0);
}

#[tokio::test(start_paused = true)]
async fn disabled_guard_allows_everything() {
    let mut config = config();
    config.enabled = false;
    let h = harness(config);
    let hash = ContentHash::of(b"x");
    h.backend
        .put_if_absent(&mediagate_blocklist::BlocklistEntry::new(
            hash.clone(),
            h.clock.now(),
            None,
        ))
        .await
        .unwrap();
    let calls = h.backend.calls();

    h.guard.start();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!h.guard.scheduler().is_running());

    let id = AttachmentId::new("a");
    assert_eq!(h.guard.validate_download(&id, Some(&hash)).await, GateDecision::Allow);
    assert_eq!(h.backend.calls(), calls);
    assert!(h.store.retry_records().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_retry_write_keeps_deny() {
    let h = harness(config());
    let hash = ContentHash::of(b"x");
    h.guard.blocklist().store(&hash).await.unwrap();
    h.store
        .fail_writes(Some(LedgerError::Backend("read-only".into())));

    let id = AttachmentId::new("a");
    assert_eq!(h.guard.validate_download(&id, Some(&hash)).await, GateDecision::Deny);
    assert!(h.store.retry_records().await.unwrap().is_empty());
    assert_eq!(h.guard.metrics().retries_enqueued, 0);
}

#[tokio::test(start_paused = true)]
async fn fetches_bytes_when_host_has_no_hash() {
    let h = harness(config());
    let id = AttachmentId::new("a");
    h.pipeline.insert_file(&id, b"payload".to_vec());
    h.guard
        .blocklist()
        .store(&ContentHash::of(b"payload"))
        .await
        .unwrap();

    assert_eq!(h.guard.validate_download(&id, None).await, GateDecision::Deny);
    let record = h.store.retry_record(&id).await.unwrap().unwrap();
    assert_eq!(record.content_hash, ContentHash::of(b"payload"));
}

#[tokio::test(start_paused = true)]
async fn longest_retry_delay_saturates() {
    let mut config = config();
    config.retry.initial_delay_secs = u64::MAX;
    config.retry.max_delay_secs = u64::MAX;
    config.validate().unwrap();
    let h = harness(config);
    let hash = ContentHash::of(b"x");
    h.guard.blocklist().store(&hash).await.unwrap();

    let id = AttachmentId::new("a");
    assert_eq!(h.guard.validate_download(&id, Some(&hash)).await, GateDecision::Deny);
    let record = h.store.retry_record(&id).await.unwrap().unwrap();
    assert_eq!(record.next_retry_at, chrono::DateTime::<chrono::Utc>::MAX_UTC);
}

#[tokio::test(start_paused = true)]
async fn own_reschedule_does_not_wake_the_loop() {
    let h = harness(config());
    let id = AttachmentId::new("a");
    let hash = ContentHash::of(b"blocked");
    h.guard.blocklist().store(&hash).await.unwrap();
    h.store.upsert_retry(&id, &hash, h.clock.now()).await.unwrap();
    h.guard.start();

    tokio::time::sleep(Duration::from_secs(60)).await;
    let record = h.store.retry_record(&id).await.unwrap().unwrap();
    assert_eq!(record.retry_attempt, 1);
    assert_eq!(
        h.guard.metrics().scheduler_cycles,
        1,
        "rescheduling a record must not trigger another pass"
    );

    let earlier = AttachmentId::new("b");
    h.store
        .upsert_retry(&earlier, &ContentHash::of(b"clear"), h.clock.now())
        .await
        .unwrap();
    assert!(
        h.pipeline.wait_for_ready(1, Duration::from_secs(1)).await,
        "an earlier record still wakes the loop"
    );
    assert_eq!(h.pipeline.ready(), vec![earlier]);
    h.guard.shutdown().await;
}
