//! Outbox delivery contract: due selection, send/ack lifecycle, failure
//! backoff with an attempt cap, and crash recovery of stuck SENT rows.

use ldk_schemas::{OutboxKind, OutboxStatus};
use ldk_store::{Store, StoreOptions};

async fn test_store() -> (tempfile::TempDir, Store) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(StoreOptions::at_dir(dir.path())).await.unwrap();
    (dir, store)
}

#[tokio::test]
async fn enqueue_then_due_then_ack() {
    let (_dir, store) = test_store().await;

    let payload = serde_json::json!({"title": "review needed"});
    let id = store
        .outbox_enqueue(OutboxKind::PushCard, &payload, Some("trace-1"))
        .await
        .unwrap();

    let due = store.outbox_due(10).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].event_id, id);
    assert_eq!(due[0].kind, OutboxKind::PushCard);
    assert_eq!(due[0].status, OutboxStatus::Pending);

    assert!(store.outbox_mark_sent(&id).await.unwrap());
    // Already SENT — not due anymore, and a second mark_sent is a no-op.
    assert!(store.outbox_due(10).await.unwrap().is_empty());
    assert!(!store.outbox_mark_sent(&id).await.unwrap());

    assert!(store.outbox_mark_ack(&id).await.unwrap());
    assert_eq!(store.outbox_depth().await.unwrap(), 0);
}

#[tokio::test]
async fn failure_backs_off_then_parks_failed_at_cap() {
    let (_dir, store) = test_store().await;
    let id = store
        .outbox_enqueue(OutboxKind::EvidenceRequest, &serde_json::json!({}), None)
        .await
        .unwrap();

    // First failure: back to PENDING with a future attempt.
    let status = store
        .outbox_mark_failure(&id, "connect refused", 3, 50)
        .await
        .unwrap();
    assert_eq!(status, OutboxStatus::Pending);

    // Second failure: still below the cap.
    let status = store
        .outbox_mark_failure(&id, "connect refused", 3, 50)
        .await
        .unwrap();
    assert_eq!(status, OutboxStatus::Pending);

    // Third failure reaches the cap: parked for the operator.
    let status = store
        .outbox_mark_failure(&id, "connect refused", 3, 50)
        .await
        .unwrap();
    assert_eq!(status, OutboxStatus::Failed);

    let rows = store
        .outbox_list_kind(OutboxKind::EvidenceRequest, 10)
        .await
        .unwrap();
    assert_eq!(rows[0].attempts, 3);
    assert_eq!(rows[0].last_error.as_deref(), Some("connect refused"));
}

#[tokio::test]
async fn stuck_sent_rows_recover_to_pending() {
    let (_dir, store) = test_store().await;
    let id = store
        .outbox_enqueue(OutboxKind::Critical, &serde_json::json!({"alert": "x"}), None)
        .await
        .unwrap();
    assert!(store.outbox_mark_sent(&id).await.unwrap());

    // A crash between send and ack leaves the row SENT. Recovery with age 0
    // re-drives it (at-least-once, duplicates tolerated downstream).
    let recovered = store.outbox_recover_stuck_sent(0).await.unwrap();
    assert_eq!(recovered, 1);
    let due = store.outbox_due(10).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].event_id, id);
}

#[tokio::test]
async fn depth_counts_pending_and_sent() {
    let (_dir, store) = test_store().await;
    for _ in 0..3 {
        store
            .outbox_enqueue(OutboxKind::PushCard, &serde_json::json!({}), None)
            .await
            .unwrap();
    }
    let due = store.outbox_due(1).await.unwrap();
    store.outbox_mark_sent(&due[0].event_id).await.unwrap();
    assert_eq!(store.outbox_depth().await.unwrap(), 3);

    store.outbox_mark_ack(&due[0].event_id).await.unwrap();
    assert_eq!(store.outbox_depth().await.unwrap(), 2);
}
