//! Idempotent ingestion: a duplicate trace id yields exactly one ledger row
//! and surfaces the pre-existing id to the caller.

use ldk_schemas::{EntryState, Micros};
use ldk_store::{NewEntry, Store, StoreError, StoreOptions};

fn receipt(trace: &str) -> NewEntry {
    NewEntry {
        trace_id: trace.to_string(),
        amount: Micros::from_units(-500),
        vendor: "Starbucks".to_string(),
        category: "6601-02".to_string(),
        occurred_at_ms: 1_767_312_000_000,
        group_id: None,
        project_id: None,
        tenant_id: None,
        inference_log: serde_json::json!({}),
        matched_rule: None,
        state: EntryState::Proposed,
    }
}

#[tokio::test]
async fn second_submission_sees_prior_id() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(StoreOptions::at_dir(dir.path())).await.unwrap();

    let first = store.append_entry(&receipt("trace-dup")).await.unwrap();

    let err = store.append_entry(&receipt("trace-dup")).await.unwrap_err();
    match err {
        StoreError::DuplicateTrace { existing_id } => assert_eq!(existing_id, first.id),
        other => panic!("expected DuplicateTrace, got {other:?}"),
    }

    // Exactly one row exists.
    let (count,): (i64,) =
        sqlx::query_as("select count(*) from ledger_entries where trace_id = 'trace-dup'")
            .fetch_one(store.pool())
            .await
            .unwrap();
    assert_eq!(count, 1);

    // The chain head advanced exactly once.
    assert_eq!(store.chain_head_id().await.unwrap(), first.id);
}

#[tokio::test]
async fn distinct_traces_append_independently() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(StoreOptions::at_dir(dir.path())).await.unwrap();

    let a = store.append_entry(&receipt("trace-a")).await.unwrap();
    let b = store.append_entry(&receipt("trace-b")).await.unwrap();
    assert_ne!(a.id, b.id);
    assert_ne!(a.chain_hash, b.chain_hash);

    let fetched = store.get_entry_by_trace("trace-b").await.unwrap().unwrap();
    assert_eq!(fetched.id, b.id);
    assert_eq!(fetched.prev_hash, a.chain_hash);
}
