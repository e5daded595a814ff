//! Reconciliation against a real store: an exact-amount same-week pair
//! auto-matches and raises a confirmation request, weak candidates go to
//! review, misses stay unreconciled, stale lines trigger evidence requests,
//! and a tampered chain freezes appends.

use ldk_match::{MatchDecision, MatchEngine, MatchOptions};
use ldk_schemas::{EntryState, Micros, OutboxKind, PendingSource, PendingStatus};
use ldk_store::{NewEntry, NewPendingEntry, Store, StoreOptions};

const DAY_MS: i64 = 86_400_000;
const BASE_MS: i64 = 1_767_312_000_000;

fn options() -> MatchOptions {
    MatchOptions {
        tolerance: Micros::new(10_000),
        window_days: 7,
        auto_threshold: 0.90,
        review_threshold: 0.60,
        batch_size: 100,
        auto_post: false,
        evidence_age_h: 48,
    }
}

async fn setup() -> (tempfile::TempDir, Store, MatchEngine) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(StoreOptions::at_dir(dir.path())).await.unwrap();
    let engine = MatchEngine::new(store.clone(), options());
    (dir, store, engine)
}

async fn posted(store: &Store, trace: &str, vendor: &str, units: i64, at_ms: i64) -> i64 {
    let appended = store
        .append_entry(&NewEntry {
            trace_id: trace.to_string(),
            amount: Micros::from_units(units),
            vendor: vendor.to_string(),
            category: "6601".to_string(),
            occurred_at_ms: at_ms,
            group_id: None,
            project_id: None,
            tenant_id: None,
            inference_log: serde_json::json!({}),
            matched_rule: None,
            state: EntryState::Proposed,
        })
        .await
        .unwrap();
    store
        .transition_entry(appended.id, EntryState::Proposed, EntryState::Posted)
        .await
        .unwrap();
    appended.id
}

fn line(counterparty: &str, units: i64, at_ms: i64) -> NewPendingEntry {
    NewPendingEntry {
        source: PendingSource::Alipay,
        counterparty: counterparty.to_string(),
        amount: Micros::from_units(units),
        occurred_at_ms: at_ms,
        description: String::new(),
    }
}

#[tokio::test]
async fn same_week_exact_amount_pair_auto_matches() {
    let (_dir, store, engine) = setup().await;

    let ledger_id = posted(&store, "m-1", "Starbucks", -500, BASE_MS + 2 * DAY_MS).await;
    let pending_id = store
        .insert_pending(&line("Starbucks Coffee", -500, BASE_MS))
        .await
        .unwrap();

    let report = engine.run_pass().await.unwrap();
    assert_eq!(report.matched, 1);

    let pending = store.get_pending(pending_id).await.unwrap();
    assert_eq!(pending.status, PendingStatus::Matched);
    assert_eq!(pending.matched_ledger_id, Some(ledger_id));

    // Confirmation is requested, not auto-posted.
    let requests = store.card_requests_pending(10).await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].kind, OutboxKind::BatchConfirm);
}

#[tokio::test]
async fn auto_post_mode_settles_without_confirmation() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(StoreOptions::at_dir(dir.path())).await.unwrap();
    let mut opts = options();
    opts.auto_post = true;
    let engine = MatchEngine::new(store.clone(), opts);

    posted(&store, "m-2", "Starbucks", -500, BASE_MS).await;
    let pending_id = store
        .insert_pending(&line("Starbucks", -500, BASE_MS))
        .await
        .unwrap();

    engine.run_pass().await.unwrap();
    let pending = store.get_pending(pending_id).await.unwrap();
    assert_eq!(pending.status, PendingStatus::Reconciled);
    assert!(store.card_requests_pending(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn outside_window_stays_unreconciled() {
    let (_dir, store, engine) = setup().await;
    posted(&store, "m-3", "Starbucks", -500, BASE_MS + 9 * DAY_MS).await;
    let pending_id = store
        .insert_pending(&line("Starbucks", -500, BASE_MS))
        .await
        .unwrap();

    let report = engine.run_pass().await.unwrap();
    assert_eq!(report.matched, 0);
    assert_eq!(
        store.get_pending(pending_id).await.unwrap().status,
        PendingStatus::Unreconciled
    );
}

#[tokio::test]
async fn dissimilar_counterparty_goes_to_review_band() {
    let (_dir, store, engine) = setup().await;
    posted(&store, "m-4", "Completely Different Trading Co", -500, BASE_MS).await;
    let pending_id = store
        .insert_pending(&line("某某商贸有限公司", -500, BASE_MS))
        .await
        .unwrap();

    let pending = store.get_pending(pending_id).await.unwrap();
    let decision = engine.match_one(&pending).await.unwrap();
    match decision {
        MatchDecision::Review { candidates } => {
            assert_eq!(candidates.len(), 1);
            assert!(candidates[0].1 < 0.90);
        }
        other => panic!("expected review band, got {other:?}"),
    }
}

#[tokio::test]
async fn stale_unmatched_lines_raise_evidence_requests_once() {
    let (_dir, store, engine) = setup().await;
    // A line inserted "three days ago" with no candidate at all.
    let id = store
        .insert_pending(&line("Mystery Vendor", -77, BASE_MS))
        .await
        .unwrap();
    // Age the row: inserted_at_ms is what the hunter looks at.
    sqlx::query("update pending_entries set inserted_at_ms = inserted_at_ms - 259200000 where id = $1")
        .bind(id)
        .execute(store.pool())
        .await
        .unwrap();

    let first = engine.run_pass().await.unwrap();
    assert_eq!(first.evidence_requests, 1);

    // A second pass does not duplicate the request.
    let second = engine.run_pass().await.unwrap();
    assert_eq!(second.evidence_requests, 0);

    let requests = store.card_requests_pending(10).await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].kind, OutboxKind::EvidenceRequest);
}

#[tokio::test]
async fn chain_break_freezes_appends_and_raises_critical() {
    let (_dir, store, engine) = setup().await;
    for i in 0..4 {
        posted(&store, &format!("c-{i}"), "V", -10 - i, BASE_MS).await;
    }

    assert!(engine.spot_check_chain(16).await.unwrap());

    sqlx::query("drop trigger trg_ledger_no_update")
        .execute(store.pool())
        .await
        .unwrap();
    sqlx::query("update ledger_entries set vendor = 'Mallory' where id = 2")
        .execute(store.pool())
        .await
        .unwrap();

    assert!(!engine.spot_check_chain(16).await.unwrap());
    assert!(store.appends_frozen().await.unwrap().is_some());

    let requests = store.card_requests_pending(10).await.unwrap();
    assert!(requests
        .iter()
        .any(|r| r.kind == OutboxKind::Critical
            && r.payload["alert"] == "ChainBreakDetected"
            && r.payload["entry_id"] == 2));
}
