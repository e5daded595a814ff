//! Auditor worker against a real store: approvals post and feed rule hits,
//! red lines reject and feed rule rejections, low confidence routes to
//! review, and locks are always released.

use std::sync::Arc;

use ldk_auditor::{engine_options, AuditorWorker, VotingStrategy};
use ldk_knowledge::{KnowledgeBridge, NewRuleFields};
use ldk_schemas::{EntryState, Micros, RuleSource, RuleState};
use ldk_store::{NewEntry, Store, StoreOptions};

async fn setup() -> (tempfile::TempDir, Store, Arc<KnowledgeBridge>, AuditorWorker) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(StoreOptions::at_dir(dir.path())).await.unwrap();
    let bridge = Arc::new(KnowledgeBridge::open(store.clone()).await.unwrap());
    let worker = AuditorWorker::new(
        store.clone(),
        Arc::clone(&bridge),
        engine_options(
            VotingStrategy::Balanced,
            vec!["奢侈品".to_string()],
            10_000,
            0.6,
            0.5,
            0.8,
        ),
    );
    (dir, store, bridge, worker)
}

fn entry(trace: &str, vendor: &str, category: &str, units: i64, confidence: f64) -> NewEntry {
    NewEntry {
        trace_id: trace.to_string(),
        amount: Micros::from_units(units),
        vendor: vendor.to_string(),
        category: category.to_string(),
        occurred_at_ms: 1_767_312_000_000,
        group_id: None,
        project_id: None,
        tenant_id: None,
        inference_log: serde_json::json!({
            "engine": "l1",
            "confidence": confidence,
            "requires_shadow_audit": false,
            "steps": [],
        }),
        matched_rule: None,
        state: EntryState::Proposed,
    }
}

#[tokio::test]
async fn clean_entry_posts_and_rule_gets_hit() {
    let (_dir, store, bridge, worker) = setup().await;

    let rule_id = bridge
        .learn(
            NewRuleFields {
                keyword: "Starbucks".to_string(),
                is_regex: false,
                amount_min: None,
                amount_max: None,
                vendor_pattern: None,
                category: "6601-02".to_string(),
                priority: 10,
            },
            RuleSource::L2,
        )
        .await
        .unwrap();

    let mut e = entry("a-1", "Starbucks", "6601-02", -500, 0.95);
    e.matched_rule = Some(rule_id.clone());
    let appended = store.append_entry(&e).await.unwrap();

    let settled = worker.audit_batch().await.unwrap();
    assert_eq!(settled, 1);

    let row = store.get_entry(appended.id).await.unwrap();
    assert_eq!(row.state, EntryState::Posted);
    assert!(row.lock_owner.is_none());

    let rule = store.get_rule(&rule_id).await.unwrap().unwrap();
    assert_eq!(rule.hit_count, 1);
    assert_eq!(rule.consecutive_success, 1);
}

#[tokio::test]
async fn red_line_rejects_and_gray_rule_gets_rejected() {
    let (_dir, store, bridge, worker) = setup().await;
    let rule_id = bridge
        .learn(
            NewRuleFields {
                keyword: "旅行".to_string(),
                is_regex: false,
                amount_min: None,
                amount_max: None,
                vendor_pattern: None,
                category: "6601-01".to_string(),
                priority: 0,
            },
            RuleSource::L2,
        )
        .await
        .unwrap();

    let mut e = entry("a-2", "奢侈品旅行社", "6601-01", -800, 0.9);
    e.matched_rule = Some(rule_id.clone());
    let appended = store.append_entry(&e).await.unwrap();

    worker.audit_batch().await.unwrap();

    let row = store.get_entry(appended.id).await.unwrap();
    assert_eq!(row.state, EntryState::Rejected);

    let rule = store.get_rule(&rule_id).await.unwrap().unwrap();
    assert_eq!(rule.reject_count, 1);
    assert_eq!(rule.state, RuleState::Gray);
}

#[tokio::test]
async fn big_unknown_invoice_goes_to_review() {
    let (_dir, store, _bridge, worker) = setup().await;

    // 50k sits between T1 (10k) and the extreme tier: the finance judge
    // fails without a veto, and the low L2 confidence drags the blend under
    // the review band.
    let e = entry("a-3", "Unseen Systems Ltd", "6602", -50_000, 0.2);
    let appended = store.append_entry(&e).await.unwrap();

    worker.audit_batch().await.unwrap();

    let row = store.get_entry(appended.id).await.unwrap();
    assert_eq!(row.state, EntryState::NeedsReview);
}

#[tokio::test]
async fn batch_settles_multiple_entries_and_releases_all_locks() {
    let (_dir, store, _bridge, worker) = setup().await;
    for i in 0..5 {
        store
            .append_entry(&entry(
                &format!("b-{i}"),
                "Vendor",
                "6601",
                -100 - i,
                0.9,
            ))
            .await
            .unwrap();
    }

    let settled = worker.audit_batch().await.unwrap();
    assert_eq!(settled, 5);

    for id in 1..=5 {
        let row = store.get_entry(id).await.unwrap();
        assert!(row.lock_owner.is_none());
        assert_ne!(row.state, EntryState::Proposed);
        assert_ne!(row.state, EntryState::Locking);
    }
}
