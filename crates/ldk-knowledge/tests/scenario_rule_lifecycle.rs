//! Rule lifecycle end-to-end against a real store: promotion after three
//! clean approvals, demotion after two rejections, manual rules entering
//! stable, and distillation protecting trusted rules.

use ldk_knowledge::{KnowledgeBridge, NewRuleFields};
use ldk_schemas::{Micros, RuleSource, RuleState};
use ldk_store::{Store, StoreOptions};

fn fields(keyword: &str, category: &str) -> NewRuleFields {
    NewRuleFields {
        keyword: keyword.to_string(),
        is_regex: false,
        amount_min: None,
        amount_max: None,
        vendor_pattern: None,
        category: category.to_string(),
        priority: 10,
    }
}

async fn bridge() -> (tempfile::TempDir, Store, KnowledgeBridge) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(StoreOptions::at_dir(dir.path())).await.unwrap();
    let bridge = KnowledgeBridge::open(store.clone()).await.unwrap();
    (dir, store, bridge)
}

#[tokio::test]
async fn grey_promotes_after_three_clean_approvals() {
    let (_dir, store, bridge) = bridge().await;

    let rule_id = bridge
        .learn(fields("starbucks", "6601-02"), RuleSource::L2)
        .await
        .unwrap();
    assert_eq!(
        store.get_rule(&rule_id).await.unwrap().unwrap().state,
        RuleState::Gray
    );

    for _ in 0..3 {
        bridge.record_hit(&rule_id).await.unwrap();
    }

    let rule = store.get_rule(&rule_id).await.unwrap().unwrap();
    assert_eq!(rule.state, RuleState::Stable);
    assert_eq!(rule.hit_count, 3);
    assert_eq!(rule.version, 2);

    // The refreshed snapshot serves it on the fast path.
    assert_eq!(
        bridge.rules().fast_lookup("Starbucks").unwrap().rule_id,
        rule_id
    );
}

#[tokio::test]
async fn two_rejects_demote_to_failed_and_leave_the_snapshot() {
    let (_dir, store, bridge) = bridge().await;
    let rule_id = bridge
        .learn(fields("mystery vendor", "6602"), RuleSource::L2)
        .await
        .unwrap();

    bridge.record_reject(&rule_id).await.unwrap();
    bridge.record_hit(&rule_id).await.unwrap();
    bridge.record_reject(&rule_id).await.unwrap();

    let rule = store.get_rule(&rule_id).await.unwrap().unwrap();
    assert_eq!(rule.state, RuleState::Failed);
    assert!(bridge.rules().fast_lookup("mystery vendor").is_none());
}

#[tokio::test]
async fn manual_learn_enters_stable_directly() {
    let (_dir, store, bridge) = bridge().await;
    let rule_id = bridge
        .learn(fields("consulting", "6603-01"), RuleSource::Manual)
        .await
        .unwrap();
    let rule = store.get_rule(&rule_id).await.unwrap().unwrap();
    assert_eq!(rule.state, RuleState::Stable);
    assert_eq!(rule.source, RuleSource::Manual);
}

#[tokio::test]
async fn distillation_removes_conflicting_grey_not_stable() {
    let (_dir, store, bridge) = bridge().await;

    let stable_id = bridge
        .learn(fields("cloud hosting", "6602"), RuleSource::Manual)
        .await
        .unwrap();
    // Conflicting grey: same keyword, different category. Learning it via
    // L2 against a trusted rule is refused outright.
    let err = bridge
        .learn(fields("cloud hosting", "6609"), RuleSource::L2)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("trusted"));

    // Plant the conflict directly (e.g. imported from an old rules file).
    let mut grey = store.get_rule(&stable_id).await.unwrap().unwrap();
    grey.rule_id = "r-imported-grey".to_string();
    grey.state = RuleState::Gray;
    grey.category = "6609".to_string();
    grey.source = RuleSource::L2;
    store.upsert_rule(&grey).await.unwrap();
    bridge.refresh().await.unwrap();

    let retired = bridge.distill().await.unwrap();
    assert_eq!(retired, vec!["r-imported-grey".to_string()]);

    // The stable rule survives; the grey one is stamped out of force.
    assert!(store
        .get_rule(&stable_id)
        .await
        .unwrap()
        .unwrap()
        .valid_until_ms
        .is_none());
    assert!(store
        .get_rule("r-imported-grey")
        .await
        .unwrap()
        .unwrap()
        .valid_until_ms
        .is_some());
}

#[tokio::test]
async fn learn_validates_account_code_and_regex() {
    let (_dir, _store, bridge) = bridge().await;

    assert!(bridge
        .learn(fields("bad code", "66-1"), RuleSource::Manual)
        .await
        .is_err());

    let mut f = fields("(unclosed", "6601");
    f.is_regex = true;
    assert!(bridge.learn(f, RuleSource::Manual).await.is_err());

    // Amount-conditioned rules round-trip.
    let mut f = fields("taxi", "6601-03");
    f.amount_min = Some(Micros::from_units(0));
    f.amount_max = Some(Micros::from_units(200));
    bridge.learn(f, RuleSource::Manual).await.unwrap();
}

#[tokio::test]
async fn rules_file_sync_writes_valid_rules_only() {
    let (dir, store, bridge) = bridge().await;
    bridge
        .learn(fields("coffee", "6601-02"), RuleSource::Manual)
        .await
        .unwrap();

    // Corrupt category planted directly cannot pass the sync gate.
    let mut bad = rule_by_keyword(&store, "coffee").await;
    bad.rule_id = "r-bad-code".to_string();
    bad.category = "not-a-code".to_string();
    store.upsert_rule(&bad).await.unwrap();

    let path = dir.path().join("rules.json");
    let written = bridge.sync_rules_file(&path).await.unwrap();
    assert_eq!(written, 1);

    let body = std::fs::read_to_string(&path).unwrap();
    assert!(body.contains("coffee"));
    assert!(!body.contains("not-a-code"));
}

/// Fetch the single active rule with a given keyword.
async fn rule_by_keyword(store: &Store, keyword: &str) -> ldk_store::RuleRow {
    store
        .load_active_rules()
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.keyword == keyword)
        .expect("rule present")
}
