//! A statement drop produces shadow rows; a receipt for one of them flows
//! through classification and audit to POSTED, reconciles against the
//! statement line, and raises a confirmation card.

use ldk_collector::{FileOutcome, OcrInvoice};
use ldk_interaction::sign_callback;
use ldk_schemas::{
    CallbackAction, CallbackRequest, EntryState, Micros, OutboxKind, PendingSource,
    PendingStatus, RuleSource,
};
use ldk_testkit::{HarnessOptions, ScenarioHarness, TEST_SIGNING_KEY};

const ALIPAY_CSV: &str = "\
支付宝业务明细查询\n\
业务流水号,交易时间,交易对方,金额,收/支,商品说明\n\
2026010200001,2026-01-02 09:15:00,Starbucks,500.00,支出,拿铁\n\
2026010200002,2026-01-02 14:30:00,ACME Cloud Inc.,4980.00,支出,云服务年费\n";

fn starbucks_receipt() -> OcrInvoice {
    OcrInvoice {
        vendor: "Starbucks".to_string(),
        amount_raw: "-500.00".to_string(),
        occurred_at_raw: "2026-01-02 09:20:00".to_string(),
        summary: "拿铁 x2".to_string(),
    }
}

#[tokio::test]
async fn statement_drop_yields_two_pending_entries() {
    let h = ScenarioHarness::new(HarnessOptions::default(), starbucks_receipt(), vec![])
        .await
        .unwrap();

    let file = h.inbox().join("alipay-2026-01.csv");
    std::fs::write(&file, ALIPAY_CSV).unwrap();
    let outcome = h.pipeline.process_file(&file, None).await;
    assert_eq!(
        outcome,
        FileOutcome::Parsed {
            rows: 2,
            skipped: 0
        }
    );

    let rows = h
        .store
        .list_pending_page(PendingStatus::Unreconciled, 10, 0)
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].amount, Micros::from_units(-500));
    assert_eq!(rows[0].source, PendingSource::Alipay);
    assert_eq!(rows[1].amount, Micros::from_units(-4_980));
    assert_eq!(rows[1].counterparty, "ACME Cloud Inc.");
}

#[tokio::test]
async fn receipt_posts_matches_and_raises_confirmation() {
    let h = ScenarioHarness::new(HarnessOptions::default(), starbucks_receipt(), vec![])
        .await
        .unwrap();

    // Stable rule taught by the bookkeeper long ago.
    h.bridge
        .learn(
            ldk_knowledge::NewRuleFields {
                keyword: "Starbucks".to_string(),
                is_regex: false,
                amount_min: None,
                amount_max: None,
                vendor_pattern: None,
                category: "6601-02".to_string(),
                priority: 10,
            },
            RuleSource::Manual,
        )
        .await
        .unwrap();

    // The statement line and the receipt capture.
    let statement = h.inbox().join("alipay.csv");
    std::fs::write(&statement, ALIPAY_CSV).unwrap();
    h.pipeline.process_file(&statement, None).await;

    let receipt = h.inbox().join("receipt.jpg");
    std::fs::write(&receipt, [0xFF, 0xD8, 0xFF, 0xE0, 0x01]).unwrap();
    assert_eq!(
        h.pipeline.process_file(&receipt, None).await,
        FileOutcome::Document
    );

    h.cycle().await.unwrap();

    // Classified by the stable rule at high confidence and POSTED.
    let entry = h
        .store
        .list_entries_in_state(EntryState::Posted, 10)
        .await
        .unwrap()
        .pop()
        .expect("posted entry");
    assert_eq!(entry.vendor, "Starbucks");
    assert_eq!(entry.category, "6601-02");
    assert!(entry.matched_rule.is_some());
    let confidence = entry.inference_log["confidence"].as_f64().unwrap();
    assert!(confidence >= 0.9);

    // Reconciled against the Starbucks line; the ACME line stays open.
    let matched = h.store.get_pending(1).await.unwrap();
    assert_eq!(matched.status, PendingStatus::Matched);
    assert_eq!(matched.matched_ledger_id, Some(entry.id));
    assert_eq!(
        h.store.get_pending(2).await.unwrap().status,
        PendingStatus::Unreconciled
    );

    // A BATCH_CONFIRM card went out through the outbox.
    let events = h
        .store
        .outbox_list_kind(OutboxKind::BatchConfirm, 10)
        .await
        .unwrap();
    assert_eq!(events.len(), 1);

    // One-click confirmation settles the pending row.
    let card = h
        .store
        .find_card_by_link("pending:1")
        .await
        .unwrap()
        .expect("confirmation card");
    let ts = ldk_store::now_ms();
    let sig = sign_callback(TEST_SIGNING_KEY, &card.card_id, "BATCH_CONFIRM", ts);
    h.hub
        .handle_callback(
            &CallbackRequest {
                card_id: card.card_id.clone(),
                action: CallbackAction::BatchConfirm,
                extra_payload: Some(serde_json::json!({"pending_ids": [1]})),
                ts,
            },
            &sig,
            Some("accountant"),
        )
        .await
        .unwrap();
    assert_eq!(
        h.store.get_pending(1).await.unwrap().status,
        PendingStatus::Reconciled
    );
}
