//! A large invoice from an unknown vendor: L1 misses, the L2 loop reasons
//! to a category at modest confidence, the auditor parks it in review, the
//! bookkeeper confirms with a corrected category, and a manual rule now
//! serves future documents from that vendor without any external call.

use ldk_collector::{FileOutcome, OcrInvoice};
use ldk_interaction::sign_callback;
use ldk_schemas::{
    CallbackAction, CallbackRequest, DocumentRecord, EntryState, Micros, RuleState,
};
use ldk_testkit::{HarnessOptions, ScenarioHarness, TEST_SIGNING_KEY};

fn big_invoice() -> OcrInvoice {
    OcrInvoice {
        vendor: "Unseen Systems Ltd".to_string(),
        amount_raw: "-120000.00".to_string(),
        occurred_at_raw: "2026-01-05".to_string(),
        summary: "年度平台服务费".to_string(),
    }
}

/// Three-step reason-act script ending in a 0.72-confidence decision.
fn l2_script() -> Vec<&'static str> {
    vec![
        r#"{"action":"web_lookup","input":"Unseen Systems Ltd"}"#,
        r#"{"action":"web_lookup","input":"Unseen Systems business registry"}"#,
        r#"{"category":"6602","confidence":0.72}"#,
    ]
}

#[tokio::test]
async fn l2_review_confirm_and_learn_flow() {
    let h = ScenarioHarness::new(HarnessOptions::default(), big_invoice(), l2_script())
        .await
        .unwrap();

    let invoice = h.inbox().join("invoice.pdf");
    std::fs::write(&invoice, b"%PDF-1.7 scenario invoice").unwrap();
    assert_eq!(
        h.pipeline.process_file(&invoice, None).await,
        FileOutcome::Document
    );

    h.cycle().await.unwrap();

    // Three provider turns produced the reasoning graph.
    assert_eq!(h.provider.calls(), 3);

    let entry = h
        .store
        .list_entries_in_state(EntryState::NeedsReview, 10)
        .await
        .unwrap()
        .pop()
        .expect("entry parked for review");
    assert_eq!(entry.category, "6602");
    assert_eq!(entry.inference_log["engine"], "l2");
    let graph = entry.inference_log["l2_graph"].as_array().unwrap();
    assert_eq!(graph.len(), 3);

    // A review card was raised for it.
    let card = h
        .store
        .find_card_by_link(&format!("entry:{}", entry.id))
        .await
        .unwrap()
        .expect("review card");

    // The bookkeeper confirms with a corrected category.
    let ts = ldk_store::now_ms();
    let sig = sign_callback(TEST_SIGNING_KEY, &card.card_id, "CONFIRM", ts);
    h.hub
        .handle_callback(
            &CallbackRequest {
                card_id: card.card_id.clone(),
                action: CallbackAction::Confirm,
                extra_payload: Some(serde_json::json!({"category": "6603-01"})),
                ts,
            },
            &sig,
            Some("accountant"),
        )
        .await
        .unwrap();

    assert_eq!(
        h.store.get_entry(entry.id).await.unwrap().state,
        EntryState::Posted
    );

    // The correction became a stable manual rule.
    let rule = h
        .store
        .load_active_rules()
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.keyword == "Unseen Systems Ltd")
        .expect("manual rule learned");
    assert_eq!(rule.category, "6603-01");
    assert_eq!(rule.state, RuleState::Stable);

    // A later, smaller document from the same vendor classifies on the
    // rule's fast path: no further provider calls, direct POSTED.
    let doc = DocumentRecord {
        trace_id: "doc-followup".to_string(),
        content_hash: "h2".to_string(),
        source_path: "followup.pdf".to_string(),
        vendor: "Unseen Systems Ltd".to_string(),
        amount: Micros::from_units(-20_000),
        occurred_at_ms: 1_767_571_200_000,
        summary: "monthly fee".to_string(),
        group_id: None,
        project_id: None,
    };
    h.store
        .docjob_enqueue(&doc.trace_id, &serde_json::to_value(&doc).unwrap())
        .await
        .unwrap();
    h.cycle().await.unwrap();

    assert_eq!(h.provider.calls(), 3, "no extra external calls");
    let followup = h
        .store
        .get_entry_by_trace("doc-followup")
        .await
        .unwrap()
        .expect("follow-up entry");
    assert_eq!(followup.state, EntryState::Posted);
    assert_eq!(followup.category, "6603-01");
    assert_eq!(followup.matched_rule.as_deref(), Some(rule.rule_id.as_str()));
}
