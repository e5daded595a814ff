//! Webhook callback contract over the real router: bad signatures change
//! nothing (403), valid callbacks execute exactly once (replay -> 409),
//! stale timestamps are refused, and role authorization is enforced.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use ldk_interaction::{
    callback_router, sign_callback, HubOptions, InteractionHub, ROLE_HEADER, SIGNATURE_HEADER,
};
use ldk_knowledge::KnowledgeBridge;
use ldk_schemas::{CardStatus, EntryState, Micros, OutboxKind, PendingSource, PendingStatus};
use ldk_store::{NewEntry, NewPendingEntry, Store, StoreOptions};

const KEY: &str = "per-deployment-secret";

struct Fixture {
    _dir: tempfile::TempDir,
    store: Store,
    hub: Arc<InteractionHub>,
    entry_id: i64,
    card_id: String,
}

async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(StoreOptions::at_dir(dir.path())).await.unwrap();
    let bridge = Arc::new(KnowledgeBridge::open(store.clone()).await.unwrap());
    let hub = Arc::new(InteractionHub::new(
        store.clone(),
        bridge,
        KEY.to_string(),
        HubOptions {
            card_ttl_s: 3_600,
            replay_window_s: 60,
        },
    ));

    // One entry parked in NEEDS_REVIEW with its card.
    let appended = store
        .append_entry(&NewEntry {
            trace_id: "w-1".to_string(),
            amount: Micros::from_units(-120_000),
            vendor: "Unseen Systems Ltd".to_string(),
            category: "6602".to_string(),
            occurred_at_ms: 1_767_312_000_000,
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
        .transition_entry(appended.id, EntryState::Proposed, EntryState::NeedsReview)
        .await
        .unwrap();

    let card = hub
        .create_card(
            OutboxKind::PushCard,
            "review",
            "body",
            &serde_json::json!({"entry_id": appended.id}),
            "accountant",
            "w-1",
            Some(&format!("entry:{}", appended.id)),
        )
        .await
        .unwrap();

    Fixture {
        _dir: dir,
        store,
        hub,
        entry_id: appended.id,
        card_id: card.card_id,
    }
}

async fn post_callback(
    hub: Arc<InteractionHub>,
    card_id: &str,
    action: &str,
    ts: i64,
    signature: &str,
    role: Option<&str>,
    extra: Option<serde_json::Value>,
) -> StatusCode {
    let app = callback_router(hub);
    let mut body = serde_json::json!({
        "card_id": card_id,
        "action": action,
        "ts": ts,
    });
    if let Some(extra) = extra {
        body["extra_payload"] = extra;
    }

    let mut builder = Request::builder()
        .method("POST")
        .uri("/v1/callback")
        .header("content-type", "application/json")
        .header(SIGNATURE_HEADER, signature);
    if let Some(role) = role {
        builder = builder.header(ROLE_HEADER, role);
    }
    let request = builder.body(Body::from(body.to_string())).unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    // Drain the body so the connection teardown is clean.
    let _ = response.into_body().collect().await;
    status
}

#[tokio::test]
async fn bad_signature_returns_403_and_changes_nothing() {
    let f = fixture().await;
    let ts = ldk_store::now_ms();

    let status = post_callback(
        Arc::clone(&f.hub),
        &f.card_id,
        "CONFIRM",
        ts,
        "deadbeef",
        Some("accountant"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let entry = f.store.get_entry(f.entry_id).await.unwrap();
    assert_eq!(entry.state, EntryState::NeedsReview);
    let card = f.store.get_card(&f.card_id).await.unwrap().unwrap();
    assert_eq!(card.status, CardStatus::Sent);
    assert!(!card.consumed);
}

#[tokio::test]
async fn valid_confirm_executes_once_and_replay_conflicts() {
    let f = fixture().await;
    let ts = ldk_store::now_ms();
    let sig = sign_callback(KEY, &f.card_id, "CONFIRM", ts);

    let status = post_callback(
        Arc::clone(&f.hub),
        &f.card_id,
        "CONFIRM",
        ts,
        &sig,
        Some("accountant"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        f.store.get_entry(f.entry_id).await.unwrap().state,
        EntryState::Posted
    );
    assert_eq!(
        f.store.get_card(&f.card_id).await.unwrap().unwrap().status,
        CardStatus::Completed
    );

    // Exact same signed request again: the one-shot marker refuses it.
    let replay = post_callback(
        Arc::clone(&f.hub),
        &f.card_id,
        "CONFIRM",
        ts,
        &sig,
        Some("accountant"),
        None,
    )
    .await;
    assert_eq!(replay, StatusCode::CONFLICT);
    // Still posted exactly once.
    assert_eq!(
        f.store.get_entry(f.entry_id).await.unwrap().state,
        EntryState::Posted
    );
}

#[tokio::test]
async fn stale_timestamp_conflicts() {
    let f = fixture().await;
    let ts = ldk_store::now_ms() - 120_000; // two minutes old, window is 60s
    let sig = sign_callback(KEY, &f.card_id, "CONFIRM", ts);
    let status = post_callback(
        Arc::clone(&f.hub),
        &f.card_id,
        "CONFIRM",
        ts,
        &sig,
        Some("accountant"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn wrong_role_is_forbidden() {
    let f = fixture().await;
    let ts = ldk_store::now_ms();
    let sig = sign_callback(KEY, &f.card_id, "REJECT", ts);
    let status = post_callback(
        Arc::clone(&f.hub),
        &f.card_id,
        "REJECT",
        ts,
        &sig,
        Some("intern"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(
        f.store.get_entry(f.entry_id).await.unwrap().state,
        EntryState::NeedsReview
    );
}

#[tokio::test]
async fn reject_marks_entry_rejected() {
    let f = fixture().await;
    let ts = ldk_store::now_ms();
    let sig = sign_callback(KEY, &f.card_id, "REJECT", ts);
    let status = post_callback(
        Arc::clone(&f.hub),
        &f.card_id,
        "REJECT",
        ts,
        &sig,
        Some("accountant"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        f.store.get_entry(f.entry_id).await.unwrap().state,
        EntryState::Rejected
    );
}

#[tokio::test]
async fn confirm_with_correction_learns_manual_rule() {
    let f = fixture().await;
    let ts = ldk_store::now_ms();
    let sig = sign_callback(KEY, &f.card_id, "CONFIRM", ts);
    let status = post_callback(
        Arc::clone(&f.hub),
        &f.card_id,
        "CONFIRM",
        ts,
        &sig,
        Some("accountant"),
        Some(serde_json::json!({"category": "6603-01"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let rules = f.store.load_active_rules().await.unwrap();
    let learned = rules
        .iter()
        .find(|r| r.keyword == "Unseen Systems Ltd")
        .expect("manual rule learned");
    assert_eq!(learned.category, "6603-01");
    assert_eq!(learned.state, ldk_schemas::RuleState::Stable);
}

#[tokio::test]
async fn batch_confirm_settles_matched_rows() {
    let f = fixture().await;

    // A MATCHED pending row linked to the posted entry.
    let pending_id = f
        .store
        .insert_pending(&NewPendingEntry {
            source: PendingSource::Alipay,
            counterparty: "Unseen Systems".to_string(),
            amount: Micros::from_units(-120_000),
            occurred_at_ms: 1_767_312_000_000,
            description: String::new(),
        })
        .await
        .unwrap();
    f.store
        .mark_pending_matched(pending_id, f.entry_id)
        .await
        .unwrap();

    let card = f
        .hub
        .create_card(
            OutboxKind::BatchConfirm,
            "batch",
            "confirm",
            &serde_json::json!({"pending_id": pending_id}),
            "any",
            "w-1",
            None,
        )
        .await
        .unwrap();

    let ts = ldk_store::now_ms();
    let sig = sign_callback(KEY, &card.card_id, "BATCH_CONFIRM", ts);
    let status = post_callback(
        Arc::clone(&f.hub),
        &card.card_id,
        "BATCH_CONFIRM",
        ts,
        &sig,
        None,
        Some(serde_json::json!({"pending_ids": [pending_id]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        f.store.get_pending(pending_id).await.unwrap().status,
        PendingStatus::Reconciled
    );
}
