//! The interaction hub: card lifecycle and the callback contract.
//!
//! Callback verification order is fixed and fully checked before any state
//! changes: signature, card existence, expiry, monotonic status transition,
//! role authorization, replay (timestamp window plus the one-shot marker).
//! Only then does the action execute, and the card completes atomically via
//! the consumption marker.

use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};

use ldk_knowledge::{KnowledgeBridge, NewRuleFields};
use ldk_schemas::{
    CallbackAction, CallbackRequest, CardButton, CardEnvelope, CardStatus, EntryState, OutboxKind,
};
use ldk_store::{CardRow, Store};

use crate::token::{mint_card_token, verify_callback};

/// Errors surfaced by `handle_callback`, mapped onto HTTP statuses by the
/// webhook route (403 / 404 / 409 / 500).
#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("signature invalid")]
    SignatureInvalid,

    #[error("no such card")]
    UnknownCard,

    #[error("card expired")]
    Expired,

    #[error("callback timestamp outside replay window")]
    Stale,

    #[error("card already consumed")]
    Replayed,

    #[error("illegal card status transition")]
    BadTransition,

    #[error("role not authorized for this card")]
    RoleDenied,

    #[error("callback action failed: {0}")]
    Internal(String),
}

/// Hub configuration.
#[derive(Clone, Debug)]
pub struct HubOptions {
    /// Card validity, seconds.
    pub card_ttl_s: i64,
    /// Accepted |now - ts| skew on callbacks, seconds.
    pub replay_window_s: i64,
}

/// The interaction hub service. Shared by the webhook route and the hub
/// worker; all state lives in the store.
pub struct InteractionHub {
    store: Store,
    bridge: std::sync::Arc<KnowledgeBridge>,
    signing_key: String,
    opts: HubOptions,
}

/// A freshly created card plus its signed token.
#[derive(Clone, Debug)]
pub struct CreatedCard {
    pub card_id: String,
    pub token: String,
    pub envelope: CardEnvelope,
}

impl InteractionHub {
    pub fn new(
        store: Store,
        bridge: std::sync::Arc<KnowledgeBridge>,
        signing_key: String,
        opts: HubOptions,
    ) -> Self {
        Self {
            store,
            bridge,
            signing_key,
            opts,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Card creation
    // -----------------------------------------------------------------------

    /// Create a card, persist it, and enqueue its outbound envelope. The
    /// only path that enqueues outbox events.
    pub async fn create_card(
        &self,
        kind: OutboxKind,
        title: &str,
        body: &str,
        payload: &Value,
        required_role: &str,
        trace_id: &str,
        linked_entity_ref: Option<&str>,
    ) -> anyhow::Result<CreatedCard> {
        let card_id = format!("card-{}", uuid::Uuid::new_v4());
        let expires_at_ms =
            ldk_store::now_ms() + self.opts.card_ttl_s * 1_000;
        let token = mint_card_token(&self.signing_key, &card_id, kind.as_str(), expires_at_ms);

        self.store
            .insert_card(
                &card_id,
                kind.as_str(),
                payload,
                required_role,
                expires_at_ms,
                linked_entity_ref,
            )
            .await?;

        let envelope = CardEnvelope {
            kind: kind.as_str().to_string(),
            title: title.to_string(),
            body: body.to_string(),
            fields: Some(payload.clone()),
            image_refs: None,
            buttons: vec![
                CardButton {
                    action: "CONFIRM".to_string(),
                    value: token.clone(),
                },
                CardButton {
                    action: "REJECT".to_string(),
                    value: token.clone(),
                },
            ],
            metadata: ldk_schemas::document::CardMetadata {
                trace_id: trace_id.to_string(),
                required_role: required_role.to_string(),
            },
        };

        self.store
            .outbox_enqueue(
                kind,
                &serde_json::to_value(&envelope)?,
                Some(trace_id),
            )
            .await?;

        info!(card_id = %card_id, kind = kind.as_str(), "card created");
        Ok(CreatedCard {
            card_id,
            token,
            envelope,
        })
    }

    // -----------------------------------------------------------------------
    // Callback handling
    // -----------------------------------------------------------------------

    /// Verify and execute one webhook callback.
    pub async fn handle_callback(
        &self,
        req: &CallbackRequest,
        signature_hex: &str,
        caller_role: Option<&str>,
    ) -> Result<(), CallbackError> {
        // 1) Signature over card_id|action|ts.
        if !verify_callback(
            &self.signing_key,
            &req.card_id,
            req.action.as_str(),
            req.ts,
            signature_hex,
        ) {
            return Err(CallbackError::SignatureInvalid);
        }

        let card = self
            .store
            .get_card(&req.card_id)
            .await
            .map_err(|e| CallbackError::Internal(e.to_string()))?
            .ok_or(CallbackError::UnknownCard)?;

        let now = ldk_store::now_ms();

        // 2) Expiry.
        if now > card.expires_at_ms || card.status == CardStatus::Expired {
            return Err(CallbackError::Expired);
        }

        // 3) Replay window on the sender timestamp.
        if (now - req.ts).abs() > self.opts.replay_window_s * 1_000 {
            return Err(CallbackError::Stale);
        }

        // 4) Monotonic status transition.
        let next = match card.status {
            CardStatus::Sent => CardStatus::Clicked,
            CardStatus::Clicked => CardStatus::Clicked,
            _ => return Err(CallbackError::BadTransition),
        };

        // 5) Role authorization.
        if card.required_role != "any" {
            match caller_role {
                Some(role) if role == card.required_role => {}
                _ => return Err(CallbackError::RoleDenied),
            }
        }

        // 6) One-shot marker: exactly one callback executes per card.
        let fresh = self
            .store
            .consume_card(&req.card_id)
            .await
            .map_err(|e| CallbackError::Internal(e.to_string()))?;
        if !fresh {
            return Err(CallbackError::Replayed);
        }

        if card.status == CardStatus::Sent {
            let _ = self
                .store
                .set_card_status(&req.card_id, CardStatus::Sent, next)
                .await;
        }

        // Execute, then complete.
        let result = self.execute_action(&card, req).await;
        match result {
            Ok(()) => {
                let _ = self
                    .store
                    .set_card_status(&req.card_id, CardStatus::Clicked, CardStatus::Completed)
                    .await;
                Ok(())
            }
            Err(e) => {
                warn!(card_id = %req.card_id, error = %e, "callback action failed");
                Err(e)
            }
        }
    }

    /// Dispatch a verified callback to its downstream effect.
    async fn execute_action(
        &self,
        card: &CardRow,
        req: &CallbackRequest,
    ) -> Result<(), CallbackError> {
        let internal = |e: ldk_store::StoreError| CallbackError::Internal(e.to_string());

        match req.action {
            CallbackAction::Confirm => {
                let Some(entry_id) = linked_entry_id(card) else {
                    return Err(CallbackError::Internal(
                        "card has no linked entry".to_string(),
                    ));
                };
                let entry = self.store.get_entry(entry_id).await.map_err(internal)?;

                // A corrected category in the payload becomes a manual rule;
                // the entry posts under it.
                let corrected = req
                    .extra_payload
                    .as_ref()
                    .and_then(|p| p.get("category"))
                    .and_then(Value::as_str);
                if let Some(category) = corrected {
                    self.bridge
                        .learn(
                            NewRuleFields {
                                keyword: entry.vendor.clone(),
                                is_regex: false,
                                amount_min: None,
                                amount_max: None,
                                vendor_pattern: None,
                                category: category.to_string(),
                                priority: 50,
                            },
                            ldk_schemas::RuleSource::Manual,
                        )
                        .await
                        .map_err(|e| CallbackError::Internal(e.to_string()))?;
                }

                self.store
                    .transition_entry(entry_id, EntryState::NeedsReview, EntryState::Posted)
                    .await
                    .map_err(internal)?;
                info!(entry_id, "review confirmed; entry posted");
                Ok(())
            }
            CallbackAction::Reject => {
                let Some(entry_id) = linked_entry_id(card) else {
                    return Err(CallbackError::Internal(
                        "card has no linked entry".to_string(),
                    ));
                };
                self.store
                    .transition_entry(entry_id, EntryState::NeedsReview, EntryState::Rejected)
                    .await
                    .map_err(internal)?;
                info!(entry_id, "review rejected");
                Ok(())
            }
            CallbackAction::BatchConfirm => {
                let ids: Vec<i64> = req
                    .extra_payload
                    .as_ref()
                    .and_then(|p| p.get("pending_ids"))
                    .and_then(Value::as_array)
                    .map(|a| a.iter().filter_map(Value::as_i64).collect())
                    .or_else(|| {
                        card.payload
                            .get("pending_id")
                            .and_then(Value::as_i64)
                            .map(|id| vec![id])
                    })
                    .unwrap_or_default();
                if ids.is_empty() {
                    return Err(CallbackError::Internal(
                        "batch confirm without pending ids".to_string(),
                    ));
                }
                let settled = self
                    .store
                    .settle_matched_batch(&ids)
                    .await
                    .map_err(internal)?;
                info!(settled, "batch reconciliation confirmed");
                Ok(())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Review-card scan
    // -----------------------------------------------------------------------

    /// Raise review cards for NEEDS_REVIEW entries that have none yet.
    pub async fn raise_review_cards(&self) -> anyhow::Result<usize> {
        let entries = self
            .store
            .list_entries_in_state(EntryState::NeedsReview, 20)
            .await?;
        let mut raised = 0usize;
        for entry in entries {
            let link = format!("entry:{}", entry.id);
            if self.store.card_request_exists(&link).await? {
                continue;
            }
            // Mark the scan through the request queue so restarts do not
            // double-raise, then create the card directly.
            self.store
                .card_request_enqueue(
                    OutboxKind::PushCard,
                    &json!({"entry_id": entry.id}),
                    Some(&link),
                )
                .await?;
            self.create_card(
                OutboxKind::PushCard,
                "记账待复核",
                &format!(
                    "{} {} -> {} (confidence low or review required)",
                    entry.vendor, entry.amount, entry.category
                ),
                &json!({
                    "entry_id": entry.id,
                    "vendor": entry.vendor,
                    "amount": entry.amount,
                    "category": entry.category,
                }),
                "accountant",
                &entry.trace_id,
                Some(&link),
            )
            .await?;
            raised += 1;
        }
        Ok(raised)
    }

    /// Expire overdue cards (maintenance cadence).
    pub async fn expire_cards(&self) -> anyhow::Result<u64> {
        Ok(self.store.expire_stale_cards().await?)
    }
}

/// Extract the linked ledger entry id from a card's reference
/// (`entry:<id>`) or payload.
fn linked_entry_id(card: &CardRow) -> Option<i64> {
    if let Some(link) = &card.linked_entity_ref {
        if let Some(raw) = link.strip_prefix("entry:") {
            if let Ok(id) = raw.parse() {
                return Some(id);
            }
        }
    }
    card.payload.get("entry_id").and_then(Value::as_i64)
}
