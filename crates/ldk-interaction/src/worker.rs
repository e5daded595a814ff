//! Interaction hub worker: card-request consumption plus outbox dispatch.
//!
//! The dispatch loop consumes PENDING outbox events, renders the envelope
//! for the configured channel, POSTs it through the egress proxy (so even
//! notification payloads cannot leave unsanitized), and settles
//! ACK/failure with backoff. Depth beyond the alert threshold raises one
//! self-monitoring CRITICAL event per crossing.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{info, warn};

use ldk_privacy::EgressProxy;
use ldk_schemas::{OutboxKind, TraceContext, WorkerState};
use ldk_store::Store;

use crate::hub::InteractionHub;

/// Worker name used in heartbeats.
pub const WORKER_NAME: &str = "interaction";

/// Dispatcher tuning.
#[derive(Clone, Debug)]
pub struct DispatchOptions {
    pub poll_s: u64,
    pub backlog_alert: i64,
    pub max_attempts: i64,
    pub backoff_base_ms: u64,
    /// Outbound channel endpoint; `None` acknowledges locally (offline /
    /// test deployments).
    pub channel_url: Option<String>,
}

/// The interaction worker.
pub struct InteractionWorker {
    store: Store,
    hub: Arc<InteractionHub>,
    proxy: EgressProxy,
    opts: DispatchOptions,
}

impl InteractionWorker {
    pub fn new(
        store: Store,
        hub: Arc<InteractionHub>,
        proxy: EgressProxy,
        opts: DispatchOptions,
    ) -> Self {
        Self {
            store,
            hub,
            proxy,
            opts,
        }
    }

    pub async fn run(
        self,
        mut shutdown: watch::Receiver<bool>,
        mut probe: mpsc::Receiver<oneshot::Sender<()>>,
    ) -> Result<()> {
        self.store
            .heartbeat(WORKER_NAME, WorkerState::Alive, None)
            .await
            .context("initial heartbeat")?;

        // Crash recovery: SENT-but-unACKed events re-deliver.
        let recovered = self.store.outbox_recover_stuck_sent(60_000).await?;
        if recovered > 0 {
            info!(recovered, "re-driving outbox events stuck in SENT");
        }

        let mut backlog_alerted = false;
        let mut tick = tokio::time::interval(Duration::from_secs(self.opts.poll_s.max(1)));
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                Some(reply) = probe.recv() => {
                    let _ = reply.send(());
                }
                _ = tick.tick() => {
                    if let Err(e) = self.consume_card_requests().await {
                        warn!(error = %e, "card request consumption failed");
                    }
                    if let Err(e) = self.hub.raise_review_cards().await {
                        warn!(error = %e, "review card scan failed");
                    }
                    if let Err(e) = self.dispatch_due().await {
                        warn!(error = %e, "outbox dispatch failed");
                    }
                    if let Err(e) = self.check_backlog(&mut backlog_alerted).await {
                        warn!(error = %e, "backlog check failed");
                    }
                    if let Err(e) = self.hub.expire_cards().await {
                        warn!(error = %e, "card expiry sweep failed");
                    }
                    if let Err(e) = self
                        .store
                        .heartbeat(WORKER_NAME, WorkerState::Alive, None)
                        .await
                    {
                        warn!(error = %e, "interaction heartbeat failed");
                    }
                }
            }
        }

        self.store
            .heartbeat(WORKER_NAME, WorkerState::Dead, None)
            .await
            .context("final heartbeat")?;
        info!("interaction hub stopped");
        Ok(())
    }

    /// Turn queued worker requests into cards / direct events.
    pub async fn consume_card_requests(&self) -> Result<usize> {
        let requests = self.store.card_requests_pending(20).await?;
        let mut consumed = 0usize;
        for req in requests {
            match req.kind {
                // Alerts and evidence requests go straight to the outbox.
                OutboxKind::Critical | OutboxKind::EvidenceRequest => {
                    self.store
                        .outbox_enqueue(req.kind, &req.payload, None)
                        .await?;
                }
                OutboxKind::BatchConfirm => {
                    self.hub
                        .create_card(
                            OutboxKind::BatchConfirm,
                            "对账确认",
                            "确认匹配的银行流水与账目",
                            &req.payload,
                            "accountant",
                            req.payload
                                .get("pending_id")
                                .map(|v| v.to_string())
                                .unwrap_or_default()
                                .as_str(),
                            req.linked_entity_ref.as_deref(),
                        )
                        .await?;
                }
                OutboxKind::PushCard => {
                    // Review-card scans pre-insert their own requests as
                    // idempotency markers; cards for those are created by
                    // the scanner itself.
                    let is_marker = req
                        .linked_entity_ref
                        .as_deref()
                        .map(|l| l.starts_with("entry:"))
                        .unwrap_or(false);
                    if !is_marker {
                        self.hub
                            .create_card(
                                OutboxKind::PushCard,
                                "候选匹配复核",
                                "请从候选账目中选择",
                                &req.payload,
                                "accountant",
                                "",
                                req.linked_entity_ref.as_deref(),
                            )
                            .await?;
                    }
                }
            }
            self.store.card_request_done(req.request_id).await?;
            consumed += 1;
        }
        Ok(consumed)
    }

    /// Dispatch due outbox events to the channel.
    pub async fn dispatch_due(&self) -> Result<usize> {
        let due = self.store.outbox_due(10).await?;
        let mut dispatched = 0usize;

        for event in due {
            if !self.store.outbox_mark_sent(&event.event_id).await? {
                continue;
            }

            let outcome = match &self.opts.channel_url {
                None => {
                    // No channel configured: log-and-ack keeps offline
                    // deployments from accumulating backlog.
                    info!(event_id = %event.event_id, kind = event.kind.as_str(),
                          "outbox event (no channel configured)");
                    Ok(())
                }
                Some(url) => {
                    let ctx = TraceContext::resume(
                        event.trace_id.clone().unwrap_or_default(),
                        WORKER_NAME,
                    );
                    let rendered = render_for_channel(&event.kind, &event.payload);
                    self.proxy
                        .post_json(&ctx, url, &rendered, None)
                        .await
                        .map(|_| ())
                }
            };

            match outcome {
                Ok(()) => {
                    self.store.outbox_mark_ack(&event.event_id).await?;
                    dispatched += 1;
                }
                Err(e) => {
                    // Back to PENDING (or FAILED at the cap) with backoff.
                    let status = self
                        .store
                        .outbox_mark_failure(
                            &event.event_id,
                            &e.to_string(),
                            self.opts.max_attempts,
                            self.opts.backoff_base_ms,
                        )
                        .await?;
                    warn!(event_id = %event.event_id, status = status.as_str(),
                          error = %e, "outbox delivery failed");
                }
            }
        }
        Ok(dispatched)
    }

    async fn check_backlog(&self, alerted: &mut bool) -> Result<()> {
        let depth = self.store.outbox_depth().await?;
        if depth > self.opts.backlog_alert && !*alerted {
            *alerted = true;
            self.store
                .outbox_enqueue(
                    OutboxKind::Critical,
                    &json!({"alert": "OutboxBacklog", "depth": depth}),
                    None,
                )
                .await?;
            warn!(depth, "outbox backlog above threshold");
        } else if depth <= self.opts.backlog_alert {
            *alerted = false;
        }
        Ok(())
    }
}

/// Render the channel JSON for one event. Envelopes (PUSH_CARD /
/// BATCH_CONFIRM) pass through; bare alerts get a minimal wrapper.
pub fn render_for_channel(kind: &OutboxKind, payload: &serde_json::Value) -> serde_json::Value {
    match kind {
        OutboxKind::PushCard | OutboxKind::BatchConfirm => payload.clone(),
        OutboxKind::EvidenceRequest => json!({
            "kind": "EVIDENCE_REQUEST",
            "title": "缺少凭证",
            "body": payload,
            "buttons": [],
        }),
        OutboxKind::Critical => json!({
            "kind": "CRITICAL",
            "title": "系统告警",
            "body": payload,
            "buttons": [],
        }),
    }
}
