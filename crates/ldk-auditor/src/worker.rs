//! Auditor worker: locks proposed entries, runs the decision engine, and
//! settles each entry into its post-audit state.
//!
//! State machine per entry:
//! `PROPOSED -> (locked) -> AUDITED -> POSTED` on approval,
//! `-> NEEDS_REVIEW` awaiting a card callback,
//! `-> RISK` posted but flagged,
//! `-> REJECTED` on veto or failed vote.
//! The advisory lock is released on every exit path.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{info, warn};

use ldk_knowledge::KnowledgeBridge;
use ldk_schemas::{EntryState, WorkerState};
use ldk_store::{LedgerEntryRow, Store, StoreError};

use crate::engine::{decide, AuditDecision, EngineOptions};
use crate::judges::AuditFacts;

/// Worker name used in heartbeats and lock ownership.
pub const WORKER_NAME: &str = "auditor";

const BATCH_SIZE: i64 = 16;
const HISTORY_DEPTH: i64 = 50;

/// The auditor worker.
pub struct AuditorWorker {
    store: Store,
    bridge: Arc<KnowledgeBridge>,
    opts: EngineOptions,
}

impl AuditorWorker {
    pub fn new(store: Store, bridge: Arc<KnowledgeBridge>, opts: EngineOptions) -> Self {
        Self {
            store,
            bridge,
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

        let mut tick = tokio::time::interval(Duration::from_secs(1));
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
                    if let Err(e) = self.audit_batch().await {
                        warn!(error = %e, "audit batch failed");
                    }
                    if let Err(e) = self
                        .store
                        .heartbeat(WORKER_NAME, WorkerState::Alive, None)
                        .await
                    {
                        warn!(error = %e, "auditor heartbeat failed");
                    }
                }
            }
        }

        // Release anything still held before the final heartbeat.
        if let Err(e) = self.store.release_all_locks_for(WORKER_NAME).await {
            warn!(error = %e, "lock release on shutdown failed");
        }
        self.store
            .heartbeat(WORKER_NAME, WorkerState::Dead, None)
            .await
            .context("final heartbeat")?;
        info!("auditor stopped");
        Ok(())
    }

    /// Audit one batch of proposed entries.
    pub async fn audit_batch(&self) -> Result<usize> {
        let proposed = self
            .store
            .list_entries_in_state(EntryState::Proposed, BATCH_SIZE)
            .await?;

        let mut settled = 0usize;
        for entry in proposed {
            match self.store.lock_entry(entry.id, WORKER_NAME).await {
                Ok(()) => {}
                Err(StoreError::Locked { .. }) => continue,
                Err(StoreError::BadState { .. }) => continue,
                Err(e) => return Err(e.into()),
            }

            if let Err(e) = self.audit_one(&entry).await {
                warn!(entry_id = entry.id, error = %e, "audit failed; unlocking");
                // Leave the entry PROPOSED for a later pass.
                let _ = self
                    .store
                    .release_lock(entry.id, WORKER_NAME, EntryState::Proposed)
                    .await;
                continue;
            }
            settled += 1;
        }
        Ok(settled)
    }

    /// Audit a single locked entry and settle its state.
    pub async fn audit_one(&self, entry: &LedgerEntryRow) -> Result<AuditDecision> {
        let shadow_audit = entry
            .inference_log
            .get("requires_shadow_audit")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let proposal_confidence = entry
            .inference_log
            .get("confidence")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);

        let facts = AuditFacts {
            vendor: entry.vendor.clone(),
            category: entry.category.clone(),
            amount: entry.amount,
            summary: entry
                .inference_log
                .get("steps")
                .map(|s| s.to_string())
                .unwrap_or_default(),
            proposal_confidence,
            shadow_audit,
        };

        let history = self
            .store
            .vendor_history(&entry.vendor, HISTORY_DEPTH)
            .await?;
        let now = Utc::now().timestamp_millis();
        let outcome = decide(&facts, &history, now, &self.opts);

        info!(
            entry_id = entry.id,
            decision = ?outcome.decision,
            confidence = outcome.confidence,
            risk_points = outcome.risk_points,
            "audit decision"
        );

        match outcome.decision {
            AuditDecision::Approved => {
                self.store
                    .release_lock(entry.id, WORKER_NAME, EntryState::Audited)
                    .await?;
                self.store
                    .transition_entry(entry.id, EntryState::Audited, EntryState::Posted)
                    .await?;
                if let Some(rule_id) = &entry.matched_rule {
                    self.bridge.record_hit(rule_id).await?;
                }
            }
            AuditDecision::ApprovedWithRisk => {
                self.store
                    .release_lock(entry.id, WORKER_NAME, EntryState::Risk)
                    .await?;
                if let Some(rule_id) = &entry.matched_rule {
                    self.bridge.record_hit(rule_id).await?;
                }
            }
            AuditDecision::NeedsReview => {
                self.store
                    .release_lock(entry.id, WORKER_NAME, EntryState::NeedsReview)
                    .await?;
            }
            AuditDecision::Rejected => {
                self.store
                    .release_lock(entry.id, WORKER_NAME, EntryState::Rejected)
                    .await?;
                if let Some(rule_id) = &entry.matched_rule {
                    self.bridge.record_reject(rule_id).await?;
                }
            }
        }

        Ok(outcome.decision)
    }
}
