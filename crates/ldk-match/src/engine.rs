//! The reconciliation engine.
//!
//! Walks `pending_entries` in pages (bounded, heartbeat per batch), selects
//! POSTED candidates by amount tolerance and time window, scores each pair,
//! and settles decisions:
//! - score >= auto threshold: MATCHED (+ confirmation card request; posts
//!   immediately only when auto-post is configured);
//! - intermediate band: candidate set surfaced via a batch card request;
//! - below band: stays UNRECONCILED.
//!
//! A Bloom pre-filter over amount buckets suppresses candidate queries for
//! the majority of unmatched lines.

use bloomfilter::Bloom;
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use ldk_schemas::{Micros, OutboxKind, PendingStatus};
use ldk_store::{LedgerEntryRow, PendingEntryRow, Store};

use crate::score::{amount_score, combined_score, name_similarity, time_score};

/// Engine tuning (mapped from `match.*` config by the daemon).
#[derive(Clone, Debug)]
pub struct MatchOptions {
    pub tolerance: Micros,
    pub window_days: i64,
    pub auto_threshold: f64,
    pub review_threshold: f64,
    pub batch_size: i64,
    pub auto_post: bool,
    pub evidence_age_h: i64,
}

/// Decision for one pending entry.
#[derive(Clone, Debug, PartialEq)]
pub enum MatchDecision {
    /// Best candidate cleared the auto threshold.
    Matched { ledger_id: i64, score: f64 },
    /// Candidates exist in the review band.
    Review { candidates: Vec<(i64, f64)> },
    /// Nothing plausible.
    None,
}

/// One reconciliation pass summary.
#[derive(Clone, Debug, Default)]
pub struct PassReport {
    pub scanned: usize,
    pub matched: usize,
    pub review: usize,
    pub evidence_requests: usize,
}

/// The match engine core (worker loop lives in `worker.rs`).
pub struct MatchEngine {
    store: Store,
    opts: MatchOptions,
}

impl MatchEngine {
    pub fn new(store: Store, opts: MatchOptions) -> Self {
        Self { store, opts }
    }

    pub fn options(&self) -> &MatchOptions {
        &self.opts
    }

    /// Build the amount pre-filter from current POSTED amounts. Buckets are
    /// tolerance-sized so a within-tolerance candidate always hits one of
    /// the three neighboring buckets.
    async fn build_prefilter(&self) -> anyhow::Result<Option<Bloom<i64>>> {
        let amounts = self.store.posted_amounts().await?;
        if amounts.is_empty() {
            return Ok(None);
        }
        let mut bloom = Bloom::new_for_fp_rate(amounts.len().max(64), 0.01);
        for amount in amounts {
            bloom.set(&self.bucket(Micros::new(amount)));
        }
        Ok(Some(bloom))
    }

    fn bucket(&self, amount: Micros) -> i64 {
        let width = self.opts.tolerance.raw().abs().max(1);
        amount.raw().div_euclid(width)
    }

    fn may_have_candidates(&self, bloom: &Bloom<i64>, amount: Micros) -> bool {
        let b = self.bucket(amount);
        (-1..=1).any(|d| bloom.check(&(b + d)))
    }

    /// One full reconciliation pass over UNRECONCILED rows.
    pub async fn run_pass(&self) -> anyhow::Result<PassReport> {
        let mut report = PassReport::default();
        let bloom = self.build_prefilter().await?;
        let mut offset = 0i64;

        loop {
            let page = self
                .store
                .list_pending_page(PendingStatus::Unreconciled, self.opts.batch_size, offset)
                .await?;
            if page.is_empty() {
                break;
            }

            let mut matched_in_page = 0i64;
            for pending in &page {
                report.scanned += 1;
                let skip = match &bloom {
                    Some(b) => !self.may_have_candidates(b, pending.amount),
                    None => true,
                };
                if skip {
                    continue;
                }
                match self.match_one(pending).await? {
                    MatchDecision::Matched { .. } => {
                        report.matched += 1;
                        matched_in_page += 1;
                    }
                    MatchDecision::Review { .. } => report.review += 1,
                    MatchDecision::None => {}
                }
            }

            // Matched rows leave the UNRECONCILED set, shifting later rows
            // toward the front; advance only past the rows that stayed.
            offset += page.len() as i64 - matched_in_page;

            // Per-batch liveness signal.
            self.store
                .heartbeat(crate::worker::WORKER_NAME, ldk_schemas::WorkerState::Alive, None)
                .await?;
        }

        report.evidence_requests = self.hunt_missing_evidence().await?;
        Ok(report)
    }

    /// Score one pending entry against its candidates and settle.
    pub async fn match_one(&self, pending: &PendingEntryRow) -> anyhow::Result<MatchDecision> {
        let window_ms = self.opts.window_days * 86_400_000;
        let candidates = self
            .store
            .posted_candidates(
                pending.amount,
                self.opts.tolerance,
                pending.occurred_at_ms - window_ms,
                pending.occurred_at_ms + window_ms,
            )
            .await?;

        let mut scored: Vec<(f64, &LedgerEntryRow)> = candidates
            .iter()
            .map(|entry| (self.score_pair(pending, entry, window_ms), entry))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let Some((best_score, best)) = scored.first().copied() else {
            return Ok(MatchDecision::None);
        };

        if best_score >= self.opts.auto_threshold {
            self.store.mark_pending_matched(pending.id, best.id).await?;
            info!(
                pending_id = pending.id,
                ledger_id = best.id,
                score = best_score,
                "reconciliation match"
            );

            if self.opts.auto_post {
                self.store.settle_matched_batch(&[pending.id]).await?;
            } else {
                // Ask the hub for a one-click confirmation card.
                let payload = json!({
                    "pending_id": pending.id,
                    "ledger_id": best.id,
                    "score": best_score,
                    "counterparty": pending.counterparty,
                    "vendor": best.vendor,
                    "amount": pending.amount,
                });
                self.store
                    .card_request_enqueue(
                        OutboxKind::BatchConfirm,
                        &payload,
                        Some(&format!("pending:{}", pending.id)),
                    )
                    .await?;
            }
            return Ok(MatchDecision::Matched {
                ledger_id: best.id,
                score: best_score,
            });
        }

        let review: Vec<(i64, f64)> = scored
            .iter()
            .filter(|(s, _)| *s >= self.opts.review_threshold)
            .map(|(s, e)| (e.id, *s))
            .collect();
        if !review.is_empty() {
            let payload = json!({
                "pending_id": pending.id,
                "candidates": review
                    .iter()
                    .map(|(id, s)| json!({"ledger_id": id, "score": s}))
                    .collect::<Vec<_>>(),
            });
            self.store
                .card_request_enqueue(
                    OutboxKind::PushCard,
                    &payload,
                    Some(&format!("pending:{}", pending.id)),
                )
                .await?;
            return Ok(MatchDecision::Review { candidates: review });
        }

        Ok(MatchDecision::None)
    }

    fn score_pair(
        &self,
        pending: &PendingEntryRow,
        entry: &LedgerEntryRow,
        window_ms: i64,
    ) -> f64 {
        let amount = amount_score(pending.amount, entry.amount, self.opts.tolerance);
        let name = name_similarity(&pending.counterparty, &entry.vendor);
        let time = time_score(pending.occurred_at_ms, entry.occurred_at_ms, window_ms);
        // Captures of one purchase share a group; a matching description
        // marker earns the bonus.
        let same_group = entry
            .group_id
            .as_deref()
            .map(|g| pending.description.contains(g))
            .unwrap_or(false);
        combined_score(amount, name, time, same_group)
    }

    /// Proactive evidence hunter: unmatched lines older than the configured
    /// age trigger an evidence request toward the hub.
    async fn hunt_missing_evidence(&self) -> anyhow::Result<usize> {
        let age_ms = self.opts.evidence_age_h * 3_600_000;
        let stale = self.store.list_pending_stale(age_ms, 50).await?;
        let mut raised = 0usize;
        for pending in stale {
            let link = format!("evidence:pending:{}", pending.id);
            if self.store.card_request_exists(&link).await? {
                continue;
            }
            let payload = json!({
                "pending_id": pending.id,
                "counterparty": pending.counterparty,
                "amount": pending.amount,
                "occurred_at_ms": pending.occurred_at_ms,
                "age_h": (Utc::now().timestamp_millis() - pending.inserted_at_ms) / 3_600_000,
            });
            self.store
                .card_request_enqueue(OutboxKind::EvidenceRequest, &payload, Some(&link))
                .await?;
            raised += 1;
        }
        Ok(raised)
    }

    /// Sampled integrity check: verify the chain over the most recent
    /// entries; a break freezes appends and raises a CRITICAL request.
    pub async fn spot_check_chain(&self, window: i64) -> anyhow::Result<bool> {
        let head = self.store.chain_head_id().await?;
        if head == 0 {
            return Ok(true);
        }
        let from = (head - window + 1).max(1);
        match self.store.verify_chain(from, head).await? {
            ldk_store::ChainVerdict::Valid { .. } => Ok(true),
            ldk_store::ChainVerdict::Broken { entry_id, reason } => {
                warn!(entry_id, reason = %reason, "chain break detected");
                self.store
                    .freeze_appends(&format!("chain break at entry {entry_id}: {reason}"))
                    .await?;
                let payload = json!({
                    "alert": "ChainBreakDetected",
                    "entry_id": entry_id,
                    "reason": reason,
                });
                self.store
                    .card_request_enqueue(OutboxKind::Critical, &payload, None)
                    .await?;
                Ok(false)
            }
        }
    }
}
