//! Accounting worker: drains the durable document queue, classifies, and
//! appends proposed entries.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{info, warn};

use ldk_schemas::{DocumentRecord, EntryState, TraceContext, WorkerState};
use ldk_store::{NewEntry, Store, StoreError};

use crate::router::Router;

/// Worker name used in heartbeats.
pub const WORKER_NAME: &str = "accounting";

const BATCH_SIZE: i64 = 16;

/// The accounting agent worker.
pub struct AccountingWorker {
    store: Store,
    router: Arc<Router>,
}

impl AccountingWorker {
    pub fn new(store: Store, router: Arc<Router>) -> Self {
        Self { store, router }
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
                    if let Err(e) = self.drain_batch().await {
                        warn!(error = %e, "accounting batch failed");
                    }
                    if let Err(e) = self
                        .store
                        .heartbeat(WORKER_NAME, WorkerState::Alive, None)
                        .await
                    {
                        warn!(error = %e, "accounting heartbeat failed");
                    }
                }
            }
        }

        self.store
            .heartbeat(WORKER_NAME, WorkerState::Dead, None)
            .await
            .context("final heartbeat")?;
        info!("accounting stopped");
        Ok(())
    }

    /// Process one batch of pending document jobs.
    pub async fn drain_batch(&self) -> Result<usize> {
        let jobs = self.store.docjob_pending(BATCH_SIZE).await?;
        let mut processed = 0usize;

        for job in jobs {
            let doc: DocumentRecord = match serde_json::from_value(job.payload.clone()) {
                Ok(d) => d,
                Err(e) => {
                    warn!(job_id = job.job_id, error = %e, "undecodable document job");
                    self.store
                        .docjob_finish(job.job_id, false, Some(&format!("decode: {e}")))
                        .await?;
                    continue;
                }
            };

            let ctx = TraceContext::resume(doc.trace_id.clone(), WORKER_NAME);
            let proposal = self.router.classify(&ctx, &doc).await;

            let mut log_json = serde_json::to_value(&proposal.inference_log)
                .unwrap_or_else(|_| serde_json::json!({}));
            if let Some(map) = log_json.as_object_mut() {
                map.insert(
                    "requires_shadow_audit".to_string(),
                    serde_json::Value::Bool(proposal.requires_shadow_audit),
                );
            }

            let new = NewEntry {
                trace_id: doc.trace_id.clone(),
                amount: doc.amount,
                vendor: doc.vendor.clone(),
                category: proposal.category.clone(),
                occurred_at_ms: doc.occurred_at_ms,
                group_id: doc.group_id.clone(),
                project_id: doc.project_id.clone(),
                tenant_id: None,
                inference_log: log_json,
                matched_rule: proposal.matched_rule.clone(),
                state: EntryState::Proposed,
            };

            match self.store.append_entry(&new).await {
                Ok(appended) => {
                    info!(
                        trace_id = %doc.trace_id,
                        entry_id = appended.id,
                        category = %proposal.category,
                        confidence = proposal.confidence,
                        "entry proposed"
                    );
                    self.store.docjob_finish(job.job_id, true, None).await?;
                    processed += 1;
                }
                Err(StoreError::DuplicateTrace { existing_id }) => {
                    // Same capture ingested twice: the prior entry stands.
                    warn!(
                        trace_id = %doc.trace_id,
                        existing_id,
                        "duplicate trace: ingestion resolved idempotently"
                    );
                    self.store
                        .docjob_finish(job.job_id, true, Some("duplicate trace"))
                        .await?;
                }
                Err(StoreError::AppendsFrozen { reason }) => {
                    // Leave the job pending; it will drain after recovery.
                    warn!(reason = %reason, "appends frozen; leaving document queued");
                    break;
                }
                Err(e) => {
                    warn!(trace_id = %doc.trace_id, error = %e, "append failed");
                    self.store
                        .docjob_finish(job.job_id, false, Some(&e.to_string()))
                        .await?;
                }
            }
        }
        Ok(processed)
    }
}
