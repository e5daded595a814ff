//! Match engine worker loop.

use anyhow::{Context, Result};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{info, warn};

use ldk_schemas::WorkerState;
use ldk_store::Store;

use crate::engine::MatchEngine;

/// Worker name used in heartbeats.
pub const WORKER_NAME: &str = "match";

/// Entries re-verified by each chain spot check.
const SPOT_CHECK_WINDOW: i64 = 128;

/// Reconciliation pass cadence.
const PASS_INTERVAL: Duration = Duration::from_secs(5);

/// Spot checks run every N passes.
const SPOT_CHECK_EVERY: u32 = 12;

/// The reconciliation worker.
pub struct MatchWorker {
    store: Store,
    engine: MatchEngine,
}

impl MatchWorker {
    pub fn new(store: Store, engine: MatchEngine) -> Self {
        Self { store, engine }
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

        let mut tick = tokio::time::interval(PASS_INTERVAL);
        let mut passes: u32 = 0;
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
                    match self.engine.run_pass().await {
                        Ok(report) => {
                            if report.matched + report.review + report.evidence_requests > 0 {
                                info!(
                                    scanned = report.scanned,
                                    matched = report.matched,
                                    review = report.review,
                                    evidence = report.evidence_requests,
                                    "reconciliation pass"
                                );
                            }
                        }
                        Err(e) => warn!(error = %e, "reconciliation pass failed"),
                    }

                    passes += 1;
                    if passes % SPOT_CHECK_EVERY == 0 {
                        if let Err(e) = self.engine.spot_check_chain(SPOT_CHECK_WINDOW).await {
                            warn!(error = %e, "chain spot check failed");
                        }
                    }

                    if let Err(e) = self
                        .store
                        .heartbeat(WORKER_NAME, WorkerState::Alive, None)
                        .await
                    {
                        warn!(error = %e, "match heartbeat failed");
                    }
                }
            }
        }

        self.store
            .heartbeat(WORKER_NAME, WorkerState::Dead, None)
            .await
            .context("final heartbeat")?;
        info!("match engine stopped");
        Ok(())
    }
}
