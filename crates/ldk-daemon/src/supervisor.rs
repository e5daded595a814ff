//! The master daemon: worker supervision, health model, maintenance.
//!
//! # Health model (triple check, per worker)
//!
//! 1. *Task liveness* — the worker's join handle has not finished.
//! 2. *Persistent heartbeat* — its heartbeat row is fresher than
//!    `health_timeout`; stale rows mark the worker STUCK.
//! 3. *Logical probe* — a round-trip through the worker's control channel
//!    within `probe_timeout`.
//!
//! Any failed check restarts the worker with exponential backoff plus full
//! jitter (2s doubling, 60s cap). Three consecutive restarts without a
//! successful health pass quarantine the worker and raise a CRITICAL
//! request.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use anyhow::{bail, Result};
use rand::Rng;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use ldk_schemas::{OutboxKind, WorkerState};
use ldk_store::Store;

/// Future returned by a worker factory.
pub type WorkerFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Factory producing a fresh worker run-future. Called once at boot and
/// once per restart.
pub type WorkerFactory =
    Box<dyn Fn(watch::Receiver<bool>, mpsc::Receiver<oneshot::Sender<()>>) -> WorkerFuture + Send + Sync>;

/// Declaration of one supervised worker.
pub struct WorkerSpec {
    pub name: &'static str,
    pub factory: WorkerFactory,
}

/// Supervisor tuning (mapped from `daemon.*` config).
#[derive(Clone, Debug)]
pub struct SupervisorOptions {
    pub grace_shutdown: Duration,
    pub health_timeout: Duration,
    pub probe_timeout: Duration,
    pub health_poll: Duration,
    pub boot_timeout: Duration,
    /// Orphaned entry locks older than this are swept.
    pub lock_ttl_s: i64,
}

const RESTART_BACKOFF_BASE_S: u64 = 2;
const RESTART_BACKOFF_CAP_S: u64 = 60;
const QUARANTINE_AFTER: u32 = 3;

/// Sliding verification window for the maintenance chain check.
const CHAIN_CHECK_WINDOW: i64 = 256;

struct WorkerSlot {
    spec: WorkerSpec,
    handle: Option<JoinHandle<Result<()>>>,
    probe_tx: Option<mpsc::Sender<oneshot::Sender<()>>>,
    /// Consecutive failed health passes since the last clean one.
    strikes: u32,
    restarts_without_health: u32,
    quarantined: bool,
}

/// The master daemon.
pub struct MasterDaemon {
    store: Store,
    opts: SupervisorOptions,
    shutdown_tx: watch::Sender<bool>,
    slots: Vec<WorkerSlot>,
}

impl MasterDaemon {
    /// Build with workers in *boot order* (hub first, collector last).
    pub fn new(store: Store, opts: SupervisorOptions, workers: Vec<WorkerSpec>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let slots = workers
            .into_iter()
            .map(|spec| WorkerSlot {
                spec,
                handle: None,
                probe_tx: None,
                strikes: 0,
                restarts_without_health: 0,
                quarantined: false,
            })
            .collect();
        Self {
            store,
            opts,
            shutdown_tx,
            slots,
        }
    }

    /// Handle used by signal plumbing to trigger a cooperative shutdown.
    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }

    // -----------------------------------------------------------------------
    // Boot
    // -----------------------------------------------------------------------

    /// Bring up all workers in declaration order and wait until every one
    /// has written an initial ALIVE heartbeat (or the boot timeout fires).
    pub async fn start(&mut self) -> Result<()> {
        for i in 0..self.slots.len() {
            self.spawn_slot(i);
        }

        let deadline = tokio::time::Instant::now() + self.opts.boot_timeout;
        loop {
            let beats = self.store.load_heartbeats().await?;
            let all_alive = self.slots.iter().all(|slot| {
                beats
                    .iter()
                    .any(|b| b.worker_name == slot.spec.name && b.state == WorkerState::Alive)
            });
            if all_alive {
                info!("all workers reported ALIVE");
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                let missing: Vec<&str> = self
                    .slots
                    .iter()
                    .filter(|slot| {
                        !beats.iter().any(|b| {
                            b.worker_name == slot.spec.name && b.state == WorkerState::Alive
                        })
                    })
                    .map(|slot| slot.spec.name)
                    .collect();
                bail!("boot timeout: workers without ALIVE heartbeat: {missing:?}");
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    fn spawn_slot(&mut self, i: usize) {
        let shutdown_rx = self.shutdown_tx.subscribe();
        let slot = &mut self.slots[i];
        let (probe_tx, probe_rx) = mpsc::channel(4);
        let fut = (slot.spec.factory)(shutdown_rx, probe_rx);
        let name = slot.spec.name;
        let handle = tokio::spawn(async move {
            let result = fut.await;
            if let Err(e) = &result {
                error!(worker = name, error = %e, "worker exited with error");
            }
            result
        });
        slot.handle = Some(handle);
        slot.probe_tx = Some(probe_tx);
        info!(worker = name, "worker spawned");
    }

    // -----------------------------------------------------------------------
    // Supervision loop
    // -----------------------------------------------------------------------

    /// Run health checks and maintenance until shutdown is signalled.
    pub async fn run(&mut self) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut health = tokio::time::interval(self.opts.health_poll);
        let mut checkpoint = tokio::time::interval(Duration::from_secs(60));
        let mut lock_sweep = tokio::time::interval(Duration::from_secs(300));
        let mut chain_check = tokio::time::interval(Duration::from_secs(600));
        let mut optimize = tokio::time::interval(Duration::from_secs(86_400));
        // The first tick of every interval fires immediately; consume them.
        health.tick().await;
        checkpoint.tick().await;
        lock_sweep.tick().await;
        chain_check.tick().await;
        optimize.tick().await;

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = health.tick() => {
                    if let Err(e) = self.health_pass().await {
                        warn!(error = %e, "health pass failed");
                    }
                }
                _ = checkpoint.tick() => {
                    if let Err(e) = self.store.checkpoint().await {
                        warn!(error = %e, "wal checkpoint failed");
                    }
                }
                _ = lock_sweep.tick() => {
                    match self.store.clean_orphan_locks(self.opts.lock_ttl_s).await {
                        Ok(0) => {}
                        Ok(n) => info!(swept = n, "orphan locks cleaned"),
                        Err(e) => warn!(error = %e, "orphan lock sweep failed"),
                    }
                }
                _ = chain_check.tick() => {
                    if let Err(e) = self.chain_window_check().await {
                        warn!(error = %e, "maintenance chain check failed");
                    }
                }
                _ = optimize.tick() => {
                    if let Err(e) = self.store.optimize().await {
                        warn!(error = %e, "statistics refresh failed");
                    }
                }
            }
        }

        self.shutdown_internal().await
    }

    /// One triple-check pass over every worker.
    pub async fn health_pass(&mut self) -> Result<()> {
        let beats = self.store.load_heartbeats().await?;
        let now = ldk_store::now_ms();
        let stale_ms = self.opts.health_timeout.as_millis() as i64;

        for i in 0..self.slots.len() {
            if self.slots[i].quarantined {
                continue;
            }
            let name = self.slots[i].spec.name;

            // 1) Task liveness.
            let task_alive = self.slots[i]
                .handle
                .as_ref()
                .map(|h| !h.is_finished())
                .unwrap_or(false);

            // 2) Persistent heartbeat.
            let beat_fresh = beats
                .iter()
                .find(|b| b.worker_name == name)
                .map(|b| b.state == WorkerState::Alive && now - b.last_beat_at_ms <= stale_ms)
                .unwrap_or(false);

            // 3) Logical probe.
            let probe_ok = if task_alive {
                self.probe(i).await
            } else {
                false
            };

            if task_alive && beat_fresh && probe_ok {
                self.slots[i].strikes = 0;
                self.slots[i].restarts_without_health = 0;
                continue;
            }

            if task_alive && !beat_fresh {
                warn!(worker = name, "heartbeat stale; marking STUCK");
                let _ = self
                    .store
                    .heartbeat(name, WorkerState::Stuck, Some("stale heartbeat"))
                    .await;
            }

            self.slots[i].strikes += 1;
            warn!(
                worker = name,
                task_alive, beat_fresh, probe_ok,
                strikes = self.slots[i].strikes,
                "health check failed"
            );
            self.restart_slot(i).await?;
        }
        Ok(())
    }

    async fn probe(&self, i: usize) -> bool {
        let Some(tx) = &self.slots[i].probe_tx else {
            return false;
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        if tx.send(reply_tx).await.is_err() {
            return false;
        }
        tokio::time::timeout(self.opts.probe_timeout, reply_rx)
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }

    /// Abort and respawn one worker with backoff; quarantine after repeated
    /// failures.
    async fn restart_slot(&mut self, i: usize) -> Result<()> {
        let name = self.slots[i].spec.name;

        if let Some(handle) = self.slots[i].handle.take() {
            handle.abort();
            let _ = handle.await;
        }
        let _ = self
            .store
            .heartbeat(name, WorkerState::Dead, Some("restarted by supervisor"))
            .await;

        self.slots[i].restarts_without_health += 1;
        if self.slots[i].restarts_without_health > QUARANTINE_AFTER {
            self.slots[i].quarantined = true;
            error!(worker = name, "worker quarantined after repeated restart failures");
            self.store
                .heartbeat(name, WorkerState::Quarantined, Some("restart limit exceeded"))
                .await
                .ok();
            self.store
                .card_request_enqueue(
                    OutboxKind::Critical,
                    &serde_json::json!({"alert": "WorkerQuarantined", "worker": name}),
                    Some(&format!("worker:{name}")),
                )
                .await
                .ok();
            return Ok(());
        }

        // Exponential backoff with full jitter, capped.
        let attempt = self.slots[i].restarts_without_health;
        let cap = RESTART_BACKOFF_BASE_S
            .saturating_mul(1 << attempt.min(6))
            .min(RESTART_BACKOFF_CAP_S);
        let delay = rand::thread_rng().gen_range(0..=cap.max(1));
        info!(worker = name, delay_s = delay, attempt, "restarting worker");
        tokio::time::sleep(Duration::from_secs(delay)).await;

        self.spawn_slot(i);
        Ok(())
    }

    /// Verify the chain over a sliding window near the head; a break
    /// freezes appends and raises a CRITICAL request.
    async fn chain_window_check(&self) -> Result<()> {
        let head = self.store.chain_head_id().await?;
        if head == 0 {
            return Ok(());
        }
        let from = (head - CHAIN_CHECK_WINDOW + 1).max(1);
        match self.store.verify_chain(from, head).await? {
            ldk_store::ChainVerdict::Valid { rows } => {
                info!(rows, from, to = head, "chain window verified");
                Ok(())
            }
            ldk_store::ChainVerdict::Broken { entry_id, reason } => {
                error!(entry_id, reason = %reason, "chain break found by maintenance");
                self.store
                    .freeze_appends(&format!("chain break at entry {entry_id}: {reason}"))
                    .await?;
                self.store
                    .card_request_enqueue(
                        OutboxKind::Critical,
                        &serde_json::json!({
                            "alert": "ChainBreakDetected",
                            "entry_id": entry_id,
                            "reason": reason,
                        }),
                        None,
                    )
                    .await?;
                Ok(())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    /// Cooperative shutdown: signal cancellation, wait up to the grace
    /// period per worker (reverse boot order), force-terminate stragglers
    /// recording the cause in their panic snapshot.
    pub async fn shutdown(&mut self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        self.shutdown_internal().await
    }

    async fn shutdown_internal(&mut self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);

        for i in (0..self.slots.len()).rev() {
            let name = self.slots[i].spec.name;
            let Some(handle) = self.slots[i].handle.take() else {
                continue;
            };
            let abort = handle.abort_handle();
            match tokio::time::timeout(self.opts.grace_shutdown, handle).await {
                Ok(Ok(Ok(()))) => info!(worker = name, "worker stopped cleanly"),
                Ok(Ok(Err(e))) => {
                    warn!(worker = name, error = %e, "worker exited with error during shutdown");
                }
                Ok(Err(join_err)) => {
                    // Panicked or aborted: preserve the cause for operators.
                    warn!(worker = name, error = %join_err, "worker did not join cleanly");
                    self.store
                        .heartbeat(name, WorkerState::Dead, Some(&join_err.to_string()))
                        .await
                        .ok();
                }
                Err(_) => {
                    warn!(worker = name, "grace expired; force-terminating");
                    abort.abort();
                    self.store
                        .heartbeat(
                            name,
                            WorkerState::Dead,
                            Some("force-terminated: grace period expired"),
                        )
                        .await
                        .ok();
                }
            }
        }

        // Orphaned locks from force-terminated workers are swept now rather
        // than waiting for the next maintenance pass.
        let _ = self.store.clean_orphan_locks(0).await;
        info!("daemon shutdown complete");
        Ok(())
    }
}
