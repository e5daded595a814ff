//! Shared runtime state for the daemon's HTTP surface.
//!
//! All types here are `Clone`-able (via `Arc` or copy). Handlers receive
//! `State<Arc<AppState>>` from Axum; this module owns nothing async itself.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use ldk_interaction::InteractionHub;
use ldk_store::Store;

/// Static build metadata included in health / status responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

/// Point-in-time snapshot of daemon state, returned by GET /v1/status.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub daemon_uptime_secs: u64,
    /// One row per supervised worker: name, state, beat age ms.
    pub workers: Vec<WorkerStatus>,
    /// Undelivered outbox depth (PENDING + SENT).
    pub outbox_depth: i64,
    /// `Some(reason)` while the chain-break latch refuses appends.
    pub appends_frozen: Option<String>,
    pub chain_head: i64,
    pub busy_retries: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub name: String,
    pub state: String,
    pub beat_age_ms: i64,
}

/// Cloneable (Arc) handle shared across all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub build: BuildInfo,
    pub store: Store,
    pub hub: Arc<InteractionHub>,
}

impl AppState {
    pub fn new(store: Store, hub: Arc<InteractionHub>) -> Self {
        Self {
            build: BuildInfo {
                service: "ldk-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            store,
            hub,
        }
    }

    /// Assemble the status snapshot from live store queries.
    pub async fn snapshot(&self) -> anyhow::Result<StatusSnapshot> {
        let now = ldk_store::now_ms();
        let workers = self
            .store
            .load_heartbeats()
            .await?
            .into_iter()
            .map(|b| WorkerStatus {
                name: b.worker_name,
                state: b.state.as_str().to_string(),
                beat_age_ms: now - b.last_beat_at_ms,
            })
            .collect();

        Ok(StatusSnapshot {
            daemon_uptime_secs: uptime_secs(),
            workers,
            outbox_depth: self.store.outbox_depth().await?,
            appends_frozen: self.store.appends_frozen().await?,
            chain_head: self.store.chain_head_id().await?,
            busy_retries: self.store.busy_retries(),
        })
    }
}

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}
