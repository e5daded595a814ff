//! Persistence & integrity layer.
//!
//! Single source of truth for all durable state: the hash-chained ledger,
//! shadow (pending) entries, the rule table, the durable outbox, worker
//! heartbeats, ingestion records, and snapshots. Every other worker mutates
//! durable state exclusively through this crate.
//!
//! # Concurrency posture
//!
//! SQLite in WAL mode: one writer at a time, many concurrent readers.
//! Writers that hit `SQLITE_BUSY` retry with exponential backoff plus full
//! jitter, bounded by `store.busy_timeout_ms`. Advisory entry locks
//! (`LOCKING` rows) provide cooperative row ownership bounded by
//! `lock_timeout`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::SqlitePool;

pub mod cards;
pub mod chain;
pub mod docjobs;
pub mod entries;
pub mod error;
pub mod files;
pub mod heartbeat;
pub mod outbox;
pub mod pending;
pub mod rules;
pub mod snapshot;
pub mod tokens;

pub use cards::{CardRequestRow, CardRow};
pub use chain::{chain_hash, ChainVerdict, GENESIS_HASH};
pub use docjobs::DocumentJobRow;
pub use entries::{AppendedEntry, AuditTrailRow, LedgerEntryRow, NewEntry, VendorHistoryRow};
pub use error::StoreError;
pub use files::IngestedFileRow;
pub use heartbeat::HeartbeatRow;
pub use outbox::OutboxRow;
pub use pending::{NewPendingEntry, PendingEntryRow};
pub use rules::RuleRow;
pub use snapshot::SnapshotRow;

/// Tuning knobs passed down from `ldk-config` (kept as plain values so the
/// store does not depend on the config crate).
#[derive(Clone, Debug)]
pub struct StoreOptions {
    pub path: PathBuf,
    pub snapshot_dir: PathBuf,
    pub busy_timeout_ms: u64,
    /// `"normal"` (default) or `"full"`.
    pub sync_mode: String,
    pub cache_mb: u32,
    pub lock_timeout_s: u64,
}

impl StoreOptions {
    /// Options for a throwaway store rooted at `dir` (tests, tooling).
    pub fn at_dir(dir: &Path) -> Self {
        Self {
            path: dir.join("ledger.db"),
            snapshot_dir: dir.join("snapshots"),
            busy_timeout_ms: 5_000,
            sync_mode: "normal".to_string(),
            cache_mb: 16,
            lock_timeout_s: 300,
        }
    }
}

/// Handle over the SQLite pool. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    opts: std::sync::Arc<StoreOptions>,
    busy_retries: std::sync::Arc<AtomicU64>,
    #[cfg(feature = "testkit")]
    inject_busy_remaining: std::sync::Arc<AtomicU64>,
}

impl Store {
    /// Open (creating if missing) the store file and run migrations.
    pub async fn open(opts: StoreOptions) -> Result<Self> {
        if let Some(parent) = opts.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create store dir {:?}", parent))?;
            }
        }
        std::fs::create_dir_all(&opts.snapshot_dir)
            .with_context(|| format!("create snapshot dir {:?}", opts.snapshot_dir))?;

        let synchronous = if opts.sync_mode.eq_ignore_ascii_case("full") {
            SqliteSynchronous::Full
        } else {
            SqliteSynchronous::Normal
        };

        // Negative cache_size is KiB per SQLite convention.
        let cache_kib = i64::from(opts.cache_mb) * 1024;

        let connect = SqliteConnectOptions::new()
            .filename(&opts.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(synchronous)
            .busy_timeout(Duration::from_millis(opts.busy_timeout_ms))
            .pragma("cache_size", format!("-{cache_kib}"))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(connect)
            .await
            .context("failed to open sqlite store")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("store migrate failed")?;

        let store = Self {
            pool,
            opts: std::sync::Arc::new(opts),
            busy_retries: std::sync::Arc::new(AtomicU64::new(0)),
            #[cfg(feature = "testkit")]
            inject_busy_remaining: std::sync::Arc::new(AtomicU64::new(0)),
        };
        store.ensure_singletons().await?;
        Ok(store)
    }

    /// Raw pool access for read-only queries that live outside this crate
    /// (status surface). Writers must go through the typed API.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn options(&self) -> &StoreOptions {
        &self.opts
    }

    /// Total busy retries performed since open (observability counter).
    pub fn busy_retries(&self) -> u64 {
        self.busy_retries.load(Ordering::Relaxed)
    }

    pub(crate) fn count_busy_retry(&self) {
        self.busy_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Deterministic fault injection: the next `n` append attempts fail as
    /// if SQLite reported BUSY. Test-only.
    #[cfg(feature = "testkit")]
    pub fn inject_busy(&self, n: u64) {
        self.inject_busy_remaining.store(n, Ordering::SeqCst);
    }

    #[cfg(feature = "testkit")]
    pub(crate) fn take_injected_busy(&self) -> bool {
        self.inject_busy_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
            .is_ok()
    }

    #[cfg(not(feature = "testkit"))]
    pub(crate) fn take_injected_busy(&self) -> bool {
        false
    }

    /// Seed singleton rows (chain head latch, freeze latch) on first open.
    async fn ensure_singletons(&self) -> Result<()> {
        let now = now_ms();
        sqlx::query(
            r#"
            insert into chain_head (head_id, last_entry_id, last_hash, updated_at_ms)
            values (1, 0, $1, $2)
            on conflict (head_id) do nothing
            "#,
        )
        .bind(GENESIS_HASH)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("seed chain_head failed")?;

        sqlx::query(
            r#"
            insert into sys_chain_state (sentinel_id, appends_frozen, frozen_reason, updated_at_ms)
            values (1, 0, null, $1)
            on conflict (sentinel_id) do nothing
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .context("seed sys_chain_state failed")?;

        Ok(())
    }

    /// Flush the WAL into the main database file. Run by daemon maintenance
    /// and before snapshots.
    pub async fn checkpoint(&self) -> Result<()> {
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await
            .context("wal checkpoint failed")?;
        Ok(())
    }

    /// Refresh the query planner statistics. Daily maintenance.
    pub async fn optimize(&self) -> Result<()> {
        sqlx::query("PRAGMA optimize")
            .execute(&self.pool)
            .await
            .context("pragma optimize failed")?;
        Ok(())
    }

    /// Close the pool. Required before `rollback_to` replaces the file.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Current UTC time as epoch milliseconds — the only clock in this crate.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Exponential backoff delay with full jitter for attempt `n` (0-based).
///
/// Base doubles per attempt and is capped; the actual delay is uniform in
/// `[0, cap]` so concurrent writers decorrelate.
pub(crate) fn backoff_with_jitter(attempt: u32, base_ms: u64, cap_ms: u64) -> Duration {
    use rand::Rng;
    let exp = base_ms.saturating_mul(1u64 << attempt.min(16)).min(cap_ms);
    let jittered = rand::thread_rng().gen_range(0..=exp.max(1));
    Duration::from_millis(jittered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_bounded_by_cap() {
        for attempt in 0..20 {
            let d = backoff_with_jitter(attempt, 10, 500);
            assert!(d.as_millis() <= 500);
        }
    }

    #[test]
    fn now_ms_is_recent() {
        // Sanity: after 2020, before 2100.
        let t = now_ms();
        assert!(t > 1_577_836_800_000);
        assert!(t < 4_102_444_800_000);
    }
}
