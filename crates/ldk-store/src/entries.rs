//! Ledger entry operations: chained append, advisory locks, state
//! transitions, reversal.
//!
//! # Append protocol
//!
//! Inside one transaction: check the freeze latch, check trace uniqueness,
//! read the chain head, compute the new `chain_hash`, insert, advance the
//! head with a compare-and-swap on the previous hash. A lost CAS surfaces as
//! [`StoreError::ChainMismatch`] and the public `append_entry` retries it;
//! BUSY/LOCKED conditions retry with exponential backoff plus full jitter.

use serde_json::Value;
use sqlx::Row;

use ldk_schemas::{EntryState, Micros};

use crate::error::StoreError;
use crate::{chain::chain_hash, now_ms, Store};

/// Append retry bounds. The SQLite-level busy timeout already bounds each
/// individual attempt; these bound the outer retry loop.
const MAX_APPEND_ATTEMPTS: u32 = 8;
const APPEND_BACKOFF_BASE_MS: u64 = 25;
const APPEND_BACKOFF_CAP_MS: u64 = 1_000;

/// A heartbeat older than this no longer proves its worker alive for lock
/// ownership purposes. Independent of `lock_timeout`: liveness is about the
/// worker, the lock timeout is about the row.
const LIVENESS_TTL_MS: i64 = 60_000;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// Input for a new ledger entry.
#[derive(Clone, Debug)]
pub struct NewEntry {
    pub trace_id: String,
    pub amount: Micros,
    pub vendor: String,
    pub category: String,
    pub occurred_at_ms: i64,
    pub group_id: Option<String>,
    pub project_id: Option<String>,
    pub tenant_id: Option<String>,
    pub inference_log: Value,
    pub matched_rule: Option<String>,
    /// Initial state; the pipeline appends at `Proposed`.
    pub state: EntryState,
}

/// Result of a successful append.
#[derive(Clone, Debug)]
pub struct AppendedEntry {
    pub id: i64,
    pub trace_id: String,
    pub chain_hash: String,
}

/// Full ledger entry row.
#[derive(Clone, Debug)]
pub struct LedgerEntryRow {
    pub id: i64,
    pub trace_id: String,
    pub amount: Micros,
    pub vendor: String,
    pub category: String,
    pub occurred_at_ms: i64,
    pub group_id: Option<String>,
    pub project_id: Option<String>,
    pub tenant_id: Option<String>,
    pub inference_log: Value,
    pub matched_rule: Option<String>,
    pub state: EntryState,
    pub prev_hash: String,
    pub chain_hash: String,
    pub revert_of: Option<i64>,
    pub lock_owner: Option<String>,
    pub lock_at_ms: Option<i64>,
    pub inserted_at_ms: i64,
    pub updated_at_ms: i64,
}

/// Compact vendor history row used by the auditor's consistency check.
#[derive(Clone, Debug)]
pub struct VendorHistoryRow {
    pub amount: Micros,
    pub category: String,
    pub occurred_at_ms: i64,
}

/// One row of the aggregate audit-trail view.
#[derive(Clone, Debug, serde::Serialize)]
pub struct AuditTrailRow {
    pub id: i64,
    pub trace_id: String,
    pub amount: Micros,
    pub vendor: String,
    pub category: String,
    pub state: String,
    pub occurred_at_ms: i64,
    pub matched_rule: Option<String>,
    pub rule_state: Option<String>,
    pub rule_category: Option<String>,
    pub inference_log: Value,
    pub chain_hash: String,
    pub inserted_at_ms: i64,
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<LedgerEntryRow, StoreError> {
    let state_s: String = row.try_get("state")?;
    let state = EntryState::parse(&state_s)
        .map_err(|e| StoreError::Decode(format!("entry state: {e}")))?;
    let log_s: String = row.try_get("inference_log")?;
    let inference_log: Value = serde_json::from_str(&log_s)
        .map_err(|e| StoreError::Decode(format!("inference_log: {e}")))?;

    Ok(LedgerEntryRow {
        id: row.try_get("id")?,
        trace_id: row.try_get("trace_id")?,
        amount: Micros::new(row.try_get("amount_micros")?),
        vendor: row.try_get("vendor")?,
        category: row.try_get("category")?,
        occurred_at_ms: row.try_get("occurred_at_ms")?,
        group_id: row.try_get("group_id")?,
        project_id: row.try_get("project_id")?,
        tenant_id: row.try_get("tenant_id")?,
        inference_log,
        matched_rule: row.try_get("matched_rule")?,
        state,
        prev_hash: row.try_get("prev_hash")?,
        chain_hash: row.try_get("chain_hash")?,
        revert_of: row.try_get("revert_of")?,
        lock_owner: row.try_get("lock_owner")?,
        lock_at_ms: row.try_get("lock_at_ms")?,
        inserted_at_ms: row.try_get("inserted_at_ms")?,
        updated_at_ms: row.try_get("updated_at_ms")?,
    })
}

const ENTRY_COLUMNS: &str = "id, trace_id, amount_micros, vendor, category, occurred_at_ms, \
     group_id, project_id, tenant_id, inference_log, matched_rule, state, \
     prev_hash, chain_hash, revert_of, lock_owner, lock_at_ms, \
     inserted_at_ms, updated_at_ms";

// ---------------------------------------------------------------------------
// Append
// ---------------------------------------------------------------------------

impl Store {
    /// Append one entry to the chained ledger.
    ///
    /// - Duplicate `trace_id` -> [`StoreError::DuplicateTrace`] carrying the
    ///   existing id (idempotent ingestion).
    /// - BUSY/LOCKED and lost head CAS are retried internally; the busy-retry
    ///   counter increments once per retried attempt.
    /// - Refused with [`StoreError::AppendsFrozen`] while the chain-break
    ///   latch is set.
    pub async fn append_entry(&self, new: &NewEntry) -> Result<AppendedEntry, StoreError> {
        let mut attempt: u32 = 0;
        loop {
            if self.take_injected_busy() {
                attempt += 1;
                self.count_busy_retry();
                if attempt >= MAX_APPEND_ATTEMPTS {
                    return Err(StoreError::Busy { attempts: attempt });
                }
                tokio::time::sleep(crate::backoff_with_jitter(
                    attempt,
                    APPEND_BACKOFF_BASE_MS,
                    APPEND_BACKOFF_CAP_MS,
                ))
                .await;
                continue;
            }

            match self.try_append_entry(new).await {
                Ok(out) => return Ok(out),
                Err(StoreError::ChainMismatch) => {
                    attempt += 1;
                    if attempt >= MAX_APPEND_ATTEMPTS {
                        return Err(StoreError::ChainMismatch);
                    }
                    // Lost the head race; retry immediately with fresh head.
                    continue;
                }
                Err(StoreError::Sql(e)) if StoreError::is_retryable(&e) => {
                    attempt += 1;
                    self.count_busy_retry();
                    if attempt >= MAX_APPEND_ATTEMPTS {
                        return Err(StoreError::Busy { attempts: attempt });
                    }
                    tokio::time::sleep(crate::backoff_with_jitter(
                        attempt,
                        APPEND_BACKOFF_BASE_MS,
                        APPEND_BACKOFF_CAP_MS,
                    ))
                    .await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_append_entry(&self, new: &NewEntry) -> Result<AppendedEntry, StoreError> {
        let mut tx = self.pool.begin().await?;

        // 1) Freeze latch.
        let (frozen, reason): (i64, Option<String>) = sqlx::query_as(
            "select appends_frozen, frozen_reason from sys_chain_state where sentinel_id = 1",
        )
        .fetch_one(&mut *tx)
        .await?;
        if frozen != 0 {
            return Err(StoreError::AppendsFrozen {
                reason: reason.unwrap_or_else(|| "unspecified".to_string()),
            });
        }

        // 2) Trace uniqueness (pre-check so the caller gets the prior id).
        let existing: Option<(i64,)> =
            sqlx::query_as("select id from ledger_entries where trace_id = $1")
                .bind(&new.trace_id)
                .fetch_optional(&mut *tx)
                .await?;
        if let Some((existing_id,)) = existing {
            return Err(StoreError::DuplicateTrace { existing_id });
        }

        // 3) Chain head.
        let (_, head_hash): (i64, String) =
            sqlx::query_as("select last_entry_id, last_hash from chain_head where head_id = 1")
                .fetch_one(&mut *tx)
                .await?;

        let self_hash = chain_hash(
            &head_hash,
            new.amount.raw(),
            &new.vendor,
            &new.category,
            &new.trace_id,
            new.occurred_at_ms,
        );

        // 4) Insert.
        let now = now_ms();
        let log = serde_json::to_string(&new.inference_log)
            .map_err(|e| StoreError::Decode(format!("inference_log encode: {e}")))?;
        let insert = sqlx::query(
            r#"
            insert into ledger_entries (
                trace_id, amount_micros, vendor, category, occurred_at_ms,
                group_id, project_id, tenant_id, inference_log, matched_rule,
                state, prev_hash, chain_hash, inserted_at_ms, updated_at_ms
            ) values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)
            "#,
        )
        .bind(&new.trace_id)
        .bind(new.amount.raw())
        .bind(&new.vendor)
        .bind(&new.category)
        .bind(new.occurred_at_ms)
        .bind(&new.group_id)
        .bind(&new.project_id)
        .bind(&new.tenant_id)
        .bind(&log)
        .bind(&new.matched_rule)
        .bind(new.state.as_str())
        .bind(&head_hash)
        .bind(&self_hash)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await;

        let id = match insert {
            Ok(done) => done.last_insert_rowid(),
            Err(e) if StoreError::is_unique_violation(&e) => {
                // Raced with another writer on the same trace: resolve to the
                // winner's id so the caller still sees the prior entry.
                drop(tx);
                let (existing_id,): (i64,) =
                    sqlx::query_as("select id from ledger_entries where trace_id = $1")
                        .bind(&new.trace_id)
                        .fetch_one(&self.pool)
                        .await?;
                return Err(StoreError::DuplicateTrace { existing_id });
            }
            Err(e) => return Err(e.into()),
        };

        // 5) Advance the head (CAS on the pre-read hash).
        let updated = sqlx::query(
            r#"
            update chain_head
            set last_entry_id = $1, last_hash = $2, updated_at_ms = $3
            where head_id = 1 and last_hash = $4
            "#,
        )
        .bind(id)
        .bind(&self_hash)
        .bind(now)
        .bind(&head_hash)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            tx.rollback().await?;
            return Err(StoreError::ChainMismatch);
        }

        tx.commit().await?;

        Ok(AppendedEntry {
            id,
            trace_id: new.trace_id.clone(),
            chain_hash: self_hash,
        })
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn get_entry(&self, id: i64) -> Result<LedgerEntryRow, StoreError> {
        let row = sqlx::query(&format!(
            "select {ENTRY_COLUMNS} from ledger_entries where id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound { id })?;
        row_to_entry(&row)
    }

    pub async fn get_entry_by_trace(
        &self,
        trace_id: &str,
    ) -> Result<Option<LedgerEntryRow>, StoreError> {
        let row = sqlx::query(&format!(
            "select {ENTRY_COLUMNS} from ledger_entries where trace_id = $1"
        ))
        .bind(trace_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_entry).transpose()
    }

    /// Entries in a given state, oldest first, bounded.
    pub async fn list_entries_in_state(
        &self,
        state: EntryState,
        limit: i64,
    ) -> Result<Vec<LedgerEntryRow>, StoreError> {
        let rows = sqlx::query(&format!(
            "select {ENTRY_COLUMNS} from ledger_entries where state = $1 order by id asc limit $2"
        ))
        .bind(state.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_entry).collect()
    }

    /// POSTED entries within an amount tolerance and time window, paged by
    /// id. This is the match-engine candidate query.
    pub async fn posted_candidates(
        &self,
        amount: Micros,
        tolerance: Micros,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<LedgerEntryRow>, StoreError> {
        let lo = amount.raw().saturating_sub(tolerance.raw().abs());
        let hi = amount.raw().saturating_add(tolerance.raw().abs());
        let rows = sqlx::query(&format!(
            r#"
            select {ENTRY_COLUMNS} from ledger_entries
            where state = 'POSTED'
              and amount_micros between $1 and $2
              and occurred_at_ms between $3 and $4
            order by id asc
            "#
        ))
        .bind(lo)
        .bind(hi)
        .bind(from_ms)
        .bind(to_ms)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_entry).collect()
    }

    /// Distinct absolute amounts of POSTED entries — feeds the match
    /// engine's in-memory pre-filter.
    pub async fn posted_amounts(&self) -> Result<Vec<i64>, StoreError> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "select distinct amount_micros from ledger_entries where state = 'POSTED'",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(a,)| a).collect())
    }

    /// Recent POSTED history for one vendor, newest first.
    pub async fn vendor_history(
        &self,
        vendor: &str,
        limit: i64,
    ) -> Result<Vec<VendorHistoryRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            select amount_micros, category, occurred_at_ms
            from ledger_entries
            where vendor = $1 and state = 'POSTED'
            order by occurred_at_ms desc
            limit $2
            "#,
        )
        .bind(vendor)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(VendorHistoryRow {
                amount: Micros::new(row.try_get("amount_micros")?),
                category: row.try_get("category")?,
                occurred_at_ms: row.try_get("occurred_at_ms")?,
            });
        }
        Ok(out)
    }

    /// Rows from the `v_audit_trail` view, newest first: entry fields joined
    /// with the matched rule and provenance. The read surface for external
    /// reporting.
    pub async fn audit_trail(&self, limit: i64) -> Result<Vec<AuditTrailRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            select id, trace_id, amount_micros, vendor, category, state,
                   occurred_at_ms, matched_rule, rule_state, rule_category,
                   inference_log, chain_hash, inserted_at_ms
            from v_audit_trail
            order by id desc
            limit $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let log_s: String = row.try_get("inference_log")?;
            out.push(AuditTrailRow {
                id: row.try_get("id")?,
                trace_id: row.try_get("trace_id")?,
                amount: Micros::new(row.try_get("amount_micros")?),
                vendor: row.try_get("vendor")?,
                category: row.try_get("category")?,
                state: row.try_get("state")?,
                occurred_at_ms: row.try_get("occurred_at_ms")?,
                matched_rule: row.try_get("matched_rule")?,
                rule_state: row.try_get("rule_state")?,
                rule_category: row.try_get("rule_category")?,
                inference_log: serde_json::from_str(&log_s)
                    .map_err(|e| StoreError::Decode(format!("inference_log: {e}")))?,
                chain_hash: row.try_get("chain_hash")?,
                inserted_at_ms: row.try_get("inserted_at_ms")?,
            });
        }
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // State transitions
    // -----------------------------------------------------------------------

    /// Move an entry between non-terminal states with a guard on the
    /// expected current state.
    pub async fn transition_entry(
        &self,
        id: i64,
        expected: EntryState,
        to: EntryState,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            update ledger_entries
            set state = $1, updated_at_ms = $2
            where id = $3 and state = $4
            "#,
        )
        .bind(to.as_str())
        .bind(now_ms())
        .bind(id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            let row = self.get_entry(id).await?;
            return Err(StoreError::BadState {
                id,
                expected: expected.as_str(),
                actual: row.state.as_str().to_string(),
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Advisory locks
    // -----------------------------------------------------------------------

    /// Acquire the advisory lock on a PROPOSED entry, flipping it to
    /// LOCKING. Fails with [`StoreError::Locked`] while a live owner holds
    /// it; a stale lock (owner heartbeat dead/absent and `lock_timeout`
    /// elapsed) is stolen.
    pub async fn lock_entry(&self, id: i64, owner: &str) -> Result<(), StoreError> {
        let now = now_ms();
        let ttl_ms = (self.options().lock_timeout_s as i64) * 1_000;

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("select state, lock_owner, lock_at_ms from ledger_entries where id = $1")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound { id })?;

        let state_s: String = row.try_get("state")?;
        let cur_owner: Option<String> = row.try_get("lock_owner")?;
        let lock_at: Option<i64> = row.try_get("lock_at_ms")?;

        if let Some(cur) = cur_owner {
            if cur != owner {
                let elapsed = lock_at.map(|t| now - t >= ttl_ms).unwrap_or(true);
                let owner_alive = self.worker_alive(&cur, LIVENESS_TTL_MS).await?;
                if owner_alive || !elapsed {
                    return Err(StoreError::Locked { id, owner: cur });
                }
                // Stale lock: fall through and steal.
            }
        } else if state_s != "PROPOSED" {
            return Err(StoreError::BadState {
                id,
                expected: "PROPOSED",
                actual: state_s,
            });
        }

        sqlx::query(
            r#"
            update ledger_entries
            set state = 'LOCKING', lock_owner = $1, lock_at_ms = $2, updated_at_ms = $2
            where id = $3
            "#,
        )
        .bind(owner)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Release a held lock, settling the entry into `to`.
    pub async fn release_lock(
        &self,
        id: i64,
        owner: &str,
        to: EntryState,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            update ledger_entries
            set state = $1, lock_owner = null, lock_at_ms = null, updated_at_ms = $2
            where id = $3 and state = 'LOCKING' and lock_owner = $4
            "#,
        )
        .bind(to.as_str())
        .bind(now_ms())
        .bind(id)
        .bind(owner)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            let row = self.get_entry(id).await?;
            return Err(StoreError::BadState {
                id,
                expected: "LOCKING",
                actual: row.state.as_str().to_string(),
            });
        }
        Ok(())
    }

    /// Release every lock held by `owner` back to PROPOSED (worker shutdown
    /// path). Returns the number of released rows.
    pub async fn release_all_locks_for(&self, owner: &str) -> Result<u64, StoreError> {
        let updated = sqlx::query(
            r#"
            update ledger_entries
            set state = 'PROPOSED', lock_owner = null, lock_at_ms = null, updated_at_ms = $1
            where state = 'LOCKING' and lock_owner = $2
            "#,
        )
        .bind(now_ms())
        .bind(owner)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated)
    }

    /// Maintenance sweep: LOCKING rows whose owner is gone and whose lock is
    /// older than `ttl_s` revert to PROPOSED. Returns the number swept.
    pub async fn clean_orphan_locks(&self, ttl_s: i64) -> Result<u64, StoreError> {
        let now = now_ms();
        let lock_cutoff = now - ttl_s * 1_000;
        let liveness_cutoff = now - LIVENESS_TTL_MS;
        let updated = sqlx::query(
            r#"
            update ledger_entries
            set state = 'PROPOSED', lock_owner = null, lock_at_ms = null, updated_at_ms = $1
            where state = 'LOCKING'
              and lock_at_ms <= $2
              and lock_owner not in (
                  select worker_name from worker_heartbeats
                  where state = 'ALIVE' and last_beat_at_ms >= $3
              )
            "#,
        )
        .bind(now)
        .bind(lock_cutoff)
        .bind(liveness_cutoff)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated)
    }

    // -----------------------------------------------------------------------
    // Reversal
    // -----------------------------------------------------------------------

    /// Logically revert a POSTED entry: flip it to REVERTED and append a
    /// mirror entry with the opposite amount and a back-reference. Never
    /// deletes. One reversal per origin.
    pub async fn mark_reverted(&self, id: i64, reason: &str) -> Result<AppendedEntry, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "select {ENTRY_COLUMNS} from ledger_entries where id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound { id })?;
        let entry = row_to_entry(&row)?;

        if entry.state != EntryState::Posted {
            return Err(StoreError::BadState {
                id,
                expected: "POSTED",
                actual: entry.state.as_str().to_string(),
            });
        }

        let prior: Option<(i64,)> =
            sqlx::query_as("select id from ledger_entries where revert_of = $1")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        if let Some((existing_id,)) = prior {
            return Err(StoreError::DuplicateTrace { existing_id });
        }

        let now = now_ms();

        // Flip the origin (permitted POSTED -> REVERTED path of the trigger).
        sqlx::query(
            "update ledger_entries set state = 'REVERTED', updated_at_ms = $1 where id = $2",
        )
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        // Append the mirror inside the same transaction so a crash cannot
        // leave a reverted origin without its reversing entry.
        let (_, head_hash): (i64, String) =
            sqlx::query_as("select last_entry_id, last_hash from chain_head where head_id = 1")
                .fetch_one(&mut *tx)
                .await?;

        let mirror_trace = format!("{}:revert", entry.trace_id);
        let mirror_amount = -entry.amount;
        let self_hash = chain_hash(
            &head_hash,
            mirror_amount.raw(),
            &entry.vendor,
            &entry.category,
            &mirror_trace,
            now,
        );
        let log = serde_json::json!({
            "engine": "revert",
            "confidence": 1.0,
            "steps": [{"stage": "revert", "detail": reason, "at_ms": now}],
        })
        .to_string();

        let mirror_id = sqlx::query(
            r#"
            insert into ledger_entries (
                trace_id, amount_micros, vendor, category, occurred_at_ms,
                group_id, project_id, tenant_id, inference_log, matched_rule,
                state, prev_hash, chain_hash, revert_of, inserted_at_ms, updated_at_ms
            ) values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,'POSTED',$11,$12,$13,$14,$15)
            "#,
        )
        .bind(&mirror_trace)
        .bind(mirror_amount.raw())
        .bind(&entry.vendor)
        .bind(&entry.category)
        .bind(now)
        .bind(&entry.group_id)
        .bind(&entry.project_id)
        .bind(&entry.tenant_id)
        .bind(&log)
        .bind(&entry.matched_rule)
        .bind(&head_hash)
        .bind(&self_hash)
        .bind(id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        let updated = sqlx::query(
            r#"
            update chain_head
            set last_entry_id = $1, last_hash = $2, updated_at_ms = $3
            where head_id = 1 and last_hash = $4
            "#,
        )
        .bind(mirror_id)
        .bind(&self_hash)
        .bind(now)
        .bind(&head_hash)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if updated == 0 {
            tx.rollback().await?;
            return Err(StoreError::ChainMismatch);
        }

        tx.commit().await?;
        Ok(AppendedEntry {
            id: mirror_id,
            trace_id: mirror_trace,
            chain_hash: self_hash,
        })
    }
}
