//! Worker heartbeat table.
//!
//! One row per supervised worker, upserted on every beat. Payloads are kept
//! small and write-cheap: a pid, a timestamp, a state string, and (only on
//! abnormal exit) a panic snapshot.

use sqlx::Row;

use ldk_schemas::WorkerState;

use crate::error::StoreError;
use crate::{now_ms, Store};

/// One heartbeat row.
#[derive(Clone, Debug)]
pub struct HeartbeatRow {
    pub worker_name: String,
    pub pid: i64,
    pub last_beat_at_ms: i64,
    pub state: WorkerState,
    pub panic_snapshot: Option<String>,
}

impl Store {
    /// Upsert the heartbeat for one worker.
    pub async fn heartbeat(
        &self,
        worker_name: &str,
        state: WorkerState,
        panic_snapshot: Option<&str>,
    ) -> Result<(), StoreError> {
        let now = now_ms();
        sqlx::query(
            r#"
            insert into worker_heartbeats
                (worker_name, pid, last_beat_at_ms, state, panic_snapshot,
                 inserted_at_ms, updated_at_ms)
            values ($1, $2, $3, $4, $5, $6, $6)
            on conflict (worker_name) do update
                set pid = excluded.pid,
                    last_beat_at_ms = excluded.last_beat_at_ms,
                    state = excluded.state,
                    panic_snapshot = excluded.panic_snapshot,
                    updated_at_ms = excluded.updated_at_ms
            "#,
        )
        .bind(worker_name)
        .bind(std::process::id() as i64)
        .bind(now)
        .bind(state.as_str())
        .bind(panic_snapshot)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Load all heartbeat rows.
    pub async fn load_heartbeats(&self) -> Result<Vec<HeartbeatRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            select worker_name, pid, last_beat_at_ms, state, panic_snapshot
            from worker_heartbeats
            order by worker_name asc
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let state_s: String = row.try_get("state")?;
            out.push(HeartbeatRow {
                worker_name: row.try_get("worker_name")?,
                pid: row.try_get("pid")?,
                last_beat_at_ms: row.try_get("last_beat_at_ms")?,
                state: WorkerState::parse(&state_s)
                    .map_err(|e| StoreError::Decode(format!("worker state: {e}")))?,
                panic_snapshot: row.try_get("panic_snapshot")?,
            });
        }
        Ok(out)
    }

    pub async fn get_heartbeat(
        &self,
        worker_name: &str,
    ) -> Result<Option<HeartbeatRow>, StoreError> {
        let row = sqlx::query(
            r#"
            select worker_name, pid, last_beat_at_ms, state, panic_snapshot
            from worker_heartbeats
            where worker_name = $1
            "#,
        )
        .bind(worker_name)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            None => Ok(None),
            Some(row) => {
                let state_s: String = row.try_get("state")?;
                Ok(Some(HeartbeatRow {
                    worker_name: row.try_get("worker_name")?,
                    pid: row.try_get("pid")?,
                    last_beat_at_ms: row.try_get("last_beat_at_ms")?,
                    state: WorkerState::parse(&state_s)
                        .map_err(|e| StoreError::Decode(format!("worker state: {e}")))?,
                    panic_snapshot: row.try_get("panic_snapshot")?,
                }))
            }
        }
    }

    /// `true` when the named worker has an ALIVE heartbeat newer than
    /// `ttl_ms`. Used by the advisory-lock steal check.
    pub(crate) async fn worker_alive(
        &self,
        worker_name: &str,
        ttl_ms: i64,
    ) -> Result<bool, StoreError> {
        let cutoff = now_ms() - ttl_ms;
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            select 1 from worker_heartbeats
            where worker_name = $1 and state = 'ALIVE' and last_beat_at_ms >= $2
            "#,
        )
        .bind(worker_name)
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }
}
