//! Durable document queue between the Collector and the AccountingAgent.
//!
//! Workers never hold parsed documents only in memory: the collector inserts
//! a job row, the accounting worker drains PENDING jobs in id order and marks
//! each DONE or FAILED. A restart replays whatever was not finished — the
//! ledger's trace uniqueness makes the replay idempotent.

use serde_json::Value;
use sqlx::Row;

use crate::error::StoreError;
use crate::{now_ms, Store};

/// One queued document job.
#[derive(Clone, Debug)]
pub struct DocumentJobRow {
    pub job_id: i64,
    pub trace_id: String,
    pub payload: Value,
    /// `PENDING` | `DONE` | `FAILED`
    pub status: String,
    pub attempts: i64,
    pub last_error: Option<String>,
}

impl Store {
    /// Enqueue a parsed document. Duplicate trace ids are ignored (the
    /// collector may rescan a directory after a crash).
    pub async fn docjob_enqueue(
        &self,
        trace_id: &str,
        payload: &Value,
    ) -> Result<bool, StoreError> {
        let now = now_ms();
        let res = sqlx::query(
            r#"
            insert into document_jobs
                (trace_id, payload, status, attempts, inserted_at_ms, updated_at_ms)
            values ($1, $2, 'PENDING', 0, $3, $3)
            on conflict (trace_id) do nothing
            "#,
        )
        .bind(trace_id)
        .bind(payload.to_string())
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    /// Next batch of PENDING jobs, oldest first.
    pub async fn docjob_pending(&self, limit: i64) -> Result<Vec<DocumentJobRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            select job_id, trace_id, payload, status, attempts, last_error
            from document_jobs
            where status = 'PENDING'
            order by job_id asc
            limit $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let payload_s: String = row.try_get("payload")?;
            out.push(DocumentJobRow {
                job_id: row.try_get("job_id")?,
                trace_id: row.try_get("trace_id")?,
                payload: serde_json::from_str(&payload_s)
                    .map_err(|e| StoreError::Decode(format!("docjob payload: {e}")))?,
                status: row.try_get("status")?,
                attempts: row.try_get("attempts")?,
                last_error: row.try_get("last_error")?,
            });
        }
        Ok(out)
    }

    /// Mark a job finished.
    pub async fn docjob_finish(
        &self,
        job_id: i64,
        ok: bool,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            update document_jobs
            set status = $1, attempts = attempts + 1, last_error = $2, updated_at_ms = $3
            where job_id = $4
            "#,
        )
        .bind(if ok { "DONE" } else { "FAILED" })
        .bind(error)
        .bind(now_ms())
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
