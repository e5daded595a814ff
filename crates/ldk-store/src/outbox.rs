//! Durable outbox: the only cross-worker queue, guaranteeing at-least-once
//! outbound delivery.
//!
//! Lifecycle: `PENDING -> SENT -> ACK`, with failures returning to `PENDING`
//! (attempts incremented, next attempt scheduled with exponential backoff
//! plus jitter) until the attempt cap, after which the event is parked as
//! `FAILED` for operator attention.

use serde_json::Value;
use sqlx::Row;
use uuid::Uuid;

use ldk_schemas::{OutboxKind, OutboxStatus};

use crate::error::StoreError;
use crate::{backoff_with_jitter, now_ms, Store};

/// One outbox event row.
#[derive(Clone, Debug)]
pub struct OutboxRow {
    pub event_id: String,
    pub kind: OutboxKind,
    pub payload: Value,
    pub status: OutboxStatus,
    pub attempts: i64,
    pub next_attempt_at_ms: i64,
    pub last_error: Option<String>,
    pub trace_id: Option<String>,
    pub inserted_at_ms: i64,
}

fn row_to_outbox(row: &sqlx::sqlite::SqliteRow) -> Result<OutboxRow, StoreError> {
    let kind_s: String = row.try_get("kind")?;
    let status_s: String = row.try_get("status")?;
    let payload_s: String = row.try_get("payload")?;
    Ok(OutboxRow {
        event_id: row.try_get("event_id")?,
        kind: OutboxKind::parse(&kind_s)
            .map_err(|e| StoreError::Decode(format!("outbox kind: {e}")))?,
        payload: serde_json::from_str(&payload_s)
            .map_err(|e| StoreError::Decode(format!("outbox payload: {e}")))?,
        status: OutboxStatus::parse(&status_s)
            .map_err(|e| StoreError::Decode(format!("outbox status: {e}")))?,
        attempts: row.try_get("attempts")?,
        next_attempt_at_ms: row.try_get("next_attempt_at_ms")?,
        last_error: row.try_get("last_error")?,
        trace_id: row.try_get("trace_id")?,
        inserted_at_ms: row.try_get("inserted_at_ms")?,
    })
}

const OUTBOX_COLUMNS: &str = "event_id, kind, payload, status, attempts, next_attempt_at_ms, \
     last_error, trace_id, inserted_at_ms";

impl Store {
    /// Enqueue one event. Returns the generated event id.
    pub async fn outbox_enqueue(
        &self,
        kind: OutboxKind,
        payload: &Value,
        trace_id: Option<&str>,
    ) -> Result<String, StoreError> {
        let event_id = Uuid::new_v4().to_string();
        let now = now_ms();
        sqlx::query(
            r#"
            insert into outbox_events
                (event_id, kind, payload, status, attempts, next_attempt_at_ms,
                 trace_id, inserted_at_ms, updated_at_ms)
            values ($1, $2, $3, 'PENDING', 0, 0, $4, $5, $5)
            "#,
        )
        .bind(&event_id)
        .bind(kind.as_str())
        .bind(payload.to_string())
        .bind(trace_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(event_id)
    }

    /// Due PENDING events, oldest first. The dispatcher is the only consumer.
    pub async fn outbox_due(&self, limit: i64) -> Result<Vec<OutboxRow>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            select {OUTBOX_COLUMNS} from outbox_events
            where status = 'PENDING' and next_attempt_at_ms <= $1
            order by inserted_at_ms asc
            limit $2
            "#
        ))
        .bind(now_ms())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_outbox).collect()
    }

    /// PENDING -> SENT, recorded just before dispatch so a crash mid-send is
    /// visible (SENT but never ACKed rows are re-driven by recovery).
    pub async fn outbox_mark_sent(&self, event_id: &str) -> Result<bool, StoreError> {
        let updated = sqlx::query(
            r#"
            update outbox_events
            set status = 'SENT', updated_at_ms = $1
            where event_id = $2 and status = 'PENDING'
            "#,
        )
        .bind(now_ms())
        .bind(event_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    /// Terminal success: SENT -> ACK.
    pub async fn outbox_mark_ack(&self, event_id: &str) -> Result<bool, StoreError> {
        let updated = sqlx::query(
            r#"
            update outbox_events
            set status = 'ACK', updated_at_ms = $1
            where event_id = $2 and status = 'SENT'
            "#,
        )
        .bind(now_ms())
        .bind(event_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    /// Record a delivery failure. Below the attempt cap the event returns to
    /// PENDING with a backoff-scheduled next attempt; at the cap it parks as
    /// FAILED. Returns the resulting status.
    pub async fn outbox_mark_failure(
        &self,
        event_id: &str,
        error: &str,
        max_attempts: i64,
        backoff_base_ms: u64,
    ) -> Result<OutboxStatus, StoreError> {
        let mut tx = self.pool.begin().await?;

        let (attempts,): (i64,) =
            sqlx::query_as("select attempts from outbox_events where event_id = $1")
                .bind(event_id)
                .fetch_one(&mut *tx)
                .await?;

        let attempts = attempts + 1;
        let now = now_ms();
        let status = if attempts >= max_attempts {
            OutboxStatus::Failed
        } else {
            OutboxStatus::Pending
        };
        // Full-jitter delay derived from the attempt count; capped at 10 min.
        let delay = backoff_with_jitter(attempts.min(16) as u32, backoff_base_ms, 600_000);
        let next_at = now + delay.as_millis() as i64;

        sqlx::query(
            r#"
            update outbox_events
            set status = $1, attempts = $2, next_attempt_at_ms = $3,
                last_error = $4, updated_at_ms = $5
            where event_id = $6
            "#,
        )
        .bind(status.as_str())
        .bind(attempts)
        .bind(next_at)
        .bind(error)
        .bind(now)
        .bind(event_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(status)
    }

    /// Recovery: SENT rows older than `age_ms` go back to PENDING. Run at
    /// dispatcher startup so a crash between send and ack re-delivers
    /// (at-least-once, never at-most-once).
    pub async fn outbox_recover_stuck_sent(&self, age_ms: i64) -> Result<u64, StoreError> {
        let cutoff = now_ms() - age_ms;
        let updated = sqlx::query(
            r#"
            update outbox_events
            set status = 'PENDING', updated_at_ms = $1
            where status = 'SENT' and updated_at_ms <= $2
            "#,
        )
        .bind(now_ms())
        .bind(cutoff)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated)
    }

    /// Undelivered depth (PENDING + SENT) for backlog self-monitoring.
    pub async fn outbox_depth(&self) -> Result<i64, StoreError> {
        let (n,): (i64,) = sqlx::query_as(
            "select count(*) from outbox_events where status in ('PENDING','SENT')",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(n)
    }

    /// Events of one kind, newest first (operator/status queries, tests).
    pub async fn outbox_list_kind(
        &self,
        kind: OutboxKind,
        limit: i64,
    ) -> Result<Vec<OutboxRow>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            select {OUTBOX_COLUMNS} from outbox_events
            where kind = $1
            order by inserted_at_ms desc
            limit $2
            "#
        ))
        .bind(kind.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_outbox).collect()
    }
}
