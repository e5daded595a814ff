//! Interaction card persistence.
//!
//! Token minting, signature checks, and transition policy live in
//! `ldk-interaction`; this module stores the rows and enforces the one-shot
//! consumption marker at the SQL level (a compare-and-set on `consumed`).

use serde_json::Value;
use sqlx::Row;

use ldk_schemas::{CardStatus, OutboxKind};

use crate::error::StoreError;
use crate::{now_ms, Store};

/// One queued card request from a pipeline worker.
#[derive(Clone, Debug)]
pub struct CardRequestRow {
    pub request_id: i64,
    pub kind: OutboxKind,
    pub payload: Value,
    pub linked_entity_ref: Option<String>,
}

/// One interaction card row.
#[derive(Clone, Debug)]
pub struct CardRow {
    pub card_id: String,
    pub kind: String,
    pub payload: Value,
    pub required_role: String,
    pub status: CardStatus,
    pub expires_at_ms: i64,
    pub consumed: bool,
    pub linked_entity_ref: Option<String>,
    pub inserted_at_ms: i64,
}

fn row_to_card(row: &sqlx::sqlite::SqliteRow) -> Result<CardRow, StoreError> {
    let status_s: String = row.try_get("status")?;
    let payload_s: String = row.try_get("payload")?;
    Ok(CardRow {
        card_id: row.try_get("card_id")?,
        kind: row.try_get("kind")?,
        payload: serde_json::from_str(&payload_s)
            .map_err(|e| StoreError::Decode(format!("card payload: {e}")))?,
        required_role: row.try_get("required_role")?,
        status: CardStatus::parse(&status_s)
            .map_err(|e| StoreError::Decode(format!("card status: {e}")))?,
        expires_at_ms: row.try_get("expires_at_ms")?,
        consumed: row.try_get::<i64, _>("consumed")? != 0,
        linked_entity_ref: row.try_get("linked_entity_ref")?,
        inserted_at_ms: row.try_get("inserted_at_ms")?,
    })
}

const CARD_COLUMNS: &str = "card_id, kind, payload, required_role, status, expires_at_ms, \
     consumed, linked_entity_ref, inserted_at_ms";

impl Store {
    pub async fn insert_card(
        &self,
        card_id: &str,
        kind: &str,
        payload: &Value,
        required_role: &str,
        expires_at_ms: i64,
        linked_entity_ref: Option<&str>,
    ) -> Result<(), StoreError> {
        let now = now_ms();
        sqlx::query(
            r#"
            insert into interaction_cards
                (card_id, kind, payload, required_role, status, expires_at_ms,
                 consumed, linked_entity_ref, inserted_at_ms, updated_at_ms)
            values ($1, $2, $3, $4, 'SENT', $5, 0, $6, $7, $7)
            "#,
        )
        .bind(card_id)
        .bind(kind)
        .bind(payload.to_string())
        .bind(required_role)
        .bind(expires_at_ms)
        .bind(linked_entity_ref)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_card(&self, card_id: &str) -> Result<Option<CardRow>, StoreError> {
        let row = sqlx::query(&format!(
            "select {CARD_COLUMNS} from interaction_cards where card_id = $1"
        ))
        .bind(card_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_card).transpose()
    }

    /// Most recent card referencing an entity (`entry:<id>`, `pending:<id>`).
    pub async fn find_card_by_link(
        &self,
        linked_entity_ref: &str,
    ) -> Result<Option<CardRow>, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            select {CARD_COLUMNS} from interaction_cards
            where linked_entity_ref = $1
            order by inserted_at_ms desc
            limit 1
            "#
        ))
        .bind(linked_entity_ref)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_card).transpose()
    }

    /// Guarded status move; the caller has already validated monotonicity.
    pub async fn set_card_status(
        &self,
        card_id: &str,
        expected: CardStatus,
        to: CardStatus,
    ) -> Result<bool, StoreError> {
        let updated = sqlx::query(
            r#"
            update interaction_cards
            set status = $1, updated_at_ms = $2
            where card_id = $3 and status = $4
            "#,
        )
        .bind(to.as_str())
        .bind(now_ms())
        .bind(card_id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    /// One-shot consumption marker. Returns `true` exactly once per card —
    /// the replay-protection backstop behind the timestamp window.
    pub async fn consume_card(&self, card_id: &str) -> Result<bool, StoreError> {
        let updated = sqlx::query(
            r#"
            update interaction_cards
            set consumed = 1, updated_at_ms = $1
            where card_id = $2 and consumed = 0
            "#,
        )
        .bind(now_ms())
        .bind(card_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    // -----------------------------------------------------------------------
    // Card requests (worker -> hub queue)
    // -----------------------------------------------------------------------

    /// Ask the hub to raise a card / notification. Any worker may call this;
    /// only the hub turns requests into cards and outbox events.
    pub async fn card_request_enqueue(
        &self,
        kind: OutboxKind,
        payload: &Value,
        linked_entity_ref: Option<&str>,
    ) -> Result<i64, StoreError> {
        let now = now_ms();
        let id = sqlx::query(
            r#"
            insert into card_requests
                (kind, payload, linked_entity_ref, status, inserted_at_ms, updated_at_ms)
            values ($1, $2, $3, 'PENDING', $4, $4)
            "#,
        )
        .bind(kind.as_str())
        .bind(payload.to_string())
        .bind(linked_entity_ref)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    /// Pending card requests, oldest first.
    pub async fn card_requests_pending(
        &self,
        limit: i64,
    ) -> Result<Vec<CardRequestRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            select request_id, kind, payload, linked_entity_ref
            from card_requests
            where status = 'PENDING'
            order by request_id asc
            limit $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let kind_s: String = row.try_get("kind")?;
            let payload_s: String = row.try_get("payload")?;
            out.push(CardRequestRow {
                request_id: row.try_get("request_id")?,
                kind: OutboxKind::parse(&kind_s)
                    .map_err(|e| StoreError::Decode(format!("card request kind: {e}")))?,
                payload: serde_json::from_str(&payload_s)
                    .map_err(|e| StoreError::Decode(format!("card request payload: {e}")))?,
                linked_entity_ref: row.try_get("linked_entity_ref")?,
            });
        }
        Ok(out)
    }

    /// `true` when any request (pending or done) already references the
    /// entity. Lets periodic scanners avoid raising the same card twice.
    pub async fn card_request_exists(&self, linked_entity_ref: &str) -> Result<bool, StoreError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "select 1 from card_requests where linked_entity_ref = $1 limit 1",
        )
        .bind(linked_entity_ref)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    pub async fn card_request_done(&self, request_id: i64) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            update card_requests
            set status = 'DONE', updated_at_ms = $1
            where request_id = $2
            "#,
        )
        .bind(now_ms())
        .bind(request_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Sweep SENT/CLICKED cards past their expiry. Returns the number
    /// expired. Maintenance cadence.
    pub async fn expire_stale_cards(&self) -> Result<u64, StoreError> {
        let updated = sqlx::query(
            r#"
            update interaction_cards
            set status = 'EXPIRED', updated_at_ms = $1
            where status in ('SENT','CLICKED') and expires_at_ms < $1
            "#,
        )
        .bind(now_ms())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated)
    }
}
