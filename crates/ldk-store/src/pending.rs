//! Pending (shadow) entries: bank/payment flow lines awaiting reconciliation.

use sqlx::Row;

use ldk_schemas::{Micros, PendingSource, PendingStatus};

use crate::error::StoreError;
use crate::{now_ms, Store};

/// Input for a new pending entry.
#[derive(Clone, Debug)]
pub struct NewPendingEntry {
    pub source: PendingSource,
    pub counterparty: String,
    pub amount: Micros,
    pub occurred_at_ms: i64,
    pub description: String,
}

/// Full pending entry row.
#[derive(Clone, Debug)]
pub struct PendingEntryRow {
    pub id: i64,
    pub source: PendingSource,
    pub counterparty: String,
    pub amount: Micros,
    pub occurred_at_ms: i64,
    pub description: String,
    pub status: PendingStatus,
    pub matched_ledger_id: Option<i64>,
    pub inserted_at_ms: i64,
    pub updated_at_ms: i64,
}

fn row_to_pending(row: &sqlx::sqlite::SqliteRow) -> Result<PendingEntryRow, StoreError> {
    let source_s: String = row.try_get("source")?;
    let status_s: String = row.try_get("status")?;
    Ok(PendingEntryRow {
        id: row.try_get("id")?,
        source: PendingSource::parse(&source_s)
            .map_err(|e| StoreError::Decode(format!("pending source: {e}")))?,
        counterparty: row.try_get("counterparty")?,
        amount: Micros::new(row.try_get("amount_micros")?),
        occurred_at_ms: row.try_get("occurred_at_ms")?,
        description: row.try_get("description")?,
        status: PendingStatus::parse(&status_s)
            .map_err(|e| StoreError::Decode(format!("pending status: {e}")))?,
        matched_ledger_id: row.try_get("matched_ledger_id")?,
        inserted_at_ms: row.try_get("inserted_at_ms")?,
        updated_at_ms: row.try_get("updated_at_ms")?,
    })
}

const PENDING_COLUMNS: &str = "id, source, counterparty, amount_micros, occurred_at_ms, \
     description, status, matched_ledger_id, inserted_at_ms, updated_at_ms";

impl Store {
    /// Insert one shadow row. Statement parsing is already deduplicated at
    /// file level, so no row-level dedupe here.
    pub async fn insert_pending(&self, new: &NewPendingEntry) -> Result<i64, StoreError> {
        let now = now_ms();
        let id = sqlx::query(
            r#"
            insert into pending_entries (
                source, counterparty, amount_micros, occurred_at_ms,
                description, status, inserted_at_ms, updated_at_ms
            ) values ($1,$2,$3,$4,$5,'UNRECONCILED',$6,$7)
            "#,
        )
        .bind(new.source.as_str())
        .bind(&new.counterparty)
        .bind(new.amount.raw())
        .bind(new.occurred_at_ms)
        .bind(&new.description)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    pub async fn get_pending(&self, id: i64) -> Result<PendingEntryRow, StoreError> {
        let row = sqlx::query(&format!(
            "select {PENDING_COLUMNS} from pending_entries where id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound { id })?;
        row_to_pending(&row)
    }

    /// One page of rows in a given status, ordered by id. The match engine
    /// walks the table with this instead of loading it whole.
    pub async fn list_pending_page(
        &self,
        status: PendingStatus,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<PendingEntryRow>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            select {PENDING_COLUMNS} from pending_entries
            where status = $1
            order by id asc
            limit $2 offset $3
            "#
        ))
        .bind(status.as_str())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_pending).collect()
    }

    /// UNRECONCILED rows older than `age_ms` — evidence-hunter input.
    pub async fn list_pending_stale(
        &self,
        age_ms: i64,
        limit: i64,
    ) -> Result<Vec<PendingEntryRow>, StoreError> {
        let cutoff = now_ms() - age_ms;
        let rows = sqlx::query(&format!(
            r#"
            select {PENDING_COLUMNS} from pending_entries
            where status = 'UNRECONCILED' and inserted_at_ms < $1
            order by id asc
            limit $2
            "#
        ))
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_pending).collect()
    }

    /// Record a match candidate decision: UNRECONCILED -> MATCHED with the
    /// ledger back-reference. Guarded on current status.
    pub async fn mark_pending_matched(
        &self,
        id: i64,
        ledger_id: i64,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            update pending_entries
            set status = 'MATCHED', matched_ledger_id = $1, updated_at_ms = $2
            where id = $3 and status = 'UNRECONCILED'
            "#,
        )
        .bind(ledger_id)
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if updated == 0 {
            let row = self.get_pending(id).await?;
            return Err(StoreError::BadState {
                id,
                expected: "UNRECONCILED",
                actual: row.status.as_str().to_string(),
            });
        }
        Ok(())
    }

    /// Atomically settle a batch of MATCHED rows to RECONCILED (the
    /// BATCH_CONFIRM callback path). Rows not in MATCHED are skipped; the
    /// count of settled rows is returned and the whole batch commits or
    /// rolls back together.
    pub async fn settle_matched_batch(&self, ids: &[i64]) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let now = now_ms();
        let mut settled = 0u64;
        for id in ids {
            let updated = sqlx::query(
                r#"
                update pending_entries
                set status = 'RECONCILED', updated_at_ms = $1
                where id = $2 and status = 'MATCHED'
                "#,
            )
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            settled += updated;
        }
        tx.commit().await?;
        Ok(settled)
    }

    /// Undo a match (operator rejected the pairing): MATCHED -> UNRECONCILED.
    pub async fn unmatch_pending(&self, id: i64) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            update pending_entries
            set status = 'UNRECONCILED', matched_ledger_id = null, updated_at_ms = $1
            where id = $2 and status = 'MATCHED'
            "#,
        )
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if updated == 0 {
            let row = self.get_pending(id).await?;
            return Err(StoreError::BadState {
                id,
                expected: "MATCHED",
                actual: row.status.as_str().to_string(),
            });
        }
        Ok(())
    }

    pub async fn count_pending_in_status(
        &self,
        status: PendingStatus,
    ) -> Result<i64, StoreError> {
        let (n,): (i64,) =
            sqlx::query_as("select count(*) from pending_entries where status = $1")
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(n)
    }
}
