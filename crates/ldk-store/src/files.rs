//! Ingested-file records: content-hash dedupe plus the visible account of
//! every file the collector has touched (parsed, failed, or skipped).

use sqlx::Row;

use crate::error::StoreError;
use crate::{now_ms, Store};

/// One ingestion record.
#[derive(Clone, Debug)]
pub struct IngestedFileRow {
    pub content_hash: String,
    pub path: String,
    pub source: String,
    /// `PARSED` | `FAILED` | `SKIPPED_DUPLICATE`
    pub status: String,
    pub failure_cause: Option<String>,
    pub row_count: i64,
    pub inserted_at_ms: i64,
}

impl Store {
    /// Claim a content hash for ingestion. Returns `false` when the hash is
    /// already present — the caller records the duplicate sighting and moves
    /// on. File-level counterpart of trace uniqueness.
    pub async fn ingest_file_claim(
        &self,
        content_hash: &str,
        path: &str,
        source: &str,
    ) -> Result<bool, StoreError> {
        let now = now_ms();
        let res = sqlx::query(
            r#"
            insert into ingested_files
                (content_hash, path, source, status, row_count, inserted_at_ms, updated_at_ms)
            values ($1, $2, $3, 'PARSED', 0, $4, $4)
            on conflict (content_hash) do nothing
            "#,
        )
        .bind(content_hash)
        .bind(path)
        .bind(source)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    /// Record the final outcome for a claimed file.
    pub async fn ingest_file_finish(
        &self,
        content_hash: &str,
        status: &str,
        failure_cause: Option<&str>,
        row_count: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            update ingested_files
            set status = $1, failure_cause = $2, row_count = $3, updated_at_ms = $4
            where content_hash = $5
            "#,
        )
        .bind(status)
        .bind(failure_cause)
        .bind(row_count)
        .bind(now_ms())
        .bind(content_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_ingested_file(
        &self,
        content_hash: &str,
    ) -> Result<Option<IngestedFileRow>, StoreError> {
        let row = sqlx::query(
            r#"
            select content_hash, path, source, status, failure_cause, row_count, inserted_at_ms
            from ingested_files
            where content_hash = $1
            "#,
        )
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| {
            Ok::<_, StoreError>(IngestedFileRow {
                content_hash: row.try_get("content_hash")?,
                path: row.try_get("path")?,
                source: row.try_get("source")?,
                status: row.try_get("status")?,
                failure_cause: row.try_get("failure_cause")?,
                row_count: row.try_get("row_count")?,
                inserted_at_ms: row.try_get("inserted_at_ms")?,
            })
        })
        .transpose()?)
    }

    /// Failed ingestions, newest first (operator surface).
    pub async fn list_failed_files(&self, limit: i64) -> Result<Vec<IngestedFileRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            select content_hash, path, source, status, failure_cause, row_count, inserted_at_ms
            from ingested_files
            where status = 'FAILED'
            order by inserted_at_ms desc
            limit $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(IngestedFileRow {
                content_hash: row.try_get("content_hash")?,
                path: row.try_get("path")?,
                source: row.try_get("source")?,
                status: row.try_get("status")?,
                failure_cause: row.try_get("failure_cause")?,
                row_count: row.try_get("row_count")?,
                inserted_at_ms: row.try_get("inserted_at_ms")?,
            });
        }
        Ok(out)
    }
}
