//! Physical snapshots and rollback.
//!
//! A snapshot is a whole-file copy of the store taken after a WAL truncate,
//! staged to a tempfile in the snapshot directory and renamed into place so
//! a crash mid-copy never leaves a half snapshot behind. Rollback replaces
//! the live store file; it requires the daemon-wide exclusive lock (every
//! worker parked and the pool closed) and is an explicit operator action.

use std::path::PathBuf;

use sqlx::Row;

use crate::error::StoreError;
use crate::{now_ms, Store};

/// One recorded snapshot.
#[derive(Clone, Debug)]
pub struct SnapshotRow {
    pub snapshot_id: i64,
    pub description: String,
    pub file_name: String,
    pub size_bytes: i64,
    pub created_at_ms: i64,
}

impl Store {
    /// Take a snapshot. Returns the snapshot id.
    pub async fn snapshot(&self, description: &str) -> Result<i64, StoreError> {
        // Flush the WAL so the main file alone is a consistent image.
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await?;

        let now = now_ms();
        // Reserve the id first so the file name embeds it.
        let snapshot_id = sqlx::query(
            r#"
            insert into snapshots (description, file_name, size_bytes, created_at_ms)
            values ($1, '', 0, $2)
            "#,
        )
        .bind(description)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        let file_name = format!("snapshot-{snapshot_id}-{now}");
        let dest = self.options().snapshot_dir.join(&file_name);
        let src = self.options().path.clone();

        let size = copy_atomic(&src, &dest)
            .map_err(|e| StoreError::SnapshotIo(format!("copy {src:?} -> {dest:?}: {e}")))?;

        sqlx::query(
            r#"
            update snapshots set file_name = $1, size_bytes = $2 where snapshot_id = $3
            "#,
        )
        .bind(&file_name)
        .bind(size as i64)
        .bind(snapshot_id)
        .execute(&self.pool)
        .await?;

        Ok(snapshot_id)
    }

    pub async fn list_snapshots(&self) -> Result<Vec<SnapshotRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            select snapshot_id, description, file_name, size_bytes, created_at_ms
            from snapshots
            order by snapshot_id desc
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(SnapshotRow {
                snapshot_id: row.try_get("snapshot_id")?,
                description: row.try_get("description")?,
                file_name: row.try_get("file_name")?,
                size_bytes: row.try_get("size_bytes")?,
                created_at_ms: row.try_get("created_at_ms")?,
            });
        }
        Ok(out)
    }

    /// Replace the live store file with the named snapshot.
    ///
    /// Caller contract: every worker is parked behind the daemon's exclusive
    /// lock. This call closes the pool; the store handle is unusable
    /// afterwards and the caller must `Store::open` again.
    pub async fn rollback_to(&self, snapshot_id: i64) -> Result<PathBuf, StoreError> {
        let row = sqlx::query(
            "select file_name from snapshots where snapshot_id = $1",
        )
        .bind(snapshot_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound { id: snapshot_id })?;
        let file_name: String = row.try_get("file_name")?;
        let snap_path = self.options().snapshot_dir.join(&file_name);
        if !snap_path.exists() {
            return Err(StoreError::SnapshotIo(format!(
                "snapshot file missing: {snap_path:?}"
            )));
        }

        let store_path = self.options().path.clone();
        self.pool.close().await;

        // WAL/SHM sidecars describe the old file; they must not survive.
        for ext in ["-wal", "-shm"] {
            let side = PathBuf::from(format!("{}{}", store_path.display(), ext));
            if side.exists() {
                std::fs::remove_file(&side)
                    .map_err(|e| StoreError::SnapshotIo(format!("remove {side:?}: {e}")))?;
            }
        }

        copy_atomic(&snap_path, &store_path)
            .map_err(|e| StoreError::SnapshotIo(format!("restore {snap_path:?}: {e}")))?;

        Ok(store_path)
    }
}

/// Copy `src` to `dest` via a tempfile in the destination directory plus an
/// atomic rename. Returns the copied size in bytes.
fn copy_atomic(src: &std::path::Path, dest: &std::path::Path) -> std::io::Result<u64> {
    let dir = dest.parent().unwrap_or_else(|| std::path::Path::new("."));
    std::fs::create_dir_all(dir)?;
    let tmp = dir.join(format!(
        ".{}.tmp",
        dest.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "snapshot".to_string())
    ));
    let size = std::fs::copy(src, &tmp)?;
    std::fs::rename(&tmp, dest)?;
    Ok(size)
}
