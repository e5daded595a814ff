//! Typed store errors.
//!
//! Integrity failures are part of the store's contract and must be matchable
//! by callers (duplicate ingestion is *expected* and handled idempotently),
//! so they get a real error enum instead of anyhow strings. Everything that
//! is not a contract violation is carried through the `Sql` variant.

use thiserror::Error;

/// Errors surfaced by the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The trace id is already present. Carries the existing row id so the
    /// caller can resolve the duplicate idempotently.
    #[error("duplicate trace_id: already stored as entry {existing_id}")]
    DuplicateTrace { existing_id: i64 },

    /// The chain head moved between the pre-read and the commit. Retryable.
    #[error("chain head mismatch: concurrent append won the head")]
    ChainMismatch,

    /// Appends are refused while the chain-break latch is set.
    #[error("appends are frozen: {reason}")]
    AppendsFrozen { reason: String },

    /// The advisory entry lock is held by a live owner.
    #[error("entry {id} is locked by {owner}")]
    Locked { id: i64, owner: String },

    /// An entry state transition was attempted from the wrong state.
    #[error("entry {id} is in state {actual}, expected {expected}")]
    BadState {
        id: i64,
        expected: &'static str,
        actual: String,
    },

    /// The row does not exist.
    #[error("no such entry: {id}")]
    NotFound { id: i64 },

    /// SQLite was busy/locked past the retry budget.
    #[error("store busy: retry budget exhausted after {attempts} attempts")]
    Busy { attempts: u32 },

    /// A snapshot or rollback file operation failed.
    #[error("snapshot io failed: {0}")]
    SnapshotIo(String),

    /// A stored value did not decode into its domain type.
    #[error("row decode failed: {0}")]
    Decode(String),

    /// Any other database error.
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
}

impl StoreError {
    /// `true` when the underlying SQLite error is a busy/locked condition
    /// worth retrying with backoff.
    pub fn is_retryable(err: &sqlx::Error) -> bool {
        match err {
            sqlx::Error::Database(db) => matches!(
                db.code().as_deref(),
                // SQLITE_BUSY, SQLITE_LOCKED, SQLITE_BUSY_SNAPSHOT
                Some("5") | Some("6") | Some("517")
            ),
            _ => false,
        }
    }

    /// `true` when the underlying error is a unique-constraint violation.
    pub fn is_unique_violation(err: &sqlx::Error) -> bool {
        match err {
            sqlx::Error::Database(db) => db.is_unique_violation(),
            _ => false,
        }
    }
}
