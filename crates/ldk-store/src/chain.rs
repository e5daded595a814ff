//! Hash chain over the ledger.
//!
//! Every appended entry links to its predecessor:
//! `chain_hash = SHA-256(prev_hash ∥ amount ∥ vendor ∥ category ∥ trace_id ∥ occurred_at)`
//! with fields joined by an ASCII unit separator so `("ab", "c")` and
//! `("a", "bc")` cannot collide. The head pointer lives in the singleton
//! `chain_head` row and is advanced with a compare-and-swap inside the append
//! transaction.
//!
//! A verified break sets the `sys_chain_state` freeze latch: appends are
//! refused until an operator rolls back to a snapshot or explicitly clears
//! the latch.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use sqlx::Row;

use crate::{now_ms, Store};

/// Hash value of the empty chain (before the first entry).
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Compute the chain hash for one entry given its predecessor's hash.
pub fn chain_hash(
    prev_hash: &str,
    amount_micros: i64,
    vendor: &str,
    category: &str,
    trace_id: &str,
    occurred_at_ms: i64,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update([0x1f]);
    hasher.update(amount_micros.to_string().as_bytes());
    hasher.update([0x1f]);
    hasher.update(vendor.as_bytes());
    hasher.update([0x1f]);
    hasher.update(category.as_bytes());
    hasher.update([0x1f]);
    hasher.update(trace_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(occurred_at_ms.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Outcome of a chain verification pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChainVerdict {
    /// Every row in the range links and hashes correctly.
    Valid { rows: usize },
    /// The chain is broken at the given entry id.
    Broken { entry_id: i64, reason: String },
}

impl ChainVerdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, ChainVerdict::Valid { .. })
    }
}

impl Store {
    /// Recompute and verify the chain over entries with `from_id <= id <= to_id`.
    ///
    /// When `from_id > 1` the predecessor row's stored `chain_hash` seeds the
    /// recomputation, so sliding-window verification composes with full-range
    /// verification.
    pub async fn verify_chain(&self, from_id: i64, to_id: i64) -> Result<ChainVerdict> {
        let mut prev_hash: String = if from_id <= 1 {
            GENESIS_HASH.to_string()
        } else {
            let row = sqlx::query(
                r#"
                select chain_hash from ledger_entries
                where id < $1
                order by id desc
                limit 1
                "#,
            )
            .bind(from_id)
            .fetch_optional(&self.pool)
            .await
            .context("verify_chain predecessor query failed")?;
            match row {
                Some(r) => r.try_get("chain_hash")?,
                None => GENESIS_HASH.to_string(),
            }
        };

        let rows = sqlx::query(
            r#"
            select id, trace_id, amount_micros, vendor, category, occurred_at_ms,
                   prev_hash, chain_hash
            from ledger_entries
            where id >= $1 and id <= $2
            order by id asc
            "#,
        )
        .bind(from_id)
        .bind(to_id)
        .fetch_all(&self.pool)
        .await
        .context("verify_chain range query failed")?;

        let mut count = 0usize;
        for row in rows {
            let id: i64 = row.try_get("id")?;
            let stored_prev: String = row.try_get("prev_hash")?;
            let stored_self: String = row.try_get("chain_hash")?;

            if stored_prev != prev_hash {
                return Ok(ChainVerdict::Broken {
                    entry_id: id,
                    reason: format!(
                        "prev_hash mismatch: expected {prev_hash}, stored {stored_prev}"
                    ),
                });
            }

            let recomputed = chain_hash(
                &stored_prev,
                row.try_get("amount_micros")?,
                row.try_get::<String, _>("vendor")?.as_str(),
                row.try_get::<String, _>("category")?.as_str(),
                row.try_get::<String, _>("trace_id")?.as_str(),
                row.try_get("occurred_at_ms")?,
            );
            if recomputed != stored_self {
                return Ok(ChainVerdict::Broken {
                    entry_id: id,
                    reason: format!(
                        "chain_hash mismatch: recomputed {recomputed}, stored {stored_self}"
                    ),
                });
            }

            prev_hash = stored_self;
            count += 1;
        }

        Ok(ChainVerdict::Valid { rows: count })
    }

    /// Last appended entry id (0 when the ledger is empty).
    pub async fn chain_head_id(&self) -> Result<i64> {
        let (id,): (i64,) =
            sqlx::query_as("select last_entry_id from chain_head where head_id = 1")
                .fetch_one(&self.pool)
                .await
                .context("chain_head query failed")?;
        Ok(id)
    }

    /// Refuse all further appends, recording the cause.
    pub async fn freeze_appends(&self, reason: &str) -> Result<()> {
        sqlx::query(
            r#"
            update sys_chain_state
            set appends_frozen = 1, frozen_reason = $1, updated_at_ms = $2
            where sentinel_id = 1
            "#,
        )
        .bind(reason)
        .bind(now_ms())
        .execute(&self.pool)
        .await
        .context("freeze_appends failed")?;
        Ok(())
    }

    /// Operator override: clear the freeze latch.
    pub async fn unfreeze_appends(&self) -> Result<()> {
        sqlx::query(
            r#"
            update sys_chain_state
            set appends_frozen = 0, frozen_reason = null, updated_at_ms = $1
            where sentinel_id = 1
            "#,
        )
        .bind(now_ms())
        .execute(&self.pool)
        .await
        .context("unfreeze_appends failed")?;
        Ok(())
    }

    /// Current freeze state: `None` when appends are allowed, otherwise the
    /// recorded reason.
    pub async fn appends_frozen(&self) -> Result<Option<String>> {
        let row: (i64, Option<String>) = sqlx::query_as(
            "select appends_frozen, frozen_reason from sys_chain_state where sentinel_id = 1",
        )
        .fetch_one(&self.pool)
        .await
        .context("appends_frozen query failed")?;
        if row.0 != 0 {
            Ok(Some(row.1.unwrap_or_else(|| "unspecified".to_string())))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_hash_is_deterministic() {
        let a = chain_hash(GENESIS_HASH, -500_000_000, "Starbucks", "6601", "t-1", 1_000);
        let b = chain_hash(GENESIS_HASH, -500_000_000, "Starbucks", "6601", "t-1", 1_000);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn chain_hash_sensitive_to_every_field() {
        let base = chain_hash(GENESIS_HASH, 1, "v", "c", "t", 9);
        assert_ne!(base, chain_hash("ff", 1, "v", "c", "t", 9));
        assert_ne!(base, chain_hash(GENESIS_HASH, 2, "v", "c", "t", 9));
        assert_ne!(base, chain_hash(GENESIS_HASH, 1, "w", "c", "t", 9));
        assert_ne!(base, chain_hash(GENESIS_HASH, 1, "v", "d", "t", 9));
        assert_ne!(base, chain_hash(GENESIS_HASH, 1, "v", "c", "u", 9));
        assert_ne!(base, chain_hash(GENESIS_HASH, 1, "v", "c", "t", 10));
    }

    #[test]
    fn field_separator_prevents_concatenation_collisions() {
        let a = chain_hash(GENESIS_HASH, 1, "ab", "c", "t", 9);
        let b = chain_hash(GENESIS_HASH, 1, "a", "bc", "t", 9);
        assert_ne!(a, b);
    }
}
