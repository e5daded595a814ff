//! Token budget accounting for the external inference tier.
//!
//! Usage is persisted per period key (`D:<date>` and `M:<month>`) so budgets
//! survive restarts. The budget *decisions* live with the egress proxy; this
//! module only counts.

use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::{now_ms, Store};

/// Period keys for a given instant.
pub fn period_keys(at: DateTime<Utc>) -> (String, String) {
    (
        format!("D:{}", at.format("%Y-%m-%d")),
        format!("M:{}", at.format("%Y-%m")),
    )
}

impl Store {
    /// Add `tokens` to both the daily and monthly counters for `at`.
    pub async fn record_token_usage(
        &self,
        at: DateTime<Utc>,
        tokens: i64,
    ) -> Result<(), StoreError> {
        let (day, month) = period_keys(at);
        let now = now_ms();
        for key in [day, month] {
            sqlx::query(
                r#"
                insert into token_usage (period_key, tokens_used, updated_at_ms)
                values ($1, $2, $3)
                on conflict (period_key) do update
                    set tokens_used = token_usage.tokens_used + excluded.tokens_used,
                        updated_at_ms = excluded.updated_at_ms
                "#,
            )
            .bind(&key)
            .bind(tokens)
            .bind(now)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// `(daily_used, monthly_used)` for the periods containing `at`.
    pub async fn token_usage(&self, at: DateTime<Utc>) -> Result<(i64, i64), StoreError> {
        let (day, month) = period_keys(at);
        let mut out = [0i64; 2];
        for (i, key) in [day, month].iter().enumerate() {
            let row: Option<(i64,)> =
                sqlx::query_as("select tokens_used from token_usage where period_key = $1")
                    .bind(key)
                    .fetch_optional(&self.pool)
                    .await?;
            out[i] = row.map(|(n,)| n).unwrap_or(0);
        }
        Ok((out[0], out[1]))
    }
}
