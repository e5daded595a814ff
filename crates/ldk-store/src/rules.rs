//! Rule table persistence.
//!
//! The lifecycle decisions (promotion, demotion, distillation) live in
//! `ldk-knowledge`; this module only loads and writes rows. Feedback
//! counters are updated here so hit/reject accounting is one transactional
//! round-trip.

use sqlx::Row;

use ldk_schemas::{Micros, RuleSource, RuleState};

use crate::error::StoreError;
use crate::{now_ms, Store};

/// One rule row.
#[derive(Clone, Debug)]
pub struct RuleRow {
    pub rule_id: String,
    pub keyword: String,
    pub is_regex: bool,
    pub amount_min: Option<Micros>,
    pub amount_max: Option<Micros>,
    pub vendor_pattern: Option<String>,
    pub category: String,
    pub priority: i64,
    pub state: RuleState,
    pub hit_count: i64,
    pub reject_count: i64,
    pub consecutive_success: i64,
    pub version: i64,
    pub valid_until_ms: Option<i64>,
    pub source: RuleSource,
    pub updated_at_ms: i64,
}

fn row_to_rule(row: &sqlx::sqlite::SqliteRow) -> Result<RuleRow, StoreError> {
    let state_s: String = row.try_get("state")?;
    let source_s: String = row.try_get("source")?;
    Ok(RuleRow {
        rule_id: row.try_get("rule_id")?,
        keyword: row.try_get("keyword")?,
        is_regex: row.try_get::<i64, _>("is_regex")? != 0,
        amount_min: row
            .try_get::<Option<i64>, _>("amount_min_micros")?
            .map(Micros::new),
        amount_max: row
            .try_get::<Option<i64>, _>("amount_max_micros")?
            .map(Micros::new),
        vendor_pattern: row.try_get("vendor_pattern")?,
        category: row.try_get("category")?,
        priority: row.try_get("priority")?,
        state: RuleState::parse(&state_s)
            .map_err(|e| StoreError::Decode(format!("rule state: {e}")))?,
        hit_count: row.try_get("hit_count")?,
        reject_count: row.try_get("reject_count")?,
        consecutive_success: row.try_get("consecutive_success")?,
        version: row.try_get("version")?,
        valid_until_ms: row.try_get("valid_until_ms")?,
        source: RuleSource::parse(&source_s)
            .map_err(|e| StoreError::Decode(format!("rule source: {e}")))?,
        updated_at_ms: row.try_get("updated_at_ms")?,
    })
}

const RULE_COLUMNS: &str = "rule_id, keyword, is_regex, amount_min_micros, amount_max_micros, \
     vendor_pattern, category, priority, state, hit_count, reject_count, \
     consecutive_success, version, valid_until_ms, source, updated_at_ms";

impl Store {
    /// All rules still in force (`valid_until` unset or in the future).
    pub async fn load_active_rules(&self) -> Result<Vec<RuleRow>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            select {RULE_COLUMNS} from rules
            where valid_until_ms is null or valid_until_ms > $1
            order by priority desc, rule_id asc
            "#
        ))
        .bind(now_ms())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_rule).collect()
    }

    pub async fn get_rule(&self, rule_id: &str) -> Result<Option<RuleRow>, StoreError> {
        let row = sqlx::query(&format!(
            "select {RULE_COLUMNS} from rules where rule_id = $1"
        ))
        .bind(rule_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_rule).transpose()
    }

    /// Insert or fully replace one rule row.
    pub async fn upsert_rule(&self, rule: &RuleRow) -> Result<(), StoreError> {
        let now = now_ms();
        sqlx::query(
            r#"
            insert into rules (
                rule_id, keyword, is_regex, amount_min_micros, amount_max_micros,
                vendor_pattern, category, priority, state, hit_count, reject_count,
                consecutive_success, version, valid_until_ms, source,
                inserted_at_ms, updated_at_ms
            ) values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$16)
            on conflict (rule_id) do update set
                keyword = excluded.keyword,
                is_regex = excluded.is_regex,
                amount_min_micros = excluded.amount_min_micros,
                amount_max_micros = excluded.amount_max_micros,
                vendor_pattern = excluded.vendor_pattern,
                category = excluded.category,
                priority = excluded.priority,
                state = excluded.state,
                hit_count = excluded.hit_count,
                reject_count = excluded.reject_count,
                consecutive_success = excluded.consecutive_success,
                version = excluded.version,
                valid_until_ms = excluded.valid_until_ms,
                source = excluded.source,
                updated_at_ms = excluded.updated_at_ms
            "#,
        )
        .bind(&rule.rule_id)
        .bind(&rule.keyword)
        .bind(rule.is_regex as i64)
        .bind(rule.amount_min.map(Micros::raw))
        .bind(rule.amount_max.map(Micros::raw))
        .bind(&rule.vendor_pattern)
        .bind(&rule.category)
        .bind(rule.priority)
        .bind(rule.state.as_str())
        .bind(rule.hit_count)
        .bind(rule.reject_count)
        .bind(rule.consecutive_success)
        .bind(rule.version)
        .bind(rule.valid_until_ms)
        .bind(rule.source.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Apply a lifecycle decision atomically: counters, state, version, and
    /// optional supersession stamp in one statement.
    pub async fn update_rule_lifecycle(
        &self,
        rule_id: &str,
        state: RuleState,
        hit_count: i64,
        reject_count: i64,
        consecutive_success: i64,
        version: i64,
        valid_until_ms: Option<i64>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            update rules
            set state = $1, hit_count = $2, reject_count = $3,
                consecutive_success = $4, version = $5, valid_until_ms = $6,
                updated_at_ms = $7
            where rule_id = $8
            "#,
        )
        .bind(state.as_str())
        .bind(hit_count)
        .bind(reject_count)
        .bind(consecutive_success)
        .bind(version)
        .bind(valid_until_ms)
        .bind(now_ms())
        .bind(rule_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Retire a rule by stamping `valid_until` (distillation removal path —
    /// rows are never deleted so historical entries stay attributable).
    pub async fn retire_rule(&self, rule_id: &str) -> Result<(), StoreError> {
        let now = now_ms();
        sqlx::query(
            r#"
            update rules
            set valid_until_ms = $1, updated_at_ms = $1
            where rule_id = $2
            "#,
        )
        .bind(now)
        .bind(rule_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
