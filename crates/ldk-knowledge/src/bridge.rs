//! The knowledge bridge: persistence-backed rule feedback and learning.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arc_swap::ArcSwap;
use regex::Regex;
use tracing::{info, warn};
use uuid::Uuid;

use ldk_schemas::{RuleSource, RuleState};
use ldk_store::{RuleRow, Store};

use crate::lifecycle::{apply_hit, apply_reject, entry_state_for_source, RuleCounters};
use crate::ruleset::RuleSet;

/// Account codes are `NNNN` or `NNNN-NN`.
pub const ACCOUNT_CODE_PATTERN: &str = r"^\d{4}(-\d{2})?$";

/// Fields for a newly learned rule.
#[derive(Clone, Debug)]
pub struct NewRuleFields {
    pub keyword: String,
    pub is_regex: bool,
    pub amount_min: Option<ldk_schemas::Micros>,
    pub amount_max: Option<ldk_schemas::Micros>,
    pub vendor_pattern: Option<String>,
    pub category: String,
    pub priority: i64,
}

/// Rule lifecycle service shared by the accounting and auditor workers.
pub struct KnowledgeBridge {
    store: Store,
    snapshot: ArcSwap<RuleSet>,
    account_code: Regex,
}

impl KnowledgeBridge {
    /// Build the bridge and load the initial snapshot.
    pub async fn open(store: Store) -> Result<Self> {
        let bridge = Self {
            store,
            snapshot: ArcSwap::from_pointee(RuleSet::default()),
            account_code: Regex::new(ACCOUNT_CODE_PATTERN).expect("static regex must compile"),
        };
        bridge.refresh().await?;
        Ok(bridge)
    }

    /// Current read-only snapshot. Lock-free; safe to hold across awaits.
    pub fn rules(&self) -> Arc<RuleSet> {
        self.snapshot.load_full()
    }

    /// Rebuild the snapshot from the store and swap it in atomically.
    pub async fn refresh(&self) -> Result<()> {
        let rows = self
            .store
            .load_active_rules()
            .await
            .context("load active rules")?;
        self.snapshot.store(Arc::new(RuleSet::build(rows)));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Feedback
    // -----------------------------------------------------------------------

    /// Audit approved a proposal that cited this rule.
    pub async fn record_hit(&self, rule_id: &str) -> Result<()> {
        let Some(rule) = self.store.get_rule(rule_id).await? else {
            warn!(rule_id, "record_hit for unknown rule");
            return Ok(());
        };
        let decision = apply_hit(rule.state, counters_of(&rule));
        self.persist_decision(&rule, decision.state, decision.counters)
            .await?;
        if decision.version_bumped {
            info!(rule_id, state = decision.state.as_str(), "rule promoted");
            self.refresh().await?;
        }
        Ok(())
    }

    /// Audit rejected a proposal that cited this rule.
    pub async fn record_reject(&self, rule_id: &str) -> Result<()> {
        let Some(rule) = self.store.get_rule(rule_id).await? else {
            warn!(rule_id, "record_reject for unknown rule");
            return Ok(());
        };
        let decision = apply_reject(rule.state, counters_of(&rule));
        self.persist_decision(&rule, decision.state, decision.counters)
            .await?;
        if decision.version_bumped {
            info!(rule_id, state = decision.state.as_str(), "rule demoted");
            self.refresh().await?;
        }
        Ok(())
    }

    async fn persist_decision(
        &self,
        rule: &RuleRow,
        state: RuleState,
        c: RuleCounters,
    ) -> Result<()> {
        self.store
            .update_rule_lifecycle(
                &rule.rule_id,
                state,
                c.hit_count,
                c.reject_count,
                c.consecutive_success,
                c.version,
                rule.valid_until_ms,
            )
            .await
            .context("persist rule lifecycle")?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Learning
    // -----------------------------------------------------------------------

    /// Learn a new rule. `MANUAL` source enters STABLE directly; `L2`
    /// entries start on probation as GRAY. A same-keyword predecessor is
    /// superseded (stamped `valid_until`, version carried forward).
    pub async fn learn(&self, fields: NewRuleFields, source: RuleSource) -> Result<String> {
        if !self.account_code.is_match(&fields.category) {
            bail!(
                "refusing to learn rule with invalid account code: {}",
                fields.category
            );
        }
        if fields.keyword.trim().is_empty() {
            bail!("refusing to learn rule with empty keyword");
        }
        if fields.is_regex {
            Regex::new(&fields.keyword)
                .with_context(|| format!("invalid rule regex: {}", fields.keyword))?;
        }

        // Supersede a same-keyword predecessor so history stays attributable.
        let mut version = 1;
        let existing: Vec<RuleRow> = self
            .store
            .load_active_rules()
            .await?
            .into_iter()
            .filter(|r| r.keyword.eq_ignore_ascii_case(&fields.keyword))
            .collect();
        // A stable or manual predecessor is protected: learning from L2
        // must not displace it. Checked before any supersession so a
        // refused learn retires nothing.
        if source == RuleSource::L2 {
            if let Some(trusted) = existing.iter().find(|r| r.state.is_trusted()) {
                bail!(
                    "refusing to supersede trusted rule {} from L2 learning",
                    trusted.rule_id
                );
            }
        }
        for old in &existing {
            self.store.retire_rule(&old.rule_id).await?;
            version = version.max(old.version + 1);
        }

        let rule_id = format!("r-{}", Uuid::new_v4());
        let state = entry_state_for_source(source);
        let row = RuleRow {
            rule_id: rule_id.clone(),
            keyword: fields.keyword,
            is_regex: fields.is_regex,
            amount_min: fields.amount_min,
            amount_max: fields.amount_max,
            vendor_pattern: fields.vendor_pattern,
            category: fields.category,
            priority: fields.priority,
            state,
            hit_count: 0,
            reject_count: 0,
            consecutive_success: 0,
            version,
            valid_until_ms: None,
            source,
            updated_at_ms: 0,
        };
        self.store.upsert_rule(&row).await?;
        info!(rule_id = %rule_id, state = state.as_str(), "rule learned");
        self.refresh().await?;
        Ok(rule_id)
    }

    // -----------------------------------------------------------------------
    // Distillation
    // -----------------------------------------------------------------------

    /// Remove grey rules that conflict with a trusted (stable/manual) rule
    /// on the same keyword but a different category. Trusted rules are never
    /// removed by this pass. Returns the retired rule ids.
    pub async fn distill(&self) -> Result<Vec<String>> {
        let rules = self.store.load_active_rules().await?;
        let mut retired = Vec::new();

        for gray in rules.iter().filter(|r| r.state == RuleState::Gray) {
            let conflict = rules.iter().any(|other| {
                other.state.is_trusted()
                    && other.keyword.eq_ignore_ascii_case(&gray.keyword)
                    && other.category != gray.category
            });
            if conflict {
                self.store.retire_rule(&gray.rule_id).await?;
                retired.push(gray.rule_id.clone());
            }
        }

        if !retired.is_empty() {
            info!(count = retired.len(), "distillation retired grey rules");
            self.refresh().await?;
        }
        Ok(retired)
    }

    // -----------------------------------------------------------------------
    // Rules file sync
    // -----------------------------------------------------------------------

    /// Serialize the active rule set to a local JSON file (one object per
    /// rule). Rules whose category fails account-code validation are skipped
    /// with a warning rather than poisoning the file.
    pub async fn sync_rules_file(&self, path: &Path) -> Result<usize> {
        let rules = self.store.load_active_rules().await?;
        let mut out = Vec::new();
        for rule in &rules {
            if !self.account_code.is_match(&rule.category) {
                warn!(rule_id = %rule.rule_id, category = %rule.category,
                      "skipping rule with invalid account code during sync");
                continue;
            }
            out.push(serde_json::json!({
                "rule_id": rule.rule_id,
                "keyword": rule.keyword,
                "is_regex": rule.is_regex,
                "category": rule.category,
                "priority": rule.priority,
                "state": rule.state.as_str(),
                "version": rule.version,
            }));
        }

        let body = serde_json::to_string_pretty(&out).context("serialize rules file")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("create {parent:?}"))?;
        }
        std::fs::write(path, body).with_context(|| format!("write rules file {path:?}"))?;
        Ok(out.len())
    }
}

fn counters_of(rule: &RuleRow) -> RuleCounters {
    RuleCounters {
        hit_count: rule.hit_count,
        reject_count: rule.reject_count,
        consecutive_success: rule.consecutive_success,
        version: rule.version,
    }
}
