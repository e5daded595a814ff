//! Immutable rule-set snapshot.
//!
//! Built once per refresh and shared read-only. Ordering: priority
//! descending, then specificity (longer keyword first, then narrower amount
//! range), then rule id for determinism. A fast exact-keyword map indexes
//! the plain (non-regex, unconditional) rules for the L1 fast path.

use std::collections::HashMap;

use ldk_store::RuleRow;

/// Ordered, indexed view over the active rules.
#[derive(Default)]
pub struct RuleSet {
    ordered: Vec<RuleRow>,
    /// Lowercased exact keyword -> index into `ordered`. Plain rules only.
    fast: HashMap<String, usize>,
}

impl RuleSet {
    pub fn build(mut rules: Vec<RuleRow>) -> Self {
        rules.retain(|r| r.state.is_matchable());
        rules.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| b.keyword.chars().count().cmp(&a.keyword.chars().count()))
                .then_with(|| amount_span(a).cmp(&amount_span(b)))
                .then_with(|| a.rule_id.cmp(&b.rule_id))
        });

        let mut fast = HashMap::new();
        for (i, rule) in rules.iter().enumerate() {
            if !rule.is_regex && rule.amount_min.is_none() && rule.amount_max.is_none() {
                // First (highest-ranked) rule wins a contested keyword.
                fast.entry(rule.keyword.to_lowercase()).or_insert(i);
            }
        }

        Self {
            ordered: rules,
            fast,
        }
    }

    /// All matchable rules in evaluation order.
    pub fn ordered(&self) -> &[RuleRow] {
        &self.ordered
    }

    /// Fast-path lookup: exact keyword, case-insensitive.
    pub fn fast_lookup(&self, keyword: &str) -> Option<&RuleRow> {
        self.fast
            .get(&keyword.to_lowercase())
            .map(|&i| &self.ordered[i])
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

/// Width of a rule's amount condition; unconstrained counts as widest.
fn amount_span(rule: &RuleRow) -> i64 {
    match (rule.amount_min, rule.amount_max) {
        (Some(lo), Some(hi)) => (hi.raw() - lo.raw()).abs(),
        _ => i64::MAX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ldk_schemas::{Micros, RuleSource, RuleState};

    fn rule(id: &str, keyword: &str, priority: i64, state: RuleState) -> RuleRow {
        RuleRow {
            rule_id: id.to_string(),
            keyword: keyword.to_string(),
            is_regex: false,
            amount_min: None,
            amount_max: None,
            vendor_pattern: None,
            category: "6601".to_string(),
            priority,
            state,
            hit_count: 0,
            reject_count: 0,
            consecutive_success: 0,
            version: 1,
            valid_until_ms: None,
            source: RuleSource::L2,
            updated_at_ms: 0,
        }
    }

    #[test]
    fn failed_and_blocked_rules_excluded() {
        let set = RuleSet::build(vec![
            rule("a", "coffee", 1, RuleState::Stable),
            rule("b", "coffee beans", 1, RuleState::Failed),
            rule("c", "tea", 1, RuleState::Blocked),
        ]);
        assert_eq!(set.len(), 1);
        assert_eq!(set.ordered()[0].rule_id, "a");
    }

    #[test]
    fn priority_then_keyword_length_orders() {
        let set = RuleSet::build(vec![
            rule("low", "starbucks reserve", 1, RuleState::Stable),
            rule("high", "star", 5, RuleState::Stable),
            rule("longer", "starbucks", 1, RuleState::Stable),
        ]);
        let ids: Vec<_> = set.ordered().iter().map(|r| r.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["high", "low", "longer"]);
    }

    #[test]
    fn narrower_amount_range_ranks_first_at_equal_keyword() {
        let mut wide = rule("wide", "taxi", 1, RuleState::Stable);
        wide.amount_min = Some(Micros::from_units(0));
        wide.amount_max = Some(Micros::from_units(1_000));
        let mut narrow = rule("narrow", "taxi", 1, RuleState::Stable);
        narrow.amount_min = Some(Micros::from_units(0));
        narrow.amount_max = Some(Micros::from_units(100));

        let set = RuleSet::build(vec![wide, narrow]);
        assert_eq!(set.ordered()[0].rule_id, "narrow");
    }

    #[test]
    fn fast_lookup_skips_conditional_rules() {
        let mut conditional = rule("cond", "taxi", 9, RuleState::Stable);
        conditional.amount_max = Some(Micros::from_units(50));
        let plain = rule("plain", "taxi", 1, RuleState::Stable);

        let set = RuleSet::build(vec![conditional, plain]);
        // The conditional rule outranks in `ordered`, but the fast map only
        // serves plain rules.
        assert_eq!(set.fast_lookup("TAXI").unwrap().rule_id, "plain");
    }
}
