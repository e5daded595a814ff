//! L1: the rule engine.
//!
//! Two matching paths over the shared rule-set snapshot:
//! - *fast*: exact keyword lookup on the vendor name (hash map, plain
//!   unconditional rules only);
//! - *full*: ordered walk (priority desc, then specificity) evaluating
//!   substring/regex keywords, amount ranges, and vendor patterns.
//!
//! A trusted (stable/manual) match carries the configured high-confidence
//! band; a grey match is accepted but flagged for shadow audit.

use regex::Regex;

use ldk_knowledge::RuleSet;
use ldk_schemas::{DocumentRecord, Micros};
use ldk_store::RuleRow;

/// Confidence bands assigned by rule trust level.
pub const TRUSTED_CONFIDENCE: f64 = 0.95;
pub const GRAY_CONFIDENCE: f64 = 0.75;

/// Outcome of an L1 pass.
#[derive(Clone, Debug)]
pub struct L1Match {
    pub rule_id: String,
    pub category: String,
    pub confidence: f64,
    /// Grey rules require the shadow audit even at a clean match.
    pub gray: bool,
    /// Which path found it (`fast` / `full`), for the inference log.
    pub path: &'static str,
}

/// Run the rule engine over one document.
pub fn classify_l1(rules: &RuleSet, doc: &DocumentRecord) -> Option<L1Match> {
    // Fast path: exact vendor keyword.
    if let Some(rule) = rules.fast_lookup(doc.vendor.trim()) {
        return Some(to_match(rule, "fast"));
    }

    // Full path: ordered evaluation with conditions.
    let haystack = format!("{} {}", doc.vendor, doc.summary).to_lowercase();
    for rule in rules.ordered() {
        if !keyword_matches(rule, &haystack) {
            continue;
        }
        if !amount_in_range(rule, doc.amount) {
            continue;
        }
        if !vendor_matches(rule, &doc.vendor) {
            continue;
        }
        return Some(to_match(rule, "full"));
    }
    None
}

fn to_match(rule: &RuleRow, path: &'static str) -> L1Match {
    let gray = !rule.state.is_trusted();
    L1Match {
        rule_id: rule.rule_id.clone(),
        category: rule.category.clone(),
        confidence: if gray {
            GRAY_CONFIDENCE
        } else {
            TRUSTED_CONFIDENCE
        },
        gray,
        path,
    }
}

fn keyword_matches(rule: &RuleRow, haystack: &str) -> bool {
    if rule.is_regex {
        // Invalid patterns were rejected at learn time; a stored invalid
        // pattern simply never matches.
        Regex::new(&rule.keyword)
            .map(|re| re.is_match(haystack))
            .unwrap_or(false)
    } else {
        haystack.contains(&rule.keyword.to_lowercase())
    }
}

fn amount_in_range(rule: &RuleRow, amount: Micros) -> bool {
    let magnitude = amount.abs();
    if let Some(lo) = rule.amount_min {
        if magnitude < lo {
            return false;
        }
    }
    if let Some(hi) = rule.amount_max {
        if magnitude > hi {
            return false;
        }
    }
    true
}

fn vendor_matches(rule: &RuleRow, vendor: &str) -> bool {
    match &rule.vendor_pattern {
        None => true,
        Some(pattern) => Regex::new(pattern)
            .map(|re| re.is_match(vendor))
            .unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ldk_schemas::{RuleSource, RuleState};

    fn doc(vendor: &str, summary: &str, amount_units: i64) -> DocumentRecord {
        DocumentRecord {
            trace_id: "t".to_string(),
            content_hash: "h".to_string(),
            source_path: "p".to_string(),
            vendor: vendor.to_string(),
            amount: Micros::from_units(amount_units),
            occurred_at_ms: 0,
            summary: summary.to_string(),
            group_id: None,
            project_id: None,
        }
    }

    fn rule(id: &str, keyword: &str, category: &str, state: RuleState) -> RuleRow {
        RuleRow {
            rule_id: id.to_string(),
            keyword: keyword.to_string(),
            is_regex: false,
            amount_min: None,
            amount_max: None,
            vendor_pattern: None,
            category: category.to_string(),
            priority: 0,
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
    fn fast_path_hits_exact_vendor() {
        let rules = RuleSet::build(vec![rule("r1", "Starbucks", "6601-02", RuleState::Stable)]);
        let m = classify_l1(&rules, &doc("Starbucks", "latte", -500)).unwrap();
        assert_eq!(m.rule_id, "r1");
        assert_eq!(m.path, "fast");
        assert!(!m.gray);
        assert!(m.confidence >= 0.9);
    }

    #[test]
    fn full_path_substring_match_in_summary() {
        let rules = RuleSet::build(vec![rule("r1", "云服务", "6602", RuleState::Stable)]);
        let m = classify_l1(&rules, &doc("ACME Cloud Inc.", "云服务年费", -4980)).unwrap();
        assert_eq!(m.path, "full");
        assert_eq!(m.category, "6602");
    }

    #[test]
    fn gray_match_flags_shadow_audit() {
        let rules = RuleSet::build(vec![rule("r1", "didi", "6601-03", RuleState::Gray)]);
        let m = classify_l1(&rules, &doc("DiDi", "ride", -35)).unwrap();
        assert!(m.gray);
        assert!(m.confidence < 0.9);
    }

    #[test]
    fn amount_condition_filters() {
        let mut r = rule("r1", "taxi", "6601-03", RuleState::Stable);
        r.amount_max = Some(Micros::from_units(100));
        let rules = RuleSet::build(vec![r]);

        assert!(classify_l1(&rules, &doc("taxi co", "taxi", -50)).is_some());
        assert!(classify_l1(&rules, &doc("taxi co", "taxi", -500)).is_none());
    }

    #[test]
    fn regex_rule_matches() {
        let mut r = rule("r1", r"star\w+ coffee", "6601-02", RuleState::Stable);
        r.is_regex = true;
        let rules = RuleSet::build(vec![r]);
        assert!(classify_l1(&rules, &doc("Starbucks Coffee", "", -30)).is_some());
        assert!(classify_l1(&rules, &doc("Moonbucks Tea", "", -30)).is_none());
    }

    #[test]
    fn priority_decides_between_competing_rules() {
        let mut high = rule("high", "coffee", "6601-02", RuleState::Stable);
        high.priority = 10;
        let low = rule("low", "coffee", "9999", RuleState::Stable);
        let rules = RuleSet::build(vec![low, high]);
        let m = classify_l1(&rules, &doc("Some Coffee House", "", -20)).unwrap();
        assert_eq!(m.rule_id, "high");
    }

    #[test]
    fn no_rules_no_match() {
        let rules = RuleSet::build(vec![]);
        assert!(classify_l1(&rules, &doc("Unknown Vendor", "", -1)).is_none());
    }
}
