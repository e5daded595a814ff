//! The judge panel.
//!
//! Three judges evaluate distinct facets of a proposal under a common
//! contract; dynamic dispatch by role is a small sum type, not trait
//! objects. Everything here is pure and deterministic so the test suite can
//! pin behavior exactly.

use regex::Regex;

use ldk_schemas::Micros;

/// Facets of the heterogeneous consensus.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Judge {
    /// Keywords, red lines, category presence.
    Compliance,
    /// Amount-tier escalation.
    Finance,
    /// Vendor-vs-category plausibility.
    Tax,
}

/// One judge's verdict.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JudgeVerdict {
    pub judge: Judge,
    pub pass: bool,
    /// A critical verdict overrides any vote tally and forces rejection.
    pub critical: bool,
    pub reason: String,
}

/// Input facts shared by all judges.
#[derive(Clone, Debug)]
pub struct AuditFacts {
    pub vendor: String,
    pub category: String,
    pub amount: Micros,
    pub summary: String,
    /// Classifier confidence of the proposal.
    pub proposal_confidence: f64,
    /// Whether the proposal cited a grey rule or was flagged for shadow
    /// audit by the router.
    pub shadow_audit: bool,
}

/// Panel configuration (mapped from `audit.*` config).
#[derive(Clone, Debug)]
pub struct PanelOptions {
    /// Red-line patterns; literal substrings unless they compile as regex.
    pub red_lines: Vec<String>,
    /// First escalation tier (absolute amount, micros).
    pub tier_t1: Micros,
}

/// Compiled red-line set.
pub struct RedLines {
    literals: Vec<String>,
    patterns: Vec<Regex>,
}

impl RedLines {
    pub fn compile(raw: &[String]) -> Self {
        let mut literals = Vec::new();
        let mut patterns = Vec::new();
        for line in raw {
            // Treat anything that compiles and contains a regex metachar as
            // a pattern; plain words stay literal so `奢侈品` never needs
            // escaping.
            let has_meta = line.chars().any(|c| r"\.[]{}()*+?|^$".contains(c));
            match (has_meta, Regex::new(line)) {
                (true, Ok(re)) => patterns.push(re),
                _ => literals.push(line.clone()),
            }
        }
        Self { literals, patterns }
    }

    /// First red line matched by the haystack, if any.
    pub fn first_hit(&self, haystack: &str) -> Option<String> {
        for lit in &self.literals {
            if haystack.contains(lit.as_str()) {
                return Some(lit.clone());
            }
        }
        for re in &self.patterns {
            if re.is_match(haystack) {
                return Some(re.as_str().to_string());
            }
        }
        None
    }
}

/// Evaluate one judge.
pub fn evaluate(judge: Judge, facts: &AuditFacts, red_lines: &RedLines, opts: &PanelOptions) -> JudgeVerdict {
    match judge {
        Judge::Compliance => compliance(facts, red_lines),
        Judge::Finance => finance(facts, opts),
        Judge::Tax => tax(facts),
    }
}

fn compliance(facts: &AuditFacts, red_lines: &RedLines) -> JudgeVerdict {
    let haystack = format!("{} {} {}", facts.vendor, facts.summary, facts.category);
    if let Some(hit) = red_lines.first_hit(&haystack) {
        return JudgeVerdict {
            judge: Judge::Compliance,
            pass: false,
            critical: true,
            reason: format!("red line hit: {hit}"),
        };
    }
    if facts.category.trim().is_empty() {
        return JudgeVerdict {
            judge: Judge::Compliance,
            pass: false,
            critical: false,
            reason: "no category proposed".to_string(),
        };
    }
    JudgeVerdict {
        judge: Judge::Compliance,
        pass: true,
        critical: false,
        reason: "no red lines".to_string(),
    }
}

fn finance(facts: &AuditFacts, opts: &PanelOptions) -> JudgeVerdict {
    let magnitude = facts.amount.abs();
    let t1 = opts.tier_t1;
    let t10 = Micros::new(t1.raw().saturating_mul(10));

    if magnitude > t10 {
        JudgeVerdict {
            judge: Judge::Finance,
            pass: false,
            critical: true,
            reason: format!("amount {} exceeds extreme tier (10xT1 = {})", facts.amount, t10),
        }
    } else if magnitude > t1 {
        JudgeVerdict {
            judge: Judge::Finance,
            pass: false,
            critical: false,
            reason: format!("amount {} exceeds tier T1 ({})", facts.amount, t1),
        }
    } else {
        JudgeVerdict {
            judge: Judge::Finance,
            pass: true,
            critical: false,
            reason: "within tier".to_string(),
        }
    }
}

fn tax(facts: &AuditFacts) -> JudgeVerdict {
    if facts.vendor.trim().is_empty() {
        return JudgeVerdict {
            judge: Judge::Tax,
            pass: false,
            critical: false,
            reason: "no vendor for plausibility check".to_string(),
        };
    }
    // The suspense category is never plausible on its own.
    if facts.category == "9999" {
        return JudgeVerdict {
            judge: Judge::Tax,
            pass: false,
            critical: false,
            reason: "unclassified suspense category".to_string(),
        };
    }
    let code_ok = facts.category.len() >= 4
        && facts
            .category
            .chars()
            .take(4)
            .all(|c| c.is_ascii_digit());
    if !code_ok {
        return JudgeVerdict {
            judge: Judge::Tax,
            pass: false,
            critical: false,
            reason: format!("malformed account code: {}", facts.category),
        };
    }
    JudgeVerdict {
        judge: Judge::Tax,
        pass: true,
        critical: false,
        reason: "vendor/category plausible".to_string(),
    }
}
