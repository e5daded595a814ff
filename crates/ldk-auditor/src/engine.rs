//! The audit decision engine.
//!
//! Deterministic pipeline: red lines first (critical veto, short-circuit),
//! then the three-judge panel under the configured voting strategy, then
//! historical consistency, then the confidence blend that routes low-band
//! proposals to review instead of posting.

use ldk_schemas::Micros;
use ldk_store::VendorHistoryRow;

use crate::history::history_risk_points;
use crate::judges::{evaluate, AuditFacts, Judge, JudgeVerdict, PanelOptions, RedLines};

/// Voting strategies over the three judges.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VotingStrategy {
    /// Unanimity.
    Strict,
    /// Two of three.
    Balanced,
    /// One of three (still subject to critical vetoes).
    Growth,
}

/// Final audit decision for one proposal.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AuditDecision {
    Approved,
    /// Posted but flagged: the vote passed while history deviates hard.
    ApprovedWithRisk,
    NeedsReview,
    Rejected,
}

/// The decision plus the full reason vector and blended confidence.
#[derive(Clone, Debug)]
pub struct AuditOutcome {
    pub decision: AuditDecision,
    pub reasons: Vec<String>,
    pub confidence: f64,
    pub verdicts: Vec<JudgeVerdict>,
    pub risk_points: u32,
}

/// Engine configuration.
#[derive(Clone, Debug)]
pub struct EngineOptions {
    pub strategy: VotingStrategy,
    pub panel: PanelOptions,
    /// Blended confidence below this routes to NEEDS_REVIEW.
    pub low_confidence_band: f64,
    pub history_category_bound: f64,
    pub history_price_bound: f64,
}

/// Run the audit over one proposal.
pub fn decide(
    facts: &AuditFacts,
    history: &[VendorHistoryRow],
    now_ms: i64,
    opts: &EngineOptions,
) -> AuditOutcome {
    let red_lines = RedLines::compile(&opts.panel.red_lines);
    let mut reasons = Vec::new();

    // 1) Judge panel (compliance carries the red-line veto).
    let verdicts: Vec<JudgeVerdict> = [Judge::Compliance, Judge::Finance, Judge::Tax]
        .into_iter()
        .map(|j| evaluate(j, facts, &red_lines, &opts.panel))
        .collect();

    for v in &verdicts {
        reasons.push(format!("{:?}: {} ({})", v.judge, if v.pass { "pass" } else { "fail" }, v.reason));
    }

    // Critical verdicts override everything.
    if verdicts.iter().any(|v| v.critical) {
        return AuditOutcome {
            decision: AuditDecision::Rejected,
            reasons,
            confidence: 0.0,
            verdicts,
            risk_points: 0,
        };
    }

    let passes = verdicts.iter().filter(|v| v.pass).count();
    let needed = match opts.strategy {
        VotingStrategy::Strict => 3,
        VotingStrategy::Balanced => 2,
        VotingStrategy::Growth => 1,
    };
    let vote_ok = passes >= needed;

    // 2) Historical consistency.
    let risk_points = history_risk_points(
        history,
        &facts.category,
        facts.amount,
        now_ms,
        opts.history_category_bound,
        opts.history_price_bound,
    );
    if risk_points > 0 {
        reasons.push(format!("history: {risk_points} risk point(s)"));
    }

    // 3) Confidence blend: rule quality, consensus margin, history.
    let consensus_margin = passes as f64 / 3.0;
    let history_score = 1.0 - (risk_points as f64 / 2.0).min(1.0);
    let confidence =
        0.5 * facts.proposal_confidence + 0.3 * consensus_margin + 0.2 * history_score;
    let confidence = confidence.clamp(0.0, 1.0);

    // 4) Route.
    let decision = if !vote_ok {
        reasons.push(format!(
            "vote failed: {passes}/3 passes under {:?}",
            opts.strategy
        ));
        AuditDecision::NeedsReview
    } else if facts.shadow_audit && confidence < opts.low_confidence_band {
        reasons.push("shadow audit with low blended confidence".to_string());
        AuditDecision::NeedsReview
    } else if confidence < opts.low_confidence_band {
        reasons.push(format!(
            "confidence {confidence:.2} below band {:.2}",
            opts.low_confidence_band
        ));
        AuditDecision::NeedsReview
    } else if risk_points >= 2 {
        AuditDecision::ApprovedWithRisk
    } else {
        AuditDecision::Approved
    };

    AuditOutcome {
        decision,
        reasons,
        confidence,
        verdicts,
        risk_points,
    }
}

/// Convenience: default engine options over config primitives.
pub fn engine_options(
    strategy: VotingStrategy,
    red_lines: Vec<String>,
    tier_t1_units: i64,
    low_confidence_band: f64,
    history_category_bound: f64,
    history_price_bound: f64,
) -> EngineOptions {
    EngineOptions {
        strategy,
        panel: PanelOptions {
            red_lines,
            tier_t1: Micros::from_units(tier_t1_units),
        },
        low_confidence_band,
        history_category_bound,
        history_price_bound,
    }
}
