//! Rule lifecycle state machine.
//!
//! # Invariants
//!
//! - `GRAY -> STABLE` requires N consecutive audit approvals with zero
//!   rejections recorded against the rule (N = 3 by default).
//! - `GRAY -> FAILED` at two rejections, regardless of interleaved hits.
//! - Rules learned from a human correction (`source = MANUAL`) enter
//!   `STABLE` directly and are never demoted by feedback — only an explicit
//!   operator block removes them.
//! - Every promotion or demotion bumps `version`; supersession stamps
//!   `valid_until` so historical entries stay attributable to the version
//!   that matched them.
//!
//! All logic here is pure and deterministic — no IO, no clock, no
//! randomness. Persistence happens in the bridge.

use ldk_schemas::RuleState;

/// Default consecutive approvals required for promotion.
pub const PROMOTE_AFTER: i64 = 3;

/// Rejections that demote a grey rule to FAILED.
pub const DEMOTE_AFTER_REJECTS: i64 = 2;

/// Feedback counters carried by every rule.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RuleCounters {
    pub hit_count: i64,
    pub reject_count: i64,
    pub consecutive_success: i64,
    pub version: i64,
}

/// One lifecycle decision: the new state and counters, plus whether the
/// version changed (promotion/demotion).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LifecycleDecision {
    pub state: RuleState,
    pub counters: RuleCounters,
    pub version_bumped: bool,
}

/// Apply an audit approval (the rule's proposal was approved).
pub fn apply_hit(state: RuleState, c: RuleCounters) -> LifecycleDecision {
    let mut counters = RuleCounters {
        hit_count: c.hit_count + 1,
        consecutive_success: c.consecutive_success + 1,
        ..c
    };

    match state {
        RuleState::Gray
            if counters.consecutive_success >= PROMOTE_AFTER && counters.reject_count == 0 =>
        {
            counters.version += 1;
            LifecycleDecision {
                state: RuleState::Stable,
                counters,
                version_bumped: true,
            }
        }
        // Terminal / trusted states just accumulate the hit.
        _ => LifecycleDecision {
            state,
            counters,
            version_bumped: false,
        },
    }
}

/// Apply an audit rejection against the rule.
pub fn apply_reject(state: RuleState, c: RuleCounters) -> LifecycleDecision {
    let mut counters = RuleCounters {
        reject_count: c.reject_count + 1,
        consecutive_success: 0,
        ..c
    };

    match state {
        RuleState::Gray if counters.reject_count >= DEMOTE_AFTER_REJECTS => {
            counters.version += 1;
            LifecycleDecision {
                state: RuleState::Failed,
                counters,
                version_bumped: true,
            }
        }
        // Manual/stable rules record the rejection but stay in force; a
        // human decision outranks automated feedback.
        _ => LifecycleDecision {
            state,
            counters,
            version_bumped: false,
        },
    }
}

/// Initial state for a learned rule.
pub fn entry_state_for_source(source: ldk_schemas::RuleSource) -> RuleState {
    match source {
        ldk_schemas::RuleSource::Manual => RuleState::Stable,
        ldk_schemas::RuleSource::L2 => RuleState::Gray,
    }
}
