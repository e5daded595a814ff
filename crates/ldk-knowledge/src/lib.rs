//! Knowledge bridge: rule lifecycle, feedback accounting, and the read-only
//! rule-set snapshot consumed by the L1 classifier.
//!
//! Rule tables are read-mostly: the bridge rebuilds an ordered snapshot on
//! every change and swaps it atomically (`arc-swap`), so classification
//! never takes a lock and never observes a half-updated rule list.

pub mod bridge;
pub mod lifecycle;
pub mod ruleset;

pub use bridge::{KnowledgeBridge, NewRuleFields};
pub use lifecycle::{apply_hit, apply_reject, LifecycleDecision, RuleCounters};
pub use ruleset::RuleSet;
