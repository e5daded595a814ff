//! Auditor agent: rule-plus-consensus audit over proposed entries.

pub mod engine;
pub mod history;
pub mod judges;
pub mod worker;

pub use engine::{
    decide, engine_options, AuditDecision, AuditOutcome, EngineOptions, VotingStrategy,
};
pub use judges::{AuditFacts, Judge, JudgeVerdict, PanelOptions, RedLines};
pub use worker::AuditorWorker;
