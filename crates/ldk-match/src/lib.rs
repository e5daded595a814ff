//! Reconciliation: pending bank/payment flows against posted ledger entries.

pub mod engine;
pub mod score;
pub mod worker;

pub use engine::{MatchDecision, MatchEngine, MatchOptions, PassReport};
pub use worker::MatchWorker;
