//! Accounting agent: document records in, proposed ledger entries out.
//!
//! Classification is rule-routed with two tiers: L1 (the rule engine over
//! the knowledge bridge's snapshot) and L2 (an external reason-act loop
//! behind the egress proxy). A circuit breaker and the token budget both
//! degrade the router to L1-only-with-review; a response cache suppresses
//! duplicate external calls.

pub mod cache;
pub mod circuit;
pub mod l1;
pub mod l2;
pub mod router;
pub mod worker;

pub use circuit::{BreakerState, CircuitBreaker};
pub use l2::{L2Decision, L2Options, L2Toolbox, NoTools};
pub use router::{Proposal, Router, RouterOptions, UNCLASSIFIED_CATEGORY};
pub use worker::AccountingWorker;
