//! Privacy guard and egress proxy.
//!
//! Nothing leaves this process for an external inference or notification
//! endpoint except through [`EgressProxy`], and the proxy pushes every
//! payload through [`PrivacyGuard`] first — regardless of whether the caller
//! already sanitized. Redactions are observable only as per-category counts;
//! raw values are never logged.

pub mod budget;
pub mod guard;
pub mod provider;
pub mod proxy;

pub use budget::TokenBudget;
pub use guard::{PrivacyGuard, Sanitized};
pub use provider::{HttpInferenceProvider, InferenceProvider, InferenceRequest, InferenceResponse};
pub use proxy::{EgressError, EgressProxy};
