//! Shared entity types for the LedgerDesk core.
//!
//! This crate holds only data definitions: state enums with their legal
//! transitions, the fixed-point money type, the request context that carries
//! a trace id across worker boundaries, and the JSON envelopes exchanged with
//! external channels. No IO, no persistence, no async.

pub mod context;
pub mod document;
pub mod money;
pub mod states;

pub use context::TraceContext;
pub use document::{
    CardButton, CardEnvelope, CallbackAction, CallbackRequest, DocumentRecord, InferenceLog,
    InferenceStep,
};
pub use money::Micros;
pub use states::{
    CardStatus, EntryState, OutboxKind, OutboxStatus, PendingSource, PendingStatus, RuleSource,
    RuleState, WorkerState,
};
