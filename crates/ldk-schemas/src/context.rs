//! Request context carried across worker boundaries.
//!
//! Every cross-boundary call (store write, egress request, outbox enqueue)
//! takes a [`TraceContext`] value instead of reading process-local state.
//! Log spans and egress metadata are derived from it, so one document can be
//! followed from the drop folder to the posted entry.

use uuid::Uuid;

/// Identity of one unit of work flowing through the pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceContext {
    /// Globally unique trace id. Assigned once at ingestion and reused by
    /// every downstream stage; the ledger's unique index on `trace_id` makes
    /// duplicate ingestion idempotent.
    pub trace_id: String,
    /// Name of the worker currently holding the work item.
    pub worker: &'static str,
}

impl TraceContext {
    /// Mint a fresh trace id for newly ingested work.
    pub fn new(worker: &'static str) -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string(),
            worker,
        }
    }

    /// Resume an existing trace in a different worker.
    pub fn resume(trace_id: impl Into<String>, worker: &'static str) -> Self {
        Self {
            trace_id: trace_id.into(),
            worker,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_mints_distinct_trace_ids() {
        let a = TraceContext::new("collector");
        let b = TraceContext::new("collector");
        assert_ne!(a.trace_id, b.trace_id);
    }

    #[test]
    fn resume_preserves_trace_id() {
        let a = TraceContext::new("collector");
        let b = TraceContext::resume(a.trace_id.clone(), "accounting");
        assert_eq!(a.trace_id, b.trace_id);
        assert_eq!(b.worker, "accounting");
    }
}
