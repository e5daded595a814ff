//! Cross-worker payload types.
//!
//! [`DocumentRecord`] is what the Collector hands the AccountingAgent;
//! [`InferenceLog`] is the provenance blob persisted on every ledger entry;
//! [`CardEnvelope`] / [`CallbackRequest`] are the JSON surfaces shared with
//! external channels (outbound cards, webhook callbacks).

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::money::Micros;

// ---------------------------------------------------------------------------
// Document record
// ---------------------------------------------------------------------------

/// A parsed source document (invoice / receipt) awaiting classification.
///
/// Statement lines do not become documents — they are written directly as
/// pending entries. Documents always originate from an invoice or receipt
/// capture and carry the OCR-extracted fields.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Trace id minted at ingestion; becomes the ledger entry's `trace_id`.
    pub trace_id: String,
    /// Full SHA-256 of the source file, hex-encoded.
    pub content_hash: String,
    /// Original file path (for operator display only).
    pub source_path: String,
    /// Vendor / payee as extracted.
    pub vendor: String,
    /// Signed amount.
    pub amount: Micros,
    /// When the underlying transaction occurred (epoch ms UTC).
    pub occurred_at_ms: i64,
    /// Free-text line items / remark, used by classification.
    pub summary: String,
    /// Shared id linking multimodal captures of the same purchase.
    pub group_id: Option<String>,
    /// Optional project dimension.
    pub project_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Inference log
// ---------------------------------------------------------------------------

/// One step of classification reasoning.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InferenceStep {
    /// Stage label: `input_analysis`, `routing`, `rule_match`, `l2_step`,
    /// `dimension_extraction`, `confidence`.
    pub stage: String,
    /// Human-readable detail for the audit trail.
    pub detail: String,
    /// Epoch ms when the step was recorded.
    pub at_ms: i64,
}

/// Structured reasoning attached to a proposed entry.
///
/// Serialized as JSON into `ledger_entries.inference_log`. The L2 reasoning
/// graph, when present, is carried verbatim under `l2_graph`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InferenceLog {
    /// Classification engine that produced the proposal: `l1` or `l2`.
    pub engine: String,
    /// Rule id when an L1 rule matched.
    pub rule_id: Option<String>,
    /// Final confidence in [0, 1].
    pub confidence: f64,
    /// Ordered reasoning steps.
    pub steps: Vec<InferenceStep>,
    /// Raw L2 reasoning graph (provider-shaped), if the L2 tier ran.
    pub l2_graph: Option<Value>,
}

impl InferenceLog {
    /// Append a step stamped with the current time.
    pub fn push(&mut self, stage: &str, detail: impl Into<String>) {
        self.steps.push(InferenceStep {
            stage: stage.to_string(),
            detail: detail.into(),
            at_ms: Utc::now().timestamp_millis(),
        });
    }
}

// ---------------------------------------------------------------------------
// Outbound card envelope
// ---------------------------------------------------------------------------

/// A button on an outbound card.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CardButton {
    pub action: String,
    pub value: String,
}

/// Channel-independent JSON envelope for an outbound card.
///
/// The outbox dispatcher renders this per platform; the core never speaks a
/// platform dialect directly.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CardEnvelope {
    pub kind: String,
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_refs: Option<Vec<String>>,
    pub buttons: Vec<CardButton>,
    pub metadata: CardMetadata,
}

/// Routing metadata attached to every card.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CardMetadata {
    pub trace_id: String,
    pub required_role: String,
}

// ---------------------------------------------------------------------------
// Webhook callback
// ---------------------------------------------------------------------------

/// Action carried by a card callback.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallbackAction {
    Confirm,
    Reject,
    BatchConfirm,
}

impl CallbackAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackAction::Confirm => "CONFIRM",
            CallbackAction::Reject => "REJECT",
            CallbackAction::BatchConfirm => "BATCH_CONFIRM",
        }
    }
}

/// Body of the signed webhook POST.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CallbackRequest {
    pub card_id: String,
    pub action: CallbackAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_payload: Option<Value>,
    /// Sender timestamp, epoch ms UTC. Checked against the replay window.
    pub ts: i64,
}
