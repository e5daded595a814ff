//! State enums for every persisted entity.
//!
//! Each enum provides `as_str` / `parse` for the TEXT columns the store uses,
//! mirroring the string constants in the migrations. Transition legality is
//! enforced where the transition happens (store / auditor / interaction hub);
//! this module only defines the vocabulary.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Ledger entry state
// ---------------------------------------------------------------------------

/// Lifecycle state of a ledger entry.
///
/// `Posted`, `Rejected`, and `Reverted` are terminal: rows in these states
/// are append-only at the storage layer (enforced by triggers), except the
/// single permitted `Posted -> Reverted` flip performed by `mark_reverted`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryState {
    Proposed,
    Audited,
    Posted,
    Rejected,
    Risk,
    Reverted,
    Locking,
    NeedsReview,
}

impl EntryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryState::Proposed => "PROPOSED",
            EntryState::Audited => "AUDITED",
            EntryState::Posted => "POSTED",
            EntryState::Rejected => "REJECTED",
            EntryState::Risk => "RISK",
            EntryState::Reverted => "REVERTED",
            EntryState::Locking => "LOCKING",
            EntryState::NeedsReview => "NEEDS_REVIEW",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "PROPOSED" => Ok(EntryState::Proposed),
            "AUDITED" => Ok(EntryState::Audited),
            "POSTED" => Ok(EntryState::Posted),
            "REJECTED" => Ok(EntryState::Rejected),
            "RISK" => Ok(EntryState::Risk),
            "REVERTED" => Ok(EntryState::Reverted),
            "LOCKING" => Ok(EntryState::Locking),
            "NEEDS_REVIEW" => Ok(EntryState::NeedsReview),
            other => Err(anyhow!("invalid entry state: {}", other)),
        }
    }

    /// Terminal states participate in the hash chain and are immutable.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EntryState::Posted | EntryState::Rejected | EntryState::Reverted
        )
    }
}

// ---------------------------------------------------------------------------
// Pending (shadow) entries
// ---------------------------------------------------------------------------

/// Origin channel of a bank/payment flow line.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingSource {
    Alipay,
    Wechat,
    Bank,
}

impl PendingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingSource::Alipay => "ALIPAY",
            PendingSource::Wechat => "WECHAT",
            PendingSource::Bank => "BANK",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "ALIPAY" => Ok(PendingSource::Alipay),
            "WECHAT" => Ok(PendingSource::Wechat),
            "BANK" => Ok(PendingSource::Bank),
            other => Err(anyhow!("invalid pending source: {}", other)),
        }
    }
}

/// Reconciliation status of a pending entry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingStatus {
    Unreconciled,
    Matched,
    Reconciled,
}

impl PendingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingStatus::Unreconciled => "UNRECONCILED",
            PendingStatus::Matched => "MATCHED",
            PendingStatus::Reconciled => "RECONCILED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "UNRECONCILED" => Ok(PendingStatus::Unreconciled),
            "MATCHED" => Ok(PendingStatus::Matched),
            "RECONCILED" => Ok(PendingStatus::Reconciled),
            other => Err(anyhow!("invalid pending status: {}", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Audit level of a classification rule. Drives the rule lifecycle:
/// grey rules are on probation, stable/manual rules feed the fast path,
/// blocked/failed rules never match.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleState {
    Gray,
    Stable,
    Manual,
    Blocked,
    Failed,
}

impl RuleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleState::Gray => "GRAY",
            RuleState::Stable => "STABLE",
            RuleState::Manual => "MANUAL",
            RuleState::Blocked => "BLOCKED",
            RuleState::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "GRAY" => Ok(RuleState::Gray),
            "STABLE" => Ok(RuleState::Stable),
            "MANUAL" => Ok(RuleState::Manual),
            "BLOCKED" => Ok(RuleState::Blocked),
            "FAILED" => Ok(RuleState::Failed),
            other => Err(anyhow!("invalid rule state: {}", other)),
        }
    }

    /// Whether a matching rule may produce a proposal at all.
    pub fn is_matchable(&self) -> bool {
        matches!(self, RuleState::Gray | RuleState::Stable | RuleState::Manual)
    }

    /// Stable and manual rules carry the high-confidence band.
    pub fn is_trusted(&self) -> bool {
        matches!(self, RuleState::Stable | RuleState::Manual)
    }
}

/// Who taught a rule: a human correction or the L2 reasoning tier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleSource {
    Manual,
    L2,
}

impl RuleSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleSource::Manual => "MANUAL",
            RuleSource::L2 => "L2",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "MANUAL" => Ok(RuleSource::Manual),
            "L2" => Ok(RuleSource::L2),
            other => Err(anyhow!("invalid rule source: {}", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Outbox
// ---------------------------------------------------------------------------

/// Kind of an outbound notification event.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboxKind {
    PushCard,
    EvidenceRequest,
    BatchConfirm,
    Critical,
}

impl OutboxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxKind::PushCard => "PUSH_CARD",
            OutboxKind::EvidenceRequest => "EVIDENCE_REQUEST",
            OutboxKind::BatchConfirm => "BATCH_CONFIRM",
            OutboxKind::Critical => "CRITICAL",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "PUSH_CARD" => Ok(OutboxKind::PushCard),
            "EVIDENCE_REQUEST" => Ok(OutboxKind::EvidenceRequest),
            "BATCH_CONFIRM" => Ok(OutboxKind::BatchConfirm),
            "CRITICAL" => Ok(OutboxKind::Critical),
            other => Err(anyhow!("invalid outbox kind: {}", other)),
        }
    }
}

/// Delivery status of an outbox event.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboxStatus {
    Pending,
    Sent,
    Ack,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Sent => "SENT",
            OutboxStatus::Ack => "ACK",
            OutboxStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(OutboxStatus::Pending),
            "SENT" => Ok(OutboxStatus::Sent),
            "ACK" => Ok(OutboxStatus::Ack),
            "FAILED" => Ok(OutboxStatus::Failed),
            other => Err(anyhow!("invalid outbox status: {}", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Interaction cards
// ---------------------------------------------------------------------------

/// Status of an action card. Transitions are monotonic:
/// `SENT -> CLICKED -> COMPLETED`, with `EXPIRED` reachable from any
/// non-terminal state.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CardStatus {
    Sent,
    Clicked,
    Completed,
    Expired,
}

impl CardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardStatus::Sent => "SENT",
            CardStatus::Clicked => "CLICKED",
            CardStatus::Completed => "COMPLETED",
            CardStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "SENT" => Ok(CardStatus::Sent),
            "CLICKED" => Ok(CardStatus::Clicked),
            "COMPLETED" => Ok(CardStatus::Completed),
            "EXPIRED" => Ok(CardStatus::Expired),
            other => Err(anyhow!("invalid card status: {}", other)),
        }
    }

    /// Rank used to enforce forward-only transitions.
    fn rank(&self) -> u8 {
        match self {
            CardStatus::Sent => 0,
            CardStatus::Clicked => 1,
            CardStatus::Completed => 2,
            CardStatus::Expired => 3,
        }
    }

    /// `true` when moving `self -> next` is a legal monotonic step.
    pub fn can_transition_to(&self, next: CardStatus) -> bool {
        match (self, next) {
            // Terminal states admit nothing further.
            (CardStatus::Completed | CardStatus::Expired, _) => false,
            // Expiry is reachable from any non-terminal state.
            (_, CardStatus::Expired) => true,
            (from, to) => to.rank() == from.rank() + 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Worker heartbeats
// ---------------------------------------------------------------------------

/// Supervisor-visible state of a worker, persisted in its heartbeat row.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    Alive,
    Dead,
    Stuck,
    Quarantined,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Alive => "ALIVE",
            WorkerState::Dead => "DEAD",
            WorkerState::Stuck => "STUCK",
            WorkerState::Quarantined => "QUARANTINED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "ALIVE" => Ok(WorkerState::Alive),
            "DEAD" => Ok(WorkerState::Dead),
            "STUCK" => Ok(WorkerState::Stuck),
            "QUARANTINED" => Ok(WorkerState::Quarantined),
            other => Err(anyhow!("invalid worker state: {}", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_state_roundtrip() {
        for s in [
            EntryState::Proposed,
            EntryState::Audited,
            EntryState::Posted,
            EntryState::Rejected,
            EntryState::Risk,
            EntryState::Reverted,
            EntryState::Locking,
            EntryState::NeedsReview,
        ] {
            assert_eq!(EntryState::parse(s.as_str()).unwrap(), s);
        }
        assert!(EntryState::parse("BOGUS").is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(EntryState::Posted.is_terminal());
        assert!(EntryState::Rejected.is_terminal());
        assert!(EntryState::Reverted.is_terminal());
        assert!(!EntryState::Proposed.is_terminal());
        assert!(!EntryState::NeedsReview.is_terminal());
    }

    #[test]
    fn card_transitions_monotonic() {
        use CardStatus::*;
        assert!(Sent.can_transition_to(Clicked));
        assert!(Clicked.can_transition_to(Completed));
        assert!(Sent.can_transition_to(Expired));
        assert!(Clicked.can_transition_to(Expired));

        assert!(!Sent.can_transition_to(Completed)); // no skipping
        assert!(!Clicked.can_transition_to(Sent)); // no going back
        assert!(!Completed.can_transition_to(Expired)); // terminal
        assert!(!Expired.can_transition_to(Clicked)); // terminal
    }

    #[test]
    fn rule_state_matchability() {
        assert!(RuleState::Gray.is_matchable());
        assert!(RuleState::Stable.is_matchable());
        assert!(RuleState::Manual.is_matchable());
        assert!(!RuleState::Blocked.is_matchable());
        assert!(!RuleState::Failed.is_matchable());

        assert!(RuleState::Stable.is_trusted());
        assert!(RuleState::Manual.is_trusted());
        assert!(!RuleState::Gray.is_trusted());
    }

    #[test]
    fn outbox_roundtrip() {
        for k in [
            OutboxKind::PushCard,
            OutboxKind::EvidenceRequest,
            OutboxKind::BatchConfirm,
            OutboxKind::Critical,
        ] {
            assert_eq!(OutboxKind::parse(k.as_str()).unwrap(), k);
        }
        for s in [
            OutboxStatus::Pending,
            OutboxStatus::Sent,
            OutboxStatus::Ack,
            OutboxStatus::Failed,
        ] {
            assert_eq!(OutboxStatus::parse(s.as_str()).unwrap(), s);
        }
    }
}
