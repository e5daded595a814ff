//! Typed view over the merged config tree.
//!
//! Every field has a documented default so a minimal YAML (or none at all)
//! yields a runnable configuration. The daemon validates cross-field
//! constraints at boot (`LedgerConfig::validate`); workers receive the typed
//! struct, never the raw JSON.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Root of the typed configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub store: StoreConfig,
    pub daemon: DaemonConfig,
    pub collector: CollectorConfig,
    pub audit: AuditConfig,
    pub accounting: AccountingConfig,
    #[serde(rename = "match")]
    pub match_: MatchConfig,
    pub interaction: InteractionConfig,
    pub egress: EgressConfig,
}

impl LedgerConfig {
    /// Cross-field sanity checks run once at daemon boot.
    pub fn validate(&self) -> Result<()> {
        if self.store.busy_timeout_ms == 0 {
            bail!("store.busy_timeout_ms must be > 0");
        }
        if self.daemon.health_timeout_s <= self.daemon.health_poll_s {
            bail!("daemon.health_timeout_s must exceed daemon.health_poll_s");
        }
        if !(0.0..=1.0).contains(&self.match_.auto_threshold) {
            bail!("match.auto_threshold must be within [0, 1]");
        }
        if self.match_.review_threshold > self.match_.auto_threshold {
            bail!("match.review_threshold must not exceed match.auto_threshold");
        }
        if self.accounting.l2.step_cap == 0 {
            bail!("accounting.l2.step_cap must be > 0");
        }
        if self.audit.amount_tier_t1 <= 0 {
            bail!("audit.amount_tier_t1 must be > 0");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the SQLite store file.
    pub path: String,
    /// Directory for physical snapshots (sibling of the store by default).
    pub snapshot_dir: String,
    /// Total budget for busy/locked retries, milliseconds.
    pub busy_timeout_ms: u64,
    /// SQLite `synchronous` pragma: `normal` (default) or `full`.
    pub sync_mode: String,
    /// Page-cache size hint in MiB.
    pub cache_mb: u32,
    /// Advisory entry-lock timeout, seconds. Orphaned locks older than this
    /// may be stolen or swept by maintenance.
    pub lock_timeout_s: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "ledger.db".to_string(),
            snapshot_dir: "snapshots".to_string(),
            busy_timeout_ms: 5_000,
            sync_mode: "normal".to_string(),
            cache_mb: 64,
            lock_timeout_s: 300,
        }
    }
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Grace period for cooperative shutdown, seconds.
    pub grace_shutdown_s: u64,
    /// Heartbeat staleness threshold, seconds. Stale -> STUCK.
    pub health_timeout_s: u64,
    /// Logical probe round-trip budget, seconds.
    pub probe_timeout_s: u64,
    /// Health loop cadence, seconds (>= 10).
    pub health_poll_s: u64,
    /// Budget for all workers to write their first ALIVE heartbeat.
    pub boot_timeout_s: u64,
    /// HTTP bind address for the status/webhook surface.
    pub bind_addr: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            grace_shutdown_s: 5,
            health_timeout_s: 60,
            probe_timeout_s: 5,
            health_poll_s: 10,
            boot_timeout_s: 30,
            bind_addr: "127.0.0.1:8790".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Collector
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Drop folder watched for new source documents.
    pub input_dir: String,
    /// Number of parser workers in the fixed pool.
    pub workers: usize,
    /// Wall-clock timeout per file parse, seconds.
    pub per_file_timeout_s: u64,
    /// Multimodal grouping window, seconds.
    pub group_window_s: u64,
    /// Bounded depth of the parse queue.
    pub queue_depth: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            input_dir: "inbox".to_string(),
            workers: 2,
            per_file_timeout_s: 60,
            group_window_s: 60,
            queue_depth: 64,
        }
    }
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

/// Voting strategy for the judge panel.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStrategy {
    /// All judges must pass.
    Strict,
    /// Two of three judges must pass.
    Balanced,
    /// One passing judge suffices (still subject to critical vetoes).
    Growth,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub strategy: AuditStrategy,
    /// First escalation tier in whole currency units; stricter checks above.
    pub amount_tier_t1: i64,
    /// Red-line patterns (literal or regex) that veto a proposal outright.
    pub red_lines: Vec<String>,
    /// Proposals below this confidence go to NEEDS_REVIEW.
    pub low_confidence_band: f64,
    /// Category-distribution deviation beyond which risk points accrue.
    pub history_category_bound: f64,
    /// Price deviation (fraction of the decayed mean) beyond which risk
    /// points accrue.
    pub history_price_bound: f64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            strategy: AuditStrategy::Balanced,
            amount_tier_t1: 10_000,
            red_lines: vec!["奢侈品".to_string(), "礼品卡".to_string()],
            low_confidence_band: 0.6,
            history_category_bound: 0.5,
            history_price_bound: 0.8,
        }
    }
}

// ---------------------------------------------------------------------------
// Accounting
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct L2Config {
    pub enabled: bool,
    /// Maximum reason-act steps per classification.
    pub step_cap: u32,
    /// Wall-clock budget per L2 invocation, seconds.
    pub timeout_s: u64,
}

impl Default for L2Config {
    fn default() -> Self {
        Self {
            enabled: true,
            step_cap: 5,
            timeout_s: 120,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenBudgetConfig {
    pub daily: u64,
    pub monthly: u64,
}

impl Default for TokenBudgetConfig {
    fn default() -> Self {
        Self {
            daily: 200_000,
            monthly: 3_000_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitConfig {
    /// Sliding failure window, seconds.
    pub window_s: u64,
    /// Failures within the window that trip the breaker.
    pub threshold: u32,
    /// Cool-off before the breaker resets, seconds.
    pub cooloff_s: u64,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            window_s: 300,
            threshold: 5,
            cooloff_s: 600,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseCacheConfig {
    pub ttl_s: u64,
    pub capacity: usize,
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        Self {
            ttl_s: 3_600,
            capacity: 256,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountingConfig {
    pub l2: L2Config,
    pub token_budget: TokenBudgetConfig,
    pub circuit: CircuitConfig,
    pub cache: ResponseCacheConfig,
    /// L1 confidence below this flags the proposal for shadow audit.
    pub confidence_threshold: f64,
    /// Consecutive low-confidence L1 outcomes for one vendor that force an
    /// L2 upgrade on the next document from that vendor.
    pub vendor_escalation_after: u32,
    /// Cooldown for the vendor escalation counter, seconds.
    pub vendor_escalation_cooldown_s: u64,
}

impl Default for AccountingConfig {
    fn default() -> Self {
        Self {
            l2: L2Config::default(),
            token_budget: TokenBudgetConfig::default(),
            circuit: CircuitConfig::default(),
            cache: ResponseCacheConfig::default(),
            confidence_threshold: 0.7,
            vendor_escalation_after: 3,
            vendor_escalation_cooldown_s: 86_400,
        }
    }
}

// ---------------------------------------------------------------------------
// Match
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Amount tolerance in micros for candidate selection.
    pub tolerance_micros: i64,
    /// Candidate window, days.
    pub window_days: i64,
    /// Combined score at or above which a pair is MATCHED.
    pub auto_threshold: f64,
    /// Scores in [review_threshold, auto_threshold) surface a batch card.
    pub review_threshold: f64,
    /// Page size for the batched reconciliation loop.
    pub batch_size: i64,
    /// When true, MATCHED pairs post without user confirmation.
    /// Default false: one-click confirmation is required.
    pub auto_post: bool,
    /// Unmatched pending entries older than this trigger an evidence request.
    pub evidence_age_h: i64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            tolerance_micros: 10_000, // one fen
            window_days: 7,
            auto_threshold: 0.90,
            review_threshold: 0.60,
            batch_size: 100,
            auto_post: false,
            evidence_age_h: 48,
        }
    }
}

// ---------------------------------------------------------------------------
// Interaction
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractionConfig {
    /// Card validity, seconds.
    pub card_ttl_s: i64,
    /// Accepted skew between callback `ts` and receipt time, seconds.
    pub replay_window_s: i64,
    /// Outbox polling cadence, seconds.
    pub outbox_poll_s: u64,
    /// PENDING depth beyond which a backlog alert is raised.
    pub outbox_backlog_alert: i64,
    /// Maximum delivery attempts before an event is marked FAILED.
    pub outbox_max_attempts: i64,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            card_ttl_s: 86_400,
            replay_window_s: 60,
            outbox_poll_s: 5,
            outbox_backlog_alert: 100,
            outbox_max_attempts: 8,
        }
    }
}

// ---------------------------------------------------------------------------
// Egress
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EgressConfig {
    /// Destination hosts the proxy will talk to. Anything else is refused.
    pub allowlist: Vec<String>,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub request_timeout_s: u64,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            allowlist: vec!["api.openai.com".to_string()],
            max_retries: 3,
            backoff_base_ms: 500,
            request_timeout_s: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_yields_defaults() {
        let cfg: LedgerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.daemon.grace_shutdown_s, 5);
        assert_eq!(cfg.daemon.health_timeout_s, 60);
        assert_eq!(cfg.match_.window_days, 7);
        assert!(!cfg.match_.auto_post);
        assert_eq!(cfg.accounting.l2.step_cap, 5);
        cfg.validate().unwrap();
    }

    #[test]
    fn partial_section_keeps_sibling_defaults() {
        let cfg: LedgerConfig =
            serde_json::from_str(r#"{"store": {"busy_timeout_ms": 9000}}"#).unwrap();
        assert_eq!(cfg.store.busy_timeout_ms, 9000);
        assert_eq!(cfg.store.cache_mb, 64);
    }

    #[test]
    fn match_section_uses_reserved_word_key() {
        let cfg: LedgerConfig =
            serde_json::from_str(r#"{"match": {"auto_threshold": 0.95}}"#).unwrap();
        assert!((cfg.match_.auto_threshold - 0.95).abs() < 1e-9);
    }

    #[test]
    fn strategy_parses_screaming_case() {
        let cfg: LedgerConfig =
            serde_json::from_str(r#"{"audit": {"strategy": "STRICT"}}"#).unwrap();
        assert_eq!(cfg.audit.strategy, AuditStrategy::Strict);
    }

    #[test]
    fn validate_rejects_inverted_thresholds() {
        let mut cfg = LedgerConfig::default();
        cfg.match_.review_threshold = 0.95;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_health_timeout_below_poll() {
        let mut cfg = LedgerConfig::default();
        cfg.daemon.health_timeout_s = 5;
        assert!(cfg.validate().is_err());
    }
}
