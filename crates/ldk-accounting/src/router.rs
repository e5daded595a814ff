//! The L1/L2 classification router.
//!
//! Routing order: forced vendor escalation check, L1 rule engine, then the
//! L2 reason-act loop for misses. The breaker and the token budget both
//! degrade the router to L1-only mode; in degraded mode an unmatched
//! document still produces a proposal — low confidence, suspense category,
//! flagged for shadow audit — because the ledger must never silently drop
//! an input.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use ldk_knowledge::KnowledgeBridge;
use ldk_privacy::{EgressError, InferenceProvider};
use ldk_schemas::{DocumentRecord, InferenceLog, TraceContext};

use crate::cache::ResponseCache;
use crate::circuit::CircuitBreaker;
use crate::l1::classify_l1;
use crate::l2::{base_prompt, run_l2, L2Options, L2Toolbox};

/// Suspense category for documents nothing could classify; always flagged
/// for review, never auto-posted.
pub const UNCLASSIFIED_CATEGORY: &str = "9999";

/// Confidence assigned to degraded-mode fallbacks.
const DEGRADED_CONFIDENCE: f64 = 0.20;

/// A proposed classification for one document.
#[derive(Clone, Debug)]
pub struct Proposal {
    pub category: String,
    pub confidence: f64,
    pub matched_rule: Option<String>,
    pub inference_log: InferenceLog,
    pub requires_shadow_audit: bool,
}

/// Router tuning (mapped from `accounting.*` config by the daemon).
#[derive(Clone, Debug)]
pub struct RouterOptions {
    pub l2_enabled: bool,
    pub l2: L2Options,
    pub confidence_threshold: f64,
    pub vendor_escalation_after: u32,
    pub vendor_escalation_cooldown_s: u64,
    pub circuit_window_s: u64,
    pub circuit_threshold: u32,
    pub circuit_cooloff_s: u64,
    pub cache_capacity: usize,
    pub cache_ttl_s: u64,
}

#[derive(Clone, Copy, Debug, Default)]
struct VendorStreak {
    low_confidence_runs: u32,
    last_at_ms: i64,
}

/// The accounting agent's classification core.
pub struct Router {
    bridge: Arc<KnowledgeBridge>,
    provider: Option<Arc<dyn InferenceProvider>>,
    tools: Arc<dyn L2Toolbox>,
    opts: RouterOptions,
    breaker: Mutex<CircuitBreaker>,
    cache: Mutex<ResponseCache>,
    escalation: Mutex<HashMap<String, VendorStreak>>,
}

impl Router {
    pub fn new(
        bridge: Arc<KnowledgeBridge>,
        provider: Option<Arc<dyn InferenceProvider>>,
        tools: Arc<dyn L2Toolbox>,
        opts: RouterOptions,
    ) -> Self {
        let breaker = CircuitBreaker::new(
            opts.circuit_window_s,
            opts.circuit_threshold,
            opts.circuit_cooloff_s,
        );
        let cache = ResponseCache::new(opts.cache_capacity, opts.cache_ttl_s);
        Self {
            bridge,
            provider,
            tools,
            opts,
            breaker: Mutex::new(breaker),
            cache: Mutex::new(cache),
            escalation: Mutex::new(HashMap::new()),
        }
    }

    /// Classify one document into a proposal. Infallible by design: every
    /// document gets a proposal, if only the degraded fallback.
    pub async fn classify(&self, ctx: &TraceContext, doc: &DocumentRecord) -> Proposal {
        let mut log = InferenceLog {
            engine: "l1".to_string(),
            ..Default::default()
        };
        log.push(
            "input_analysis",
            format!("vendor='{}' amount={} summary_len={}", doc.vendor, doc.amount, doc.summary.len()),
        );

        let forced_l2 = self.escalation_due(&doc.vendor).await;
        if forced_l2 {
            log.push("routing", "vendor escalation forces L2 upgrade");
        }

        // --- L1 ---
        if !forced_l2 {
            let rules = self.bridge.rules();
            if let Some(m) = classify_l1(&rules, doc) {
                log.push(
                    "rule_match",
                    format!("rule={} path={} state={}", m.rule_id, m.path, if m.gray { "gray" } else { "trusted" }),
                );
                log.push("dimension_extraction", format!("category={}", m.category));
                log.push("confidence", format!("{:.2}", m.confidence));
                log.rule_id = Some(m.rule_id.clone());
                log.confidence = m.confidence;

                let low = m.confidence < self.opts.confidence_threshold;
                self.note_outcome(&doc.vendor, m.gray || low).await;

                return Proposal {
                    category: m.category,
                    confidence: m.confidence,
                    matched_rule: Some(m.rule_id),
                    inference_log: log,
                    requires_shadow_audit: m.gray || low,
                };
            }
            log.push("routing", "no L1 rule matched");
        }

        // --- L2 ---
        self.note_outcome(&doc.vendor, true).await;
        match self.try_l2(ctx, doc, &mut log).await {
            Some(proposal) => proposal,
            None => {
                log.push(
                    "confidence",
                    format!("degraded fallback {DEGRADED_CONFIDENCE:.2}"),
                );
                log.engine = "l1".to_string();
                log.confidence = DEGRADED_CONFIDENCE;
                Proposal {
                    category: UNCLASSIFIED_CATEGORY.to_string(),
                    confidence: DEGRADED_CONFIDENCE,
                    matched_rule: None,
                    inference_log: log,
                    requires_shadow_audit: true,
                }
            }
        }
    }

    /// Attempt the L2 tier. `None` means degraded mode (disabled, breaker
    /// open, budget exhausted, or the call failed).
    async fn try_l2(
        &self,
        ctx: &TraceContext,
        doc: &DocumentRecord,
        log: &mut InferenceLog,
    ) -> Option<Proposal> {
        if !self.opts.l2_enabled {
            log.push("routing", "l2 disabled by config");
            return None;
        }
        let Some(provider) = &self.provider else {
            log.push("routing", "no inference provider wired");
            return None;
        };

        let now = Utc::now().timestamp_millis();
        {
            let mut breaker = self.breaker.lock().await;
            if breaker.is_open(now) {
                log.push("routing", "circuit open: staying in L1-only mode");
                return None;
            }
        }

        // Response cache: identical (model, prompt) within TTL.
        let cache_key = ResponseCache::key(&self.opts.l2.model, &base_prompt(doc));
        if let Some(cached) = self.cache.lock().await.get(&cache_key, now) {
            log.push("routing", "l2 cache hit");
            return Some(self.decision_to_proposal(cached, log));
        }

        log.push("routing", "invoking L2 reason-act loop");
        match run_l2(ctx, provider.as_ref(), self.tools.as_ref(), &self.opts.l2, doc).await {
            Ok(decision) => {
                let now = Utc::now().timestamp_millis();
                self.breaker.lock().await.record_success(now);
                self.cache
                    .lock()
                    .await
                    .put(cache_key, decision.clone(), now);
                info!(trace_id = %ctx.trace_id, category = %decision.category, "l2 decision");
                Some(self.decision_to_proposal(decision, log))
            }
            Err(e) => {
                let now = Utc::now().timestamp_millis();
                // Budget exhaustion is policy, not provider failure: it must
                // not trip the breaker, but it degrades all the same.
                let budget_hit = e
                    .downcast_ref::<EgressError>()
                    .map(|ee| matches!(ee, EgressError::BudgetExhausted { .. }))
                    .unwrap_or(false)
                    || e.to_string().contains("budget exhausted");
                if budget_hit {
                    log.push("routing", "token budget exhausted: degraded mode");
                } else {
                    self.breaker.lock().await.record_failure(now);
                    log.push("routing", format!("l2 failed: {e}"));
                    warn!(trace_id = %ctx.trace_id, error = %e, "l2 invocation failed");
                }
                None
            }
        }
    }

    fn decision_to_proposal(
        &self,
        decision: crate::l2::L2Decision,
        log: &mut InferenceLog,
    ) -> Proposal {
        log.engine = "l2".to_string();
        log.confidence = decision.confidence;
        log.l2_graph = Some(decision.reasoning_graph.clone());
        log.push("dimension_extraction", format!("category={}", decision.category));
        log.push("confidence", format!("{:.2}", decision.confidence));

        Proposal {
            category: decision.category,
            confidence: decision.confidence,
            matched_rule: None,
            inference_log: log.clone(),
            requires_shadow_audit: decision.confidence < self.opts.confidence_threshold,
        }
    }

    // -----------------------------------------------------------------------
    // Vendor escalation
    // -----------------------------------------------------------------------

    /// `true` when this vendor has accumulated enough consecutive
    /// low-confidence L1 outcomes to force an L2 upgrade. Consumes the
    /// streak when due.
    async fn escalation_due(&self, vendor: &str) -> bool {
        let now = Utc::now().timestamp_millis();
        let cooldown_ms = (self.opts.vendor_escalation_cooldown_s as i64) * 1_000;
        let mut map = self.escalation.lock().await;
        match map.get_mut(vendor) {
            Some(streak) => {
                if now - streak.last_at_ms > cooldown_ms {
                    map.remove(vendor);
                    return false;
                }
                if streak.low_confidence_runs >= self.opts.vendor_escalation_after {
                    streak.low_confidence_runs = 0;
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }

    async fn note_outcome(&self, vendor: &str, low_confidence: bool) {
        let now = Utc::now().timestamp_millis();
        let mut map = self.escalation.lock().await;
        let streak = map.entry(vendor.to_string()).or_default();
        if low_confidence {
            streak.low_confidence_runs += 1;
        } else {
            streak.low_confidence_runs = 0;
        }
        streak.last_at_ms = now;
    }

    /// Snapshot of breaker state for the status surface.
    pub async fn breaker_state(&self) -> crate::circuit::BreakerState {
        self.breaker.lock().await.state()
    }
}
