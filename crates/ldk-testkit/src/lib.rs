//! Deterministic end-to-end harness (offline).
//!
//! Composes the real pipeline components over one temp store:
//!   files -> collector pipeline -> document jobs -> accounting router ->
//!   proposed entries -> auditor -> posted entries -> match engine ->
//!   card requests -> interaction hub -> outbox.
//!
//! This harness is intentionally minimal:
//! - No network I/O: the L2 provider and OCR engine are scripted, the
//!   outbox dispatches without a channel (log-and-ack).
//! - No supervised tasks: `cycle()` drives each stage synchronously so
//!   scenarios are deterministic and fast.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use ldk_accounting::{AccountingWorker, L2Options, NoTools, Router, RouterOptions};
use ldk_auditor::{engine_options, AuditorWorker, VotingStrategy};
use ldk_collector::{OcrEngine, OcrInvoice, ParserRegistry, Pipeline};
use ldk_interaction::{DispatchOptions, HubOptions, InteractionHub, InteractionWorker};
use ldk_knowledge::KnowledgeBridge;
use ldk_match::{MatchEngine, MatchOptions};
use ldk_privacy::{
    EgressError, EgressProxy, InferenceProvider, InferenceRequest, InferenceResponse,
    PrivacyGuard,
};
use ldk_schemas::{Micros, TraceContext};
use ldk_store::{Store, StoreOptions};

/// Signing key used by every scenario.
pub const TEST_SIGNING_KEY: &str = "scenario-signing-key";

// ---------------------------------------------------------------------------
// Scripted connectors
// ---------------------------------------------------------------------------

/// OCR engine returning one fixed invoice per call.
pub struct ScriptedOcr {
    pub invoice: OcrInvoice,
}

#[async_trait]
impl OcrEngine for ScriptedOcr {
    fn name(&self) -> &'static str {
        "scripted"
    }
    async fn extract(&self, _path: &Path) -> Result<OcrInvoice> {
        Ok(OcrInvoice {
            vendor: self.invoice.vendor.clone(),
            amount_raw: self.invoice.amount_raw.clone(),
            occurred_at_raw: self.invoice.occurred_at_raw.clone(),
            summary: self.invoice.summary.clone(),
        })
    }
}

/// Inference provider replaying a fixed response script.
pub struct ScriptedProvider {
    responses: Vec<String>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: responses.into_iter().map(String::from).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }
    async fn complete(
        &self,
        _ctx: &TraceContext,
        _req: &InferenceRequest,
    ) -> std::result::Result<InferenceResponse, EgressError> {
        let i = self.calls.fetch_add(1, Ordering::SeqCst);
        let content = self
            .responses
            .get(i)
            .cloned()
            .ok_or_else(|| EgressError::Transport("script exhausted".to_string()))?;
        Ok(InferenceResponse {
            content,
            tokens_used: 100,
            raw: serde_json::json!({"scripted": true}),
        })
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Harness configuration knobs that scenarios care about.
#[derive(Clone, Debug)]
pub struct HarnessOptions {
    pub audit_strategy: VotingStrategy,
    pub tier_t1_units: i64,
    pub auto_post: bool,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            audit_strategy: VotingStrategy::Strict,
            tier_t1_units: 50_000,
            auto_post: false,
        }
    }
}

/// The composed pipeline.
pub struct ScenarioHarness {
    _dir: tempfile::TempDir,
    pub store: Store,
    pub bridge: Arc<KnowledgeBridge>,
    pub hub: Arc<InteractionHub>,
    pub pipeline: Pipeline,
    pub provider: Arc<ScriptedProvider>,
    accounting: AccountingWorker,
    auditor: AuditorWorker,
    engine: MatchEngine,
    interaction: InteractionWorker,
}

impl ScenarioHarness {
    /// Build the full harness with a scripted OCR invoice and an L2
    /// response script.
    pub async fn new(
        opts: HarnessOptions,
        ocr_invoice: OcrInvoice,
        l2_script: Vec<&str>,
    ) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let store = Store::open(StoreOptions::at_dir(dir.path())).await?;
        let bridge = Arc::new(KnowledgeBridge::open(store.clone()).await?);
        let guard = Arc::new(PrivacyGuard::new());

        let provider = Arc::new(ScriptedProvider::new(l2_script));
        let router = Arc::new(Router::new(
            Arc::clone(&bridge),
            Some(Arc::clone(&provider) as Arc<dyn InferenceProvider>),
            Arc::new(NoTools),
            RouterOptions {
                l2_enabled: true,
                l2: L2Options {
                    model: "scenario".to_string(),
                    step_cap: 5,
                    timeout_s: 30,
                },
                confidence_threshold: 0.7,
                vendor_escalation_after: 3,
                vendor_escalation_cooldown_s: 3_600,
                circuit_window_s: 300,
                circuit_threshold: 5,
                circuit_cooloff_s: 600,
                cache_capacity: 32,
                cache_ttl_s: 3_600,
            },
        ));

        let hub = Arc::new(InteractionHub::new(
            store.clone(),
            Arc::clone(&bridge),
            TEST_SIGNING_KEY.to_string(),
            HubOptions {
                card_ttl_s: 3_600,
                replay_window_s: 60,
            },
        ));

        let pipeline = Pipeline {
            store: store.clone(),
            registry: Arc::new(ParserRegistry::with_builtins()),
            ocr: Arc::new(ScriptedOcr {
                invoice: ocr_invoice,
            }),
        };

        let accounting = AccountingWorker::new(store.clone(), Arc::clone(&router));
        let auditor = AuditorWorker::new(
            store.clone(),
            Arc::clone(&bridge),
            engine_options(
                opts.audit_strategy,
                vec!["奢侈品".to_string(), "礼品卡".to_string()],
                opts.tier_t1_units,
                0.6,
                0.5,
                0.8,
            ),
        );
        let engine = MatchEngine::new(
            store.clone(),
            MatchOptions {
                tolerance: Micros::new(10_000),
                window_days: 7,
                auto_threshold: 0.90,
                review_threshold: 0.60,
                batch_size: 100,
                auto_post: opts.auto_post,
                evidence_age_h: 48,
            },
        );
        let proxy = EgressProxy::new(Arc::clone(&guard), vec![], None, 0, 10, 5);
        let interaction = InteractionWorker::new(
            store.clone(),
            Arc::clone(&hub),
            proxy,
            DispatchOptions {
                poll_s: 1,
                backlog_alert: 100,
                max_attempts: 3,
                backoff_base_ms: 10,
                channel_url: None,
            },
        );

        Ok(Self {
            _dir: dir,
            store,
            bridge,
            hub,
            pipeline,
            provider,
            accounting,
            auditor,
            engine,
            interaction,
        })
    }

    /// Directory for dropping scenario input files.
    pub fn inbox(&self) -> std::path::PathBuf {
        let p = self._dir.path().join("inbox");
        std::fs::create_dir_all(&p).expect("create inbox");
        p
    }

    /// Drive one full pipeline cycle: classify queued documents, audit
    /// proposals, reconcile, and let the hub consume requests and dispatch
    /// the outbox.
    pub async fn cycle(&self) -> Result<()> {
        self.accounting.drain_batch().await?;
        self.auditor.audit_batch().await?;
        self.engine.run_pass().await?;
        self.hub.raise_review_cards().await?;
        self.interaction.consume_card_requests().await?;
        self.interaction.dispatch_due().await?;
        Ok(())
    }

    /// Reconciliation-only pass (used before documents exist).
    pub async fn reconcile(&self) -> Result<()> {
        self.engine.run_pass().await?;
        self.interaction.consume_card_requests().await?;
        Ok(())
    }

    /// Spot-check the chain the way the match worker does.
    pub async fn spot_check_chain(&self) -> Result<bool> {
        self.engine.spot_check_chain(256).await
    }
}
