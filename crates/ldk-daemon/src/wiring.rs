//! Construction of the full worker set from config + secrets.
//!
//! This is the composition root: everything the config tree declares is
//! built here once and threaded into workers explicitly. No globals, no
//! process-local singletons.

use std::sync::Arc;

use anyhow::{Context, Result};

use ldk_accounting::{AccountingWorker, L2Options, NoTools, Router, RouterOptions};
use ldk_auditor::{engine_options, AuditorWorker, VotingStrategy};
use ldk_collector::{CollectorOptions, CollectorWorker, DisabledOcr, ParserRegistry};
use ldk_config::{LedgerConfig, ResolvedSecrets};
use ldk_interaction::{
    DispatchOptions, HubOptions, InteractionHub, InteractionWorker,
};
use ldk_knowledge::KnowledgeBridge;
use ldk_match::{MatchEngine, MatchOptions, MatchWorker};
use ldk_privacy::{
    EgressProxy, HttpInferenceProvider, InferenceProvider, PrivacyGuard, TokenBudget,
};
use ldk_schemas::Micros;
use ldk_store::{Store, StoreOptions};

use crate::supervisor::{SupervisorOptions, WorkerSpec};

/// Everything the daemon runtime needs.
pub struct Wired {
    pub store: Store,
    pub hub: Arc<InteractionHub>,
    pub workers: Vec<WorkerSpec>,
    pub supervisor: SupervisorOptions,
}

/// Map config to store options.
pub fn store_options(cfg: &LedgerConfig) -> StoreOptions {
    StoreOptions {
        path: cfg.store.path.clone().into(),
        snapshot_dir: cfg.store.snapshot_dir.clone().into(),
        busy_timeout_ms: cfg.store.busy_timeout_ms,
        sync_mode: cfg.store.sync_mode.clone(),
        cache_mb: cfg.store.cache_mb,
        lock_timeout_s: cfg.store.lock_timeout_s,
    }
}

/// Build the full worker set in boot order: InteractionHub first, then the
/// pipeline, then the Collector last (it produces work the others consume).
pub async fn wire(cfg: &LedgerConfig, secrets: &ResolvedSecrets) -> Result<Wired> {
    cfg.validate().context("config validation")?;

    let store = Store::open(store_options(cfg)).await?;
    let bridge = Arc::new(KnowledgeBridge::open(store.clone()).await?);
    let guard = Arc::new(PrivacyGuard::new());

    let budget = TokenBudget::new(
        store.clone(),
        cfg.accounting.token_budget.daily,
        cfg.accounting.token_budget.monthly,
    );
    let proxy = EgressProxy::new(
        Arc::clone(&guard),
        cfg.egress.allowlist.clone(),
        Some(budget),
        cfg.egress.max_retries,
        cfg.egress.backoff_base_ms,
        cfg.egress.request_timeout_s,
    );

    // L2 provider only when enabled and an endpoint key was resolved.
    let provider: Option<Arc<dyn InferenceProvider>> = match (&secrets.inference_api_key, cfg.accounting.l2.enabled) {
        (Some(key), true) => {
            let endpoint = cfg_l2_endpoint(cfg);
            Some(Arc::new(HttpInferenceProvider::new(
                proxy.clone(),
                endpoint,
                key.clone(),
            )))
        }
        _ => None,
    };

    let router = Arc::new(Router::new(
        Arc::clone(&bridge),
        provider,
        Arc::new(NoTools),
        RouterOptions {
            l2_enabled: cfg.accounting.l2.enabled,
            l2: L2Options {
                model: "ledgerdesk-default".to_string(),
                step_cap: cfg.accounting.l2.step_cap,
                timeout_s: cfg.accounting.l2.timeout_s,
            },
            confidence_threshold: cfg.accounting.confidence_threshold,
            vendor_escalation_after: cfg.accounting.vendor_escalation_after,
            vendor_escalation_cooldown_s: cfg.accounting.vendor_escalation_cooldown_s,
            circuit_window_s: cfg.accounting.circuit.window_s,
            circuit_threshold: cfg.accounting.circuit.threshold,
            circuit_cooloff_s: cfg.accounting.circuit.cooloff_s,
            cache_capacity: cfg.accounting.cache.capacity,
            cache_ttl_s: cfg.accounting.cache.ttl_s,
        },
    ));

    let hub = Arc::new(InteractionHub::new(
        store.clone(),
        Arc::clone(&bridge),
        secrets.webhook_signing_key.clone(),
        HubOptions {
            card_ttl_s: cfg.interaction.card_ttl_s,
            replay_window_s: cfg.interaction.replay_window_s,
        },
    ));

    let audit_opts = engine_options(
        match cfg.audit.strategy {
            ldk_config::typed::AuditStrategy::Strict => VotingStrategy::Strict,
            ldk_config::typed::AuditStrategy::Balanced => VotingStrategy::Balanced,
            ldk_config::typed::AuditStrategy::Growth => VotingStrategy::Growth,
        },
        cfg.audit.red_lines.clone(),
        cfg.audit.amount_tier_t1,
        cfg.audit.low_confidence_band,
        cfg.audit.history_category_bound,
        cfg.audit.history_price_bound,
    );

    let match_opts = MatchOptions {
        tolerance: Micros::new(cfg.match_.tolerance_micros),
        window_days: cfg.match_.window_days,
        auto_threshold: cfg.match_.auto_threshold,
        review_threshold: cfg.match_.review_threshold,
        batch_size: cfg.match_.batch_size,
        auto_post: cfg.match_.auto_post,
        evidence_age_h: cfg.match_.evidence_age_h,
    };

    let collector_opts = CollectorOptions {
        input_dir: cfg.collector.input_dir.clone().into(),
        workers: cfg.collector.workers,
        per_file_timeout_s: cfg.collector.per_file_timeout_s,
        group_window_s: cfg.collector.group_window_s,
        queue_depth: cfg.collector.queue_depth,
    };

    let dispatch_opts = DispatchOptions {
        poll_s: cfg.interaction.outbox_poll_s,
        backlog_alert: cfg.interaction.outbox_backlog_alert,
        max_attempts: cfg.interaction.outbox_max_attempts,
        backoff_base_ms: cfg.egress.backoff_base_ms,
        channel_url: secrets.card_channel_url.clone(),
    };

    let registry = Arc::new(ParserRegistry::with_builtins());

    // Boot order matters: downstream consumers come up before producers.
    let mut workers: Vec<WorkerSpec> = Vec::new();

    {
        let store = store.clone();
        let hub = Arc::clone(&hub);
        let proxy = proxy.clone();
        let opts = dispatch_opts.clone();
        workers.push(WorkerSpec {
            name: ldk_interaction::worker::WORKER_NAME,
            factory: Box::new(move |shutdown, probe| {
                let worker = InteractionWorker::new(
                    store.clone(),
                    Arc::clone(&hub),
                    proxy.clone(),
                    opts.clone(),
                );
                Box::pin(worker.run(shutdown, probe))
            }),
        });
    }

    {
        let store = store.clone();
        let opts = match_opts.clone();
        workers.push(WorkerSpec {
            name: ldk_match::worker::WORKER_NAME,
            factory: Box::new(move |shutdown, probe| {
                let engine = MatchEngine::new(store.clone(), opts.clone());
                let worker = MatchWorker::new(store.clone(), engine);
                Box::pin(worker.run(shutdown, probe))
            }),
        });
    }

    {
        let store = store.clone();
        let bridge = Arc::clone(&bridge);
        let opts = audit_opts.clone();
        workers.push(WorkerSpec {
            name: ldk_auditor::worker::WORKER_NAME,
            factory: Box::new(move |shutdown, probe| {
                let worker =
                    AuditorWorker::new(store.clone(), Arc::clone(&bridge), opts.clone());
                Box::pin(worker.run(shutdown, probe))
            }),
        });
    }

    {
        let store = store.clone();
        let router = Arc::clone(&router);
        workers.push(WorkerSpec {
            name: ldk_accounting::worker::WORKER_NAME,
            factory: Box::new(move |shutdown, probe| {
                let worker = AccountingWorker::new(store.clone(), Arc::clone(&router));
                Box::pin(worker.run(shutdown, probe))
            }),
        });
    }

    {
        let store = store.clone();
        let registry = Arc::clone(&registry);
        let opts = collector_opts.clone();
        workers.push(WorkerSpec {
            name: ldk_collector::WORKER_NAME,
            factory: Box::new(move |shutdown, probe| {
                let worker = CollectorWorker::new(
                    store.clone(),
                    Arc::clone(&registry),
                    Arc::new(DisabledOcr),
                    opts.clone(),
                );
                Box::pin(worker.run(shutdown, probe))
            }),
        });
    }

    let supervisor = SupervisorOptions {
        grace_shutdown: std::time::Duration::from_secs(cfg.daemon.grace_shutdown_s),
        health_timeout: std::time::Duration::from_secs(cfg.daemon.health_timeout_s),
        probe_timeout: std::time::Duration::from_secs(cfg.daemon.probe_timeout_s),
        health_poll: std::time::Duration::from_secs(cfg.daemon.health_poll_s),
        boot_timeout: std::time::Duration::from_secs(cfg.daemon.boot_timeout_s),
        lock_ttl_s: cfg.store.lock_timeout_s as i64,
    };

    Ok(Wired {
        store,
        hub,
        workers,
        supervisor,
    })
}

/// L2 endpoint derived from the allowlist's first host.
fn cfg_l2_endpoint(cfg: &LedgerConfig) -> String {
    cfg.egress
        .allowlist
        .first()
        .map(|host| format!("https://{host}/v1/completions"))
        .unwrap_or_else(|| "https://api.openai.com/v1/completions".to_string())
}
