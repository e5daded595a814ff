//! ldk-daemon entry point.
//!
//! This file is intentionally thin: it parses the subcommand, sets up
//! tracing, loads config + secrets, and delegates. The `run` subcommand
//! boots the supervised worker set and the HTTP surface; the rest are
//! operator actions against the store.

use std::{net::SocketAddr, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use ldk_config::{load_layered_yaml, resolve_secrets};
use ldk_daemon::{routes, state, wire, MasterDaemon};
use ldk_store::Store;

#[derive(Parser)]
#[command(name = "ldk-daemon", about = "LedgerDesk bookkeeping daemon")]
struct Cli {
    /// Config files, merged in order (later overrides earlier).
    #[arg(long, default_value = "config/base.yaml")]
    config: Vec<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon (default).
    Run,
    /// Apply store migrations and exit.
    Migrate,
    /// Take a snapshot of the store.
    Snapshot {
        #[arg(default_value = "operator snapshot")]
        description: String,
    },
    /// Verify the full hash chain.
    VerifyChain,
    /// Clear the chain-break append freeze (explicit operator override).
    Unfreeze,
    /// Roll the store back to a snapshot. Refuses while the daemon runs.
    Rollback { snapshot_id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Dev convenience; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let cli = Cli::parse();
    let config_paths: Vec<&str> = cli.config.iter().map(String::as_str).collect();
    let loaded = load_layered_yaml(&config_paths)
        .with_context(|| format!("load config from {config_paths:?}"))?;
    let cfg = loaded.typed()?;
    info!(config_hash = %loaded.config_hash, "configuration loaded");

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(loaded, cli.config.clone()).await,
        Command::Migrate => {
            let store = Store::open(ldk_daemon::store_options(&cfg)).await?;
            store.close().await;
            info!("migrations applied");
            Ok(())
        }
        Command::Snapshot { description } => {
            let store = Store::open(ldk_daemon::store_options(&cfg)).await?;
            let id = store.snapshot(&description).await?;
            info!(snapshot_id = id, "snapshot created");
            Ok(())
        }
        Command::VerifyChain => {
            let store = Store::open(ldk_daemon::store_options(&cfg)).await?;
            let head = store.chain_head_id().await?;
            match store.verify_chain(1, head).await? {
                ldk_store::ChainVerdict::Valid { rows } => {
                    info!(rows, "chain verified clean");
                    Ok(())
                }
                ldk_store::ChainVerdict::Broken { entry_id, reason } => {
                    bail!("chain broken at entry {entry_id}: {reason}")
                }
            }
        }
        Command::Unfreeze => {
            let store = Store::open(ldk_daemon::store_options(&cfg)).await?;
            store.unfreeze_appends().await?;
            info!("append freeze cleared");
            Ok(())
        }
        Command::Rollback { snapshot_id } => {
            let store = Store::open(ldk_daemon::store_options(&cfg)).await?;
            let path = store.rollback_to(snapshot_id).await?;
            info!(snapshot_id, path = %path.display(), "store rolled back");
            Ok(())
        }
    }
}

async fn run(
    mut loaded: ldk_config::LoadedConfig,
    config_paths: Vec<String>,
) -> Result<()> {
    use std::sync::atomic::{AtomicBool, Ordering};

    // Reload protocol: SIGHUP sets the flag and signals shutdown; the outer
    // loop re-loads config, re-wires, and boots the worker set again. Each
    // worker finishes its current item first (cooperative cancellation), so
    // new configuration is observed at worker idle points.
    let reload_requested = Arc::new(AtomicBool::new(false));

    loop {
        let cfg = loaded.typed()?;
        let secrets = resolve_secrets(&loaded.config_json, cfg.accounting.l2.enabled)?;

        let wired = wire(&cfg, &secrets).await?;
        let shared = Arc::new(state::AppState::new(
            wired.store.clone(),
            Arc::clone(&wired.hub),
        ));

        let mut daemon = MasterDaemon::new(wired.store.clone(), wired.supervisor, wired.workers);
        daemon.start().await.context("worker boot failed")?;

        // HTTP surface (rebuilt per generation; the listener rebinds).
        let app = routes::build_router(Arc::clone(&shared))
            .layer(tower_http::trace::TraceLayer::new_for_http());
        let addr: SocketAddr = cfg
            .daemon
            .bind_addr
            .parse()
            .with_context(|| format!("bad bind addr {}", cfg.daemon.bind_addr))?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("ldk-daemon listening on http://{addr}");
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                warn!(error = %e, "http server stopped");
            }
        });

        // Signals: INT/TERM shut down; HUP requests a config reload.
        let shutdown = daemon.shutdown_handle();
        let reload_flag = Arc::clone(&reload_requested);
        let signals = tokio::spawn(async move {
            let mut hup =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
                    .expect("install SIGHUP handler");
            let mut term =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("install SIGTERM handler");
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("SIGINT: shutting down"),
                _ = term.recv() => info!("SIGTERM: shutting down"),
                _ = hup.recv() => {
                    info!("SIGHUP: reloading configuration");
                    reload_flag.store(true, Ordering::SeqCst);
                }
            }
            let _ = shutdown.send(true);
        });

        let result = daemon.run().await;
        server.abort();
        signals.abort();
        wired.store.close().await;
        result?;

        if !reload_requested.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let paths: Vec<&str> = config_paths.iter().map(String::as_str).collect();
        match load_layered_yaml(&paths) {
            Ok(next) => {
                if next.config_hash == loaded.config_hash {
                    info!("configuration unchanged after reload");
                } else {
                    info!(config_hash = %next.config_hash, "configuration reloaded");
                }
                loaded = next;
            }
            Err(e) => {
                warn!(error = %e, "reload failed; keeping previous configuration");
            }
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
