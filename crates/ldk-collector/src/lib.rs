//! Collector worker: drop-folder ingestion.
//!
//! A start-up full scan plus continuous `notify` watching feed a bounded
//! queue; a fixed pool (semaphore-limited) parses files with a per-file
//! wall-clock timeout. Statement lines become pending entries; invoice
//! captures become durable document jobs for the accounting agent.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{RecursiveMode, Watcher};
use tokio::sync::{mpsc, oneshot, watch, Semaphore};
use tracing::{info, warn};

use ldk_schemas::WorkerState;
use ldk_store::Store;

pub mod detect;
pub mod normalize;
pub mod ocr;
pub mod parsers;
pub mod pipeline;
pub mod registry;
pub mod source;

pub use ocr::{DisabledOcr, OcrEngine, OcrInvoice};
pub use pipeline::{FileOutcome, Pipeline};
pub use registry::ParserRegistry;

/// Worker name used in heartbeats.
pub const WORKER_NAME: &str = "collector";

/// Tuning knobs (mapped from `collector.*` config by the daemon).
#[derive(Clone, Debug)]
pub struct CollectorOptions {
    pub input_dir: PathBuf,
    pub workers: usize,
    pub per_file_timeout_s: u64,
    pub group_window_s: u64,
    pub queue_depth: usize,
}

/// The collector worker.
pub struct CollectorWorker {
    store: Store,
    pipeline: Arc<Pipeline>,
    opts: CollectorOptions,
}

impl CollectorWorker {
    pub fn new(
        store: Store,
        registry: Arc<ParserRegistry>,
        ocr: Arc<dyn OcrEngine>,
        opts: CollectorOptions,
    ) -> Self {
        let pipeline = Arc::new(Pipeline {
            store: store.clone(),
            registry,
            ocr,
        });
        Self {
            store,
            pipeline,
            opts,
        }
    }

    /// Main loop. Returns when `shutdown` flips; the final DEAD heartbeat
    /// and channel teardown happen before return.
    pub async fn run(
        self,
        mut shutdown: watch::Receiver<bool>,
        mut probe: mpsc::Receiver<oneshot::Sender<()>>,
    ) -> Result<()> {
        std::fs::create_dir_all(&self.opts.input_dir)
            .with_context(|| format!("create input dir {:?}", self.opts.input_dir))?;

        self.store
            .heartbeat(WORKER_NAME, WorkerState::Alive, None)
            .await
            .context("initial heartbeat")?;

        // Watcher events bridge into the async loop via a channel; the
        // watcher thread must never block on a full queue, so the channel is
        // generous and overflow only costs a rescan.
        let (fs_tx, mut fs_rx) = mpsc::channel::<PathBuf>(self.opts.queue_depth.max(8));
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                if event.kind.is_create() || event.kind.is_modify() {
                    for path in event.paths {
                        let _ = fs_tx.try_send(path);
                    }
                }
            }
        })
        .context("create fs watcher")?;
        watcher
            .watch(&self.opts.input_dir, RecursiveMode::Recursive)
            .context("watch input dir")?;

        let pool = Arc::new(Semaphore::new(self.opts.workers.max(1)));
        let per_file_timeout = Duration::from_secs(self.opts.per_file_timeout_s.max(1));
        let group_window_ms = (self.opts.group_window_s as i64) * 1_000;

        // Images wait in this buffer until their mtime cluster is complete
        // (no younger sibling can still join the group), then get grouped.
        let mut image_buffer: Vec<(PathBuf, i64)> = Vec::new();

        // Start-up full scan.
        for path in walk_files(&self.opts.input_dir) {
            self.route(&path, &mut image_buffer, &pool, per_file_timeout)
                .await;
        }

        let mut tick = tokio::time::interval(Duration::from_secs(1));
        let mut beat = tokio::time::interval(Duration::from_secs(5));

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                Some(reply) = probe.recv() => {
                    let _ = reply.send(());
                }
                Some(path) = fs_rx.recv() => {
                    if path.is_file() {
                        self.route(&path, &mut image_buffer, &pool, per_file_timeout)
                            .await;
                    }
                }
                _ = beat.tick() => {
                    if let Err(e) = self
                        .store
                        .heartbeat(WORKER_NAME, WorkerState::Alive, None)
                        .await
                    {
                        warn!(error = %e, "collector heartbeat failed");
                    }
                }
                _ = tick.tick() => {
                    let ready = drain_ready_images(&mut image_buffer, group_window_ms);
                    if !ready.is_empty() {
                        let groups = normalize::assign_groups(&ready, group_window_ms);
                        self.dispatch_batch(groups, &pool, per_file_timeout).await;
                    }
                }
            }
        }

        // Drain whatever is still buffered before going down.
        let remaining: Vec<(PathBuf, i64)> = std::mem::take(&mut image_buffer);
        if !remaining.is_empty() {
            let groups = normalize::assign_groups(&remaining, group_window_ms);
            self.dispatch_batch(groups, &pool, per_file_timeout).await;
        }

        // Wait for in-flight parses.
        let _ = pool
            .acquire_many(self.opts.workers.max(1) as u32)
            .await
            .context("drain parse pool")?;

        self.store
            .heartbeat(WORKER_NAME, WorkerState::Dead, None)
            .await
            .context("final heartbeat")?;
        info!("collector stopped");
        Ok(())
    }

    /// Route one discovered file: images buffer for grouping, everything
    /// else parses immediately through the pool.
    async fn route(
        &self,
        path: &Path,
        image_buffer: &mut Vec<(PathBuf, i64)>,
        pool: &Arc<Semaphore>,
        timeout: Duration,
    ) {
        if is_image_like(path) {
            let mtime = file_mtime_ms(path);
            image_buffer.push((path.to_path_buf(), mtime));
        } else {
            self.spawn_parse(path.to_path_buf(), None, pool, timeout).await;
        }
    }

    async fn dispatch_batch(
        &self,
        groups: HashMap<PathBuf, Option<String>>,
        pool: &Arc<Semaphore>,
        timeout: Duration,
    ) {
        for (path, group_id) in groups {
            let permit = match pool.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => return,
            };
            let pipeline = Arc::clone(&self.pipeline);
            tokio::spawn(async move {
                let _permit = permit;
                run_with_timeout(&pipeline, &path, group_id.as_deref(), timeout).await;
            });
        }
    }

    async fn spawn_parse(
        &self,
        path: PathBuf,
        group_id: Option<String>,
        pool: &Arc<Semaphore>,
        timeout: Duration,
    ) {
        let permit = match pool.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => return,
        };
        let pipeline = Arc::clone(&self.pipeline);
        tokio::spawn(async move {
            let _permit = permit;
            run_with_timeout(&pipeline, &path, group_id.as_deref(), timeout).await;
        });
    }
}

/// Parse one file under a wall-clock timeout; a timeout is reported and the
/// worker survives.
async fn run_with_timeout(
    pipeline: &Pipeline,
    path: &Path,
    group_id: Option<&str>,
    timeout: Duration,
) {
    match tokio::time::timeout(timeout, pipeline.process_file(path, group_id)).await {
        Ok(outcome) => {
            info!(path = %path.display(), ?outcome, "file processed");
        }
        Err(_) => {
            warn!(path = %path.display(), "per-file timeout exceeded, aborted");
        }
    }
}

/// Recursively list regular files under `dir`.
pub fn walk_files(dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(cur) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&cur) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.is_file() {
                out.push(path);
            }
        }
    }
    out.sort();
    out
}

fn is_image_like(path: &Path) -> bool {
    matches!(
        path.extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .as_deref(),
        Some("jpg") | Some("jpeg") | Some("png") | Some("pdf")
    )
}

fn file_mtime_ms(path: &Path) -> i64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Take images whose newest possible sibling can no longer fall inside the
/// grouping window (mtime older than `window_ms`).
fn drain_ready_images(buffer: &mut Vec<(PathBuf, i64)>, window_ms: i64) -> Vec<(PathBuf, i64)> {
    let now = chrono::Utc::now().timestamp_millis();
    let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(buffer)
        .into_iter()
        .partition(|(_, mtime)| now - mtime >= window_ms);
    *buffer = waiting;
    ready
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_like_extensions() {
        assert!(is_image_like(Path::new("a/receipt.JPG")));
        assert!(is_image_like(Path::new("a/invoice.pdf")));
        assert!(!is_image_like(Path::new("a/statement.csv")));
    }

    #[test]
    fn drain_partitions_by_age() {
        let now = chrono::Utc::now().timestamp_millis();
        let mut buf = vec![
            (PathBuf::from("old.jpg"), now - 120_000),
            (PathBuf::from("new.jpg"), now - 1_000),
        ];
        let ready = drain_ready_images(&mut buf, 60_000);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].0, PathBuf::from("old.jpg"));
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn walk_lists_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.csv"), "x").unwrap();
        std::fs::write(dir.path().join("sub/b.csv"), "y").unwrap();
        let files = walk_files(dir.path());
        assert_eq!(files.len(), 2);
    }
}
