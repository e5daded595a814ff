//! Per-file ingestion pipeline.
//!
//! Every step fails *soft*: a bad file is recorded as FAILED with its cause
//! and the worker moves on. Document trace ids derive from the content hash,
//! so the same capture ingested twice resolves to the same trace and the
//! ledger's uniqueness makes the second pass a no-op.

use std::path::Path;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use ldk_schemas::DocumentRecord;
use ldk_store::Store;

use crate::detect::{decode_text, detect_kind, sniff_statement_parser, FileKind};
use crate::normalize::{normalize_row, parse_occurred_at};
use crate::ocr::OcrEngine;
use crate::registry::ParserRegistry;
use crate::source::ParserInput;

/// Outcome of one file's ingestion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileOutcome {
    /// Statement parsed; `rows` pending entries written, `skipped` rows
    /// dropped by normalization.
    Parsed { rows: usize, skipped: usize },
    /// Invoice capture queued for classification.
    Document,
    /// Content hash already ingested.
    Duplicate,
    /// Recorded as FAILED with the given cause.
    Failed { cause: String },
}

/// Shared dependencies of the ingestion pipeline.
pub struct Pipeline {
    pub store: Store,
    pub registry: Arc<ParserRegistry>,
    pub ocr: Arc<dyn OcrEngine>,
}

impl Pipeline {
    /// Ingest one file. Never returns `Err` — failures are data.
    pub async fn process_file(&self, path: &Path, group_id: Option<&str>) -> FileOutcome {
        let bytes = match tokio::fs::read(path).await {
            Ok(b) => b,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable input file");
                return FileOutcome::Failed {
                    cause: format!("read: {e}"),
                };
            }
        };

        let content_hash = hex::encode(Sha256::digest(&bytes));

        match self
            .store
            .ingest_file_claim(&content_hash, &path.display().to_string(), "pending")
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                info!(path = %path.display(), "duplicate content hash, skipping");
                return FileOutcome::Duplicate;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ingest claim failed");
                return FileOutcome::Failed {
                    cause: format!("claim: {e}"),
                };
            }
        }

        let outcome = self
            .process_claimed(path, &bytes, &content_hash, group_id)
            .await;

        let (status, cause, rows) = match &outcome {
            FileOutcome::Parsed { rows, .. } => ("PARSED", None, *rows as i64),
            FileOutcome::Document => ("PARSED", None, 1),
            FileOutcome::Failed { cause } => ("FAILED", Some(cause.as_str()), 0),
            FileOutcome::Duplicate => ("SKIPPED_DUPLICATE", None, 0),
        };
        if let Err(e) = self
            .store
            .ingest_file_finish(&content_hash, status, cause, rows)
            .await
        {
            warn!(path = %path.display(), error = %e, "ingest finish failed");
        }

        outcome
    }

    async fn process_claimed(
        &self,
        path: &Path,
        bytes: &[u8],
        content_hash: &str,
        group_id: Option<&str>,
    ) -> FileOutcome {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();

        let kind = match detect_kind(&ext, bytes) {
            Ok(k) => k,
            Err(e) => {
                return FileOutcome::Failed {
                    cause: format!("detect: {e}"),
                }
            }
        };

        match kind {
            FileKind::Csv => {
                let (text, encoding) = decode_text(bytes);
                info!(path = %path.display(), encoding = encoding.as_str(), "decoded statement");
                let Some(parser_name) = sniff_statement_parser(&text) else {
                    return FileOutcome::Failed {
                        cause: "header sniff matched no parser".to_string(),
                    };
                };
                self.ingest_statement(parser_name, &ParserInput::Text(&text))
                    .await
            }
            FileKind::Xlsx => {
                self.ingest_statement("bank_xlsx", &ParserInput::Workbook(path))
                    .await
            }
            FileKind::InvoiceImage => self.ingest_invoice(path, content_hash, group_id).await,
        }
    }

    async fn ingest_statement(
        &self,
        parser_name: &str,
        input: &ParserInput<'_>,
    ) -> FileOutcome {
        let parser = match self.registry.get(parser_name) {
            Ok(p) => p,
            Err(e) => {
                return FileOutcome::Failed {
                    cause: e.to_string(),
                }
            }
        };

        let raw_rows = match parser.parse(input) {
            Ok(rows) => rows,
            Err(e) => {
                return FileOutcome::Failed {
                    cause: format!("parse[{parser_name}]: {e}"),
                }
            }
        };

        let mut written = 0usize;
        let mut skipped = 0usize;
        for raw in &raw_rows {
            match normalize_row(parser.source(), raw) {
                Ok(entry) => match self.store.insert_pending(&entry).await {
                    Ok(_) => written += 1,
                    Err(e) => {
                        warn!(error = %e, "pending insert failed");
                        skipped += 1;
                    }
                },
                Err(e) => {
                    warn!(error = %e, "statement row dropped by normalization");
                    skipped += 1;
                }
            }
        }

        info!(parser = parser_name, written, skipped, "statement ingested");
        FileOutcome::Parsed {
            rows: written,
            skipped,
        }
    }

    async fn ingest_invoice(
        &self,
        path: &Path,
        content_hash: &str,
        group_id: Option<&str>,
    ) -> FileOutcome {
        let invoice = match self.ocr.extract(path).await {
            Ok(inv) => inv,
            Err(e) => {
                return FileOutcome::Failed {
                    cause: format!("ocr: {e}"),
                }
            }
        };

        let Some(amount) = ldk_schemas::Micros::parse_decimal(&invoice.amount_raw) else {
            return FileOutcome::Failed {
                cause: format!("ocr amount unparseable: '{}'", invoice.amount_raw),
            };
        };
        let occurred_at_ms = match parse_occurred_at(&invoice.occurred_at_raw) {
            Ok(ms) => ms,
            Err(e) => {
                return FileOutcome::Failed {
                    cause: format!("ocr date: {e}"),
                }
            }
        };

        // Deterministic trace from content: re-ingesting the same capture
        // resolves to the same trace id end-to-end.
        let trace_id = format!("doc-{}", &content_hash[..32]);
        let record = DocumentRecord {
            trace_id: trace_id.clone(),
            content_hash: content_hash.to_string(),
            source_path: path.display().to_string(),
            vendor: invoice.vendor,
            amount,
            occurred_at_ms,
            summary: invoice.summary,
            group_id: group_id.map(|g| g.to_string()),
            project_id: None,
        };

        let payload = match serde_json::to_value(&record) {
            Ok(v) => v,
            Err(e) => {
                return FileOutcome::Failed {
                    cause: format!("document encode: {e}"),
                }
            }
        };
        match self.store.docjob_enqueue(&trace_id, &payload).await {
            Ok(_) => {
                info!(trace_id = %trace_id, "invoice document queued");
                FileOutcome::Document
            }
            Err(e) => FileOutcome::Failed {
                cause: format!("document enqueue: {e}"),
            },
        }
    }
}
