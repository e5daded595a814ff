//! OCR connector boundary.
//!
//! Invoice/receipt images are extracted by an external OCR service; the core
//! only defines the contract and the extracted-field shape. The daemon wires
//! a concrete connector at startup; tests use scripted implementations.

use std::path::Path;

use anyhow::{bail, Result};
use async_trait::async_trait;

/// Fields extracted from one invoice/receipt capture.
#[derive(Clone, Debug)]
pub struct OcrInvoice {
    pub vendor: String,
    /// Amount as printed (decimal string; glyphs allowed).
    pub amount_raw: String,
    /// Transaction date as printed.
    pub occurred_at_raw: String,
    /// Line items / remark text.
    pub summary: String,
}

/// External OCR engine contract.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Extract invoice fields from an image/PDF file.
    async fn extract(&self, path: &Path) -> Result<OcrInvoice>;
}

/// Placeholder engine for deployments without an OCR connector: every
/// invoice capture fails soft and surfaces in the failed-files listing.
pub struct DisabledOcr;

#[async_trait]
impl OcrEngine for DisabledOcr {
    fn name(&self) -> &'static str {
        "disabled"
    }

    async fn extract(&self, path: &Path) -> Result<OcrInvoice> {
        bail!("no OCR connector configured (file: {})", path.display())
    }
}
