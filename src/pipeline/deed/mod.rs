//! Sale-deed stages for the batch engine.
//!
//! Pipeline mode runs two stages:
//! - `ocr`: OCR the PDF and read the fee from the page tables
//! - `enrich`: model extraction, cleaning, persistence and, when no fee was
//!   found, fee-table detection for the vision resolver
//!
//! Legacy mode runs the same sub-steps in one stage ([`FullDeedStage`]).
//! The resolver pipeline ([`VisionFeeStage`]) fills in missing fees from the
//! cropped table images afterwards.

pub mod enrich_stage;
pub mod ocr_stage;
pub mod resolver;
pub mod service;

pub use enrich_stage::*;
pub use ocr_stage::*;
pub use resolver::*;
pub use service::*;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use super::engine::{ItemDisposer, StageStatus, WorkItem};
use super::extraction::{ExtractionError, PageTextSource, RegistrationFeeExtractor, TextExtractor};
use super::files;
use super::structuring::{DeedExtractor, StructuringError};
use super::vision::{TableLocator, VisionError};
use crate::db::{DatabaseError, DeedStore};

#[derive(Error, Debug)]
pub enum DeedError {
    #[error("Text extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Structuring failed: {0}")]
    Structuring(#[from] StructuringError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Vision error: {0}")]
    Vision(#[from] VisionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Validation(String),
}

// ═══════════════════════════════════════════════════════════
// Payloads
// ═══════════════════════════════════════════════════════════

/// What the OCR stage hands to the enrichment stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OcrOutput {
    pub text: String,
    /// Fee from the page-table heuristic.
    pub registration_fee: Option<f64>,
    /// Fee read next to a label in the OCR text, when that fallback is enabled.
    pub ocr_text_fee: Option<f64>,
}

/// Final outcome of a successfully processed deed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SavedDeed {
    pub document_id: String,
    pub registration_fee: Option<f64>,
    pub buyers: usize,
    pub sellers: usize,
    /// Cropped fee table queued for the vision resolver.
    pub table_image: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeedPayload {
    Extracted(OcrOutput),
    Saved(SavedDeed),
}

// ═══════════════════════════════════════════════════════════
// Collaborators
// ═══════════════════════════════════════════════════════════

/// Everything the deed stages call out to.
pub struct DeedTools {
    pub ocr: Arc<dyn TextExtractor>,
    pub pages: Arc<dyn PageTextSource>,
    pub fees: RegistrationFeeExtractor,
    pub extractor: Arc<dyn DeedExtractor>,
    pub store: Arc<dyn DeedStore>,
    /// `None` disables table detection.
    pub tables: Option<TableLocator>,
    /// Where cropped fee tables are written.
    pub table_dir: PathBuf,
    pub min_text_chars: usize,
    pub fee_from_ocr_text: bool,
}

// ═══════════════════════════════════════════════════════════
// Disposition
// ═══════════════════════════════════════════════════════════

/// Routes batch PDFs once they are terminal:
/// success → `processed/`, failure → `failed/`, stop → left in intake.
#[derive(Debug, Clone)]
pub struct DeedDisposer {
    processed_dir: PathBuf,
    failed_dir: PathBuf,
}

impl DeedDisposer {
    pub fn new(processed_dir: impl Into<PathBuf>, failed_dir: impl Into<PathBuf>) -> Self {
        Self {
            processed_dir: processed_dir.into(),
            failed_dir: failed_dir.into(),
        }
    }
}

impl ItemDisposer for DeedDisposer {
    fn dispose(&self, item: &WorkItem, status: StageStatus, error: Option<&str>) {
        let dest = match status {
            StageStatus::Success => &self.processed_dir,
            StageStatus::Failed => &self.failed_dir,
            StageStatus::Stopped => return,
        };
        relocate(item, dest, error);
    }
}

fn relocate(item: &WorkItem, dest: &Path, error: Option<&str>) {
    match files::move_into(item.source(), dest) {
        Ok(path) => tracing::info!(
            document_id = %item.id,
            to = %path.display(),
            reason = error.unwrap_or(""),
            "Source file relocated"
        ),
        Err(e) => tracing::error!(
            document_id = %item.id,
            source = %item.source().display(),
            error = %e,
            "Failed to relocate source file"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disposer_routes_by_status() {
        let root = tempfile::tempdir().unwrap();
        let intake = root.path().join("newly_uploaded");
        std::fs::create_dir_all(&intake).unwrap();
        let disposer = DeedDisposer::new(root.path().join("processed"), root.path().join("failed"));

        let mut items = Vec::new();
        for name in ["ok", "bad", "later"] {
            let path = intake.join(format!("{name}.pdf"));
            std::fs::write(&path, b"%PDF").unwrap();
            items.push(WorkItem::new(name, path));
        }

        disposer.dispose(&items[0], StageStatus::Success, None);
        disposer.dispose(&items[1], StageStatus::Failed, Some("LLM down"));
        disposer.dispose(&items[2], StageStatus::Stopped, Some("Stopped before LLM"));

        assert!(root.path().join("processed/ok.pdf").exists());
        assert!(root.path().join("failed/bad.pdf").exists());
        assert!(intake.join("later.pdf").exists());
        assert!(!intake.join("ok.pdf").exists());
    }

    #[test]
    fn payload_serialises_with_kind_tag() {
        let payload = DeedPayload::Saved(SavedDeed {
            document_id: "D1".into(),
            registration_fee: Some(20400.0),
            buyers: 1,
            sellers: 2,
            table_image: None,
        });
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["kind"], "saved");
        assert_eq!(value["sellers"], 2);
    }
}
