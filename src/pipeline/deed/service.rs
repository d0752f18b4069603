use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use thiserror::Error;

use super::{
    DeedDisposer, DeedPayload, DeedTools, EnrichStage, FeeUpdate, FullDeedStage, OcrStage,
    ResolverDisposer, VisionFeeStage, ENRICH_STAGE, FULL_STAGE, OCR_STAGE, VISION_STAGE,
};
use crate::config::Settings;
use crate::db::{DatabaseError, DeedStore, SqliteDeedStore};
use crate::models::SaleDeedRecord;
use crate::pipeline::engine::{
    PipelineConfig, PipelineError, PipelineOrchestrator, RunHandle, RunStats, RunSummary,
    StageSpec, WorkItem,
};
use crate::pipeline::extraction::{
    ExtractionError, OcrEngine, PageRenderer, PdfTextLayer, PdfiumRenderer,
    RegistrationFeeExtractor, TesseractOcr, TextExtractor,
};
use crate::pipeline::files::{self, IMAGE_EXTENSIONS, PDF_EXTENSIONS};
use crate::pipeline::structuring::{build_extractor, StructuringError};
use crate::pipeline::vision::{build_fee_reader, CommandRegionDetector, FeeReader, TableLocator};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Model client error: {0}")]
    Structuring(#[from] StructuringError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// How the batch pipeline is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
    /// OCR and enrichment in separate pools joined by a bounded queue.
    Pipeline,
    /// One pool running every sub-step.
    Legacy,
}

/// File count of one pipeline folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderCount {
    pub name: &'static str,
    pub path: PathBuf,
    pub files: usize,
}

/// Composes the batch and resolver pipelines with the folder operations.
pub struct DeedProcessingService {
    settings: Settings,
    tools: Arc<DeedTools>,
    pipeline: Arc<PipelineOrchestrator<DeedPayload>>,
    legacy: Arc<PipelineOrchestrator<DeedPayload>>,
    vision: Arc<PipelineOrchestrator<FeeUpdate>>,
    /// Mode of the current or last batch. Held while a batch is started.
    batch: Mutex<BatchMode>,
}

impl DeedProcessingService {
    pub fn new(
        settings: Settings,
        tools: DeedTools,
        fee_reader: Arc<dyn FeeReader>,
    ) -> Result<Self, ServiceError> {
        settings.ensure_directories()?;
        let tools = Arc::new(tools);
        let p = &settings.pipeline;
        let config = PipelineConfig {
            queue_capacity: p.queue_capacity,
        };
        let disposer = Arc::new(DeedDisposer::new(
            settings.processed_dir(),
            settings.failed_dir(),
        ));

        let pipeline = PipelineOrchestrator::new(
            vec![
                StageSpec::new(OCR_STAGE, p.ocr_workers, Arc::new(OcrStage::new(tools.clone()))),
                StageSpec::new(
                    ENRICH_STAGE,
                    p.llm_workers,
                    Arc::new(EnrichStage::new(tools.clone())),
                ),
            ],
            config,
        )?
        .with_disposer(disposer.clone());

        let legacy = PipelineOrchestrator::new(
            vec![StageSpec::new(
                FULL_STAGE,
                p.legacy_workers,
                Arc::new(FullDeedStage::new(tools.clone())),
            )],
            config,
        )?
        .with_disposer(disposer);

        let vision = PipelineOrchestrator::new(
            vec![StageSpec::new(
                VISION_STAGE,
                p.vision_workers,
                Arc::new(VisionFeeStage::new(fee_reader, tools.store.clone())),
            )],
            config,
        )?
        .with_disposer(Arc::new(ResolverDisposer::new(settings.vision_failed_dir())));

        Ok(Self {
            settings,
            tools,
            pipeline: Arc::new(pipeline),
            legacy: Arc::new(legacy),
            vision: Arc::new(vision),
            batch: Mutex::new(BatchMode::Pipeline),
        })
    }

    /// Wire the PDF backends, model clients and SQLite store from settings.
    ///
    /// PDFium is only bound when something rasterises pages: Tesseract OCR
    /// or the table detector.
    pub fn from_settings(settings: Settings) -> Result<Self, ServiceError> {
        let ocr_cfg = &settings.ocr;
        let text_layer = Arc::new(PdfTextLayer::new(ocr_cfg.max_pages));
        let store: Arc<dyn DeedStore> =
            Arc::new(SqliteDeedStore::open(&settings.database_path())?);

        let renderer: Option<Arc<dyn PageRenderer>> =
            if ocr_cfg.engine == OcrEngine::Tesseract || settings.detector.command.is_some() {
                Some(Arc::new(PdfiumRenderer::new(ocr_cfg.dpi)?))
            } else {
                None
            };

        let tables = match (&settings.detector.command, &renderer) {
            (Some(command), Some(renderer)) => Some(TableLocator::new(
                renderer.clone(),
                Arc::new(CommandRegionDetector::new(command, settings.detector.confidence)),
                ocr_cfg.max_pages,
            )),
            _ => {
                tracing::info!("No detector command configured, table detection disabled");
                None
            }
        };

        let ocr: Arc<dyn TextExtractor> = match (ocr_cfg.engine, &renderer) {
            (OcrEngine::Tesseract, Some(renderer)) => Arc::new(TesseractOcr::new(
                renderer.clone(),
                &ocr_cfg.languages,
                ocr_cfg.oem,
                ocr_cfg.psm,
                ocr_cfg.max_pages,
            )),
            _ => text_layer.clone(),
        };
        tracing::info!(engine = %ocr_cfg.engine, dpi = ocr_cfg.dpi, "OCR engine selected");

        let fees = &settings.fees;
        let tools = DeedTools {
            ocr,
            pages: text_layer,
            fees: RegistrationFeeExtractor::new(
                fees.threshold_pct,
                fees.max_misc_fee,
                fees.min_fee,
            ),
            extractor: build_extractor(&settings.llm)?,
            store,
            tables,
            table_dir: settings.left_over_reg_fee_dir(),
            min_text_chars: ocr_cfg.min_text_chars,
            fee_from_ocr_text: ocr_cfg.fee_from_ocr_text,
        };
        let reader = build_fee_reader(&settings.llm)?;

        Self::new(settings, tools, reader)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Check that the text model server answers.
    pub fn check_connection(&self) -> Result<(), ServiceError> {
        Ok(self.tools.extractor.check_connection()?)
    }

    // ═══════════════════════════════════════════
    // Batch pipeline
    // ═══════════════════════════════════════════

    /// PDFs waiting in `newly_uploaded/`, oldest name first.
    pub fn pending_documents(&self, limit: Option<usize>) -> Result<Vec<WorkItem>, ServiceError> {
        let paths = files::list_files(&self.settings.newly_uploaded_dir(), PDF_EXTENSIONS)?;
        Ok(paths
            .into_iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(|path| WorkItem::new(files::document_id_from_filename(&path), path))
            .collect())
    }

    /// Start a batch over the pending PDFs in the background.
    ///
    /// At most one batch runs at a time across both modes.
    pub fn start_batch(
        &self,
        mode: BatchMode,
        limit: Option<usize>,
    ) -> Result<RunHandle<DeedPayload>, ServiceError> {
        let mut current = self.batch.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_batch_running() {
            return Err(PipelineError::AlreadyRunning.into());
        }
        let items = self.pending_documents(limit)?;
        tracing::info!(mode = ?mode, documents = items.len(), "Starting batch");

        let handle = self.batch_orchestrator(mode).start(items)?;
        *current = mode;
        Ok(handle)
    }

    /// Run a batch and wait for it to finish.
    pub fn run_batch(
        &self,
        mode: BatchMode,
        limit: Option<usize>,
    ) -> Result<RunSummary<DeedPayload>, ServiceError> {
        Ok(self.start_batch(mode, limit)?.wait()?)
    }

    /// Request a stop. Returns how many documents had not finished.
    pub fn stop_batch(&self) -> usize {
        let mode = self.batch.lock().unwrap_or_else(PoisonError::into_inner);
        let orchestrator = self.batch_orchestrator(*mode);
        if !orchestrator.is_running() {
            tracing::info!("Stop requested but no batch is running");
            return 0;
        }
        orchestrator.request_stop();
        let remaining = orchestrator.stats().remaining();
        tracing::info!(remaining, "Batch stop requested");
        remaining
    }

    pub fn batch_stats(&self) -> RunStats {
        let mode = *self.batch.lock().unwrap_or_else(PoisonError::into_inner);
        self.batch_orchestrator(mode).stats()
    }

    pub fn is_batch_running(&self) -> bool {
        self.pipeline.is_running() || self.legacy.is_running()
    }

    fn batch_orchestrator(&self, mode: BatchMode) -> &Arc<PipelineOrchestrator<DeedPayload>> {
        match mode {
            BatchMode::Pipeline => &self.pipeline,
            BatchMode::Legacy => &self.legacy,
        }
    }

    // ═══════════════════════════════════════════
    // Vision resolver
    // ═══════════════════════════════════════════

    /// Fee-table images waiting in `left_over_reg_fee/`.
    pub fn pending_images(&self) -> Result<Vec<WorkItem>, ServiceError> {
        let paths = files::list_files(&self.settings.left_over_reg_fee_dir(), IMAGE_EXTENSIONS)?;
        Ok(paths
            .into_iter()
            .map(|path| WorkItem::new(files::document_id_from_image(&path), path))
            .collect())
    }

    pub fn start_vision(&self) -> Result<RunHandle<FeeUpdate>, ServiceError> {
        let items = self.pending_images()?;
        tracing::info!(images = items.len(), "Starting vision fee resolution");
        Ok(self.vision.start(items)?)
    }

    pub fn run_vision(&self) -> Result<RunSummary<FeeUpdate>, ServiceError> {
        Ok(self.start_vision()?.wait()?)
    }

    /// Request a stop. Returns how many images had not finished.
    pub fn stop_vision(&self) -> usize {
        if !self.vision.is_running() {
            return 0;
        }
        self.vision.request_stop();
        self.vision.stats().remaining()
    }

    pub fn vision_stats(&self) -> RunStats {
        self.vision.stats()
    }

    // ═══════════════════════════════════════════
    // Folders and records
    // ═══════════════════════════════════════════

    /// Move every quarantined PDF back to intake.
    pub fn requeue_failed(&self) -> Result<usize, ServiceError> {
        let moved =
            files::requeue(&self.settings.failed_dir(), &self.settings.newly_uploaded_dir())?;
        tracing::info!(moved, "Failed documents requeued");
        Ok(moved)
    }

    /// Archive the quarantined PDFs into a gzip tarball at `output`.
    pub fn bundle_failed(&self, output: &Path) -> Result<usize, ServiceError> {
        let count = files::bundle_dir(&self.settings.failed_dir(), PDF_EXTENSIONS, output)?;
        tracing::info!(count, output = %output.display(), "Failed documents bundled");
        Ok(count)
    }

    pub fn folder_stats(&self) -> Vec<FolderCount> {
        self.settings
            .folders()
            .into_iter()
            .map(|(name, path)| {
                let extensions = if name == crate::config::LEFT_OVER_REG_FEE_DIR
                    || name == crate::config::VISION_FAILED_DIR
                {
                    IMAGE_EXTENSIONS
                } else {
                    PDF_EXTENSIONS
                };
                FolderCount {
                    name,
                    files: files::count_files(&path, extensions),
                    path,
                }
            })
            .collect()
    }

    pub fn get_deed(&self, document_id: &str) -> Result<Option<SaleDeedRecord>, ServiceError> {
        Ok(self.tools.store.get_deed(document_id)?)
    }
}
