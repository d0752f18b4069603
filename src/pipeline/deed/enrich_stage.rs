use std::sync::Arc;

use super::ocr_stage::run_ocr_steps;
use super::{DeedError, DeedPayload, DeedTools, OcrOutput, SavedDeed};
use crate::pipeline::engine::{
    CancellationToken, ItemSteps, Stage, StageResult, StepFault, WorkItem,
};
use crate::pipeline::validation::{apply_registration_fee, format_amount, validate_and_clean};

pub const ENRICH_STAGE: &str = "enrich";
pub const FULL_STAGE: &str = "full";

/// Stage 2: model extraction, cleaning, persistence and table detection.
pub struct EnrichStage {
    tools: Arc<DeedTools>,
}

impl EnrichStage {
    pub fn new(tools: Arc<DeedTools>) -> Self {
        Self { tools }
    }
}

impl Stage<DeedPayload> for EnrichStage {
    fn process(
        &self,
        item: &WorkItem,
        input: Option<DeedPayload>,
        token: &CancellationToken,
    ) -> StageResult<DeedPayload> {
        let steps = ItemSteps::new(ENRICH_STAGE, item, token);
        let outcome = match input {
            Some(DeedPayload::Extracted(ocr)) => {
                run_enrich_steps(&self.tools, &steps, ocr).map(DeedPayload::Saved)
            }
            _ => Err(StepFault::Failed(DeedError::Validation(
                "Missing OCR output from previous stage".into(),
            ))),
        };
        steps.finish(outcome)
    }
}

/// Single-stage mode: OCR and enrichment in one invocation.
pub struct FullDeedStage {
    tools: Arc<DeedTools>,
}

impl FullDeedStage {
    pub fn new(tools: Arc<DeedTools>) -> Self {
        Self { tools }
    }
}

impl Stage<DeedPayload> for FullDeedStage {
    fn process(
        &self,
        item: &WorkItem,
        _input: Option<DeedPayload>,
        token: &CancellationToken,
    ) -> StageResult<DeedPayload> {
        let steps = ItemSteps::new(FULL_STAGE, item, token);
        let outcome = run_ocr_steps(&self.tools, &steps)
            .and_then(|ocr| run_enrich_steps(&self.tools, &steps, ocr))
            .map(DeedPayload::Saved);
        steps.finish(outcome)
    }
}

fn run_enrich_steps(
    tools: &DeedTools,
    steps: &ItemSteps<'_, DeedError>,
    ocr: OcrOutput,
) -> Result<SavedDeed, StepFault<DeedError>> {
    let item = steps.item();

    let deed = steps.step("LLM", || {
        tools
            .extractor
            .extract_structured_data(&ocr.text)
            .map_err(DeedError::from)
    })?;

    let deed = steps.step("validation", || -> Result<_, DeedError> {
        let mut deed = validate_and_clean(deed);
        if let Some(fee) = ocr.registration_fee {
            apply_registration_fee(&mut deed.property, fee);
        }
        deed.property.new_ocr_reg_fee = ocr.ocr_text_fee.map(format_amount);
        Ok(deed)
    })?;

    steps.step("DB save", || tools.store.upsert_deed(&item.id, &deed).map_err(DeedError::from))?;
    tracing::info!(
        document_id = %item.id,
        buyers = deed.buyers.len(),
        sellers = deed.sellers.len(),
        registration_fee = ?ocr.registration_fee,
        "Deed saved"
    );

    let table_image = match (&tools.tables, ocr.registration_fee) {
        (Some(locator), None) => steps.step("table detection", || -> Result<_, DeedError> {
            // The deed is already saved; a detector failure only means the
            // fee stays empty until someone supplies the table image.
            match locator.locate(item.source(), &item.id, &tools.table_dir) {
                Ok(found) => Ok(found),
                Err(e) => {
                    tracing::warn!(document_id = %item.id, error = %e, "Table detection failed");
                    Ok(None)
                }
            }
        })?,
        _ => None,
    };

    Ok(SavedDeed {
        document_id: item.id.clone(),
        registration_fee: ocr.registration_fee,
        buyers: deed.buyers.len(),
        sellers: deed.sellers.len(),
        table_image,
    })
}
