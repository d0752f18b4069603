use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use super::{relocate, DeedError};
use crate::db::DeedStore;
use crate::pipeline::engine::{
    CancellationToken, ItemDisposer, ItemSteps, Stage, StageResult, StageStatus, StepFault,
    WorkItem,
};
use crate::pipeline::validation::calculate_guidance_value;
use crate::pipeline::vision::FeeReader;

pub const VISION_STAGE: &str = "vision";

/// Fee written back to an existing deed by the resolver.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeeUpdate {
    pub document_id: String,
    pub registration_fee: f64,
    pub guidance_value: f64,
}

/// Reads the fee from a cropped table image and updates the stored deed.
///
/// The work item id is the deed's document id; the source is the image.
pub struct VisionFeeStage {
    reader: Arc<dyn FeeReader>,
    store: Arc<dyn DeedStore>,
}

impl VisionFeeStage {
    pub fn new(reader: Arc<dyn FeeReader>, store: Arc<dyn DeedStore>) -> Self {
        Self { reader, store }
    }

    fn resolve(&self, steps: &ItemSteps<'_, DeedError>) -> Result<FeeUpdate, StepFault<DeedError>> {
        let item = steps.item();

        let fee = steps.step("vision fee read", || {
            if !self.store.exists(&item.id)? {
                return Err(DeedError::Validation(format!(
                    "Document {} not found in database",
                    item.id
                )));
            }
            self.reader
                .read_registration_fee(item.source())?
                .ok_or_else(|| {
                    DeedError::Validation("Invalid or no registration fee extracted".into())
                })
        })?;

        steps.step("DB update", || {
            self.store
                .update_registration_fee(&item.id, fee)
                .map_err(DeedError::from)
        })?;

        tracing::info!(document_id = %item.id, fee, "Registration fee resolved from image");
        Ok(FeeUpdate {
            document_id: item.id.clone(),
            registration_fee: fee,
            guidance_value: calculate_guidance_value(fee),
        })
    }
}

impl Stage<FeeUpdate> for VisionFeeStage {
    fn process(
        &self,
        item: &WorkItem,
        _input: Option<FeeUpdate>,
        token: &CancellationToken,
    ) -> StageResult<FeeUpdate> {
        let steps = ItemSteps::new(VISION_STAGE, item, token);
        let outcome = self.resolve(&steps);
        steps.finish(outcome)
    }
}

/// Routes table images once resolved:
/// success → deleted, failure → `vision_failed/`, stop → left in place.
#[derive(Debug, Clone)]
pub struct ResolverDisposer {
    vision_failed_dir: PathBuf,
}

impl ResolverDisposer {
    pub fn new(vision_failed_dir: impl Into<PathBuf>) -> Self {
        Self {
            vision_failed_dir: vision_failed_dir.into(),
        }
    }
}

impl ItemDisposer for ResolverDisposer {
    fn dispose(&self, item: &WorkItem, status: StageStatus, error: Option<&str>) {
        match status {
            StageStatus::Success => {
                if let Err(e) = std::fs::remove_file(item.source()) {
                    tracing::warn!(
                        document_id = %item.id,
                        image = %item.source().display(),
                        error = %e,
                        "Failed to delete resolved table image"
                    );
                }
            }
            StageStatus::Failed => relocate(item, &self.vision_failed_dir, error),
            StageStatus::Stopped => {}
        }
    }
}
