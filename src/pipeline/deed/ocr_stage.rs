use std::sync::Arc;

use super::{DeedError, DeedPayload, DeedTools, OcrOutput};
use crate::pipeline::engine::{
    CancellationToken, ItemSteps, Stage, StageResult, StepFault, WorkItem,
};

pub const OCR_STAGE: &str = "ocr";

/// Stage 1: OCR text plus the page-table fee.
pub struct OcrStage {
    tools: Arc<DeedTools>,
}

impl OcrStage {
    pub fn new(tools: Arc<DeedTools>) -> Self {
        Self { tools }
    }
}

impl Stage<DeedPayload> for OcrStage {
    fn process(
        &self,
        item: &WorkItem,
        _input: Option<DeedPayload>,
        token: &CancellationToken,
    ) -> StageResult<DeedPayload> {
        let steps = ItemSteps::new(OCR_STAGE, item, token);
        let outcome = run_ocr_steps(&self.tools, &steps).map(DeedPayload::Extracted);
        steps.finish(outcome)
    }
}

/// OCR sub-steps, shared with the single-stage mode.
pub(crate) fn run_ocr_steps(
    tools: &DeedTools,
    steps: &ItemSteps<'_, DeedError>,
) -> Result<OcrOutput, StepFault<DeedError>> {
    let item = steps.item();
    let pdf = item.source();

    let text = steps.step("OCR", || {
        let text = tools.ocr.extract_text(pdf)?;
        let chars = text.trim().chars().count();
        if chars < tools.min_text_chars {
            tracing::warn!(document_id = %item.id, chars, "OCR text too short");
            return Err(DeedError::Validation("OCR returned insufficient text".into()));
        }
        Ok(text)
    })?;

    // The fee is optional at this point: table detection and the vision
    // resolver pick up documents where the heuristic finds nothing.
    let registration_fee = steps.step("OCR fee extraction", || -> Result<_, DeedError> {
        match tools.fees.extract(tools.pages.as_ref(), pdf) {
            Ok(fee) => Ok(fee),
            Err(e) => {
                tracing::warn!(document_id = %item.id, error = %e, "Fee heuristic failed");
                Ok(None)
            }
        }
    })?;

    let ocr_text_fee = if tools.fee_from_ocr_text {
        tools.fees.extract_from_ocr_text(&text)
    } else {
        None
    };

    tracing::info!(
        document_id = %item.id,
        chars = text.len(),
        registration_fee = ?registration_fee,
        "OCR complete"
    );
    Ok(OcrOutput {
        text,
        registration_fee,
        ocr_text_fee,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::SqliteDeedStore;
    use crate::pipeline::engine::StageStatus;
    use crate::pipeline::extraction::{MockPages, MockTextExtractor, RegistrationFeeExtractor};
    use crate::pipeline::structuring::{MockLlmClient, ModelDeedExtractor};

    pub(crate) const LONG_TEXT: &str = "SALE DEED executed at Bengaluru between the vendor \
        Ravi Kumar and the purchaser Asha Rao for the property described in Schedule C, \
        registration fee 20,400.00 paid.";

    pub(crate) const FEE_PAGE: &str =
        "Registration Fee      20400.00\nScanning Fee 300.00\nTotal 20700.00";

    pub(crate) const DEED_JSON: &str = r#"{
        "buyer_details": [{"name": "Asha Rao", "aadhaar_number": "1234 5678 9012"}],
        "seller_details": [{"name": "Ravi Kumar"}],
        "property_details": {"sale_consideration": "2862413", "registration_fee": "999"},
        "document_details": {"transaction_date": "2021-03-04"}
    }"#;

    pub(crate) fn tools(text: &str, pages: &[&str]) -> DeedTools {
        DeedTools {
            ocr: Arc::new(MockTextExtractor::new(text)),
            pages: Arc::new(MockPages::new(pages)),
            fees: RegistrationFeeExtractor::default(),
            extractor: Arc::new(ModelDeedExtractor::new(Arc::new(MockLlmClient::new(DEED_JSON)))),
            store: Arc::new(SqliteDeedStore::open_in_memory().unwrap()),
            tables: None,
            table_dir: std::env::temp_dir(),
            min_text_chars: 100,
            fee_from_ocr_text: false,
        }
    }

    fn item() -> WorkItem {
        WorkItem::new("DEED-1", "/intake/DEED-1.pdf")
    }

    fn extracted(result: StageResult<DeedPayload>) -> OcrOutput {
        match result.payload {
            Some(DeedPayload::Extracted(out)) => out,
            other => panic!("expected OCR output, got {other:?}"),
        }
    }

    #[test]
    fn text_and_table_fee_extracted() {
        let stage = OcrStage::new(Arc::new(tools(LONG_TEXT, &["cover", "parties", FEE_PAGE])));
        let result = stage.process(&item(), None, &CancellationToken::new());
        assert_eq!(result.status, StageStatus::Success);

        let out = extracted(result);
        assert_eq!(out.text, LONG_TEXT);
        assert_eq!(out.registration_fee, Some(20400.0));
        assert_eq!(out.ocr_text_fee, None);
    }

    #[test]
    fn short_text_fails_validation() {
        let stage = OcrStage::new(Arc::new(tools("   ", &[])));
        let result = stage.process(&item(), None, &CancellationToken::new());
        assert_eq!(result.status, StageStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("OCR returned insufficient text"));
    }

    #[test]
    fn missing_fee_table_is_not_an_error() {
        let stage = OcrStage::new(Arc::new(tools(LONG_TEXT, &["only one page"])));
        let out = extracted(stage.process(&item(), None, &CancellationToken::new()));
        assert_eq!(out.registration_fee, None);
    }

    #[test]
    fn ocr_text_fallback_when_enabled() {
        let mut tools = tools(LONG_TEXT, &[]);
        tools.fee_from_ocr_text = true;
        let out = extracted(OcrStage::new(Arc::new(tools)).process(
            &item(),
            None,
            &CancellationToken::new(),
        ));
        assert_eq!(out.ocr_text_fee, Some(20400.0));
    }

    #[test]
    fn cancelled_token_stops_before_ocr() {
        let token = CancellationToken::new();
        token.cancel();
        let stage = OcrStage::new(Arc::new(tools(LONG_TEXT, &[])));
        let result = stage.process(&item(), None, &token);
        assert_eq!(result.status, StageStatus::Stopped);
        assert_eq!(result.error.as_deref(), Some("Stopped before OCR"));
    }
}
