use std::path::Path;
use std::sync::Arc;

use super::{FeeReader, VisionError};
use crate::config::LlmSettings;
use crate::pipeline::structuring::{
    build_client, parse_fee_response, GenerateRequest, ImageInput, LlmClient, StructuringError,
    VISION_FEE_PROMPT,
};

const VISION_SYSTEM_PROMPT: &str =
    "You read amounts from scanned Indian registration receipts and answer in JSON only.";

/// [`FeeReader`] backed by a vision-capable [`LlmClient`].
pub struct ModelFeeReader {
    client: Arc<dyn LlmClient>,
}

impl ModelFeeReader {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }
}

impl FeeReader for ModelFeeReader {
    fn read_registration_fee(&self, image: &Path) -> Result<Option<f64>, VisionError> {
        let mime = image_mime(image)?;
        let bytes = std::fs::read(image)?;

        let response = self.client.generate(&GenerateRequest {
            system: VISION_SYSTEM_PROMPT,
            prompt: VISION_FEE_PROMPT,
            image: Some(ImageInput {
                mime,
                bytes: &bytes,
            }),
        })?;

        let fee = parse_fee_response(&response)?.filter(|fee| *fee > 0.0);
        tracing::debug!(
            image = %image.display(),
            model = self.client.model(),
            fee = ?fee,
            "Vision fee read"
        );
        Ok(fee)
    }
}

fn image_mime(image: &Path) -> Result<&'static str, VisionError> {
    let ext = image
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Ok("image/png"),
        "jpg" | "jpeg" => Ok("image/jpeg"),
        _ => Err(VisionError::UnsupportedImage(image.display().to_string())),
    }
}

/// Vision fee reader for the configured backend and vision model.
pub fn build_fee_reader(settings: &LlmSettings) -> Result<Arc<dyn FeeReader>, StructuringError> {
    let client = build_client(settings, &settings.vision_model)?;
    Ok(Arc::new(ModelFeeReader::new(client)))
}
