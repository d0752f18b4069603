//! Structured-data extraction through a text or vision model.
//!
//! [`LlmClient`] is the transport (Ollama, an OpenAI-compatible server or Gemini).
//! [`DeedExtractor`] turns OCR text into a [`SaleDeed`]; the vision module's
//! fee reader uses the same transport with an image attached.

pub mod gemini;
pub mod ollama;
pub mod openai;
pub mod parser;
pub mod prompt;
pub mod types;

pub use gemini::*;
pub use ollama::*;
pub use openai::*;
pub use parser::*;
pub use prompt::*;
pub use types::*;

use std::sync::Arc;

use thiserror::Error;

use crate::config::LlmSettings;
use crate::models::SaleDeed;

#[derive(Error, Debug)]
pub enum StructuringError {
    #[error("Model server is not reachable at {0}")]
    Connection(String),

    #[error("Model server returned error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("{0} backend requires an API key")]
    MissingApiKey(String),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Malformed model response: {0}")]
    MalformedResponse(String),

    #[error("JSON parsing error: {0}")]
    JsonParsing(String),

    #[error("Model returned no structured data")]
    EmptyResult,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Text model → sale deed.
pub trait DeedExtractor: Send + Sync {
    fn extract_structured_data(&self, ocr_text: &str) -> Result<SaleDeed, StructuringError>;

    fn check_connection(&self) -> Result<(), StructuringError>;
}

/// [`DeedExtractor`] backed by any [`LlmClient`].
pub struct ModelDeedExtractor {
    client: Arc<dyn LlmClient>,
}

impl ModelDeedExtractor {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }
}

impl DeedExtractor for ModelDeedExtractor {
    fn extract_structured_data(&self, ocr_text: &str) -> Result<SaleDeed, StructuringError> {
        let prompt = build_extraction_prompt(ocr_text);
        let response = self.client.generate(&GenerateRequest {
            system: SALE_DEED_SYSTEM_PROMPT,
            prompt: &prompt,
            image: None,
        })?;
        parse_sale_deed(&response)
    }

    fn check_connection(&self) -> Result<(), StructuringError> {
        self.client.check_connection()
    }
}

/// Build the transport for `settings.backend`.
pub fn build_client(
    settings: &LlmSettings,
    model: &str,
) -> Result<Arc<dyn LlmClient>, StructuringError> {
    let has_key = settings.api_key.as_deref().is_some_and(|key| !key.trim().is_empty());
    if settings.backend.requires_api_key() && !has_key {
        return Err(StructuringError::MissingApiKey(settings.backend.to_string()));
    }

    let base_url = settings
        .base_url
        .clone()
        .unwrap_or_else(|| settings.backend.default_base_url().to_string());
    let options = GenerationOptions {
        temperature: settings.temperature,
        max_tokens: settings.max_tokens,
    };

    let client: Arc<dyn LlmClient> = match settings.backend {
        LlmBackend::Ollama => Arc::new(OllamaClient::new(
            &base_url,
            model,
            options,
            settings.timeout_secs,
        )?),
        LlmBackend::LlamaCpp | LlmBackend::Vllm | LlmBackend::Groq => {
            Arc::new(OpenAiCompatClient::new(
                &base_url,
                model,
                settings.api_key.clone(),
                options,
                settings.timeout_secs,
            )?)
        }
        LlmBackend::Gemini => {
            Arc::new(GeminiClient::new(
                &base_url,
                model,
                settings.api_key.as_deref().unwrap_or_default(),
                options,
                settings.timeout_secs,
            )?)
        }
    };

    tracing::info!(
        backend = %settings.backend,
        base_url = %base_url,
        model,
        "Model client configured"
    );
    Ok(client)
}

/// Text extractor for the configured backend and text model.
pub fn build_extractor(
    settings: &LlmSettings,
) -> Result<Arc<dyn DeedExtractor>, StructuringError> {
    let client = build_client(settings, &settings.model)?;
    Ok(Arc::new(ModelDeedExtractor::new(client)))
}
