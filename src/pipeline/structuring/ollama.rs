use base64::Engine;
use serde::{Deserialize, Serialize};

use super::types::{GenerateRequest, GenerationOptions, LlmClient};
use super::StructuringError;

/// Ollama HTTP client (`/api/generate`).
pub struct OllamaClient {
    base_url: String,
    model: String,
    options: GenerationOptions,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl OllamaClient {
    pub fn new(
        base_url: &str,
        model: &str,
        options: GenerationOptions,
        timeout_secs: u64,
    ) -> Result<Self, StructuringError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| StructuringError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            options,
            client,
            timeout_secs,
        })
    }

    fn map_send_error(&self, e: reqwest::Error) -> StructuringError {
        if e.is_connect() {
            StructuringError::Connection(self.base_url.clone())
        } else if e.is_timeout() {
            StructuringError::HttpClient(format!("Request timed out after {}s", self.timeout_secs))
        } else {
            StructuringError::HttpClient(e.to_string())
        }
    }
}

#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    format: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

impl LlmClient for OllamaClient {
    fn generate(&self, request: &GenerateRequest<'_>) -> Result<String, StructuringError> {
        let url = format!("{}/api/generate", self.base_url);
        let images = request
            .image
            .map(|img| vec![base64::engine::general_purpose::STANDARD.encode(img.bytes)])
            .unwrap_or_default();
        let body = OllamaGenerateRequest {
            model: &self.model,
            prompt: request.prompt,
            system: request.system,
            stream: false,
            format: "json",
            images,
            options: OllamaOptions {
                temperature: self.options.temperature,
                num_predict: self.options.max_tokens,
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(StructuringError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: OllamaGenerateResponse = response
            .json()
            .map_err(|e| StructuringError::MalformedResponse(e.to_string()))?;
        Ok(parsed.response)
    }

    fn check_connection(&self) -> Result<(), StructuringError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| self.map_send_error(e))?;
        if !response.status().is_success() {
            return Err(StructuringError::Api {
                status: response.status().as_u16(),
                body: response.text().unwrap_or_default(),
            });
        }
        Ok(())
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let client =
            OllamaClient::new("http://localhost:11434/", "qwen2.5", GenerationOptions::default(), 5)
                .unwrap();
        assert_eq!(client.base_url, "http://localhost:11434");
        assert_eq!(client.model(), "qwen2.5");
    }

    #[test]
    fn request_serialises_json_format_and_images() {
        let body = OllamaGenerateRequest {
            model: "m",
            prompt: "p",
            system: "s",
            stream: false,
            format: "json",
            images: vec!["aGVsbG8=".into()],
            options: OllamaOptions {
                temperature: 0.5,
                num_predict: 128,
            },
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["format"], "json");
        assert_eq!(value["images"][0], "aGVsbG8=");
        assert_eq!(value["options"]["num_predict"], 128);
    }
}
