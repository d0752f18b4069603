use base64::Engine;
use serde::{Deserialize, Serialize};

use super::types::{GenerateRequest, GenerationOptions, LlmClient};
use super::StructuringError;

/// Google Gemini client (`/v1beta/models/{model}:generateContent`).
pub struct GeminiClient {
    base_url: String,
    model: String,
    api_key: String,
    options: GenerationOptions,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl GeminiClient {
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: &str,
        options: GenerationOptions,
        timeout_secs: u64,
    ) -> Result<Self, StructuringError> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(StructuringError::MissingApiKey("gemini".into()));
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| StructuringError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
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

    fn model_url(&self) -> String {
        format!("{}/v1beta/models/{}", self.base_url, self.model)
    }

    fn generate_body(&self, request: &GenerateRequest<'_>) -> GeminiRequest {
        let mut parts = vec![Part::Text {
            text: request.prompt.to_string(),
        }];
        if let Some(image) = request.image {
            parts.push(Part::InlineData {
                inline_data: InlineData {
                    mime_type: image.mime.to_string(),
                    data: base64::engine::general_purpose::STANDARD.encode(image.bytes),
                },
            });
        }

        GeminiRequest {
            system_instruction: SystemInstruction {
                parts: vec![Part::Text {
                    text: request.system.to_string(),
                }],
            },
            contents: vec![Content {
                role: "user",
                parts,
            }],
            generation_config: GenerationConfig {
                temperature: self.options.temperature,
                max_output_tokens: self.options.max_tokens,
                response_mime_type: "application/json",
            },
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    system_instruction: SystemInstruction,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    response_mime_type: &'static str,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<AnswerPart>,
}

#[derive(Deserialize)]
struct AnswerPart {
    #[serde(default)]
    text: Option<String>,
}

/// Text parts of the first candidate, concatenated.
fn first_candidate_text(response: GeminiResponse) -> Result<String, StructuringError> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(StructuringError::MalformedResponse("No candidates in response".into()));
    }
    Ok(text)
}

impl LlmClient for GeminiClient {
    fn generate(&self, request: &GenerateRequest<'_>) -> Result<String, StructuringError> {
        let url = format!("{}:generateContent", self.model_url());
        let body = self.generate_body(request);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
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

        let parsed: GeminiResponse = response
            .json()
            .map_err(|e| StructuringError::MalformedResponse(e.to_string()))?;
        first_candidate_text(parsed)
    }

    fn check_connection(&self) -> Result<(), StructuringError> {
        let response = self
            .client
            .get(self.model_url())
            .header("x-goog-api-key", &self.api_key)
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
    use crate::pipeline::structuring::types::ImageInput;

    fn client() -> GeminiClient {
        GeminiClient::new(
            "https://generativelanguage.googleapis.com/",
            "gemini-2.5-flash-lite",
            "AIza-test",
            GenerationOptions::default(),
            5,
        )
        .unwrap()
    }

    #[test]
    fn blank_api_key_is_rejected() {
        let result = GeminiClient::new(
            "https://generativelanguage.googleapis.com",
            "gemini-2.5-flash-lite",
            "   ",
            GenerationOptions::default(),
            5,
        );
        assert!(matches!(result, Err(StructuringError::MissingApiKey(_))));
    }

    #[test]
    fn model_url_is_versioned() {
        assert_eq!(
            client().model_url(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash-lite"
        );
    }

    #[test]
    fn text_request_shape() {
        let request = GenerateRequest {
            system: "sys",
            prompt: "extract",
            image: None,
        };
        let value = serde_json::to_value(client().generate_body(&request)).unwrap();
        assert_eq!(value["systemInstruction"]["parts"][0]["text"], "sys");
        assert_eq!(value["contents"][0]["role"], "user");
        assert_eq!(value["contents"][0]["parts"][0]["text"], "extract");
        assert_eq!(value["contents"][0]["parts"].as_array().unwrap().len(), 1);
        assert_eq!(value["generationConfig"]["maxOutputTokens"], 4096);
        assert_eq!(value["generationConfig"]["responseMimeType"], "application/json");
    }

    #[test]
    fn image_sent_as_inline_data() {
        let request = GenerateRequest {
            system: "sys",
            prompt: "read fee",
            image: Some(ImageInput {
                mime: "image/png",
                bytes: b"hello",
            }),
        };
        let value = serde_json::to_value(client().generate_body(&request)).unwrap();
        let inline = &value["contents"][0]["parts"][1]["inlineData"];
        assert_eq!(inline["mimeType"], "image/png");
        assert_eq!(inline["data"], "aGVsbG8=");
    }

    #[test]
    fn answer_joins_candidate_parts() {
        let parsed: GeminiResponse = serde_json::from_str(
            r#"{"candidates": [{"content": {"role": "model",
                "parts": [{"text": "{\"a\": "}, {"text": "1}"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(first_candidate_text(parsed).unwrap(), "{\"a\": 1}");

        let blocked: GeminiResponse =
            serde_json::from_str(r#"{"candidates": [{"finishReason": "SAFETY"}]}"#).unwrap();
        assert!(matches!(
            first_candidate_text(blocked),
            Err(StructuringError::MalformedResponse(_))
        ));
    }
}
