use base64::Engine;
use serde::{Deserialize, Serialize};

use super::types::{GenerateRequest, GenerationOptions, LlmClient};
use super::StructuringError;

/// Client for servers exposing `/v1/chat/completions` (llama.cpp, vLLM, Groq).
pub struct OpenAiCompatClient {
    base_url: String,
    model: String,
    api_key: Option<String>,
    options: GenerationOptions,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl OpenAiCompatClient {
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: Option<String>,
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
            api_key: api_key.filter(|key| !key.trim().is_empty()),
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

    fn authorized(
        &self,
        builder: reqwest::blocking::RequestBuilder,
    ) -> reqwest::blocking::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    fn chat_body<'a>(&'a self, request: &GenerateRequest<'a>) -> ChatRequest<'a> {
        let user_content = match request.image {
            None => MessageContent::Text(request.prompt.to_string()),
            Some(image) => MessageContent::Parts(vec![
                ContentPart::Text {
                    text: request.prompt.to_string(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: format!(
                            "data:{};base64,{}",
                            image.mime,
                            base64::engine::general_purpose::STANDARD.encode(image.bytes)
                        ),
                    },
                },
            ]),
        };

        ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: MessageContent::Text(request.system.to_string()),
                },
                ChatMessage {
                    role: "user",
                    content: user_content,
                },
            ],
            temperature: self.options.temperature,
            max_tokens: self.options.max_tokens,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatAnswer,
}

#[derive(Deserialize)]
struct ChatAnswer {
    #[serde(default)]
    content: Option<String>,
}

fn first_choice_content(response: ChatResponse) -> Result<String, StructuringError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| StructuringError::MalformedResponse("No choices in response".into()))
}

impl LlmClient for OpenAiCompatClient {
    fn generate(&self, request: &GenerateRequest<'_>) -> Result<String, StructuringError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = self.chat_body(request);

        let response = self
            .authorized(self.client.post(&url))
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

        let parsed: ChatResponse = response
            .json()
            .map_err(|e| StructuringError::MalformedResponse(e.to_string()))?;
        first_choice_content(parsed)
    }

    fn check_connection(&self) -> Result<(), StructuringError> {
        let url = format!("{}/v1/models", self.base_url);
        let response = self
            .authorized(self.client.get(&url))
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
