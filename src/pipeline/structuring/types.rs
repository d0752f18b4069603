use std::str::FromStr;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use super::StructuringError;

/// Which server speaks for the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmBackend {
    Ollama,
    LlamaCpp,
    Vllm,
    Groq,
    Gemini,
}

impl LlmBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::LlamaCpp => "llama_cpp",
            Self::Vllm => "vllm",
            Self::Groq => "groq",
            Self::Gemini => "gemini",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::Ollama => "http://localhost:11434",
            Self::LlamaCpp => "http://localhost:8080",
            Self::Vllm => "http://localhost:8000",
            Self::Groq => "https://api.groq.com/openai",
            Self::Gemini => "https://generativelanguage.googleapis.com",
        }
    }

    /// Hosted backends refuse requests without a key.
    pub fn requires_api_key(&self) -> bool {
        matches!(self, Self::Groq | Self::Gemini)
    }
}

impl std::fmt::Display for LlmBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LlmBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "llama_cpp" | "llama.cpp" | "llamacpp" => Ok(Self::LlamaCpp),
            "vllm" => Ok(Self::Vllm),
            "groq" => Ok(Self::Groq),
            "gemini" => Ok(Self::Gemini),
            other => Err(format!("unknown model backend: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.6,
            max_tokens: 4096,
        }
    }
}

/// An image attached to a generation request.
#[derive(Debug, Clone, Copy)]
pub struct ImageInput<'a> {
    pub mime: &'a str,
    pub bytes: &'a [u8],
}

#[derive(Debug, Clone, Copy)]
pub struct GenerateRequest<'a> {
    pub system: &'a str,
    pub prompt: &'a str,
    pub image: Option<ImageInput<'a>>,
}

/// Model transport abstraction (allows mocking).
pub trait LlmClient: Send + Sync {
    /// One non-streaming completion that must answer with a JSON object.
    fn generate(&self, request: &GenerateRequest<'_>) -> Result<String, StructuringError>;

    fn check_connection(&self) -> Result<(), StructuringError>;

    fn model(&self) -> &str;
}

/// Mock client for testing: returns a fixed response and records prompts.
pub struct MockLlmClient {
    response: String,
    online: bool,
    prompts: Mutex<Vec<String>>,
}

impl MockLlmClient {
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            online: true,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn offline() -> Self {
        Self {
            online: false,
            ..Self::new("")
        }
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().ok()?.last().cloned()
    }
}

impl LlmClient for MockLlmClient {
    fn generate(&self, request: &GenerateRequest<'_>) -> Result<String, StructuringError> {
        if !self.online {
            return Err(StructuringError::Connection("mock://offline".into()));
        }
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(request.prompt.to_string());
        }
        Ok(self.response.clone())
    }

    fn check_connection(&self) -> Result<(), StructuringError> {
        if self.online {
            Ok(())
        } else {
            Err(StructuringError::Connection("mock://offline".into()))
        }
    }

    fn model(&self) -> &str {
        "mock"
    }
}
