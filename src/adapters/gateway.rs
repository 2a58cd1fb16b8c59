use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which provider serves the review calls. Picked once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Gemini,
    Openai,
    Anthropic,
    Ollama,
}

impl Backend {
    /// Guesses the backend from a model name, for configs that only set
    /// `model`.
    pub fn for_model(name: &str) -> Option<Backend> {
        if name.starts_with("gemini") {
            Some(Backend::Gemini)
        } else if name.starts_with("gpt-") || name.starts_with("o1-") || name.starts_with("o3-") {
            Some(Backend::Openai)
        } else if name.starts_with("claude") {
            Some(Backend::Anthropic)
        } else if name.starts_with("ollama:") {
            Some(Backend::Ollama)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub backend: Backend,
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub temperature: f32,
    pub max_tokens: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Gemini,
            model: "gemini-1.5-flash".to_string(),
            api_key: None,
            base_url: None,
            temperature: 0.2,
            max_tokens: 4096,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    pub text: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// How a single review call can fail. Only quota pressure and transport-level
/// unavailability are worth retrying; the orchestrator owns that policy, the
/// adapters themselves never retry.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("backend quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("backend returned an unusable response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::QuotaExceeded(_) | GatewayError::Unavailable(_)
        )
    }
}

#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// One review call: the unit rendered into a prompt goes in, raw response
    /// text comes out. Exactly one attempt per call.
    async fn review(&self, request: ModelRequest) -> Result<ModelResponse, GatewayError>;

    fn backend_name(&self) -> &str;
}

pub fn create_gateway(config: &BackendConfig) -> Result<Box<dyn ModelGateway>> {
    match config.backend {
        Backend::Gemini => Ok(Box::new(crate::adapters::GeminiGateway::new(
            config.clone(),
        )?)),
        Backend::Openai => Ok(Box::new(crate::adapters::OpenAiGateway::new(
            config.clone(),
        )?)),
        Backend::Anthropic => Ok(Box::new(crate::adapters::AnthropicGateway::new(
            config.clone(),
        )?)),
        Backend::Ollama => Ok(Box::new(crate::adapters::OllamaGateway::new(
            config.clone(),
        )?)),
    }
}

/// Shared status classification for the HTTP adapters: 429 is quota pressure,
/// server errors are transient, anything else (bad key, bad request) will not
/// get better by retrying.
pub(crate) fn classify_status(status: reqwest::StatusCode, body: &str) -> GatewayError {
    let detail = format!("{status}: {}", snippet(body));
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        GatewayError::QuotaExceeded(detail)
    } else if status.is_server_error() {
        GatewayError::Unavailable(detail)
    } else {
        GatewayError::InvalidResponse(detail)
    }
}

pub(crate) fn transport_error(err: reqwest::Error) -> GatewayError {
    GatewayError::Unavailable(err.to_string())
}

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= 200 {
        return trimmed.to_string();
    }
    let mut end = 200;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &trimmed[..end])
}
