use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::adapters::gateway::{
    classify_status, transport_error, BackendConfig, GatewayError, ModelGateway, ModelRequest,
    ModelResponse, TokenUsage,
};

pub struct GeminiGateway {
    client: Client,
    config: BackendConfig,
    api_key: String,
    base_url: String,
}

#[derive(Serialize)]
struct GeminiRequest {
    #[serde(rename = "systemInstruction")]
    system_instruction: ContentBlock,
    contents: Vec<ContentBlock>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize, Deserialize)]
struct ContentBlock {
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: usize,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<Candidate>>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ContentBlock>,
}

#[derive(Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: usize,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: usize,
    #[serde(rename = "totalTokenCount", default)]
    total_token_count: usize,
}

impl GeminiGateway {
    pub fn new(config: BackendConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("GEMINI_API_KEY").ok())
            .context("Gemini API key not found. Set GEMINI_API_KEY environment variable or provide in config")?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string());

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            config,
            api_key,
            base_url,
        })
    }
}

#[async_trait]
impl ModelGateway for GeminiGateway {
    async fn review(&self, request: ModelRequest) -> Result<ModelResponse, GatewayError> {
        let gemini_request = GeminiRequest {
            system_instruction: ContentBlock {
                parts: vec![Part {
                    text: request.system_prompt,
                }],
            },
            contents: vec![ContentBlock {
                parts: vec![Part {
                    text: request.user_prompt,
                }],
            }],
            generation_config: GenerationConfig {
                temperature: request.temperature.unwrap_or(self.config.temperature),
                max_output_tokens: request.max_tokens.unwrap_or(self.config.max_tokens),
            },
        };

        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url, self.config.model
        );
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&gemini_request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let gemini_response: GeminiResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(format!("undecodable payload: {e}")))?;

        let text = gemini_response
            .candidates
            .as_ref()
            .and_then(|c| c.first())
            .and_then(|c| c.content.as_ref())
            .and_then(|c| c.parts.first())
            .map(|p| p.text.clone())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(GatewayError::InvalidResponse(
                "no candidate text in completion".to_string(),
            ));
        }

        Ok(ModelResponse {
            text,
            model: self.config.model.clone(),
            usage: gemini_response.usage_metadata.map(|u| TokenUsage {
                prompt_tokens: u.prompt_token_count,
                completion_tokens: u.candidates_token_count,
                total_tokens: u.total_token_count,
            }),
        })
    }

    fn backend_name(&self) -> &str {
        "gemini"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::gateway::Backend;

    fn request() -> ModelRequest {
        ModelRequest {
            system_prompt: "system".to_string(),
            user_prompt: "user".to_string(),
            temperature: None,
            max_tokens: None,
        }
    }

    fn config(base_url: String) -> BackendConfig {
        BackendConfig {
            backend: Backend::Gemini,
            api_key: Some("test-key".to_string()),
            base_url: Some(base_url),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_parses_candidate_text_and_usage() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/models/gemini-1.5-flash:generateContent")
            .match_header("x-goog-api-key", "test-key")
            .with_status(200)
            .with_body(
                r#"{
                    "candidates": [{"content": {"parts": [{"text": "NO_COMMENTS"}]}}],
                    "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 3, "totalTokenCount": 15}
                }"#,
            )
            .create_async()
            .await;

        let gateway = GeminiGateway::new(config(server.url())).unwrap();
        let response = gateway.review(request()).await.unwrap();

        assert_eq!(response.text, "NO_COMMENTS");
        assert_eq!(response.usage.unwrap().total_tokens, 15);
    }

    #[tokio::test]
    async fn test_empty_candidates_is_invalid_response() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/models/gemini-1.5-flash:generateContent")
            .with_status(200)
            .with_body(r#"{"candidates": []}"#)
            .create_async()
            .await;

        let gateway = GeminiGateway::new(config(server.url())).unwrap();
        let err = gateway.review(request()).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_quota_status_maps_to_quota_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/models/gemini-1.5-flash:generateContent")
            .with_status(429)
            .with_body("quota exhausted")
            .create_async()
            .await;

        let gateway = GeminiGateway::new(config(server.url())).unwrap();
        let err = gateway.review(request()).await.unwrap_err();
        assert!(matches!(err, GatewayError::QuotaExceeded(_)));
        assert!(err.is_retryable());
    }
}
