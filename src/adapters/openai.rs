use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::adapters::gateway::{
    classify_status, transport_error, BackendConfig, GatewayError, ModelGateway, ModelRequest,
    ModelResponse, TokenUsage,
};

pub struct OpenAiGateway {
    client: Client,
    config: BackendConfig,
    api_key: String,
    base_url: String,
}

#[derive(Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: usize,
}

#[derive(Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<Choice>,
    usage: Option<OpenAiUsage>,
    model: String,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
    total_tokens: usize,
}

impl OpenAiGateway {
    pub fn new(config: BackendConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .context("OpenAI API key not found. Set OPENAI_API_KEY environment variable or provide in config")?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

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
impl ModelGateway for OpenAiGateway {
    async fn review(&self, request: ModelRequest) -> Result<ModelResponse, GatewayError> {
        let messages = vec![
            Message {
                role: "system".to_string(),
                content: request.system_prompt,
            },
            Message {
                role: "user".to_string(),
                content: request.user_prompt,
            },
        ];

        let openai_request = OpenAiRequest {
            model: self.config.model.clone(),
            messages,
            temperature: request.temperature.unwrap_or(self.config.temperature),
            max_tokens: request.max_tokens.unwrap_or(self.config.max_tokens),
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&openai_request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let openai_response: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(format!("undecodable payload: {e}")))?;

        let text = openai_response
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(GatewayError::InvalidResponse(
                "no choices in completion".to_string(),
            ));
        }

        Ok(ModelResponse {
            text,
            model: openai_response.model,
            usage: openai_response.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
        })
    }

    fn backend_name(&self) -> &str {
        "openai"
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
            backend: Backend::Openai,
            model: "gpt-4o".to_string(),
            api_key: Some("test-key".to_string()),
            base_url: Some(base_url),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_parses_chat_completion() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .with_status(200)
            .with_body(
                r#"{
                    "model": "gpt-4o",
                    "choices": [{"message": {"role": "assistant", "content": "FILE: a.rs\nLINE: 1\nCOMMENT: x"}}],
                    "usage": {"prompt_tokens": 20, "completion_tokens": 10, "total_tokens": 30}
                }"#,
            )
            .create_async()
            .await;

        let gateway = OpenAiGateway::new(config(server.url())).unwrap();
        let response = gateway.review(request()).await.unwrap();

        assert!(response.text.starts_with("FILE: a.rs"));
        assert_eq!(response.model, "gpt-4o");
        assert_eq!(response.usage.unwrap().prompt_tokens, 20);
    }

    #[tokio::test]
    async fn test_server_error_maps_to_unavailable() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/chat/completions")
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;

        let gateway = OpenAiGateway::new(config(server.url())).unwrap();
        let err = gateway.review(request()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_bad_api_key_is_not_retryable() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_body(r#"{"error": {"message": "invalid api key"}}"#)
            .create_async()
            .await;

        let gateway = OpenAiGateway::new(config(server.url())).unwrap();
        let err = gateway.review(request()).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidResponse(_)));
        assert!(!err.is_retryable());
    }
}
