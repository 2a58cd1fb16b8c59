use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::adapters::gateway::{
    classify_status, transport_error, BackendConfig, GatewayError, ModelGateway, ModelRequest,
    ModelResponse, TokenUsage,
};

pub struct OllamaGateway {
    client: Client,
    config: BackendConfig,
    base_url: String,
}

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    system: String,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: usize,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
    model: String,
    #[serde(default)]
    done: bool,
    prompt_eval_count: Option<usize>,
    eval_count: Option<usize>,
}

impl OllamaGateway {
    pub fn new(config: BackendConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        // Local models can be slow to first token; give them room.
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()?;

        Ok(Self {
            client,
            config,
            base_url,
        })
    }
}

#[async_trait]
impl ModelGateway for OllamaGateway {
    async fn review(&self, request: ModelRequest) -> Result<ModelResponse, GatewayError> {
        let model = self
            .config
            .model
            .strip_prefix("ollama:")
            .unwrap_or(&self.config.model);

        let ollama_request = OllamaRequest {
            model: model.to_string(),
            prompt: request.user_prompt,
            system: request.system_prompt,
            stream: false,
            options: OllamaOptions {
                temperature: request.temperature.unwrap_or(self.config.temperature),
                num_predict: request.max_tokens.unwrap_or(self.config.max_tokens),
            },
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&ollama_request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let ollama_response: OllamaResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(format!("undecodable payload: {e}")))?;

        if ollama_response.response.trim().is_empty() {
            return Err(GatewayError::InvalidResponse(
                "empty generation".to_string(),
            ));
        }

        let usage = ollama_response.done.then(|| TokenUsage {
            prompt_tokens: ollama_response.prompt_eval_count.unwrap_or(0),
            completion_tokens: ollama_response.eval_count.unwrap_or(0),
            total_tokens: ollama_response.prompt_eval_count.unwrap_or(0)
                + ollama_response.eval_count.unwrap_or(0),
        });

        Ok(ModelResponse {
            text: ollama_response.response,
            model: ollama_response.model,
            usage,
        })
    }

    fn backend_name(&self) -> &str {
        "ollama"
    }
}
