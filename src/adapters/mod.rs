pub mod anthropic;
pub mod gateway;
pub mod gemini;
pub mod ollama;
pub mod openai;

pub use anthropic::AnthropicGateway;
pub use gateway::{
    create_gateway, Backend, BackendConfig, GatewayError, ModelGateway, ModelRequest,
    ModelResponse, TokenUsage,
};
pub use gemini::GeminiGateway;
pub use ollama::OllamaGateway;
pub use openai::OpenAiGateway;
