use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::adapters::{Backend, BackendConfig};
use crate::core::orchestrator::{RetryPolicy, RunOptions};
use crate::core::prompt::PromptConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Which provider to call. When unset the model name decides.
    pub backend: Option<Backend>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    pub system_prompt: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,

    #[serde(default)]
    pub exclude: Vec<String>,

    #[serde(default = "default_max_unit_size")]
    pub max_unit_size: usize,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default)]
    pub retry: RetryConfig,

    pub run_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: None,
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            system_prompt: None,
            api_key: None,
            base_url: None,
            exclude: Vec::new(),
            max_unit_size: default_max_unit_size(),
            concurrency: default_concurrency(),
            retry: RetryConfig::default(),
            run_timeout_secs: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        for name in [".diffcritic.yml", ".diffcritic.yaml"] {
            let path = PathBuf::from(name);
            if path.exists() {
                return Self::from_path(&path);
            }
        }

        if let Some(home_dir) = dirs::home_dir() {
            let home_config = home_dir.join(".diffcritic.yml");
            if home_config.exists() {
                return Self::from_path(&home_config);
            }
        }

        Ok(Config::default())
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn merge_with_cli(
        &mut self,
        backend: Option<Backend>,
        model: Option<String>,
        temperature: Option<f32>,
        max_tokens: Option<usize>,
        concurrency: Option<usize>,
        max_unit_size: Option<usize>,
    ) {
        if let Some(backend) = backend {
            self.backend = Some(backend);
        }
        if let Some(model) = model {
            self.model = model;
        }
        if let Some(temperature) = temperature {
            self.temperature = temperature;
        }
        if let Some(max_tokens) = max_tokens {
            self.max_tokens = max_tokens;
        }
        if let Some(concurrency) = concurrency {
            self.concurrency = concurrency;
        }
        if let Some(max_unit_size) = max_unit_size {
            self.max_unit_size = max_unit_size;
        }
    }

    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig {
            backend: self
                .backend
                .or_else(|| Backend::for_model(&self.model))
                .unwrap_or(Backend::Gemini),
            model: self.model.clone(),
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    pub fn run_options(&self, extra_exclude: &[String]) -> RunOptions {
        let mut exclude = self.exclude.clone();
        exclude.extend(extra_exclude.iter().cloned());

        let mut prompt = PromptConfig::default();
        if let Some(system_prompt) = &self.system_prompt {
            prompt.system_prompt = system_prompt.clone();
        }

        RunOptions {
            exclude,
            max_unit_size: self.max_unit_size,
            concurrency: self.concurrency,
            retry: RetryPolicy::new(
                self.retry.max_attempts,
                Duration::from_millis(self.retry.base_delay_ms),
            ),
            run_timeout: self.run_timeout_secs.map(Duration::from_secs),
            prompt,
        }
    }
}

fn default_model() -> String {
    "gemini-1.5-flash".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_tokens() -> usize {
    4096
}

fn default_max_unit_size() -> usize {
    48_000
}

fn default_concurrency() -> usize {
    3
}

fn default_max_attempts() -> usize {
    3
}

fn default_base_delay_ms() -> u64 {
    250
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config: Config = serde_yaml::from_str("model: claude-3-5-sonnet-20241022\n").unwrap();
        assert_eq!(config.model, "claude-3-5-sonnet-20241022");
        assert_eq!(config.temperature, 0.2);
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.exclude.is_empty());
        assert_eq!(config.backend_config().backend, Backend::Anthropic);
    }

    #[test]
    fn test_full_yaml_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".diffcritic.yml");
        std::fs::write(
            &path,
            "backend: openai\n\
             model: gpt-4o\n\
             temperature: 0.5\n\
             exclude:\n  - \"*.lock\"\n  - \"dist/*\"\n\
             concurrency: 5\n\
             retry:\n  max_attempts: 2\n  base_delay_ms: 10\n\
             run_timeout_secs: 120\n",
        )
        .unwrap();

        let config = Config::from_path(&path).unwrap();
        assert_eq!(config.backend, Some(Backend::Openai));
        assert_eq!(config.temperature, 0.5);
        assert_eq!(config.exclude, vec!["*.lock", "dist/*"]);

        let options = config.run_options(&["*.min.js".to_string()]);
        assert_eq!(options.concurrency, 5);
        assert_eq!(options.retry.max_attempts, 2);
        assert_eq!(options.retry.base_delay, Duration::from_millis(10));
        assert_eq!(options.run_timeout, Some(Duration::from_secs(120)));
        assert_eq!(options.exclude, vec!["*.lock", "dist/*", "*.min.js"]);
    }

    #[test]
    fn test_invalid_yaml_reports_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".diffcritic.yml");
        std::fs::write(&path, "temperature: [not a number\n").unwrap();

        let err = Config::from_path(&path).unwrap_err();
        assert!(err.to_string().contains(".diffcritic.yml"));
    }

    #[test]
    fn test_cli_overrides_win() {
        let mut config = Config::default();
        config.merge_with_cli(
            Some(Backend::Ollama),
            Some("ollama:codellama".to_string()),
            None,
            Some(2048),
            None,
            Some(16_000),
        );
        assert_eq!(config.backend, Some(Backend::Ollama));
        assert_eq!(config.model, "ollama:codellama");
        assert_eq!(config.max_tokens, 2048);
        assert_eq!(config.max_unit_size, 16_000);
        assert_eq!(config.temperature, 0.2);
    }
}
