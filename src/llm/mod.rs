//! Text generation for onboarding steps.
//!
//! Steps only see the [`TextGenerator`] trait. The production backend is
//! [`AnthropicGenerator`], which talks to the Messages API over `reqwest`.

mod anthropic;

pub use anthropic::AnthropicGenerator;

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::{ConfigError, LlmError};

/// A single prompt for the text generator.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl GenerationRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            max_tokens: 1024,
            temperature: 0.0,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Prompt in, text out. May fail or time out.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, request: GenerationRequest) -> Result<String, LlmError>;
}

/// Configuration for the text generation backend.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: SecretString,
    pub model: String,
    pub base_url: String,
}

impl LlmConfig {
    pub const DEFAULT_MODEL: &'static str = "claude-sonnet-4-20250514";
    pub const DEFAULT_BASE_URL: &'static str = "https://api.anthropic.com";

    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("ANTHROPIC_API_KEY".to_string()))?;
        let model =
            std::env::var("ONBOARD_MODEL").unwrap_or_else(|_| Self::DEFAULT_MODEL.to_string());
        let base_url = std::env::var("ONBOARD_LLM_BASE_URL")
            .unwrap_or_else(|_| Self::DEFAULT_BASE_URL.to_string());
        Ok(Self {
            api_key: SecretString::from(api_key),
            model,
            base_url,
        })
    }
}

/// Build the text generator from configuration.
pub fn create_generator(config: &LlmConfig) -> Result<Arc<dyn TextGenerator>, LlmError> {
    let generator = AnthropicGenerator::new(config)?;
    tracing::info!("Using Anthropic (model: {})", config.model);
    Ok(Arc::new(generator))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builder_overrides_defaults() {
        let request = GenerationRequest::new("sys", "prompt")
            .with_max_tokens(256)
            .with_temperature(0.2);
        assert_eq!(request.system, "sys");
        assert_eq!(request.max_tokens, 256);
        assert!((request.temperature - 0.2).abs() < f32::EPSILON);
    }

    #[test]
    fn create_generator_with_any_key() {
        // The key is only checked by the API when a request is made.
        let config = LlmConfig {
            api_key: SecretString::from("test-key"),
            model: "claude-3-5-sonnet-latest".to_string(),
            base_url: LlmConfig::DEFAULT_BASE_URL.to_string(),
        };
        let generator = create_generator(&config).unwrap();
        assert_eq!(generator.model_name(), "claude-3-5-sonnet-latest");
    }
}
