//! Anthropic Messages API backend for [`TextGenerator`].

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{GenerationRequest, LlmConfig, TextGenerator};
use crate::error::LlmError;

const PROVIDER: &str = "anthropic";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicGenerator {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    endpoint: String,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: [UserMessage<'a>; 1],
}

#[derive(Serialize)]
struct UserMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicGenerator {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("Failed to create HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            endpoint: format!("{}/v1/messages", config.base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl TextGenerator for AnthropicGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: GenerationRequest) -> Result<String, LlmError> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: &request.system,
            messages: [UserMessage {
                role: "user",
                content: &request.prompt,
            }],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(LlmError::AuthFailed {
                provider: PROVIDER.to_string(),
            });
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(LlmError::RateLimited {
                provider: PROVIDER.to_string(),
                retry_after,
            });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("HTTP {status}: {text}"),
            });
        }

        let parsed: MessagesResponse =
            response
                .json()
                .await
                .map_err(|e| LlmError::InvalidResponse {
                    provider: PROVIDER.to_string(),
                    reason: e.to_string(),
                })?;

        let text: String = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        if text.trim().is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: PROVIDER.to_string(),
                reason: "empty completion".to_string(),
            });
        }
        Ok(text)
    }
}
