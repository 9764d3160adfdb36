//! Anthropic Messages API implementation of [`LlmAdapter`].

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::model::{estimate_tokens, LlmResponse, ToolUse};

use super::{LlmAdapter, LlmRequest};

/// Configuration for the Anthropic adapter.
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    /// API key
    pub api_key: String,
    /// Base URL override
    pub base_url: Option<String>,
    /// Model id
    pub model: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl AnthropicConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            model: "claude-3-5-sonnet-20241022".to_string(),
            timeout_secs: 120,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

/// LLM adapter backed by the Anthropic Messages API.
pub struct AnthropicLlm {
    config: AnthropicConfig,
    http: Client,
}

impl AnthropicLlm {
    const DEFAULT_BASE_URL: &'static str = "https://api.anthropic.com";
    const API_VERSION: &'static str = "2023-06-01";

    pub fn new(config: AnthropicConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { config, http })
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(Self::DEFAULT_BASE_URL)
    }
}

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    content: Vec<ApiContent>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiContent {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    input: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

#[async_trait]
impl LlmAdapter for AnthropicLlm {
    async fn invoke(&self, request: LlmRequest) -> Result<LlmResponse> {
        let api_request = ApiRequest {
            model: self.config.model.clone(),
            messages: vec![ApiMessage {
                role: "user".to_string(),
                content: request.prompt,
            }],
            max_tokens: request.max_tokens,
            system: request.system_prompt,
            temperature: request.temperature,
        };

        let url = format!("{}/v1/messages", self.base_url());
        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", Self::API_VERSION)
            .header("content-type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::llm("anthropic", format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::llm("anthropic", format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<ApiError>(&body) {
                return Err(Error::llm(
                    "anthropic",
                    format!("{}: {}", error.error.error_type, error.error.message),
                ));
            }
            return Err(Error::llm("anthropic", format!("{}: {}", status, body)));
        }

        let api_response: ApiResponse = serde_json::from_str(&body)
            .map_err(|e| Error::llm("anthropic", format!("failed to parse response: {}", e)))?;

        let mut content = String::new();
        let mut tool_uses = Vec::new();
        for block in api_response.content {
            match block.content_type.as_str() {
                "text" => {
                    if let Some(text) = block.text {
                        content.push_str(&text);
                    }
                }
                "tool_use" => {
                    if let Some(name) = block.name {
                        tool_uses.push(ToolUse {
                            tool: name,
                            input: block.input.unwrap_or(serde_json::Value::Null),
                            result: None,
                        });
                    }
                }
                _ => {}
            }
        }

        let tokens_used = api_response
            .usage
            .map(|u| u.input_tokens + u.output_tokens)
            .unwrap_or_else(|| estimate_tokens(&content));

        Ok(LlmResponse {
            content,
            tool_uses,
            tokens_used,
        })
    }
}
