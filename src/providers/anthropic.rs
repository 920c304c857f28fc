use crate::models::{LlmResponse, QueryRequest};
use crate::providers::{classify_status, ProviderAdapter, ProviderError};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Safety-aligned hosted provider speaking the Anthropic messages API
pub struct AnthropicAdapter {
    base_url: String,
    api_key: Option<String>,
    default_model: String,
    client: reqwest::Client,
}

impl AnthropicAdapter {
    pub fn new(base_url: String, api_key_env: &str, default_model: String) -> Self {
        let api_key = std::env::var(api_key_env).ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            tracing::warn!(env_var = api_key_env, "Anthropic credentials not configured");
        }

        Self {
            base_url,
            api_key,
            default_model,
            client: reqwest::Client::new(),
        }
    }

    /// Adapter with an explicit key, for tests against a stub server
    pub fn with_api_key(base_url: String, api_key: String, default_model: String) -> Self {
        Self {
            base_url,
            api_key: Some(api_key),
            default_model,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: MessagesUsage,
    #[serde(default)]
    model: String,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct MessagesUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn send(
        &self,
        request: &QueryRequest,
        deadline: Duration,
    ) -> Result<LlmResponse, ProviderError> {
        let api_key = self.api_key.as_ref().ok_or(ProviderError::Auth)?;
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        // The messages API requires max_tokens
        let max_tokens = if request.max_tokens > 0 {
            request.max_tokens
        } else {
            DEFAULT_MAX_TOKENS
        };

        let mut body = json!({
            "model": model,
            "max_tokens": max_tokens,
            "messages": [{"role": "user", "content": request.prompt}],
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .timeout(deadline)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::Network(err.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status.as_u16()));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|err| ProviderError::Network(format!("malformed response: {}", err)))?;

        let content = parsed
            .content
            .into_iter()
            .next()
            .map(|block| block.text)
            .unwrap_or_default();

        Ok(LlmResponse {
            provider: self.name().to_string(),
            model: if parsed.model.is_empty() {
                model
            } else {
                parsed.model
            },
            content,
            tokens_in: parsed.usage.input_tokens,
            tokens_out: parsed.usage.output_tokens,
        })
    }
}
