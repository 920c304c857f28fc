use crate::models::{LlmResponse, QueryRequest};
use crate::providers::{classify_status, ProviderAdapter, ProviderError};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// General-purpose hosted provider speaking the OpenAI chat API
pub struct OpenAiAdapter {
    base_url: String,
    api_key: Option<String>,
    default_model: String,
    client: reqwest::Client,
}

impl OpenAiAdapter {
    pub fn new(base_url: String, api_key_env: &str, default_model: String) -> Self {
        let api_key = std::env::var(api_key_env).ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            tracing::warn!(env_var = api_key_env, "OpenAI credentials not configured");
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
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: ChatUsage,
    #[serde(default)]
    model: String,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn name(&self) -> &str {
        "openai"
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

        let mut body = json!({
            "model": model,
            "messages": [{"role": "user", "content": request.prompt}],
        });
        if request.max_tokens > 0 {
            body["max_tokens"] = json!(request.max_tokens);
        }
        // Zero is a literal temperature; only absence falls back to the
        // provider default.
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(api_key)
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

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|err| ProviderError::Network(format!("malformed response: {}", err)))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .unwrap_or_default();

        Ok(LlmResponse {
            provider: self.name().to_string(),
            model: if parsed.model.is_empty() {
                model
            } else {
                parsed.model
            },
            content,
            tokens_in: parsed.usage.prompt_tokens,
            tokens_out: parsed.usage.completion_tokens,
        })
    }
}
