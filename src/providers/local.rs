use crate::models::{LlmResponse, QueryRequest};
use crate::providers::{classify_status, ProviderAdapter, ProviderError};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// On-premise inference endpoint. Always available: regional-compliance
/// and PII routing depend on being able to fall back here.
pub struct LocalAdapter {
    base_url: String,
    default_model: String,
    client: reqwest::Client,
}

impl LocalAdapter {
    pub fn new(base_url: String, default_model: String) -> Self {
        Self {
            base_url,
            default_model,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: CompletionUsage,
    #[serde(default)]
    model: String,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct CompletionUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[async_trait]
impl ProviderAdapter for LocalAdapter {
    fn name(&self) -> &str {
        "local"
    }

    fn available(&self) -> bool {
        true
    }

    async fn send(
        &self,
        request: &QueryRequest,
        deadline: Duration,
    ) -> Result<LlmResponse, ProviderError> {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        let mut body = json!({
            "model": model,
            "prompt": request.prompt,
        });
        if request.max_tokens > 0 {
            body["max_tokens"] = json!(request.max_tokens);
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }

        let response = self
            .client
            .post(format!("{}/v1/completions", self.base_url))
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

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|err| ProviderError::Network(format!("malformed response: {}", err)))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.text)
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
