pub mod anthropic;
pub mod local;
pub mod mock;
pub mod openai;

pub use anthropic::AnthropicAdapter;
pub use local::LocalAdapter;
pub use mock::MockAdapter;
pub use openai::OpenAiAdapter;

use crate::models::{LlmResponse, QueryRequest};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Provider-level failure classification. `RateLimited`, `Auth` and
/// `Server` mirror the upstream HTTP status; all variants are
/// recoverable from the router's point of view (it advances the
/// fallback chain).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("rate limited by provider")]
    RateLimited,

    #[error("provider authentication failed")]
    Auth,

    #[error("provider server error: HTTP {0}")]
    Server(u16),

    #[error("network error: {0}")]
    Network(String),

    #[error("provider call deadline exceeded")]
    Timeout,
}

/// Map an upstream HTTP status to a provider error
pub fn classify_status(status: u16) -> ProviderError {
    match status {
        429 => ProviderError::RateLimited,
        401 | 403 => ProviderError::Auth,
        s if s >= 500 => ProviderError::Server(s),
        s => ProviderError::Network(format!("unexpected HTTP status {}", s)),
    }
}

/// Uniform contract over LLM backends.
///
/// `available()` must reflect the real transport: hosted adapters are
/// available iff credentials are configured; only `local` is always
/// available. Adapters must not mask a persistent failure as success.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Stable provider name used by routing and the fallback chain
    fn name(&self) -> &str;

    /// Whether the adapter can currently take traffic
    fn available(&self) -> bool;

    /// Execute one call with a hard deadline
    async fn send(
        &self,
        request: &QueryRequest,
        deadline: Duration,
    ) -> Result<LlmResponse, ProviderError>;
}
