use crate::models::{LlmResponse, QueryRequest};
use crate::providers::{ProviderAdapter, ProviderError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Explicit mock provider for tests and offline configurations.
///
/// Availability and per-call outcomes are scripted; unscripted calls
/// succeed with a deterministic echo response. Never wired in as a
/// hidden fallback of a real adapter.
pub struct MockAdapter {
    name: String,
    available: AtomicBool,
    script: Mutex<VecDeque<Result<LlmResponse, ProviderError>>>,
    attempts: AtomicUsize,
}

impl MockAdapter {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            available: AtomicBool::new(true),
            script: Mutex::new(VecDeque::new()),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Mock that reports itself unavailable
    pub fn unavailable(name: &str) -> Self {
        let adapter = Self::new(name);
        adapter.available.store(false, Ordering::SeqCst);
        adapter
    }

    /// Mock whose next calls fail with the given error, then echo
    pub fn failing(name: &str, error: ProviderError, times: usize) -> Self {
        let adapter = Self::new(name);
        {
            let mut script = adapter.script.lock();
            for _ in 0..times {
                script.push_back(Err(error.clone()));
            }
        }
        adapter
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Queue an explicit outcome for the next call
    pub fn push_outcome(&self, outcome: Result<LlmResponse, ProviderError>) {
        self.script.lock().push_back(outcome);
    }

    /// Number of `send` calls observed
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn echo_response(&self, request: &QueryRequest) -> LlmResponse {
        LlmResponse {
            provider: self.name.clone(),
            model: request
                .model
                .clone()
                .unwrap_or_else(|| "mock-model".to_string()),
            content: format!("echo: {}", request.prompt),
            tokens_in: request.prompt.split_whitespace().count() as u64,
            tokens_out: 16,
        }
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn send(
        &self,
        request: &QueryRequest,
        _deadline: Duration,
    ) -> Result<LlmResponse, ProviderError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().pop_front() {
            Some(outcome) => outcome,
            None => Ok(self.echo_response(request)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserContext;
    use std::collections::HashMap;

    fn request(prompt: &str) -> QueryRequest {
        QueryRequest {
            prompt: prompt.to_string(),
            max_tokens: 0,
            temperature: None,
            model: None,
            user: UserContext::default(),
            context: HashMap::new(),
            scope: Default::default(),
            request_type: "chat".to_string(),
        }
    }

    #[tokio::test]
    async fn test_scripted_failures_then_echo() {
        let adapter = MockAdapter::failing("openai", ProviderError::Server(500), 1);

        let err = adapter
            .send(&request("hi"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err, ProviderError::Server(500));

        let ok = adapter
            .send(&request("hi there"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(ok.content, "echo: hi there");
        assert_eq!(ok.tokens_in, 2);
        assert_eq!(adapter.attempts(), 2);
    }

    #[tokio::test]
    async fn test_availability_toggle() {
        let adapter = MockAdapter::unavailable("anthropic");
        assert!(!adapter.available());
        adapter.set_available(true);
        assert!(adapter.available());
    }
}
