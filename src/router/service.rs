use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::metrics;
use crate::models::{AuditRecord, LlmResponse, QueryRequest, UserContext};
use crate::policy::PolicyEngine;
use crate::providers::ProviderAdapter;
use crate::router::selector::{select_provider, Selection};
use crate::state::AuditStore;

/// A routed call plus the routing metadata callers observe
#[derive(Debug, Clone)]
pub struct RoutedResponse {
    pub response: LlmResponse,
    /// Human-readable selection reason
    pub reason: String,
    /// De-duplicated data types found across prompt and response
    pub pii_detected: Vec<String>,
    pub pii_redacted: bool,
}

/// Provider-selection state machine with permission-driven request
/// filtering, fallback execution and audit emission.
///
/// Stateless between requests; adapters carry their own health state.
pub struct LlmRouter {
    providers: Vec<Arc<dyn ProviderAdapter>>,
    fallback_chain: Vec<String>,
    policy_engine: Arc<PolicyEngine>,
    audit_store: Arc<dyn AuditStore>,
    deadline: Duration,
}

impl LlmRouter {
    pub fn new(
        providers: Vec<Arc<dyn ProviderAdapter>>,
        fallback_chain: Vec<String>,
        policy_engine: Arc<PolicyEngine>,
        audit_store: Arc<dyn AuditStore>,
        deadline: Duration,
    ) -> Self {
        Self {
            providers,
            fallback_chain,
            policy_engine,
            audit_store,
            deadline,
        }
    }

    fn adapter(&self, name: &str) -> Option<&Arc<dyn ProviderAdapter>> {
        self.providers.iter().find(|p| p.name() == name)
    }

    /// Replace context values containing PII with their redacted form
    /// when the user lacks `read_pii`. Values without matches are
    /// copied unchanged.
    pub fn filter_context(
        &self,
        user: &UserContext,
        context: &HashMap<String, String>,
    ) -> HashMap<String, String> {
        if user.permissions.contains("read_pii") {
            return context.clone();
        }

        context
            .iter()
            .map(|(key, value)| {
                if self.policy_engine.scan(value).is_empty() {
                    (key.clone(), value.clone())
                } else {
                    let (redacted, _) = self.policy_engine.redact_sensitive_data(value, user);
                    (key.clone(), redacted)
                }
            })
            .collect()
    }

    /// Route and execute a request with the default selection rules
    pub async fn execute(&self, request: &QueryRequest) -> Result<RoutedResponse> {
        self.execute_with(request, None).await
    }

    /// Route and execute, optionally forcing the first provider (used
    /// by budget downgrade)
    pub async fn execute_with(
        &self,
        request: &QueryRequest,
        forced: Option<Selection>,
    ) -> Result<RoutedResponse> {
        let selection = forced.unwrap_or_else(|| select_provider(request));

        let mut filtered = request.clone();
        filtered.context = self.filter_context(&request.user, &request.context);

        // The selected provider first, then the fallback chain, never
        // visiting a provider twice.
        let mut order: Vec<String> = vec![selection.provider.clone()];
        for name in &self.fallback_chain {
            if !order.contains(name) {
                order.push(name.clone());
            }
        }

        let mut last_error: Option<String> = None;
        for (index, name) in order.iter().enumerate() {
            let adapter = match self.adapter(name) {
                Some(adapter) => adapter,
                None => {
                    tracing::warn!(provider = %name, "Provider not registered");
                    continue;
                }
            };

            if !adapter.available() {
                tracing::debug!(provider = %name, "Provider unavailable, advancing fallback");
                metrics::PROVIDER_REQUESTS_TOTAL
                    .with_label_values(&[name, "unavailable"])
                    .inc();
                last_error = Some(format!("{} unavailable", name));
                continue;
            }

            if index > 0 {
                metrics::PROVIDER_FALLBACKS_TOTAL.inc();
            }

            let timer = metrics::PROVIDER_CALL_DURATION_SECONDS.start_timer();
            let outcome = tokio::time::timeout(self.deadline, adapter.send(&filtered, self.deadline))
                .await
                .map_err(|_| crate::providers::ProviderError::Timeout)
                .and_then(|inner| inner);
            timer.observe_duration();

            match outcome {
                Ok(mut response) => {
                    // Callers observe fallback through the provider field
                    response.provider = adapter.name().to_string();
                    metrics::PROVIDER_REQUESTS_TOTAL
                        .with_label_values(&[name, "success"])
                        .inc();

                    let routed = self.finish(&filtered, response, &selection.reason).await?;
                    return Ok(routed);
                }
                Err(err) => {
                    metrics::PROVIDER_REQUESTS_TOTAL
                        .with_label_values(&[name, "error"])
                        .inc();
                    tracing::warn!(
                        provider = %name,
                        error = %err,
                        "Provider call failed, advancing fallback"
                    );
                    last_error = Some(format!("{}: {}", name, err));
                }
            }
        }

        Err(AppError::AllProvidersFailed(
            last_error.unwrap_or_else(|| "no providers registered".to_string()),
        ))
    }

    /// PII computation and audit emission for a successful call
    async fn finish(
        &self,
        request: &QueryRequest,
        response: LlmResponse,
        reason: &str,
    ) -> Result<RoutedResponse> {
        // PII is detected across BOTH the original user text and the
        // response payload, then de-duplicated.
        let mut pii_detected: Vec<String> = Vec::new();
        for hit in self
            .policy_engine
            .scan(&request.prompt)
            .into_iter()
            .chain(self.policy_engine.scan(&response.content))
        {
            let name = hit.data_type.to_string();
            if !pii_detected.contains(&name) {
                pii_detected.push(name);
            }
        }

        let pii_redacted = !pii_detected.is_empty()
            && !request.user.permissions.contains("read_pii")
            && !request.user.is_admin();

        let audit = AuditRecord {
            id: Uuid::new_v4(),
            user_id: request.user.id.clone(),
            user_email: request.user.email.clone(),
            query_text: format!("[LLM:{}] {}", response.provider, request.prompt),
            results_count: 1,
            pii_detected: pii_detected.clone(),
            pii_redacted,
            access_granted: true,
            created_at: Utc::now(),
        };
        self.audit_store.save_audit(&audit).await?;

        Ok(RoutedResponse {
            response,
            reason: reason.to_string(),
            pii_detected,
            pii_redacted,
        })
    }
}
