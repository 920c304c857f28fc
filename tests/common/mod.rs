use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use llm_policy_gateway::api::{build_router, AppState};
use llm_policy_gateway::cost::{CostService, PricingTable};
use llm_policy_gateway::policy::PolicyEngine;
use llm_policy_gateway::providers::{MockAdapter, ProviderAdapter};
use llm_policy_gateway::router::LlmRouter;
use llm_policy_gateway::state::{create_in_memory_store, StoreHandles};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

/// Handles onto the components behind a test router
pub struct TestContext {
    pub stores: StoreHandles,
    pub cost: Arc<CostService>,
    pub openai: Arc<MockAdapter>,
    pub anthropic: Arc<MockAdapter>,
    pub local: Arc<MockAdapter>,
}

/// Full application wired with the in-memory store and mock providers
pub fn test_app() -> (Router, TestContext) {
    let stores = create_in_memory_store();

    let openai = Arc::new(MockAdapter::new("openai"));
    let anthropic = Arc::new(MockAdapter::new("anthropic"));
    let local = Arc::new(MockAdapter::new("local"));
    let providers: Vec<Arc<dyn ProviderAdapter>> =
        vec![openai.clone(), anthropic.clone(), local.clone()];

    let policy_engine = Arc::new(PolicyEngine::new(chrono_tz::UTC));
    let llm_router = Arc::new(LlmRouter::new(
        providers,
        vec![
            "openai".to_string(),
            "anthropic".to_string(),
            "local".to_string(),
        ],
        policy_engine.clone(),
        stores.audit.clone(),
        Duration::from_secs(5),
    ));
    let cost = Arc::new(CostService::new(
        Arc::new(PricingTable::new()),
        stores.budgets.clone(),
        stores.usage.clone(),
        stores.alerts.clone(),
        256,
    ));

    let state = AppState::new(policy_engine, llm_router, cost.clone(), stores.clone());
    let app = build_router(state);

    (
        app,
        TestContext {
            stores,
            cost,
            openai,
            anthropic,
            local,
        },
    )
}

/// One request through the router, returning status and parsed body
pub async fn send_json(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    headers: &[(&str, &str)],
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }

    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };

    (status, value)
}
