use llm_policy_gateway::{
    api::{build_router, AppState},
    config::Config,
    cost::{CostService, PricingTable},
    policy::PolicyEngine,
    providers::{AnthropicAdapter, LocalAdapter, OpenAiAdapter, ProviderAdapter},
    router::LlmRouter,
    state::create_store,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "llm_policy_gateway=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load().map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;

    tracing::info!("Starting LLM Policy Gateway v{}", env!("CARGO_PKG_VERSION"));

    // Initialize Prometheus metrics
    if config.observability.prometheus_enabled {
        if let Err(e) = llm_policy_gateway::metrics::init_metrics() {
            tracing::warn!("Failed to initialize metrics: {}", e);
            tracing::warn!("Continuing without metrics");
        } else {
            tracing::info!("Prometheus metrics initialized");
        }
    }

    // Initialize storage backend
    let stores = create_store(&config.state).await?;
    tracing::info!("Storage backend initialized");

    // Policy engine with the tenant-local timezone
    let tenant_tz = config
        .gateway
        .tenant_timezone
        .parse()
        .unwrap_or_else(|_| {
            tracing::warn!(
                timezone = %config.gateway.tenant_timezone,
                "Unknown tenant timezone, falling back to UTC"
            );
            chrono_tz::UTC
        });
    let policy_engine = Arc::new(PolicyEngine::new(tenant_tz));
    tracing::info!("Policy engine initialized");

    // Provider adapters. Hosted adapters are available iff credentials
    // are configured; local is always available.
    let gateway = &config.gateway;
    let providers: Vec<Arc<dyn ProviderAdapter>> = vec![
        Arc::new(OpenAiAdapter::new(
            gateway.openai_base_url.clone(),
            &gateway.openai_api_key_env,
            gateway.openai_default_model.clone(),
        )),
        Arc::new(AnthropicAdapter::new(
            gateway.anthropic_base_url.clone(),
            &gateway.anthropic_api_key_env,
            gateway.anthropic_default_model.clone(),
        )),
        Arc::new(LocalAdapter::new(
            gateway.local_base_url.clone(),
            gateway.local_default_model.clone(),
        )),
    ];
    for provider in &providers {
        tracing::info!(
            provider = provider.name(),
            available = provider.available(),
            "Provider registered"
        );
    }

    // LLM router
    let llm_router = Arc::new(LlmRouter::new(
        providers,
        gateway.fallback_chain.clone(),
        policy_engine.clone(),
        stores.audit.clone(),
        Duration::from_secs(gateway.provider_deadline_secs),
    ));
    tracing::info!(
        fallback_chain = ?gateway.fallback_chain,
        deadline_secs = gateway.provider_deadline_secs,
        "LLM router initialized"
    );

    // Cost service with its bookkeeping worker
    let cost = Arc::new(CostService::new(
        Arc::new(PricingTable::new()),
        stores.budgets.clone(),
        stores.usage.clone(),
        stores.alerts.clone(),
        config.cost.bookkeeping_queue_size,
    ));
    tracing::info!(
        queue_size = config.cost.bookkeeping_queue_size,
        "Cost service initialized"
    );

    // Build HTTP router
    let state = AppState::new(policy_engine, llm_router, cost, stores);
    let app = build_router(state);

    let http_addr = format!("{}:{}", config.server.host, config.server.http_port);
    let listener = tokio::net::TcpListener::bind(&http_addr).await?;

    tracing::info!("HTTP API server listening on http://{}", http_addr);
    tracing::info!("   Health check: http://{}/health", http_addr);
    tracing::info!("   Gateway API: http://{}/v1/llm/query", http_addr);
    tracing::info!("   Budgets API: http://{}/v1/budgets", http_addr);

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("HTTP server error: {}", e);
        }
    });

    tokio::select! {
        _ = server => {
            tracing::warn!("HTTP server stopped");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    tracing::info!("Shutting down gracefully...");
    Ok(())
}
