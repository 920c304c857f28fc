use crate::api::{handlers, AppState};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

/// Build the main API router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health and metrics
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::export_metrics))
        // Gateway pipeline
        .route("/v1/llm/query", post(handlers::llm_query))
        .route("/v1/policies/test", post(handlers::test_policies))
        // Budget management
        .route(
            "/v1/budgets",
            post(handlers::create_budget).get(handlers::list_budgets),
        )
        .route("/v1/budgets/check", post(handlers::check_budget))
        .route(
            "/v1/budgets/:id",
            get(handlers::get_budget)
                .put(handlers::update_budget)
                .delete(handlers::delete_budget),
        )
        .route("/v1/budgets/:id/status", get(handlers::budget_status))
        .route("/v1/budgets/:id/alerts", get(handlers::budget_alerts))
        .route(
            "/v1/alerts/:id/acknowledge",
            post(handlers::acknowledge_alert),
        )
        // Usage reporting
        .route("/v1/usage", get(handlers::usage_summary))
        .route("/v1/usage/breakdown", get(handlers::usage_breakdown))
        .route("/v1/usage/records", get(handlers::usage_records))
        // Pricing
        .route("/v1/pricing", get(handlers::pricing))
        // Add state
        .with_state(state)
        // Add middleware
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new())
                .on_response(DefaultOnResponse::new()),
        )
        .layer(CorsLayer::permissive())
}
