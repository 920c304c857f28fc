use crate::api::AppState;
use crate::cost::BudgetPatch;
use crate::error::{AppError, Result};
use crate::metrics;
use crate::models::*;
use crate::router::Selection;
use crate::state::{BudgetFilter, UsageFilter, UsageSummary};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

const MAX_PAGE_SIZE: usize = 1000;

/// Health check endpoint. Reports degraded when bookkeeping
/// back-pressure has been hit.
pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>> {
    let degraded = state.cost.is_degraded();
    Ok(Json(HealthResponse {
        status: if degraded { "degraded" } else { "healthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Prometheus metrics in text format
pub async fn export_metrics() -> String {
    metrics::gather_metrics()
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty())
}

/// Identity headers fill scope fields only when the body omits them
fn apply_identity_headers(headers: &HeaderMap, scope: &mut ScopeIds) {
    if scope.org_id.is_empty() {
        if let Some(org) = header_value(headers, "X-Org-ID") {
            scope.org_id = org;
        }
    }
    if scope.tenant_id.is_empty() {
        if let Some(tenant) = header_value(headers, "X-Tenant-ID") {
            scope.tenant_id = tenant;
        }
    }
    if scope.user_id.is_empty() {
        if let Some(user) = header_value(headers, "X-User-ID") {
            scope.user_id = user;
        }
    }
}

// ============================================================================
// Gateway pipeline
// ============================================================================

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub provider: String,
    pub model: String,
    pub reason: String,
    pub content: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost_usd: f64,
    pub pii_detected: Vec<String>,
    pub pii_redacted: bool,
    pub redaction_required: bool,
    pub approval_required: bool,
}

/// The full enforcement pipeline: policy evaluation, budget check,
/// routed execution, usage recording, response redaction.
pub async fn llm_query(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>> {
    request.validate()?;
    apply_identity_headers(&headers, &mut request.scope);
    if request.scope.user_id.is_empty() {
        request.scope.user_id = request.user.id.clone();
    }

    // Policy evaluation. Blocked requests are still audited.
    let evaluation =
        state
            .policy_engine
            .evaluate_query(&request.user, &request.prompt, &request.request_type);

    if !evaluation.allowed {
        state
            .stores
            .audit
            .save_audit(&AuditRecord::denied(
                &request.user.id,
                &request.user.email,
                &request.prompt,
            ))
            .await?;
        metrics::GATEWAY_REQUESTS_TOTAL
            .with_label_values(&["policy_blocked"])
            .inc();

        return Err(AppError::Forbidden {
            message: "Request blocked by security policy".to_string(),
            blocked_by: evaluation.blocked_by,
            violations: evaluation.violations,
        });
    }

    // Pre-dispatch budget consultation
    let decision = state
        .cost
        .check_budget(
            &request.scope.org_id,
            &request.scope.team_id,
            &request.scope.agent_id,
            &request.scope.user_id,
            &request.scope.tenant_id,
        )
        .await?;

    if !decision.allowed {
        state
            .stores
            .audit
            .save_audit(&AuditRecord::denied(
                &request.user.id,
                &request.user.email,
                &request.prompt,
            ))
            .await?;
        metrics::GATEWAY_REQUESTS_TOTAL
            .with_label_values(&["budget_blocked"])
            .inc();

        return Err(AppError::Forbidden {
            message: decision
                .message
                .unwrap_or_else(|| "Request blocked by budget policy".to_string()),
            blocked_by: decision.budget_id.into_iter().collect(),
            violations: Vec::new(),
        });
    }

    // Budget downgrade re-routes to the cheapest provider
    let forced = if decision.action == Some(OnExceedAction::Downgrade) {
        Some(Selection {
            provider: "local".to_string(),
            reason: "Budget downgrade — routing to low-cost provider.".to_string(),
        })
    } else {
        None
    };

    let routed = match state.llm_router.execute_with(&request, forced).await {
        Ok(routed) => routed,
        Err(err) => {
            metrics::GATEWAY_REQUESTS_TOTAL
                .with_label_values(&["failed"])
                .inc();
            return Err(err);
        }
    };

    // Usage accounting: persisted now, aggregates and budget alerts on
    // the background worker
    let record = state
        .cost
        .record_usage(UsageRecord {
            id: Uuid::new_v4(),
            request_id: Uuid::new_v4().to_string(),
            timestamp: None,
            scope: request.scope.clone(),
            provider: routed.response.provider.clone(),
            model: routed.response.model.clone(),
            tokens_in: routed.response.tokens_in,
            tokens_out: routed.response.tokens_out,
            cost_usd: 0.0,
            request_type: request.request_type.clone(),
            cached: false,
        })
        .await?;

    // Permission-aware redaction of the response payload
    let (content, _detected) = state
        .policy_engine
        .redact_sensitive_data(&routed.response.content, &request.user);

    metrics::GATEWAY_REQUESTS_TOTAL
        .with_label_values(&["allowed"])
        .inc();

    Ok(Json(QueryResponse {
        provider: routed.response.provider,
        model: routed.response.model,
        reason: routed.reason,
        content,
        tokens_in: routed.response.tokens_in,
        tokens_out: routed.response.tokens_out,
        cost_usd: record.cost_usd,
        pii_detected: routed.pii_detected,
        pii_redacted: routed.pii_redacted,
        redaction_required: evaluation.redaction_required,
        approval_required: evaluation.approval_required,
    }))
}

#[derive(Debug, Deserialize, Validate)]
pub struct TestPoliciesRequest {
    #[validate(length(min = 1))]
    pub query: String,
    pub user: UserContext,
    #[serde(default = "default_request_type")]
    pub request_type: String,
    /// Admins may evaluate on behalf of another user
    pub test_user: Option<UserContext>,
}

fn default_request_type() -> String {
    "chat".to_string()
}

/// Dry-run policy evaluation
pub async fn test_policies(
    State(state): State<AppState>,
    Json(request): Json<TestPoliciesRequest>,
) -> Result<Json<PolicyEvaluation>> {
    request.validate()?;

    let user = match (&request.test_user, request.user.is_admin()) {
        (Some(test_user), true) => test_user,
        _ => &request.user,
    };

    let evaluation = state
        .policy_engine
        .evaluate_query(user, &request.query, &request.request_type);
    Ok(Json(evaluation))
}

// ============================================================================
// Budget management
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreateBudgetRequest {
    #[validate(length(min = 1))]
    pub id: String,
    #[validate(length(min = 1))]
    pub name: String,
    pub scope: String,
    pub scope_id: Option<String>,
    pub limit_usd: f64,
    pub period: String,
    pub on_exceed: Option<String>,
    pub alert_thresholds: Option<Vec<u32>>,
    pub enabled: Option<bool>,
    #[serde(default)]
    pub org_id: String,
    #[serde(default)]
    pub tenant_id: String,
}

fn parse_scope(value: &str) -> Result<BudgetScope> {
    value
        .parse()
        .map_err(|_| AppError::Validation(format!("invalid budget scope '{}'", value)))
}

fn parse_period(value: &str) -> Result<BudgetPeriod> {
    value
        .parse()
        .map_err(|_| AppError::Validation(format!("invalid budget period '{}'", value)))
}

/// An absent or empty on_exceed coerces to warn
fn parse_on_exceed(value: Option<&str>) -> Result<OnExceedAction> {
    match value {
        None | Some("") => Ok(OnExceedAction::Warn),
        Some(raw) => raw
            .parse()
            .map_err(|_| AppError::Validation(format!("invalid on_exceed action '{}'", raw))),
    }
}

pub async fn create_budget(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateBudgetRequest>,
) -> Result<(StatusCode, Json<Budget>)> {
    request.validate()?;

    let mut ids = ScopeIds {
        org_id: request.org_id.clone(),
        tenant_id: request.tenant_id.clone(),
        ..Default::default()
    };
    apply_identity_headers(&headers, &mut ids);

    let budget = Budget {
        id: request.id,
        name: request.name,
        scope: parse_scope(&request.scope)?,
        scope_id: request.scope_id.filter(|s| !s.is_empty()),
        limit_usd: request.limit_usd,
        period: parse_period(&request.period)?,
        on_exceed: parse_on_exceed(request.on_exceed.as_deref())?,
        alert_thresholds: request.alert_thresholds.unwrap_or_default(),
        enabled: request.enabled.unwrap_or(true),
        org_id: ids.org_id,
        tenant_id: ids.tenant_id,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };

    let created = state.cost.create_budget(budget).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[derive(Debug, Deserialize)]
pub struct ListBudgetsQuery {
    pub org_id: Option<String>,
    pub tenant_id: Option<String>,
    pub scope: Option<String>,
    #[serde(default)]
    pub enabled_only: bool,
}

pub async fn list_budgets(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListBudgetsQuery>,
) -> Result<Json<Vec<Budget>>> {
    let scope = match params.scope.as_deref() {
        Some(raw) => Some(parse_scope(raw)?),
        None => None,
    };

    let filter = BudgetFilter {
        org_id: params.org_id.or_else(|| header_value(&headers, "X-Org-ID")),
        tenant_id: params
            .tenant_id
            .or_else(|| header_value(&headers, "X-Tenant-ID")),
        scope,
        enabled_only: params.enabled_only,
    };

    let budgets = state.stores.budgets.list_budgets(&filter).await?;
    Ok(Json(budgets))
}

fn tenant_from(headers: &HeaderMap) -> String {
    header_value(headers, "X-Tenant-ID").unwrap_or_default()
}

pub async fn get_budget(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Budget>> {
    let budget = state
        .stores
        .budgets
        .get_budget(&tenant_from(&headers), &id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Budget {} not found", id)))?;
    Ok(Json(budget))
}

#[derive(Debug, Deserialize)]
pub struct UpdateBudgetRequest {
    pub name: Option<String>,
    pub scope: Option<String>,
    pub scope_id: Option<String>,
    pub limit_usd: Option<f64>,
    pub period: Option<String>,
    pub on_exceed: Option<String>,
    pub alert_thresholds: Option<Vec<u32>>,
    pub enabled: Option<bool>,
}

pub async fn update_budget(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<UpdateBudgetRequest>,
) -> Result<Json<Budget>> {
    let scope = match request.scope.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(parse_scope(raw)?),
        None => None,
    };
    let period = match request.period.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(parse_period(raw)?),
        None => None,
    };
    let on_exceed = match request.on_exceed.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(parse_on_exceed(Some(raw))?),
        None => None,
    };

    let patch = BudgetPatch {
        name: request.name,
        scope,
        scope_id: request.scope_id,
        limit_usd: request.limit_usd,
        period,
        on_exceed,
        alert_thresholds: request.alert_thresholds,
        enabled: request.enabled,
    };

    let updated = state
        .cost
        .update_budget(&tenant_from(&headers), &id, patch)
        .await?;
    Ok(Json(updated))
}

pub async fn delete_budget(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    state
        .cost
        .delete_budget(&tenant_from(&headers), &id)
        .await?;
    Ok(Json(serde_json::json!({"deleted": id})))
}

#[derive(Debug, Default, Deserialize)]
pub struct CheckBudgetRequest {
    #[serde(default)]
    pub org_id: String,
    #[serde(default)]
    pub team_id: String,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub tenant_id: String,
}

pub async fn check_budget(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CheckBudgetRequest>,
) -> Result<Json<BudgetDecision>> {
    let mut ids = ScopeIds {
        org_id: request.org_id,
        tenant_id: request.tenant_id,
        user_id: request.user_id,
        ..Default::default()
    };
    apply_identity_headers(&headers, &mut ids);

    let decision = state
        .cost
        .check_budget(
            &ids.org_id,
            &request.team_id,
            &request.agent_id,
            &ids.user_id,
            &ids.tenant_id,
        )
        .await?;
    Ok(Json(decision))
}

pub async fn budget_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<BudgetStatus>> {
    let status = state.cost.budget_status(&tenant_from(&headers), &id).await?;
    Ok(Json(status))
}

#[derive(Debug, Deserialize)]
pub struct AlertsQuery {
    pub limit: Option<usize>,
}

pub async fn budget_alerts(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<AlertsQuery>,
) -> Result<Json<Vec<BudgetAlert>>> {
    let limit = params.limit.unwrap_or(50).min(MAX_PAGE_SIZE);
    let alerts = state.stores.alerts.list_alerts(&id, limit).await?;
    Ok(Json(alerts))
}

#[derive(Debug, Deserialize, Validate)]
pub struct AcknowledgeAlertRequest {
    #[validate(length(min = 1))]
    pub acknowledged_by: String,
}

pub async fn acknowledge_alert(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<AcknowledgeAlertRequest>,
) -> Result<Json<BudgetAlert>> {
    request.validate()?;
    let alert = state
        .stores
        .alerts
        .acknowledge_alert(&id, &request.acknowledged_by)
        .await?;
    Ok(Json(alert))
}

// ============================================================================
// Usage reporting
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    pub org_id: Option<String>,
    pub tenant_id: Option<String>,
    pub team_id: Option<String>,
    pub agent_id: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl UsageQuery {
    fn filter(&self, headers: &HeaderMap) -> UsageFilter {
        UsageFilter {
            org_id: self
                .org_id
                .clone()
                .or_else(|| header_value(headers, "X-Org-ID")),
            tenant_id: self
                .tenant_id
                .clone()
                .or_else(|| header_value(headers, "X-Tenant-ID")),
            team_id: self.team_id.clone(),
            agent_id: self.agent_id.clone(),
            provider: self.provider.clone(),
            model: self.model.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }
}

pub async fn usage_summary(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<UsageQuery>,
) -> Result<Json<UsageSummary>> {
    let summary = state
        .stores
        .usage
        .summarize(&params.filter(&headers))
        .await?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
pub struct BreakdownQuery {
    pub group_by: String,
    pub period: Option<String>,
    pub org_id: Option<String>,
    pub tenant_id: Option<String>,
}

pub async fn usage_breakdown(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<BreakdownQuery>,
) -> Result<Json<Vec<UsageAggregate>>> {
    let scope: AggregateScope = params
        .group_by
        .parse()
        .map_err(|_| AppError::Validation(format!("invalid group_by '{}'", params.group_by)))?;
    let period: AggregatePeriod = match params.period.as_deref() {
        None | Some("") => AggregatePeriod::Daily,
        Some(raw) => raw
            .parse()
            .map_err(|_| AppError::Validation(format!("invalid period '{}'", raw)))?,
    };

    let org_id = params
        .org_id
        .or_else(|| header_value(&headers, "X-Org-ID"))
        .unwrap_or_default();
    let tenant_id = params
        .tenant_id
        .or_else(|| header_value(&headers, "X-Tenant-ID"))
        .unwrap_or_default();

    let aggregates = state
        .stores
        .usage
        .list_aggregates(scope, period, &org_id, &tenant_id)
        .await?;
    Ok(Json(aggregates))
}

pub async fn usage_records(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<UsageQuery>,
) -> Result<Json<Vec<UsageRecord>>> {
    let limit = params.limit.unwrap_or(100).min(MAX_PAGE_SIZE);
    let offset = params.offset.unwrap_or(0);
    let records = state
        .stores
        .usage
        .list_records(&params.filter(&headers), limit, offset)
        .await?;
    Ok(Json(records))
}

// ============================================================================
// Pricing
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PricingQuery {
    pub provider: Option<String>,
    pub model: Option<String>,
}

/// Full table, provider slice, or a single entry
pub async fn pricing(
    State(state): State<AppState>,
    Query(params): Query<PricingQuery>,
) -> Result<Json<serde_json::Value>> {
    let table = state.cost.pricing();

    match (params.provider.as_deref(), params.model.as_deref()) {
        (Some(provider), Some(model)) => {
            let price = table.get(provider, model).ok_or_else(|| {
                AppError::NotFound(format!("No pricing for {}/{}", provider, model))
            })?;
            Ok(Json(serde_json::json!({
                "provider": provider,
                "model": model,
                "input_per_1k": price.input_per_1k,
                "output_per_1k": price.output_per_1k,
            })))
        }
        (Some(provider), None) => Ok(Json(serde_json::json!(
            table.entries_for_provider(provider)
        ))),
        _ => Ok(Json(serde_json::json!(table.entries()))),
    }
}
