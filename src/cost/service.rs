use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::cost::periods::{budget_period_end, budget_period_start, truncate};
use crate::cost::pricing::PricingTable;
use crate::error::{AppError, Result};
use crate::metrics;
use crate::models::{
    AggregatePeriod, AggregateScope, AlertType, Budget, BudgetAlert, BudgetDecision, BudgetPeriod,
    BudgetScope, BudgetStatus, OnExceedAction, UsageAggregate, UsageRecord,
};
use crate::state::{AlertStore, BudgetStore, UsageStore};

const AGGREGATE_PERIODS: [AggregatePeriod; 3] = [
    AggregatePeriod::Hourly,
    AggregatePeriod::Daily,
    AggregatePeriod::Monthly,
];

/// Bookkeeping task fanned out by `record_usage`
#[derive(Debug, Clone)]
enum BookkeepingTask {
    Aggregates(UsageRecord),
    BudgetCheck(UsageRecord),
}

/// Partial budget update; only non-empty / non-zero fields replace
/// existing values
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BudgetPatch {
    pub name: Option<String>,
    pub scope: Option<BudgetScope>,
    pub scope_id: Option<String>,
    pub limit_usd: Option<f64>,
    pub period: Option<BudgetPeriod>,
    pub on_exceed: Option<OnExceedAction>,
    pub alert_thresholds: Option<Vec<u32>>,
    pub enabled: Option<bool>,
}

/// State shared between the service front and the bookkeeping worker
#[derive(Clone)]
struct Bookkeeper {
    usage: Arc<dyn UsageStore>,
    budgets: Arc<dyn BudgetStore>,
    alerts: Arc<dyn AlertStore>,
    /// Thresholds already alerted this period, per budget
    alerted: Arc<RwLock<HashMap<String, HashSet<u32>>>>,
    /// Alerts persisted before this watermark are ignored for dedup,
    /// letting `reset_alerted_thresholds` re-arm a budget
    reset_watermarks: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
}

impl Bookkeeper {
    async fn handle(&self, task: BookkeepingTask) {
        // Transient datastore failures are retried at most once
        if let Err(err) = self.run(task.clone()).await {
            tracing::warn!(error = %err, "Bookkeeping task failed, retrying once");
            if let Err(err) = self.run(task).await {
                tracing::error!(error = %err, "Bookkeeping task failed after retry");
            }
        }
    }

    async fn run(&self, task: BookkeepingTask) -> Result<()> {
        match task {
            BookkeepingTask::Aggregates(record) => self.update_aggregates(&record).await,
            BookkeepingTask::BudgetCheck(record) => self.run_budget_checks(&record).await,
        }
    }

    /// Additive upserts for every present scope and period. Each upsert
    /// is a single atomic store operation.
    async fn update_aggregates(&self, record: &UsageRecord) -> Result<()> {
        let ts = match record.timestamp {
            Some(ts) => ts,
            None => return Ok(()),
        };

        let scopes: [(AggregateScope, &str); 5] = [
            (AggregateScope::Provider, record.provider.as_str()),
            (AggregateScope::Model, record.model.as_str()),
            (AggregateScope::Organization, record.scope.org_id.as_str()),
            (AggregateScope::Team, record.scope.team_id.as_str()),
            (AggregateScope::Agent, record.scope.agent_id.as_str()),
        ];

        for period in AGGREGATE_PERIODS {
            let period_start = truncate(period, ts);
            for (scope, scope_id) in scopes.iter().filter(|(_, id)| !id.is_empty()) {
                let aggregate = UsageAggregate {
                    scope: *scope,
                    scope_id: scope_id.to_string(),
                    period,
                    period_start,
                    total_cost: record.cost_usd,
                    total_tokens_in: record.tokens_in,
                    total_tokens_out: record.tokens_out,
                    request_count: 1,
                    org_id: record.scope.org_id.clone(),
                    tenant_id: record.scope.tenant_id.clone(),
                };
                self.usage.upsert_aggregate(&aggregate).await?;
            }
        }
        Ok(())
    }

    /// Evaluate every enabled budget targeting a scope present on the
    /// record
    async fn run_budget_checks(&self, record: &UsageRecord) -> Result<()> {
        let now = Utc::now();
        let scopes: [(BudgetScope, &str); 4] = [
            (BudgetScope::Organization, record.scope.org_id.as_str()),
            (BudgetScope::Team, record.scope.team_id.as_str()),
            (BudgetScope::Agent, record.scope.agent_id.as_str()),
            (BudgetScope::User, record.scope.user_id.as_str()),
        ];

        for (scope, scope_id) in scopes.iter().filter(|(_, id)| !id.is_empty()) {
            let budgets = self
                .budgets
                .budgets_for_scope(*scope, scope_id, &record.scope.org_id, &record.scope.tenant_id)
                .await?;
            for budget in budgets {
                self.evaluate_budget(&budget, now).await?;
            }
        }
        Ok(())
    }

    async fn evaluate_budget(&self, budget: &Budget, now: DateTime<Utc>) -> Result<()> {
        if budget.limit_usd <= 0.0 {
            return Ok(());
        }

        let period_start = budget_period_start(budget.period, now);
        let (used, percentage) = budget_usage(&self.usage, budget, period_start, now).await?;

        // Alerts persisted before an explicit reset no longer count
        // toward dedup
        let dedup_since = {
            let watermarks = self.reset_watermarks.read();
            match watermarks.get(&budget.id) {
                Some(watermark) if *watermark > period_start => *watermark,
                _ => period_start,
            }
        };

        let mut thresholds = budget.alert_thresholds.clone();
        thresholds.sort_unstable();
        thresholds.dedup();

        for threshold in thresholds {
            if percentage < threshold as f64 {
                continue;
            }
            if self.already_alerted(&budget.id, threshold) {
                continue;
            }
            // Persisted rows make emission exactly-once across restarts
            if self
                .alerts
                .find_since(&budget.id, threshold, dedup_since)
                .await?
                .is_some()
            {
                self.mark_alerted(&budget.id, threshold);
                continue;
            }

            let alert_type = if threshold < 100 {
                AlertType::ThresholdReached
            } else if budget.on_exceed == OnExceedAction::Block {
                AlertType::BudgetBlocked
            } else {
                AlertType::BudgetExceeded
            };

            let alert = BudgetAlert {
                id: Uuid::new_v4(),
                budget_id: budget.id.clone(),
                threshold,
                percentage_reached: percentage,
                amount_usd: used,
                alert_type,
                message: format!(
                    "Budget '{}' reached {:.1}% of ${:.2} limit (${:.2} used)",
                    budget.name, percentage, budget.limit_usd, used
                ),
                acknowledged: false,
                acknowledged_by: None,
                acknowledged_at: None,
                created_at: now,
            };

            self.alerts.save_alert(&alert).await?;
            self.mark_alerted(&budget.id, threshold);
            metrics::BUDGET_ALERTS_TOTAL
                .with_label_values(&[&alert_type.to_string()])
                .inc();
            tracing::warn!(
                budget_id = %budget.id,
                threshold,
                percentage = percentage,
                alert_type = %alert_type,
                "Budget alert emitted"
            );
        }
        Ok(())
    }

    fn already_alerted(&self, budget_id: &str, threshold: u32) -> bool {
        self.alerted
            .read()
            .get(budget_id)
            .map_or(false, |set| set.contains(&threshold))
    }

    fn mark_alerted(&self, budget_id: &str, threshold: u32) {
        self.alerted
            .write()
            .entry(budget_id.to_string())
            .or_default()
            .insert(threshold);
    }
}

/// Usage summed over the budget's window plus the percentage of limit
async fn budget_usage(
    usage: &Arc<dyn UsageStore>,
    budget: &Budget,
    period_start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(f64, f64)> {
    let scope_id = budget.scope_id.clone().unwrap_or_default();
    let used = usage
        .sum_cost(
            budget.scope,
            &scope_id,
            &budget.org_id,
            &budget.tenant_id,
            period_start,
            now,
        )
        .await?;
    let percentage = if budget.limit_usd > 0.0 {
        100.0 * used / budget.limit_usd
    } else {
        0.0
    };
    Ok((used, percentage))
}

/// Token-to-cost calculation, hierarchical budget accounting, threshold
/// alerting with de-duplication, and budget-enforcement decisions.
///
/// `record_usage` persists synchronously and fans aggregate updates and
/// budget checks out to a background worker; callers that need
/// consistent accounting before dispatch call `check_budget` explicitly.
pub struct CostService {
    pricing: Arc<PricingTable>,
    bookkeeper: Bookkeeper,
    tx: mpsc::Sender<BookkeepingTask>,
    degraded: Arc<AtomicBool>,
}

impl CostService {
    pub fn new(
        pricing: Arc<PricingTable>,
        budgets: Arc<dyn BudgetStore>,
        usage: Arc<dyn UsageStore>,
        alerts: Arc<dyn AlertStore>,
        queue_size: usize,
    ) -> Self {
        let bookkeeper = Bookkeeper {
            usage,
            budgets,
            alerts,
            alerted: Arc::new(RwLock::new(HashMap::new())),
            reset_watermarks: Arc::new(RwLock::new(HashMap::new())),
        };

        let (tx, mut rx) = mpsc::channel::<BookkeepingTask>(queue_size);

        // Single worker: serialises aggregate upserts, runs with its
        // own lifetime so client cancellation never orphans accounting
        let worker = bookkeeper.clone();
        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                metrics::BOOKKEEPING_QUEUE_DEPTH.dec();
                worker.handle(task).await;
            }
            tracing::info!("Bookkeeping worker stopped");
        });

        Self {
            pricing,
            bookkeeper,
            tx,
            degraded: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    /// Whether bookkeeping back-pressure has been hit. Surfaced by the
    /// health endpoint rather than silently dropping work.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Persist a usage record and enqueue its bookkeeping.
    ///
    /// Derives the cost from the pricing table when recorded as zero
    /// and stamps the timestamp when unset. Returns the completed
    /// record.
    pub async fn record_usage(&self, record: UsageRecord) -> Result<UsageRecord> {
        let record = self.persist(record).await?;

        self.enqueue(BookkeepingTask::Aggregates(record.clone()));
        self.enqueue(BookkeepingTask::BudgetCheck(record.clone()));
        Ok(record)
    }

    /// `record_usage` plus inline bookkeeping. For callers (and tests)
    /// that need aggregates and alerts settled before returning.
    pub async fn record_usage_sync(&self, record: UsageRecord) -> Result<UsageRecord> {
        let record = self.persist(record).await?;
        self.bookkeeper.update_aggregates(&record).await?;
        self.bookkeeper.run_budget_checks(&record).await?;
        Ok(record)
    }

    async fn persist(&self, mut record: UsageRecord) -> Result<UsageRecord> {
        if record.timestamp.is_none() {
            record.timestamp = Some(Utc::now());
        }
        if record.cost_usd == 0.0 {
            record.cost_usd = self.pricing.cost(
                &record.provider,
                &record.model,
                record.tokens_in,
                record.tokens_out,
            );
        }

        self.bookkeeper.usage.save_record(&record).await?;
        metrics::USAGE_RECORDS_TOTAL.inc();
        Ok(record)
    }

    fn enqueue(&self, task: BookkeepingTask) {
        match self.tx.try_send(task) {
            Ok(()) => {
                metrics::BOOKKEEPING_QUEUE_DEPTH.inc();
            }
            Err(err) => {
                // Back-pressure is a health signal, not a silent drop
                self.degraded.store(true, Ordering::Relaxed);
                metrics::BOOKKEEPING_DROPPED_TOTAL.inc();
                tracing::error!(error = %err, "Bookkeeping queue full, task dropped");
            }
        }
    }

    /// Pre-dispatch enforcement decision. Scope order: agent, team,
    /// organization, user; the first blocked budget wins.
    pub async fn check_budget(
        &self,
        org_id: &str,
        team_id: &str,
        agent_id: &str,
        user_id: &str,
        tenant_id: &str,
    ) -> Result<BudgetDecision> {
        let now = Utc::now();
        let scopes: [(BudgetScope, &str); 4] = [
            (BudgetScope::Agent, agent_id),
            (BudgetScope::Team, team_id),
            (BudgetScope::Organization, org_id),
            (BudgetScope::User, user_id),
        ];

        let mut exceeded: Option<(Budget, f64)> = None;

        for (scope, scope_id) in scopes.iter().filter(|(_, id)| !id.is_empty()) {
            let budgets = self
                .bookkeeper
                .budgets
                .budgets_for_scope(*scope, scope_id, org_id, tenant_id)
                .await?;

            for budget in budgets {
                let period_start = budget_period_start(budget.period, now);
                let (used, _) = budget_usage(&self.bookkeeper.usage, &budget, period_start, now).await?;
                let is_exceeded = used >= budget.limit_usd;
                if !is_exceeded {
                    continue;
                }

                if budget.on_exceed == OnExceedAction::Block {
                    return Ok(BudgetDecision {
                        allowed: false,
                        action: Some(OnExceedAction::Block),
                        budget_id: Some(budget.id.clone()),
                        message: Some(format!(
                            "Budget '{}' exhausted: ${:.2} of ${:.2} used",
                            budget.name, used, budget.limit_usd
                        )),
                    });
                }
                if exceeded.is_none() {
                    exceeded = Some((budget, used));
                }
            }
        }

        match exceeded {
            Some((budget, used)) => Ok(BudgetDecision {
                allowed: true,
                action: Some(budget.on_exceed),
                budget_id: Some(budget.id.clone()),
                message: Some(format!(
                    "Budget '{}' exceeded: ${:.2} of ${:.2} used",
                    budget.name, used, budget.limit_usd
                )),
            }),
            None => Ok(BudgetDecision::allow()),
        }
    }

    /// Point-in-time accounting for one budget
    pub async fn budget_status(&self, tenant_id: &str, id: &str) -> Result<BudgetStatus> {
        let budget = self
            .bookkeeper
            .budgets
            .get_budget(tenant_id, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Budget {} not found", id)))?;

        let now = Utc::now();
        let period_start = budget_period_start(budget.period, now);
        let period_end = budget_period_end(budget.period, period_start);
        let (used, percentage) = budget_usage(&self.bookkeeper.usage, &budget, period_start, now).await?;

        let is_exceeded = used >= budget.limit_usd;
        let is_blocked = is_exceeded && budget.on_exceed == OnExceedAction::Block;

        Ok(BudgetStatus {
            remaining_usd: budget.limit_usd - used,
            used_usd: used,
            percentage,
            period_start,
            period_end,
            is_exceeded,
            is_blocked,
            budget,
        })
    }

    /// Validate and create a budget
    pub async fn create_budget(&self, mut budget: Budget) -> Result<Budget> {
        validate_budget(&mut budget)?;
        budget.created_at = Utc::now();
        budget.updated_at = budget.created_at;
        self.bookkeeper.budgets.create_budget(&budget).await?;
        Ok(budget)
    }

    /// Partial-merge update: only non-empty / non-zero patch fields
    /// replace existing values
    pub async fn update_budget(
        &self,
        tenant_id: &str,
        id: &str,
        patch: BudgetPatch,
    ) -> Result<Budget> {
        let mut budget = self
            .bookkeeper
            .budgets
            .get_budget(tenant_id, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Budget {} not found", id)))?;

        if let Some(name) = patch.name.filter(|n| !n.trim().is_empty()) {
            budget.name = name;
        }
        if let Some(scope) = patch.scope {
            budget.scope = scope;
        }
        if let Some(scope_id) = patch.scope_id.filter(|s| !s.is_empty()) {
            budget.scope_id = Some(scope_id);
        }
        if let Some(limit) = patch.limit_usd.filter(|l| *l > 0.0) {
            budget.limit_usd = limit;
        }
        if let Some(period) = patch.period {
            budget.period = period;
        }
        if let Some(on_exceed) = patch.on_exceed {
            budget.on_exceed = on_exceed;
        }
        if let Some(thresholds) = patch.alert_thresholds.filter(|t| !t.is_empty()) {
            budget.alert_thresholds = thresholds;
        }
        if let Some(enabled) = patch.enabled {
            budget.enabled = enabled;
        }

        validate_budget(&mut budget)?;
        budget.updated_at = Utc::now();
        self.bookkeeper.budgets.update_budget(&budget).await?;
        Ok(budget)
    }

    pub async fn delete_budget(&self, tenant_id: &str, id: &str) -> Result<()> {
        self.bookkeeper.budgets.delete_budget(tenant_id, id).await?;
        self.reset_alerted_thresholds(id);
        Ok(())
    }

    /// Clear the alerted-thresholds memory for a budget so thresholds
    /// can fire again (period rollover and tests)
    pub fn reset_alerted_thresholds(&self, budget_id: &str) {
        self.bookkeeper.alerted.write().remove(budget_id);
        self.bookkeeper
            .reset_watermarks
            .write()
            .insert(budget_id.to_string(), Utc::now());
        tracing::debug!(budget_id, "Alerted thresholds reset");
    }
}

/// Semantic validation for create/update
pub fn validate_budget(budget: &mut Budget) -> Result<()> {
    budget.id = budget.id.trim().to_string();
    budget.name = budget.name.trim().to_string();

    if budget.id.is_empty() {
        return Err(AppError::Validation("budget id must not be empty".to_string()));
    }
    if budget.name.is_empty() {
        return Err(AppError::Validation(
            "budget name must not be empty".to_string(),
        ));
    }
    if !(budget.limit_usd > 0.0) {
        return Err(AppError::Validation(
            "budget limit must be greater than zero".to_string(),
        ));
    }

    if budget.alert_thresholds.is_empty() {
        budget.alert_thresholds = crate::models::default_alert_thresholds();
    }
    budget.alert_thresholds.sort_unstable();
    budget.alert_thresholds.dedup();
    if budget.alert_thresholds.iter().any(|t| *t == 0) {
        return Err(AppError::Validation(
            "alert thresholds must be positive percentages".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BudgetPeriod, ScopeIds};
    use crate::state::create_in_memory_store;

    fn service() -> (CostService, crate::state::StoreHandles) {
        let handles = create_in_memory_store();
        let service = CostService::new(
            Arc::new(PricingTable::new()),
            handles.budgets.clone(),
            handles.usage.clone(),
            handles.alerts.clone(),
            128,
        );
        (service, handles)
    }

    fn org_budget(id: &str, limit: f64, on_exceed: OnExceedAction) -> Budget {
        Budget {
            id: id.to_string(),
            name: format!("budget {}", id),
            scope: BudgetScope::Organization,
            scope_id: Some("org-1".to_string()),
            limit_usd: limit,
            period: BudgetPeriod::Monthly,
            on_exceed,
            alert_thresholds: vec![50, 80, 100],
            enabled: true,
            org_id: "org-1".to_string(),
            tenant_id: "t-1".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn usage(cost: f64) -> UsageRecord {
        UsageRecord {
            id: Uuid::new_v4(),
            request_id: Uuid::new_v4().to_string(),
            timestamp: None,
            scope: ScopeIds {
                org_id: "org-1".to_string(),
                tenant_id: "t-1".to_string(),
                ..Default::default()
            },
            provider: "openai".to_string(),
            model: "gpt-4".to_string(),
            tokens_in: 100,
            tokens_out: 50,
            cost_usd: cost,
            request_type: "chat".to_string(),
            cached: false,
        }
    }

    #[tokio::test]
    async fn test_cost_derived_when_zero() {
        let (service, _handles) = service();

        let mut record = usage(0.0);
        record.tokens_in = 1500;
        record.tokens_out = 500;
        let saved = service.record_usage_sync(record).await.unwrap();

        // 1.5 * 0.03 + 0.5 * 0.06
        assert!((saved.cost_usd - 0.075).abs() < 1e-12);
        assert!(saved.timestamp.is_some());
    }

    #[tokio::test]
    async fn test_explicit_cost_is_kept() {
        let (service, _handles) = service();
        let saved = service.record_usage_sync(usage(2.5)).await.unwrap();
        assert!((saved.cost_usd - 2.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_aggregates_roll_up_per_scope_and_period() {
        let (service, handles) = service();
        service.record_usage_sync(usage(1.0)).await.unwrap();
        service.record_usage_sync(usage(2.0)).await.unwrap();

        let hourly = handles
            .usage
            .list_aggregates(AggregateScope::Provider, AggregatePeriod::Hourly, "org-1", "t-1")
            .await
            .unwrap();
        assert_eq!(hourly.len(), 1);
        assert!((hourly[0].total_cost - 3.0).abs() < 1e-9);
        assert_eq!(hourly[0].request_count, 2);

        let monthly = handles
            .usage
            .list_aggregates(AggregateScope::Organization, AggregatePeriod::Monthly, "org-1", "t-1")
            .await
            .unwrap();
        assert_eq!(monthly.len(), 1);
        assert_eq!(monthly[0].scope_id, "org-1");
    }

    #[tokio::test]
    async fn test_threshold_alert_sequence() {
        let (service, handles) = service();
        service
            .create_budget(org_budget("b-1", 100.0, OnExceedAction::Block))
            .await
            .unwrap();

        // $51 used: one alert at threshold 50
        service.record_usage_sync(usage(51.0)).await.unwrap();
        let alerts = handles.alerts.list_alerts("b-1", 100).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].threshold, 50);
        assert_eq!(alerts[0].alert_type, AlertType::ThresholdReached);

        // $81: one more alert, threshold 80
        service.record_usage_sync(usage(30.0)).await.unwrap();
        let alerts = handles.alerts.list_alerts("b-1", 100).await.unwrap();
        assert_eq!(alerts.len(), 2);
        assert!(alerts.iter().any(|a| a.threshold == 80));

        // $101: threshold 100 fires as budget_blocked
        service.record_usage_sync(usage(20.0)).await.unwrap();
        let alerts = handles.alerts.list_alerts("b-1", 100).await.unwrap();
        assert_eq!(alerts.len(), 3);
        let top = alerts.iter().find(|a| a.threshold == 100).unwrap();
        assert_eq!(top.alert_type, AlertType::BudgetBlocked);

        // Further usage emits nothing new
        service.record_usage_sync(usage(1.0)).await.unwrap();
        let alerts = handles.alerts.list_alerts("b-1", 100).await.unwrap();
        assert_eq!(alerts.len(), 3);

        // And the budget now blocks dispatch
        let decision = service
            .check_budget("org-1", "", "", "", "t-1")
            .await
            .unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.action, Some(OnExceedAction::Block));
        assert_eq!(decision.budget_id.as_deref(), Some("b-1"));
    }

    #[tokio::test]
    async fn test_exceeded_warn_budget_allows_with_action() {
        let (service, _handles) = service();
        service
            .create_budget(org_budget("b-warn", 10.0, OnExceedAction::Warn))
            .await
            .unwrap();

        service.record_usage_sync(usage(11.0)).await.unwrap();

        let decision = service
            .check_budget("org-1", "", "", "", "t-1")
            .await
            .unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.action, Some(OnExceedAction::Warn));
        assert!(decision.message.is_some());
    }

    #[tokio::test]
    async fn test_blocked_agent_budget_wins_over_org_warn() {
        let (service, _handles) = service();
        service
            .create_budget(org_budget("b-org", 1000.0, OnExceedAction::Warn))
            .await
            .unwrap();

        let mut agent_budget = org_budget("b-agent", 5.0, OnExceedAction::Block);
        agent_budget.scope = BudgetScope::Agent;
        agent_budget.scope_id = Some("agent-7".to_string());
        service.create_budget(agent_budget).await.unwrap();

        let mut record = usage(6.0);
        record.scope.agent_id = "agent-7".to_string();
        service.record_usage_sync(record).await.unwrap();

        let decision = service
            .check_budget("org-1", "", "agent-7", "", "t-1")
            .await
            .unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.budget_id.as_deref(), Some("b-agent"));
    }

    #[tokio::test]
    async fn test_budget_status_matches_recorded_usage() {
        let (service, _handles) = service();
        service
            .create_budget(org_budget("b-1", 100.0, OnExceedAction::Warn))
            .await
            .unwrap();

        service.record_usage_sync(usage(12.5)).await.unwrap();
        service.record_usage_sync(usage(7.5)).await.unwrap();

        let status = service.budget_status("t-1", "b-1").await.unwrap();
        assert!((status.used_usd - 20.0).abs() < 1e-9);
        assert!((status.remaining_usd - 80.0).abs() < 1e-9);
        assert!((status.percentage - 20.0).abs() < 1e-9);
        assert!(!status.is_exceeded);
        assert!(!status.is_blocked);
        assert!(status.period_start < status.period_end);
    }

    #[tokio::test]
    async fn test_reset_rearms_thresholds() {
        let (service, handles) = service();
        service
            .create_budget(org_budget("b-1", 100.0, OnExceedAction::Warn))
            .await
            .unwrap();

        service.record_usage_sync(usage(55.0)).await.unwrap();
        assert_eq!(handles.alerts.list_alerts("b-1", 10).await.unwrap().len(), 1);

        service.reset_alerted_thresholds("b-1");

        // The same threshold may fire again after a reset
        service.record_usage_sync(usage(1.0)).await.unwrap();
        let alerts = handles.alerts.list_alerts("b-1", 10).await.unwrap();
        assert_eq!(alerts.len(), 2);
        assert!(alerts.iter().all(|a| a.threshold == 50));
    }

    #[tokio::test]
    async fn test_dedup_survives_rebuilt_service() {
        let (service, handles) = service();
        service
            .create_budget(org_budget("b-1", 100.0, OnExceedAction::Warn))
            .await
            .unwrap();
        service.record_usage_sync(usage(55.0)).await.unwrap();
        assert_eq!(handles.alerts.list_alerts("b-1", 10).await.unwrap().len(), 1);

        // A fresh service over the same stores models a process restart:
        // the persisted alert suppresses re-emission
        let restarted = CostService::new(
            Arc::new(PricingTable::new()),
            handles.budgets.clone(),
            handles.usage.clone(),
            handles.alerts.clone(),
            128,
        );
        restarted.record_usage_sync(usage(1.0)).await.unwrap();
        assert_eq!(handles.alerts.list_alerts("b-1", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_validation_rules() {
        let (service, _handles) = service();

        let mut bad = org_budget("", 100.0, OnExceedAction::Warn);
        bad.id = "  ".to_string();
        assert!(matches!(
            service.create_budget(bad).await.unwrap_err(),
            AppError::Validation(_)
        ));

        let bad = org_budget("b-1", 0.0, OnExceedAction::Warn);
        assert!(matches!(
            service.create_budget(bad).await.unwrap_err(),
            AppError::Validation(_)
        ));

        let mut defaulted = org_budget("b-2", 10.0, OnExceedAction::Warn);
        defaulted.alert_thresholds = vec![];
        let created = service.create_budget(defaulted).await.unwrap();
        assert_eq!(created.alert_thresholds, vec![50, 80, 100]);
    }

    #[tokio::test]
    async fn test_duplicate_create_conflicts() {
        let (service, _handles) = service();
        service
            .create_budget(org_budget("b-1", 100.0, OnExceedAction::Warn))
            .await
            .unwrap();
        let err = service
            .create_budget(org_budget("b-1", 50.0, OnExceedAction::Warn))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_partial_update_merge() {
        let (service, _handles) = service();
        service
            .create_budget(org_budget("b-1", 100.0, OnExceedAction::Warn))
            .await
            .unwrap();

        let updated = service
            .update_budget(
                "t-1",
                "b-1",
                BudgetPatch {
                    limit_usd: Some(250.0),
                    on_exceed: Some(OnExceedAction::Block),
                    // Empty name must not clobber the existing one
                    name: Some(String::new()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!((updated.limit_usd - 250.0).abs() < f64::EPSILON);
        assert_eq!(updated.on_exceed, OnExceedAction::Block);
        assert_eq!(updated.name, "budget b-1");
    }

    #[tokio::test]
    async fn test_async_record_usage_enqueues() {
        let (service, handles) = service();
        service
            .create_budget(org_budget("b-1", 100.0, OnExceedAction::Warn))
            .await
            .unwrap();

        service.record_usage(usage(60.0)).await.unwrap();

        // The worker drains the queue shortly after
        for _ in 0..50 {
            if !handles.alerts.list_alerts("b-1", 10).await.unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(handles.alerts.list_alerts("b-1", 10).await.unwrap().len(), 1);
        assert!(!service.is_degraded());
    }
}
