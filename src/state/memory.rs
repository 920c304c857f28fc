use crate::error::{AppError, Result};
use crate::models::{
    AggregateKey, AggregatePeriod, AggregateScope, AuditRecord, Budget, BudgetAlert, BudgetScope,
    UsageAggregate, UsageRecord,
};
use crate::state::{
    scope_column, AlertStore, AuditStore, BudgetFilter, BudgetStore, UsageFilter, UsageStore,
    UsageSummary,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

/// In-memory gateway store (for single-node deployments and testing)
#[derive(Clone)]
pub struct InMemoryStore {
    budgets: Arc<DashMap<(String, String), Budget>>,
    records: Arc<DashMap<Uuid, UsageRecord>>,
    aggregates: Arc<DashMap<AggregateKey, UsageAggregate>>,
    alerts: Arc<DashMap<Uuid, BudgetAlert>>,
    audits: Arc<DashMap<Uuid, AuditRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            budgets: Arc::new(DashMap::new()),
            records: Arc::new(DashMap::new()),
            aggregates: Arc::new(DashMap::new()),
            alerts: Arc::new(DashMap::new()),
            audits: Arc::new(DashMap::new()),
        }
    }

    fn budget_key(tenant_id: &str, id: &str) -> (String, String) {
        (tenant_id.to_string(), id.to_string())
    }

    fn record_matches(record: &UsageRecord, filter: &UsageFilter) -> bool {
        let field_match = |want: &Option<String>, have: &str| {
            want.as_deref().map_or(true, |w| w == have)
        };

        let time_match = match record.timestamp {
            Some(ts) => {
                filter.start_time.map_or(true, |start| ts >= start)
                    && filter.end_time.map_or(true, |end| ts < end)
            }
            None => false,
        };

        field_match(&filter.org_id, &record.scope.org_id)
            && field_match(&filter.tenant_id, &record.scope.tenant_id)
            && field_match(&filter.team_id, &record.scope.team_id)
            && field_match(&filter.agent_id, &record.scope.agent_id)
            && field_match(&filter.provider, &record.provider)
            && field_match(&filter.model, &record.model)
            && time_match
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BudgetStore for InMemoryStore {
    async fn create_budget(&self, budget: &Budget) -> Result<()> {
        let key = Self::budget_key(&budget.tenant_id, &budget.id);
        if self.budgets.contains_key(&key) {
            return Err(AppError::Conflict(format!(
                "Budget {} already exists",
                budget.id
            )));
        }
        self.budgets.insert(key, budget.clone());
        tracing::debug!(budget_id = %budget.id, "Budget created");
        Ok(())
    }

    async fn get_budget(&self, tenant_id: &str, id: &str) -> Result<Option<Budget>> {
        let key = Self::budget_key(tenant_id, id);
        Ok(self.budgets.get(&key).map(|entry| entry.clone()))
    }

    async fn update_budget(&self, budget: &Budget) -> Result<()> {
        let key = Self::budget_key(&budget.tenant_id, &budget.id);
        if self.budgets.contains_key(&key) {
            self.budgets.insert(key, budget.clone());
            tracing::debug!(budget_id = %budget.id, "Budget updated");
            Ok(())
        } else {
            Err(AppError::NotFound(format!("Budget {} not found", budget.id)))
        }
    }

    async fn delete_budget(&self, tenant_id: &str, id: &str) -> Result<()> {
        let key = Self::budget_key(tenant_id, id);
        if self.budgets.remove(&key).is_some() {
            tracing::debug!(budget_id = %id, "Budget deleted");
            Ok(())
        } else {
            Err(AppError::NotFound(format!("Budget {} not found", id)))
        }
    }

    async fn list_budgets(&self, filter: &BudgetFilter) -> Result<Vec<Budget>> {
        let mut budgets: Vec<Budget> = self
            .budgets
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|budget| {
                let org_match = filter.org_id.as_deref().map_or(true, |o| budget.org_id == o);
                let tenant_match = filter
                    .tenant_id
                    .as_deref()
                    .map_or(true, |t| budget.tenant_id == t);
                let scope_match = filter.scope.map_or(true, |s| budget.scope == s);
                let enabled_match = !filter.enabled_only || budget.enabled;
                org_match && tenant_match && scope_match && enabled_match
            })
            .collect();

        budgets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(budgets)
    }

    async fn budgets_for_scope(
        &self,
        scope: BudgetScope,
        scope_id: &str,
        org_id: &str,
        tenant_id: &str,
    ) -> Result<Vec<Budget>> {
        let budgets = self
            .budgets
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|budget| {
                budget.enabled
                    && budget.scope == scope
                    && budget.org_id == org_id
                    && budget.tenant_id == tenant_id
                    && budget
                        .scope_id
                        .as_deref()
                        .map_or(true, |target| target == scope_id)
            })
            .collect();
        Ok(budgets)
    }
}

#[async_trait]
impl UsageStore for InMemoryStore {
    async fn save_record(&self, record: &UsageRecord) -> Result<()> {
        self.records.insert(record.id, record.clone());
        tracing::debug!(
            request_id = %record.request_id,
            provider = %record.provider,
            cost_usd = record.cost_usd,
            "Usage record saved"
        );
        Ok(())
    }

    async fn list_records(
        &self,
        filter: &UsageFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<UsageRecord>> {
        let mut records: Vec<UsageRecord> = self
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|record| Self::record_matches(record, filter))
            .collect();

        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records.into_iter().skip(offset).take(limit).collect())
    }

    async fn summarize(&self, filter: &UsageFilter) -> Result<UsageSummary> {
        let mut summary = UsageSummary::default();
        for entry in self.records.iter() {
            let record = entry.value();
            if Self::record_matches(record, filter) {
                summary.total_cost += record.cost_usd;
                summary.total_tokens_in += record.tokens_in;
                summary.total_tokens_out += record.tokens_out;
                summary.request_count += 1;
            }
        }
        Ok(summary)
    }

    async fn sum_cost(
        &self,
        scope: BudgetScope,
        scope_id: &str,
        org_id: &str,
        tenant_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<f64> {
        let total = self
            .records
            .iter()
            .filter(|entry| {
                let record = entry.value();
                let ts = match record.timestamp {
                    Some(ts) => ts,
                    None => return false,
                };

                let column = scope_column(scope, record);
                let scope_match = if scope_id.is_empty() {
                    true
                } else {
                    column == scope_id
                };

                scope_match
                    && (org_id.is_empty() || record.scope.org_id == org_id)
                    && (tenant_id.is_empty() || record.scope.tenant_id == tenant_id)
                    && ts >= from
                    && ts < to
            })
            .map(|entry| entry.value().cost_usd)
            .sum();
        Ok(total)
    }

    async fn upsert_aggregate(&self, aggregate: &UsageAggregate) -> Result<()> {
        // Entry API keeps the read-modify-write atomic per key
        self.aggregates
            .entry(aggregate.key())
            .and_modify(|existing| existing.merge(aggregate))
            .or_insert_with(|| aggregate.clone());
        Ok(())
    }

    async fn list_aggregates(
        &self,
        scope: AggregateScope,
        period: AggregatePeriod,
        org_id: &str,
        tenant_id: &str,
    ) -> Result<Vec<UsageAggregate>> {
        let mut aggregates: Vec<UsageAggregate> = self
            .aggregates
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|agg| {
                agg.scope == scope
                    && agg.period == period
                    && (org_id.is_empty() || agg.org_id == org_id)
                    && (tenant_id.is_empty() || agg.tenant_id == tenant_id)
            })
            .collect();

        aggregates.sort_by(|a, b| b.period_start.cmp(&a.period_start));
        Ok(aggregates)
    }
}

#[async_trait]
impl AlertStore for InMemoryStore {
    async fn save_alert(&self, alert: &BudgetAlert) -> Result<()> {
        self.alerts.insert(alert.id, alert.clone());
        tracing::debug!(
            budget_id = %alert.budget_id,
            threshold = alert.threshold,
            alert_type = %alert.alert_type,
            "Budget alert saved"
        );
        Ok(())
    }

    async fn list_alerts(&self, budget_id: &str, limit: usize) -> Result<Vec<BudgetAlert>> {
        let mut alerts: Vec<BudgetAlert> = self
            .alerts
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|alert| alert.budget_id == budget_id)
            .collect();

        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        alerts.truncate(limit);
        Ok(alerts)
    }

    async fn find_since(
        &self,
        budget_id: &str,
        threshold: u32,
        since: DateTime<Utc>,
    ) -> Result<Option<BudgetAlert>> {
        let found = self.alerts.iter().find_map(|entry| {
            let alert = entry.value();
            if alert.budget_id == budget_id
                && alert.threshold == threshold
                && alert.created_at >= since
            {
                Some(alert.clone())
            } else {
                None
            }
        });
        Ok(found)
    }

    async fn acknowledge_alert(&self, id: &Uuid, acknowledged_by: &str) -> Result<BudgetAlert> {
        match self.alerts.get_mut(id) {
            Some(mut entry) => {
                entry.acknowledged = true;
                entry.acknowledged_by = Some(acknowledged_by.to_string());
                entry.acknowledged_at = Some(Utc::now());
                Ok(entry.clone())
            }
            None => Err(AppError::NotFound(format!("Alert {} not found", id))),
        }
    }
}

#[async_trait]
impl AuditStore for InMemoryStore {
    async fn save_audit(&self, record: &AuditRecord) -> Result<()> {
        self.audits.insert(record.id, record.clone());
        tracing::debug!(
            user_id = %record.user_id,
            access_granted = record.access_granted,
            "Audit record saved"
        );
        Ok(())
    }

    async fn list_audits(&self, limit: usize) -> Result<Vec<AuditRecord>> {
        let mut audits: Vec<AuditRecord> = self
            .audits
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        audits.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        audits.truncate(limit);
        Ok(audits)
    }
}
