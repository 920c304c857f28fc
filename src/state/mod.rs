pub mod factory;
pub mod memory;

pub use factory::{create_in_memory_store, create_store, StoreHandles};
pub use memory::InMemoryStore;

use crate::error::Result;
use crate::models::{
    AggregatePeriod, AggregateScope, AuditRecord, Budget, BudgetAlert, BudgetScope, UsageAggregate,
    UsageRecord,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Trait for budget storage operations
#[async_trait]
pub trait BudgetStore: Send + Sync {
    /// Create a budget; fails with `Conflict` when the id already exists
    /// within the tenant partition
    async fn create_budget(&self, budget: &Budget) -> Result<()>;

    /// Get a budget by id within a tenant partition
    async fn get_budget(&self, tenant_id: &str, id: &str) -> Result<Option<Budget>>;

    /// Replace an existing budget
    async fn update_budget(&self, budget: &Budget) -> Result<()>;

    /// Delete a budget
    async fn delete_budget(&self, tenant_id: &str, id: &str) -> Result<()>;

    /// List budgets matching a filter
    async fn list_budgets(&self, filter: &BudgetFilter) -> Result<Vec<Budget>>;

    /// Enabled budgets targeting `(scope, scope_id)` within the
    /// `(org_id, tenant_id)` partition
    async fn budgets_for_scope(
        &self,
        scope: BudgetScope,
        scope_id: &str,
        org_id: &str,
        tenant_id: &str,
    ) -> Result<Vec<Budget>>;
}

/// Trait for usage record and aggregate storage
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Persist a usage record. Records are immutable once saved.
    async fn save_record(&self, record: &UsageRecord) -> Result<()>;

    /// List records matching a filter, newest first
    async fn list_records(
        &self,
        filter: &UsageFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<UsageRecord>>;

    /// Totals over all records matching a filter
    async fn summarize(&self, filter: &UsageFilter) -> Result<UsageSummary>;

    /// Sum of `cost_usd` for records whose scope column matches
    /// `scope_id` within the partition and `[from, to)` window
    async fn sum_cost(
        &self,
        scope: BudgetScope,
        scope_id: &str,
        org_id: &str,
        tenant_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<f64>;

    /// Additive upsert on the aggregate conflict key. Must be a single
    /// atomic operation: partial aggregate writes are not acceptable.
    async fn upsert_aggregate(&self, aggregate: &UsageAggregate) -> Result<()>;

    /// Aggregates for a scope/period, newest period first
    async fn list_aggregates(
        &self,
        scope: AggregateScope,
        period: AggregatePeriod,
        org_id: &str,
        tenant_id: &str,
    ) -> Result<Vec<UsageAggregate>>;
}

/// Trait for budget alert storage
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Persist an alert
    async fn save_alert(&self, alert: &BudgetAlert) -> Result<()>;

    /// Alerts for a budget, newest first
    async fn list_alerts(&self, budget_id: &str, limit: usize) -> Result<Vec<BudgetAlert>>;

    /// Find an alert for `(budget_id, threshold)` created at or after
    /// `since`. Used for exactly-once emission across restarts.
    async fn find_since(
        &self,
        budget_id: &str,
        threshold: u32,
        since: DateTime<Utc>,
    ) -> Result<Option<BudgetAlert>>;

    /// Mark an alert acknowledged
    async fn acknowledge_alert(&self, id: &Uuid, acknowledged_by: &str) -> Result<BudgetAlert>;
}

/// Trait for audit log storage
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append one audit row
    async fn save_audit(&self, record: &AuditRecord) -> Result<()>;

    /// Recent audit rows, newest first
    async fn list_audits(&self, limit: usize) -> Result<Vec<AuditRecord>>;
}

/// Filter for querying budgets
#[derive(Debug, Clone, Default)]
pub struct BudgetFilter {
    pub org_id: Option<String>,
    pub tenant_id: Option<String>,
    pub scope: Option<BudgetScope>,
    pub enabled_only: bool,
}

/// Filter for querying usage records
#[derive(Debug, Clone, Default)]
pub struct UsageFilter {
    pub org_id: Option<String>,
    pub tenant_id: Option<String>,
    pub team_id: Option<String>,
    pub agent_id: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Totals over a set of usage records
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct UsageSummary {
    pub total_cost: f64,
    pub total_tokens_in: u64,
    pub total_tokens_out: u64,
    pub request_count: u64,
}

/// Column of a usage record a budget scope sums against
pub fn scope_column(scope: BudgetScope, record: &UsageRecord) -> &str {
    match scope {
        BudgetScope::Organization => &record.scope.org_id,
        BudgetScope::Team => &record.scope.team_id,
        BudgetScope::Agent => &record.scope.agent_id,
        BudgetScope::Workflow => &record.scope.workflow_id,
        BudgetScope::User => &record.scope.user_id,
    }
}
