use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::models::ScopeIds;

/// One metered backend call. Immutable once saved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub request_id: String,
    /// UTC capture time; stamped at recording when left unset
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scope: ScopeIds,
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub tokens_in: u64,
    #[serde(default)]
    pub tokens_out: u64,
    /// Derived from the pricing table when recorded as zero
    #[serde(default)]
    pub cost_usd: f64,
    #[serde(default)]
    pub request_type: String,
    #[serde(default)]
    pub cached: bool,
}

/// Dimensions usage is rolled up against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AggregateScope {
    Provider,
    Model,
    Organization,
    Team,
    Agent,
    User,
    Workflow,
}

/// Roll-up granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AggregatePeriod {
    Hourly,
    Daily,
    Monthly,
}

/// Additive roll-up row. Upserts are additive on the conflict key
/// `(scope, scope_id, period, period_start, org_id, tenant_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageAggregate {
    pub scope: AggregateScope,
    pub scope_id: String,
    pub period: AggregatePeriod,
    pub period_start: DateTime<Utc>,
    pub total_cost: f64,
    pub total_tokens_in: u64,
    pub total_tokens_out: u64,
    pub request_count: u64,
    #[serde(default)]
    pub org_id: String,
    #[serde(default)]
    pub tenant_id: String,
}

impl UsageAggregate {
    /// Conflict key for additive upserts
    pub fn key(&self) -> AggregateKey {
        AggregateKey {
            scope: self.scope,
            scope_id: self.scope_id.clone(),
            period: self.period,
            period_start: self.period_start,
            org_id: self.org_id.clone(),
            tenant_id: self.tenant_id.clone(),
        }
    }

    /// Fold another aggregate with the same key into this one
    pub fn merge(&mut self, other: &UsageAggregate) {
        self.total_cost += other.total_cost;
        self.total_tokens_in += other.total_tokens_in;
        self.total_tokens_out += other.total_tokens_out;
        self.request_count += other.request_count;
    }
}

/// Unique aggregate identity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AggregateKey {
    pub scope: AggregateScope,
    pub scope_id: String,
    pub period: AggregatePeriod,
    pub period_start: DateTime<Utc>,
    pub org_id: String,
    pub tenant_id: String,
}
