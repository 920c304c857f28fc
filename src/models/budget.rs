use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Dimension costs are summed against for budget enforcement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BudgetScope {
    Organization,
    Team,
    Agent,
    Workflow,
    User,
}

/// Accounting window for a budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BudgetPeriod {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

/// Enforcement choice when usage meets or exceeds the limit
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OnExceedAction {
    #[default]
    Warn,
    Block,
    Downgrade,
}

/// Default alert thresholds, in percent of the limit
pub fn default_alert_thresholds() -> Vec<u32> {
    vec![50, 80, 100]
}

/// Spend limit applied to a scope over a rolling calendar period
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Budget {
    /// Caller-assigned identifier, unique within a tenant
    pub id: String,
    pub name: String,
    pub scope: BudgetScope,
    /// Target entity within the scope; `None` means the whole scope
    pub scope_id: Option<String>,
    pub limit_usd: f64,
    pub period: BudgetPeriod,
    #[serde(default)]
    pub on_exceed: OnExceedAction,
    #[serde(default = "default_alert_thresholds")]
    pub alert_thresholds: Vec<u32>,
    #[serde(default = "default_budget_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub org_id: String,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_budget_enabled() -> bool {
    true
}

/// Alert classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AlertType {
    ThresholdReached,
    BudgetExceeded,
    BudgetBlocked,
}

/// Emitted when usage crosses a budget threshold. Immutable once
/// created, except for the acknowledgement fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetAlert {
    pub id: Uuid,
    pub budget_id: String,
    pub threshold: u32,
    pub percentage_reached: f64,
    pub amount_usd: f64,
    pub alert_type: AlertType,
    pub message: String,
    #[serde(default)]
    pub acknowledged: bool,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a pre-dispatch budget consultation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetDecision {
    pub allowed: bool,
    pub action: Option<OnExceedAction>,
    pub budget_id: Option<String>,
    pub message: Option<String>,
}

impl BudgetDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            action: None,
            budget_id: None,
            message: None,
        }
    }
}

/// Point-in-time accounting view of one budget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetStatus {
    pub budget: Budget,
    pub used_usd: f64,
    pub remaining_usd: f64,
    pub percentage: f64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub is_exceeded: bool,
    pub is_blocked: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_on_exceed_default_is_warn() {
        assert_eq!(OnExceedAction::default(), OnExceedAction::Warn);
    }

    #[test]
    fn test_budget_deserialization_defaults() {
        let json = r#"{
            "id": "b-1",
            "name": "Org monthly",
            "scope": "organization",
            "scope_id": "org-1",
            "limit_usd": 100.0,
            "period": "monthly"
        }"#;
        let budget: Budget = serde_json::from_str(json).unwrap();
        assert_eq!(budget.on_exceed, OnExceedAction::Warn);
        assert_eq!(budget.alert_thresholds, vec![50, 80, 100]);
        assert!(budget.enabled);
    }

    #[test]
    fn test_scope_parse() {
        assert_eq!(
            "organization".parse::<BudgetScope>().unwrap(),
            BudgetScope::Organization
        );
        assert!("galaxy".parse::<BudgetScope>().is_err());
    }
}
