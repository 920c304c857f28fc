use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::{Display, EnumString};

/// Severity attached to rules and violations
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Sensitive data categories recognized by DLP scanning
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DataType {
    Ssn,
    CreditCard,
    Phone,
    Email,
    ApiKey,
    MedicalRecord,
    BankAccount,
    IpAddress,
}

impl DataType {
    /// Permissions that authorize reading this data type unredacted
    pub fn authorizing_permissions(&self) -> &'static [&'static str] {
        match self {
            DataType::Ssn => &["read_ssn", "read_pii"],
            DataType::CreditCard => &["read_financial", "read_pii"],
            DataType::MedicalRecord => &["read_medical", "admin"],
            _ => &["read_pii", "admin"],
        }
    }
}

/// Condition vocabulary for security policies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConditionType {
    UserRole,
    UserDepartment,
    QueryPattern,
    DataType,
    TimeWindow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    NotIn,
    Matches,
}

/// Action vocabulary for security policies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActionType {
    Block,
    Redact,
    Audit,
    Alert,
    RequireApproval,
}

/// A single policy condition. All conditions on a policy must hold for
/// the policy to trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyCondition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub operator: ConditionOperator,
    pub value: String,
}

/// A single policy action, executed once when the policy triggers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyAction {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

/// Role/context security policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityPolicy {
    pub id: String,
    pub name: String,
    /// Evaluation order: higher priority policies run first
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub conditions: Vec<PolicyCondition>,
    pub actions: Vec<PolicyAction>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

/// Data-loss-prevention rule with its pattern compiled at load time
#[derive(Debug, Clone)]
pub struct DlpRule {
    pub id: String,
    pub data_type: DataType,
    pub pattern: Regex,
    pub severity: Severity,
    pub redact_token: String,
    pub enabled: bool,
}

/// Blocked-query rule with its pattern compiled at load time
#[derive(Debug, Clone)]
pub struct BlockedQueryRule {
    pub id: String,
    pub pattern: Regex,
    pub reason: String,
    pub severity: Severity,
    pub enabled: bool,
}

/// Classification of a violation entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ViolationType {
    BlockedQuery,
    PolicyViolation,
    DlpDetection,
}

/// One rule/policy trigger recorded during evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    #[serde(rename = "type")]
    pub violation_type: ViolationType,
    pub rule_id: String,
    pub severity: Severity,
    pub message: String,
    /// Matched fragments, where applicable (DLP detections)
    #[serde(default)]
    pub matches: Vec<String>,
}

/// Result of evaluating a query against the full rule set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyEvaluation {
    pub allowed: bool,
    pub blocked_by: Vec<String>,
    pub violations: Vec<Violation>,
    pub redaction_required: bool,
    pub approval_required: bool,
}

/// A single DLP hit found by a scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlpMatch {
    pub rule_id: String,
    pub data_type: DataType,
    pub severity: Severity,
    pub matches: Vec<String>,
}
