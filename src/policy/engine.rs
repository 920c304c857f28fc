use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::metrics;
use crate::models::{
    ActionType, DataType, DlpMatch, PolicyEvaluation, SecurityPolicy, Severity, UserContext,
    Violation, ViolationType,
};
use crate::policy::conditions::{condition_holds, ConditionContext};
use crate::policy::rules::RuleSet;

/// Priority-ordered rule evaluator spanning blocked-query detection,
/// security policies and DLP scanning.
///
/// Holds an immutable `RuleSet` snapshot behind a read-write lock; the
/// lock is only taken long enough to clone the `Arc`, never across
/// evaluation.
pub struct PolicyEngine {
    rules: RwLock<Arc<RuleSet>>,
    tenant_tz: Tz,
}

impl PolicyEngine {
    /// Engine with the built-in rule set and no security policies
    pub fn new(tenant_tz: Tz) -> Self {
        Self {
            rules: RwLock::new(Arc::new(RuleSet::empty())),
            tenant_tz,
        }
    }

    /// Engine with the built-in rule set plus the given policies
    pub fn with_policies(policies: Vec<SecurityPolicy>, tenant_tz: Tz) -> Self {
        Self {
            rules: RwLock::new(Arc::new(RuleSet::new(policies))),
            tenant_tz,
        }
    }

    /// Swap in a freshly compiled snapshot (config reload)
    pub fn reload_policies(&self, policies: Vec<SecurityPolicy>) {
        let snapshot = Arc::new(RuleSet::new(policies));
        *self.rules.write() = snapshot;
        tracing::info!("Policy rule set reloaded");
    }

    fn snapshot(&self) -> Arc<RuleSet> {
        self.rules.read().clone()
    }

    /// Evaluate a query against blocked queries, security policies and
    /// DLP rules, in that order. Blocked queries short-circuit; the
    /// later phases always run so audit capture is complete.
    pub fn evaluate_query(
        &self,
        user: &UserContext,
        query: &str,
        request_type: &str,
    ) -> PolicyEvaluation {
        self.evaluate_query_at(user, query, request_type, Utc::now())
    }

    /// Evaluation with an explicit clock, for deterministic time-window
    /// behavior in tests
    pub fn evaluate_query_at(
        &self,
        user: &UserContext,
        query: &str,
        request_type: &str,
        now: DateTime<Utc>,
    ) -> PolicyEvaluation {
        let rules = self.snapshot();
        let query_lower = query.to_lowercase();

        let mut result = PolicyEvaluation {
            allowed: true,
            ..Default::default()
        };

        // Phase 1: blocked queries. First match wins and stops all
        // further work, including DLP scanning of the raw query.
        for rule in rules.blocked_queries.iter().filter(|r| r.enabled) {
            if rule.pattern.is_match(&query_lower) {
                result.allowed = false;
                result.blocked_by.push(rule.id.clone());
                result.violations.push(Violation {
                    violation_type: ViolationType::BlockedQuery,
                    rule_id: rule.id.clone(),
                    severity: rule.severity,
                    message: rule.reason.clone(),
                    matches: Vec::new(),
                });

                metrics::POLICY_BLOCKS_TOTAL
                    .with_label_values(&["blocked_query"])
                    .inc();
                tracing::warn!(
                    user_id = %user.id,
                    rule_id = %rule.id,
                    request_type = request_type,
                    "Query blocked"
                );
                return result;
            }
        }

        // One DLP scan serves phase 2 `data_type = pii` conditions and
        // the phase 3 violations.
        let dlp_matches = Self::scan_with(&rules, query);

        // Phase 2: security policies, highest priority first
        let ctx = ConditionContext {
            user,
            query_lower: &query_lower,
            dlp_hit: !dlp_matches.is_empty(),
            now,
            tenant_tz: self.tenant_tz,
            patterns: &rules.condition_patterns,
        };

        for policy in rules.policies.iter().filter(|p| p.enabled) {
            let triggered = policy.conditions.iter().all(|c| condition_holds(c, &ctx));
            if !triggered {
                continue;
            }

            for action in &policy.actions {
                match action.action_type {
                    ActionType::Block => {
                        result.allowed = false;
                        result.blocked_by.push(policy.id.clone());
                        metrics::POLICY_BLOCKS_TOTAL
                            .with_label_values(&["security_policy"])
                            .inc();
                    }
                    ActionType::Redact => result.redaction_required = true,
                    ActionType::RequireApproval => result.approval_required = true,
                    ActionType::Audit => {
                        // Marker for the caller; the pipeline audits anyway
                    }
                    ActionType::Alert => {
                        metrics::POLICY_ALERTS_TOTAL.inc();
                        tracing::warn!(
                            policy_id = %policy.id,
                            user_id = %user.id,
                            "Policy alert triggered"
                        );
                    }
                }
            }

            result.violations.push(Violation {
                violation_type: ViolationType::PolicyViolation,
                rule_id: policy.id.clone(),
                severity: Severity::Medium,
                message: format!("Policy '{}' triggered", policy.name),
                matches: Vec::new(),
            });
        }

        // Phase 3: DLP detections flag redaction but never block
        for hit in dlp_matches {
            result.redaction_required = true;
            metrics::DLP_DETECTIONS_TOTAL
                .with_label_values(&[&hit.data_type.to_string()])
                .inc();
            result.violations.push(Violation {
                violation_type: ViolationType::DlpDetection,
                rule_id: hit.rule_id,
                severity: hit.severity,
                message: format!("{} detected in query", hit.data_type),
                matches: hit.matches,
            });
        }

        result
    }

    /// Run every enabled DLP rule against a text without replacing
    /// anything
    pub fn scan(&self, text: &str) -> Vec<DlpMatch> {
        Self::scan_with(&self.snapshot(), text)
    }

    fn scan_with(rules: &RuleSet, text: &str) -> Vec<DlpMatch> {
        let mut hits = Vec::new();
        for rule in rules.dlp_rules.iter().filter(|r| r.enabled) {
            let matches: Vec<String> = rule
                .pattern
                .find_iter(text)
                .map(|m| m.as_str().to_string())
                .collect();
            if !matches.is_empty() {
                hits.push(DlpMatch {
                    rule_id: rule.id.clone(),
                    data_type: rule.data_type,
                    severity: rule.severity,
                    matches,
                });
            }
        }
        hits
    }

    /// Replace sensitive fields the user is not cleared to read.
    /// Detected types are always reported, replaced or not. Applying
    /// the redaction twice yields the same output.
    pub fn redact_sensitive_data(&self, text: &str, user: &UserContext) -> (String, Vec<DataType>) {
        let rules = self.snapshot();
        let mut redacted = text.to_string();
        let mut detected = Vec::new();

        for rule in rules.dlp_rules.iter().filter(|r| r.enabled) {
            if !rule.pattern.is_match(&redacted) {
                continue;
            }
            if !detected.contains(&rule.data_type) {
                detected.push(rule.data_type);
            }
            if !user.has_any_permission(rule.data_type.authorizing_permissions()) {
                redacted = rule
                    .pattern
                    .replace_all(&redacted, rule.redact_token.as_str())
                    .into_owned();
            }
        }

        (redacted, detected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ConditionOperator, ConditionType, PolicyAction, PolicyCondition,
    };
    use std::collections::HashSet;

    fn agent_user() -> UserContext {
        UserContext {
            id: "u-1".to_string(),
            email: "agent@example.com".to_string(),
            role: "agent".to_string(),
            region: "us-east-1".to_string(),
            department: "support".to_string(),
            permissions: HashSet::new(),
        }
    }

    fn policy(id: &str, conditions: Vec<PolicyCondition>, actions: Vec<ActionType>) -> SecurityPolicy {
        SecurityPolicy {
            id: id.to_string(),
            name: id.to_string(),
            priority: 0,
            enabled: true,
            conditions,
            actions: actions
                .into_iter()
                .map(|action_type| PolicyAction {
                    action_type,
                    parameters: Default::default(),
                })
                .collect(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_blocked_query_short_circuits() {
        let engine = PolicyEngine::new(chrono_tz::UTC);
        let result = engine.evaluate_query(
            &agent_user(),
            "SELECT * FROM customers; DROP TABLE users",
            "nl_to_sql",
        );

        assert!(!result.allowed);
        assert_eq!(result.blocked_by, vec!["drop_table_prevention"]);
        assert_eq!(result.violations.len(), 1);
        assert_eq!(
            result.violations[0].violation_type,
            ViolationType::BlockedQuery
        );
        // Short circuit: no DLP phase ran
        assert!(!result.redaction_required);
    }

    #[test]
    fn test_clean_query_is_allowed() {
        let engine = PolicyEngine::new(chrono_tz::UTC);
        let result = engine.evaluate_query(&agent_user(), "Show open tickets", "chat");

        assert!(result.allowed);
        assert!(result.blocked_by.is_empty());
        assert!(result.violations.is_empty());
        assert!(!result.redaction_required);
        assert!(!result.approval_required);
    }

    #[test]
    fn test_dlp_detection_flags_redaction_without_blocking() {
        let engine = PolicyEngine::new(chrono_tz::UTC);
        let result = engine.evaluate_query(
            &agent_user(),
            "Find customer with SSN 123-45-6789",
            "chat",
        );

        assert!(result.allowed);
        assert!(result.redaction_required);
        assert_eq!(result.violations.len(), 1);
        assert_eq!(
            result.violations[0].violation_type,
            ViolationType::DlpDetection
        );
        assert_eq!(result.violations[0].matches, vec!["123-45-6789"]);
    }

    #[test]
    fn test_policy_block_and_approval_actions() {
        let blocking = policy(
            "agent-lockout",
            vec![PolicyCondition {
                condition_type: ConditionType::UserRole,
                operator: ConditionOperator::Equals,
                value: "agent".to_string(),
            }],
            vec![ActionType::Block, ActionType::Audit],
        );
        let approval = policy(
            "billing-approval",
            vec![PolicyCondition {
                condition_type: ConditionType::DataType,
                operator: ConditionOperator::Equals,
                value: "financial".to_string(),
            }],
            vec![ActionType::RequireApproval],
        );

        let engine = PolicyEngine::with_policies(vec![blocking, approval], chrono_tz::UTC);
        let result = engine.evaluate_query(&agent_user(), "show billing history", "chat");

        assert!(!result.allowed);
        assert_eq!(result.blocked_by, vec!["agent-lockout"]);
        assert!(result.approval_required);
        // Both policies triggered, one violation each
        assert_eq!(result.violations.len(), 2);
    }

    #[test]
    fn test_all_conditions_must_hold() {
        let p = policy(
            "managers-after-hours",
            vec![
                PolicyCondition {
                    condition_type: ConditionType::UserRole,
                    operator: ConditionOperator::Equals,
                    value: "manager".to_string(),
                },
                PolicyCondition {
                    condition_type: ConditionType::DataType,
                    operator: ConditionOperator::Equals,
                    value: "financial".to_string(),
                },
            ],
            vec![ActionType::Block],
        );

        let engine = PolicyEngine::with_policies(vec![p], chrono_tz::UTC);
        // Role matches but data type does not: policy must not trigger
        let mut user = agent_user();
        user.role = "manager".to_string();
        let result = engine.evaluate_query(&user, "show open tickets", "chat");
        assert!(result.allowed);
        assert!(result.violations.is_empty());
    }

    #[test]
    fn test_policies_run_even_after_policy_block() {
        // A block from an earlier policy must not stop later phases
        let first = policy(
            "block-agents",
            vec![PolicyCondition {
                condition_type: ConditionType::UserRole,
                operator: ConditionOperator::Equals,
                value: "agent".to_string(),
            }],
            vec![ActionType::Block],
        );
        let engine = PolicyEngine::with_policies(vec![first], chrono_tz::UTC);
        let result =
            engine.evaluate_query(&agent_user(), "email jane.doe@example.com please", "chat");

        assert!(!result.allowed);
        // DLP phase still ran and captured the email detection
        assert!(result.redaction_required);
        assert!(result
            .violations
            .iter()
            .any(|v| v.violation_type == ViolationType::DlpDetection));
    }

    #[test]
    fn test_redaction_permission_gating() {
        let engine = PolicyEngine::new(chrono_tz::UTC);
        let text = "SSN 123-45-6789 card 4111 1111 1111 1111";

        // No permissions: everything is replaced
        let (redacted, detected) = engine.redact_sensitive_data(text, &agent_user());
        assert!(redacted.contains("[REDACTED_SSN]"));
        assert!(redacted.contains("[REDACTED_CC]"));
        assert!(detected.contains(&DataType::Ssn));
        assert!(detected.contains(&DataType::CreditCard));

        // read_financial clears cards but not SSNs
        let mut cleared = agent_user();
        cleared.permissions.insert("read_financial".to_string());
        let (redacted, detected) = engine.redact_sensitive_data(text, &cleared);
        assert!(redacted.contains("[REDACTED_SSN]"));
        assert!(redacted.contains("4111 1111 1111 1111"));
        // Detection is recorded whether or not replacement happened
        assert!(detected.contains(&DataType::CreditCard));
    }

    #[test]
    fn test_redaction_is_idempotent() {
        let engine = PolicyEngine::new(chrono_tz::UTC);
        let text = "Reach me at 555-123-4567 or jane@example.com";

        let (once, _) = engine.redact_sensitive_data(text, &agent_user());
        let (twice, _) = engine.redact_sensitive_data(&once, &agent_user());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_reload_swaps_snapshot() {
        let engine = PolicyEngine::new(chrono_tz::UTC);
        assert!(engine
            .evaluate_query(&agent_user(), "show open tickets", "chat")
            .allowed);

        engine.reload_policies(vec![policy(
            "block-all-agents",
            vec![PolicyCondition {
                condition_type: ConditionType::UserRole,
                operator: ConditionOperator::Equals,
                value: "agent".to_string(),
            }],
            vec![ActionType::Block],
        )]);

        assert!(!engine
            .evaluate_query(&agent_user(), "show open tickets", "chat")
            .allowed);
    }
}
