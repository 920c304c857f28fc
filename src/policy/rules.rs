use regex::Regex;
use std::collections::HashMap;

use crate::models::{
    BlockedQueryRule, DataType, DlpRule, PolicyCondition, SecurityPolicy, Severity,
};

/// Immutable snapshot of every compiled rule. Built once at load and
/// swapped atomically on reload; evaluation never compiles a pattern.
#[derive(Debug)]
pub struct RuleSet {
    pub blocked_queries: Vec<BlockedQueryRule>,
    pub dlp_rules: Vec<DlpRule>,
    pub policies: Vec<SecurityPolicy>,
    /// Regexes referenced by `query_pattern` / `matches` conditions,
    /// keyed by the raw pattern string. Patterns that failed to compile
    /// are absent; the owning condition then evaluates false.
    pub condition_patterns: HashMap<String, Regex>,
}

impl RuleSet {
    /// Build a snapshot from the built-in rules and the given policies
    pub fn new(mut policies: Vec<SecurityPolicy>) -> Self {
        // Higher-priority policies evaluate first; insertion order breaks ties
        policies.sort_by(|a, b| b.priority.cmp(&a.priority));

        let condition_patterns = compile_condition_patterns(&policies);

        Self {
            blocked_queries: default_blocked_query_rules(),
            dlp_rules: default_dlp_rules(),
            policies,
            condition_patterns,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

fn compile_condition_patterns(policies: &[SecurityPolicy]) -> HashMap<String, Regex> {
    let mut compiled = HashMap::new();
    for policy in policies {
        for condition in &policy.conditions {
            if needs_regex(condition) && !compiled.contains_key(&condition.value) {
                match Regex::new(&condition.value) {
                    Ok(regex) => {
                        compiled.insert(condition.value.clone(), regex);
                    }
                    Err(err) => {
                        tracing::warn!(
                            policy_id = %policy.id,
                            pattern = %condition.value,
                            error = %err,
                            "Skipping malformed condition pattern"
                        );
                    }
                }
            }
        }
    }
    compiled
}

fn needs_regex(condition: &PolicyCondition) -> bool {
    use crate::models::{ConditionOperator, ConditionType};
    condition.condition_type == ConditionType::QueryPattern
        || condition.operator == ConditionOperator::Matches
}

fn blocked(id: &str, pattern: &str, reason: &str, severity: Severity) -> BlockedQueryRule {
    BlockedQueryRule {
        id: id.to_string(),
        pattern: Regex::new(pattern).expect("built-in blocked-query pattern"),
        reason: reason.to_string(),
        severity,
        enabled: true,
    }
}

/// Built-in blocked-query rules. Tested against the lowercased query in
/// order; the first match wins.
pub fn default_blocked_query_rules() -> Vec<BlockedQueryRule> {
    vec![
        blocked(
            "drop_table_prevention",
            r"\bdrop\s+table\b",
            "DROP TABLE statements are not permitted",
            Severity::Critical,
        ),
        blocked(
            "truncate_table_prevention",
            r"\btruncate\s+(table\s+)?\w+",
            "TRUNCATE statements are not permitted",
            Severity::Critical,
        ),
        blocked(
            "unbounded_delete_prevention",
            r"\bdelete\s+from\s+[\w.]+\s*(;|$)",
            "DELETE without a WHERE clause is not permitted",
            Severity::Critical,
        ),
        blocked(
            "schema_mutation_prevention",
            r"\balter\s+(table|database|schema)\b",
            "Schema mutation is not permitted",
            Severity::High,
        ),
        blocked(
            "privilege_change_prevention",
            r"\b(grant|revoke)\s+",
            "Privilege changes are not permitted",
            Severity::High,
        ),
        blocked(
            "system_schema_access",
            r"\b(information_schema|pg_catalog|pg_shadow|mysql\.user)\b",
            "System schema access is not permitted",
            Severity::High,
        ),
        blocked(
            "sql_injection_pattern",
            r"('\s*or\s+'?1'?\s*=\s*'?1|\bunion\s+select\b|;\s*--)",
            "Query matches a known SQL-injection pattern",
            Severity::Critical,
        ),
        blocked(
            "bulk_extraction_pattern",
            r"^select\s+\*\s+from\s+[\w.]+\s*;?\s*$",
            "Unfiltered bulk extraction is not permitted",
            Severity::Medium,
        ),
    ]
}

fn dlp(
    id: &str,
    data_type: DataType,
    pattern: &str,
    severity: Severity,
    redact_token: &str,
) -> DlpRule {
    DlpRule {
        id: id.to_string(),
        data_type,
        pattern: Regex::new(pattern).expect("built-in DLP pattern"),
        severity,
        redact_token: redact_token.to_string(),
        enabled: true,
    }
}

/// Built-in DLP rules, one per recognized data type
pub fn default_dlp_rules() -> Vec<DlpRule> {
    vec![
        dlp(
            "dlp_ssn",
            DataType::Ssn,
            r"\b\d{3}-\d{2}-\d{4}\b",
            Severity::Critical,
            "[REDACTED_SSN]",
        ),
        dlp(
            "dlp_credit_card",
            DataType::CreditCard,
            r"\b\d{4}[- ]?\d{4}[- ]?\d{4}[- ]?\d{4}\b",
            Severity::Critical,
            "[REDACTED_CC]",
        ),
        dlp(
            "dlp_phone",
            DataType::Phone,
            r"\b\d{3}[-.]\d{3}[-.]\d{4}\b",
            Severity::Medium,
            "[REDACTED_PHONE]",
        ),
        dlp(
            "dlp_email",
            DataType::Email,
            r"(?i)[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}",
            Severity::Medium,
            "[REDACTED_EMAIL]",
        ),
        dlp(
            "dlp_api_key",
            DataType::ApiKey,
            r"(?i)\b(?:sk|pk|api|key)[-_][a-z0-9]{16,}\b",
            Severity::High,
            "[REDACTED_API_KEY]",
        ),
        dlp(
            "dlp_medical_record",
            DataType::MedicalRecord,
            r"(?i)\bmrn[-:\s]?\d{6,10}\b",
            Severity::High,
            "[REDACTED_MRN]",
        ),
        dlp(
            "dlp_bank_account",
            DataType::BankAccount,
            r"(?i)\b(?:acct|account)\s*[#:]?\s*\d{6,17}\b",
            Severity::High,
            "[REDACTED_ACCOUNT]",
        ),
        dlp(
            "dlp_ip_address",
            DataType::IpAddress,
            r"\b(?:\d{1,3}\.){3}\d{1,3}\b",
            Severity::Low,
            "[REDACTED_IP]",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionType, ConditionOperator, ConditionType, PolicyAction};

    #[test]
    fn test_blocked_rules_match_dangerous_ddl() {
        let rules = default_blocked_query_rules();
        let matches = |query: &str| -> Option<String> {
            let lowered = query.to_lowercase();
            rules
                .iter()
                .find(|rule| rule.enabled && rule.pattern.is_match(&lowered))
                .map(|rule| rule.id.clone())
        };

        assert_eq!(
            matches("SELECT * FROM customers; DROP TABLE users").as_deref(),
            Some("drop_table_prevention")
        );
        assert_eq!(
            matches("TRUNCATE TABLE orders").as_deref(),
            Some("truncate_table_prevention")
        );
        assert_eq!(
            matches("DELETE FROM accounts").as_deref(),
            Some("unbounded_delete_prevention")
        );
        assert_eq!(
            matches("GRANT ALL ON db.* TO 'x'").as_deref(),
            Some("privilege_change_prevention")
        );
        assert_eq!(
            matches("SELECT * FROM information_schema.tables WHERE 1").as_deref(),
            Some("system_schema_access")
        );
        assert_eq!(
            matches("SELECT name FROM users WHERE id = '1' OR '1'='1'").as_deref(),
            Some("sql_injection_pattern")
        );
        assert_eq!(
            matches("SELECT * FROM customers").as_deref(),
            Some("bulk_extraction_pattern")
        );
        assert_eq!(matches("DELETE FROM accounts WHERE id = 4"), None);
        assert_eq!(matches("Show open tickets"), None);
    }

    #[test]
    fn test_dlp_rules_detect_and_are_distinct() {
        let rules = default_dlp_rules();
        let rule_for = |dt: DataType| rules.iter().find(|r| r.data_type == dt).unwrap();

        assert!(rule_for(DataType::Ssn).pattern.is_match("123-45-6789"));
        assert!(!rule_for(DataType::Ssn).pattern.is_match("555-123-4567"));
        assert!(rule_for(DataType::Phone).pattern.is_match("555-123-4567"));
        assert!(rule_for(DataType::CreditCard)
            .pattern
            .is_match("4111 1111 1111 1111"));
        assert!(rule_for(DataType::Email)
            .pattern
            .is_match("jane.doe@example.com"));
        assert!(rule_for(DataType::ApiKey)
            .pattern
            .is_match("sk-abcdef0123456789abcdef"));
        assert!(rule_for(DataType::IpAddress).pattern.is_match("10.0.0.13"));
    }

    #[test]
    fn test_ruleset_sorts_policies_by_priority() {
        let make = |id: &str, priority: i32| SecurityPolicy {
            id: id.to_string(),
            name: id.to_string(),
            priority,
            enabled: true,
            conditions: vec![],
            actions: vec![PolicyAction {
                action_type: ActionType::Audit,
                parameters: Default::default(),
            }],
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };

        let rules = RuleSet::new(vec![make("low", 1), make("high", 10), make("mid", 5)]);
        let order: Vec<&str> = rules.policies.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(order, vec!["high", "mid", "low"]);
    }

    #[test]
    fn test_malformed_condition_pattern_is_skipped() {
        let policy = SecurityPolicy {
            id: "bad-regex".to_string(),
            name: "bad".to_string(),
            priority: 0,
            enabled: true,
            conditions: vec![PolicyCondition {
                condition_type: ConditionType::QueryPattern,
                operator: ConditionOperator::Matches,
                value: "([unclosed".to_string(),
            }],
            actions: vec![],
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };

        let rules = RuleSet::new(vec![policy]);
        assert!(rules.condition_patterns.is_empty());
    }
}
