use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use regex::Regex;
use std::collections::HashMap;

use crate::models::{ConditionOperator, ConditionType, PolicyCondition, UserContext};

/// Everything a condition can look at. Built once per evaluation so the
/// DLP scan runs at most once per query.
pub struct ConditionContext<'a> {
    pub user: &'a UserContext,
    pub query_lower: &'a str,
    /// Whether the DLP scan reported at least one match on the query
    pub dlp_hit: bool,
    pub now: DateTime<Utc>,
    pub tenant_tz: Tz,
    pub patterns: &'a HashMap<String, Regex>,
}

/// Evaluate one condition. A condition referencing a pattern that
/// failed to compile evaluates false.
pub fn condition_holds(condition: &PolicyCondition, ctx: &ConditionContext<'_>) -> bool {
    match condition.condition_type {
        ConditionType::UserRole => compare_string(&ctx.user.role, condition, ctx.patterns),
        ConditionType::UserDepartment => {
            compare_string(&ctx.user.department, condition, ctx.patterns)
        }
        ConditionType::QueryPattern => query_pattern_holds(condition, ctx),
        ConditionType::DataType => apply_polarity(condition.operator, data_type_present(condition, ctx)),
        ConditionType::TimeWindow => {
            apply_polarity(condition.operator, in_time_window(&condition.value, ctx))
        }
    }
}

fn compare_string(
    field: &str,
    condition: &PolicyCondition,
    patterns: &HashMap<String, Regex>,
) -> bool {
    match condition.operator {
        ConditionOperator::Equals => field == condition.value,
        ConditionOperator::NotEquals => field != condition.value,
        ConditionOperator::Contains => field.contains(&condition.value),
        ConditionOperator::NotIn => !condition
            .value
            .split(',')
            .map(str::trim)
            .any(|candidate| candidate == field),
        ConditionOperator::Matches => patterns
            .get(&condition.value)
            .map_or(false, |regex| regex.is_match(field)),
    }
}

fn query_pattern_holds(condition: &PolicyCondition, ctx: &ConditionContext<'_>) -> bool {
    match condition.operator {
        ConditionOperator::Equals => ctx.query_lower == condition.value,
        ConditionOperator::NotEquals => ctx.query_lower != condition.value,
        ConditionOperator::Contains => ctx.query_lower.contains(&condition.value),
        ConditionOperator::NotIn => !ctx.query_lower.contains(&condition.value),
        ConditionOperator::Matches => ctx
            .patterns
            .get(&condition.value)
            .map_or(false, |regex| regex.is_match(ctx.query_lower)),
    }
}

/// `pii` defers to the DLP scan; `financial` and `medical` are keyword
/// heuristics over the query text.
fn data_type_present(condition: &PolicyCondition, ctx: &ConditionContext<'_>) -> bool {
    match condition.value.as_str() {
        "pii" => ctx.dlp_hit,
        "financial" => ctx.query_lower.contains("payment") || ctx.query_lower.contains("billing"),
        "medical" => ctx.query_lower.contains("medical") || ctx.query_lower.contains("health"),
        _ => false,
    }
}

/// Negating operators invert the membership test
fn apply_polarity(operator: ConditionOperator, present: bool) -> bool {
    match operator {
        ConditionOperator::NotEquals | ConditionOperator::NotIn => !present,
        _ => present,
    }
}

/// Named time windows, checked in the tenant's local timezone
fn in_time_window(window: &str, ctx: &ConditionContext<'_>) -> bool {
    let local = ctx.now.with_timezone(&ctx.tenant_tz);
    match window {
        "business_hours" => {
            let weekday = matches!(
                local.weekday(),
                Weekday::Mon | Weekday::Tue | Weekday::Wed | Weekday::Thu | Weekday::Fri
            );
            weekday && local.hour() >= 9 && local.hour() < 18
        }
        "weekend" => matches!(local.weekday(), Weekday::Sat | Weekday::Sun),
        _ => false,
    }
}
