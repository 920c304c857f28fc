pub mod conditions;
pub mod engine;
pub mod rules;

pub use engine::PolicyEngine;
pub use rules::{default_blocked_query_rules, default_dlp_rules, RuleSet};
