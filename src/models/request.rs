use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use validator::Validate;

/// The authenticated caller attached to every request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserContext {
    /// User identifier
    pub id: String,

    /// Email address
    pub email: String,

    /// Role name. Open vocabulary; the router and policies interpret
    /// `agent`, `manager` and `admin` specially.
    pub role: String,

    /// Deployment region of the caller (e.g. `eu-west-1`)
    #[serde(default)]
    pub region: String,

    /// Organizational department
    #[serde(default)]
    pub department: String,

    /// Granted permission strings (e.g. `read_pii`)
    #[serde(default)]
    pub permissions: HashSet<String>,
}

impl UserContext {
    /// Check whether the user holds any of the given permissions
    pub fn has_any_permission(&self, permissions: &[&str]) -> bool {
        permissions.iter().any(|p| self.permissions.contains(*p))
    }

    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

/// Scope identifiers carried by a request or usage record.
/// Any subset may be empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScopeIds {
    #[serde(default)]
    pub org_id: String,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub team_id: String,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub workflow_id: String,
    #[serde(default)]
    pub user_id: String,
}

/// The unit flowing through the enforcement pipeline
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct QueryRequest {
    /// Prompt text sent to the backend
    #[validate(length(min = 1))]
    pub prompt: String,

    /// Completion token ceiling
    #[serde(default)]
    pub max_tokens: u32,

    /// Sampling temperature. `Some(0.0)` means deterministic sampling
    /// and is sent verbatim; provider defaults apply only when absent.
    #[validate(range(min = 0.0, max = 2.0))]
    pub temperature: Option<f32>,

    /// Optional model override
    pub model: Option<String>,

    /// Calling user
    pub user: UserContext,

    /// Retrieved records and other contextual values, keyed by name
    #[serde(default)]
    pub context: HashMap<String, String>,

    /// Accounting scope
    #[serde(default)]
    pub scope: ScopeIds,

    /// Request classification (e.g. `chat`, `nl_to_sql`)
    #[serde(default = "default_request_type")]
    pub request_type: String,
}

fn default_request_type() -> String {
    "chat".to_string()
}

/// A completed backend call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    /// Provider that actually produced the response (rewritten by the
    /// router when a fallback was used)
    pub provider: String,

    /// Model that served the call
    pub model: String,

    /// Generated text
    pub content: String,

    /// Prompt tokens consumed
    pub tokens_in: u64,

    /// Completion tokens produced
    pub tokens_out: u64,
}
