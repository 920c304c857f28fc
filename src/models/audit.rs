use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One audit row per routed or blocked request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub user_id: String,
    pub user_email: String,
    /// For routed calls: `[LLM:<provider>] <prompt>`
    pub query_text: String,
    pub results_count: i64,
    /// De-duplicated data types found across prompt and response
    pub pii_detected: Vec<String>,
    pub pii_redacted: bool,
    pub access_granted: bool,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    /// Audit row for a request that was refused before dispatch
    pub fn denied(user_id: &str, user_email: &str, query_text: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            user_email: user_email.to_string(),
            query_text: query_text.to_string(),
            results_count: 0,
            pii_detected: Vec::new(),
            pii_redacted: false,
            access_granted: false,
            created_at: Utc::now(),
        }
    }
}
