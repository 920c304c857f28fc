use crate::models::QueryRequest;

/// Outcome of provider selection
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub provider: String,
    pub reason: String,
}

const PII_KEYWORDS: &[&str] = &["ssn", "credit", "phone", "email"];
const CONFIDENTIAL_KEYWORDS: &[&str] = &["confidential", "internal", "proprietary"];

/// Priority-ordered provider selection; the first matching rule wins.
///
/// 1. EU regions must stay on-premise.
/// 2. Prompts naming PII stay on-premise.
/// 3. Confidential material goes to the safety-aligned provider.
/// 4. Otherwise the role decides.
pub fn select_provider(request: &QueryRequest) -> Selection {
    let prompt_lower = request.prompt.to_lowercase();

    if request.user.region.to_lowercase().starts_with("eu") {
        return Selection {
            provider: "local".to_string(),
            reason: "EU region — regional compliance requires local processing.".to_string(),
        };
    }

    if PII_KEYWORDS.iter().any(|kw| prompt_lower.contains(kw)) {
        return Selection {
            provider: "local".to_string(),
            reason: "PII detected — keeping sensitive data on-premise.".to_string(),
        };
    }

    if CONFIDENTIAL_KEYWORDS
        .iter()
        .any(|kw| prompt_lower.contains(kw))
    {
        return Selection {
            provider: "anthropic".to_string(),
            reason: "Confidential data — using safety-focused provider.".to_string(),
        };
    }

    match request.user.role.as_str() {
        "agent" => Selection {
            provider: "anthropic".to_string(),
            reason: "Agent role — using safety-focused provider.".to_string(),
        },
        "manager" | "admin" => Selection {
            provider: "openai".to_string(),
            reason: "Manager/Admin role — full access to general-purpose provider.".to_string(),
        },
        _ => Selection {
            provider: "anthropic".to_string(),
            reason: "Unknown user — defaulting to safety-focused provider.".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserContext;
    use std::collections::HashMap;

    fn request(prompt: &str, role: &str, region: &str) -> QueryRequest {
        QueryRequest {
            prompt: prompt.to_string(),
            max_tokens: 0,
            temperature: None,
            model: None,
            user: UserContext {
                id: "u-1".to_string(),
                email: "u@example.com".to_string(),
                role: role.to_string(),
                region: region.to_string(),
                department: String::new(),
                permissions: Default::default(),
            },
            context: HashMap::new(),
            scope: Default::default(),
            request_type: "chat".to_string(),
        }
    }

    #[test]
    fn test_manager_routes_to_general_purpose() {
        let selection = select_provider(&request("Show open tickets", "manager", "us-east-1"));
        assert_eq!(selection.provider, "openai");
        assert_eq!(
            selection.reason,
            "Manager/Admin role — full access to general-purpose provider."
        );
    }

    #[test]
    fn test_eu_region_wins_over_everything() {
        // Even a prompt with PII and confidential keywords stays local
        let selection = select_provider(&request(
            "confidential: SSN and credit card data",
            "agent",
            "eu-west-1",
        ));
        assert_eq!(selection.provider, "local");
        assert_eq!(
            selection.reason,
            "EU region — regional compliance requires local processing."
        );

        // Case-insensitive region match
        let selection = select_provider(&request("Show tickets", "manager", "EU-CENTRAL-1"));
        assert_eq!(selection.provider, "local");
    }

    #[test]
    fn test_pii_keywords_route_local() {
        let selection = select_provider(&request(
            "Find customer with SSN 123-45-6789",
            "manager",
            "us-east-1",
        ));
        assert_eq!(selection.provider, "local");
        assert_eq!(
            selection.reason,
            "PII detected — keeping sensitive data on-premise."
        );
    }

    #[test]
    fn test_confidential_keywords_route_safety_aligned() {
        let selection = select_provider(&request(
            "Summarize this internal memo",
            "manager",
            "us-east-1",
        ));
        assert_eq!(selection.provider, "anthropic");
        assert_eq!(
            selection.reason,
            "Confidential data — using safety-focused provider."
        );
    }

    #[test]
    fn test_role_fallthrough() {
        assert_eq!(
            select_provider(&request("hello", "agent", "us-east-1")).provider,
            "anthropic"
        );
        assert_eq!(
            select_provider(&request("hello", "admin", "us-east-1")).provider,
            "openai"
        );

        let unknown = select_provider(&request("hello", "auditor", "us-east-1"));
        assert_eq!(unknown.provider, "anthropic");
        assert_eq!(
            unknown.reason,
            "Unknown user — defaulting to safety-focused provider."
        );
    }
}
