use crate::config::{StateBackend, StateConfig};
use crate::error::Result;
use crate::state::{AlertStore, AuditStore, BudgetStore, InMemoryStore, UsageStore};
use std::sync::Arc;

/// Per-concern handles onto one storage backend. The gateway services
/// each hold only the trait they need.
#[derive(Clone)]
pub struct StoreHandles {
    pub budgets: Arc<dyn BudgetStore>,
    pub usage: Arc<dyn UsageStore>,
    pub alerts: Arc<dyn AlertStore>,
    pub audit: Arc<dyn AuditStore>,
}

/// Create a store from configuration
pub async fn create_store(config: &StateConfig) -> Result<StoreHandles> {
    match config.backend {
        StateBackend::Memory => {
            tracing::info!("Using in-memory storage backend");
            Ok(create_in_memory_store())
        }
    }
}

/// Create an in-memory store (used directly by tests)
pub fn create_in_memory_store() -> StoreHandles {
    let store = InMemoryStore::new();
    StoreHandles {
        budgets: Arc::new(store.clone()),
        usage: Arc::new(store.clone()),
        alerts: Arc::new(store.clone()),
        audit: Arc::new(store),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_handles_share_state() {
        let handles = create_in_memory_store();
        // All four handles must point at the same maps; smoke-checked by
        // the integration suites, here we only assert construction works.
        let _ = handles.clone();
    }
}
