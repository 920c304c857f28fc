pub mod handlers;
pub mod routes;

pub use routes::build_router;

use crate::cost::CostService;
use crate::policy::PolicyEngine;
use crate::router::LlmRouter;
use crate::state::StoreHandles;
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub policy_engine: Arc<PolicyEngine>,
    pub llm_router: Arc<LlmRouter>,
    pub cost: Arc<CostService>,
    pub stores: StoreHandles,
}

impl AppState {
    pub fn new(
        policy_engine: Arc<PolicyEngine>,
        llm_router: Arc<LlmRouter>,
        cost: Arc<CostService>,
        stores: StoreHandles,
    ) -> Self {
        Self {
            policy_engine,
            llm_router,
            cost,
            stores,
        }
    }
}
