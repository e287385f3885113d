use std::sync::Arc;

use crate::callback::CallbackReconciler;
use crate::db::Database;
use crate::disbursement::SettlementCoordinator;
use crate::validation::ValidationService;

/// Shared gateway state
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<SettlementCoordinator>,
    pub reconciler: Arc<CallbackReconciler>,
    /// Postgres handle for health checks; `None` with the in-memory store
    pub db: Option<Database>,
}

impl AppState {
    pub fn new(coordinator: Arc<SettlementCoordinator>, db: Option<Database>) -> Self {
        let reconciler = Arc::new(CallbackReconciler::new(coordinator.clone()));
        Self {
            coordinator,
            reconciler,
            db,
        }
    }

    pub fn validation(&self) -> &Arc<ValidationService> {
        self.coordinator.validation()
    }
}
