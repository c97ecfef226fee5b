//! Shared application state for all routes.

use crate::config::Settings;
use crate::error::AppError;
use crate::middleware::{AccountTenantLookup, AssignedTenantLookup};
use crate::migration::{MigrationCatalog, MigrationOrchestrator};
use crate::registry::DatabaseRegistry;
use crate::router::TenantRouter;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Arc<DatabaseRegistry>,
    pub router: TenantRouter,
    pub orchestrator: Arc<MigrationOrchestrator>,
    pub assignments: Arc<dyn AssignedTenantLookup>,
}

impl AppState {
    /// Open the central database and wire the registry, router and orchestrator with the
    /// clinic migration catalog. Tenants are not discovered here.
    pub async fn initialize(settings: Settings) -> Result<Self, AppError> {
        let registry = Arc::new(DatabaseRegistry::open(&settings).await?);
        let router = TenantRouter::new(registry.clone(), settings.resolve_timeout);
        let orchestrator = Arc::new(MigrationOrchestrator::new(
            registry.clone(),
            MigrationCatalog::clinic(),
            settings.resolve_timeout,
        )?);
        let assignments = Arc::new(AccountTenantLookup::new(registry.central().pool().clone()));
        Ok(AppState {
            settings: Arc::new(settings),
            registry,
            router,
            orchestrator,
            assignments,
        })
    }

    /// Replace the assigned-tenant source (e.g. an external directory service).
    pub fn with_assignments(mut self, assignments: Arc<dyn AssignedTenantLookup>) -> Self {
        self.assignments = assignments;
        self
    }
}
