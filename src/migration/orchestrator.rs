//! Per-tenant schema state machine:
//! `Unprovisioned → BootstrapPending → DomainMigrationPending → Current`.
//!
//! Runs are administrative and carry no request deadline. Runs for one tenant are serialized;
//! runs for different tenants proceed independently.

use super::apply::apply_module;
use super::catalog::{MigrationCatalog, BOOTSTRAP_MODULE};
use super::records::{self, Applied};
use super::{drift, MigrationReport, ModuleMigrations, ModuleReport, SchemaState};
use crate::context::TenantContext;
use crate::error::{AppError, ConfigError, TenancyError};
use crate::registry::{DatabaseHandle, DatabaseRegistry};
use crate::router::allow_migrate;
use crate::tenant::TenantId;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Serialize)]
pub struct TenantStatus {
    pub tenant: TenantId,
    pub database: String,
    pub registered: bool,
    /// `None` when the database exists but could not be inspected.
    pub state: Option<SchemaState>,
    pub last_migration: Option<String>,
    pub applied_at: Option<NaiveDateTime>,
    pub reachable: bool,
}

/// Outcome of one tenant within [`MigrationOrchestrator::ensure_all_schemas`].
#[derive(Debug, Serialize)]
pub struct TenantRun {
    pub tenant: TenantId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<MigrationReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct MigrationOrchestrator {
    registry: Arc<DatabaseRegistry>,
    catalog: MigrationCatalog,
    probe_timeout: Duration,
    locks: parking_lot::Mutex<HashMap<TenantId, Arc<tokio::sync::Mutex<()>>>>,
}

impl MigrationOrchestrator {
    pub fn new(
        registry: Arc<DatabaseRegistry>,
        catalog: MigrationCatalog,
        probe_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        catalog.validate()?;
        Ok(MigrationOrchestrator {
            registry,
            catalog,
            probe_timeout,
            locks: parking_lot::Mutex::new(HashMap::new()),
        })
    }

    pub fn catalog(&self) -> &MigrationCatalog {
        &self.catalog
    }

    fn tenant_lock(&self, tenant: &TenantId) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.lock().entry(tenant.clone()).or_default().clone()
    }

    /// Bring `tenant` to the current schema, provisioning its database when none exists.
    /// A failed bootstrap is returned as an error; module failures are in the report.
    pub async fn ensure_schema(&self, tenant: &TenantId) -> Result<MigrationReport, TenancyError> {
        let modules: Vec<ModuleMigrations> = self.catalog.modules.clone();
        self.run(tenant, &modules).await
    }

    /// Re-run only the named modules (typically the failed ones of an earlier report).
    pub async fn ensure_modules(&self, tenant: &TenantId, names: &[String]) -> Result<MigrationReport, AppError> {
        let mut modules = Vec::with_capacity(names.len());
        for module in &self.catalog.modules {
            if names.iter().any(|n| n == module.module) {
                modules.push(*module);
            }
        }
        if let Some(unknown) = names.iter().find(|n| self.catalog.module(n).is_none()) {
            return Err(AppError::BadRequest(format!("unknown migration module: {}", unknown)));
        }
        Ok(self.run(tenant, &modules).await?)
    }

    /// Discover tenants, then migrate each one. One tenant's failure does not stop the rest.
    pub async fn ensure_all_schemas(&self) -> Result<Vec<TenantRun>, AppError> {
        self.registry.discover().await?;
        let mut runs = Vec::new();
        for tenant in self.registry.tenant_ids() {
            let run = match self.ensure_schema(&tenant).await {
                Ok(report) => TenantRun {
                    tenant,
                    report: Some(report),
                    error: None,
                },
                Err(e) => TenantRun {
                    tenant,
                    report: None,
                    error: Some(e.to_string()),
                },
            };
            runs.push(run);
        }
        Ok(runs)
    }

    async fn run(&self, tenant: &TenantId, modules: &[ModuleMigrations]) -> Result<MigrationReport, TenancyError> {
        let lock = self.tenant_lock(tenant);
        let _guard = lock.lock().await;

        let (handle, provisioned) = self.provision(tenant).await?;
        let pool = handle.pool();
        let bootstrap_failed = |reason: String| {
            tracing::error!(tenant = %tenant, reason = %reason, "bootstrap failed");
            TenancyError::BootstrapFailed {
                tenant: tenant.to_string(),
                reason,
            }
        };

        let applied = records::load_applied(pool)
            .await
            .map_err(|e| bootstrap_failed(e.to_string()))?;
        let initial_state = if provisioned {
            SchemaState::Unprovisioned
        } else {
            records::state_of(&applied, &self.catalog)
        };

        let bootstrap = apply_module(pool, BOOTSTRAP_MODULE, self.catalog.bootstrap, &applied)
            .await
            .map_err(|(_, reason)| bootstrap_failed(reason))?;

        let (dropped_artifacts, drift_error) = match drift::repair(pool, &self.catalog.legacy).await {
            Ok(dropped) => (dropped, None),
            Err(e) => {
                tracing::warn!(tenant = %tenant, error = %e, "drift repair failed");
                (Vec::new(), Some(e.to_string()))
            }
        };

        let mut reports = Vec::with_capacity(modules.len());
        for module in modules {
            reports.push(self.migrate_module(tenant, &handle, module, &applied).await);
        }

        let final_state = records::load_applied(pool)
            .await
            .map(|applied| records::state_of(&applied, &self.catalog))
            .unwrap_or(SchemaState::DomainMigrationPending);

        let report = MigrationReport {
            tenant: tenant.clone(),
            database: handle.name().to_string(),
            initial_state,
            final_state,
            bootstrap_applied: bootstrap.applied,
            dropped_artifacts,
            drift_error,
            modules: reports,
        };
        tracing::info!(
            tenant = %tenant,
            from = ?report.initial_state,
            to = ?report.final_state,
            failed = report.failed_modules().len(),
            "schema run finished"
        );
        Ok(report)
    }

    async fn migrate_module(
        &self,
        tenant: &TenantId,
        handle: &DatabaseHandle,
        module: &ModuleMigrations,
        applied: &Applied,
    ) -> ModuleReport {
        let mut report = ModuleReport {
            module: module.module.to_string(),
            ..ModuleReport::default()
        };
        for entity in module.entities {
            match allow_migrate(entity, handle.name()) {
                Ok(true) => {}
                Ok(false) => {
                    report.error = Some(format!("{} tables do not belong in {}", entity, handle.name()));
                    return report;
                }
                Err(e) => {
                    report.error = Some(e.to_string());
                    return report;
                }
            }
        }
        match apply_module(handle.pool(), module.module, module.migrations, applied).await {
            Ok(outcome) => {
                report.applied = outcome.applied;
                report.already_applied = outcome.already_applied;
            }
            Err((outcome, reason)) => {
                tracing::warn!(tenant = %tenant, module = module.module, reason = %reason, "module migration failed, continuing");
                report.applied = outcome.applied;
                report.already_applied = outcome.already_applied;
                report.error = Some(reason);
            }
        }
        report
    }

    /// Existing handle, or a newly registered one. The flag is true when the database file
    /// had to be created. Runs against the shared context: no tenant exists yet to route to.
    async fn provision(&self, tenant: &TenantId) -> Result<(Arc<DatabaseHandle>, bool), TenancyError> {
        if let Ok(handle) = self.registry.get(tenant) {
            return Ok((handle, false));
        }
        let config = self.registry.config_for(tenant);
        let exists = tokio::fs::try_exists(&config.path).await.unwrap_or(false);
        let config = if exists { config } else { config.creating() };

        let handle = TenantContext::with_shared(self.registry.register(tenant, config))
            .await
            .map_err(|e| TenancyError::BootstrapFailed {
                tenant: tenant.to_string(),
                reason: e.to_string(),
            })?;
        if !exists {
            tracing::info!(tenant = %tenant, database = %handle.name(), "provisioned tenant database");
        }
        Ok((handle, !exists))
    }

    pub async fn schema_state(&self, tenant: &TenantId) -> Result<SchemaState, TenancyError> {
        let handle = match self.registry.get(tenant) {
            Ok(handle) => handle,
            Err(e) => {
                let path = self.registry.config_for(tenant).path;
                if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    return Err(e);
                }
                return Ok(SchemaState::Unprovisioned);
            }
        };
        let applied = records::load_applied(handle.pool())
            .await
            .map_err(|_| TenancyError::TenantUnavailable(tenant.to_string()))?;
        Ok(records::state_of(&applied, &self.catalog))
    }

    /// Read-only status for dashboards. Never registers or creates anything.
    pub async fn describe(&self, tenant: &TenantId) -> TenantStatus {
        let mut status = TenantStatus {
            tenant: tenant.clone(),
            database: tenant.database_name(),
            registered: false,
            state: None,
            last_migration: None,
            applied_at: None,
            reachable: false,
        };
        let handle = match self.registry.get(tenant) {
            Ok(handle) => handle,
            Err(_) => {
                let path = self.registry.config_for(tenant).path;
                if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    status.state = Some(SchemaState::Unprovisioned);
                }
                return status;
            }
        };
        status.registered = true;
        status.reachable = handle.probe(self.probe_timeout).await.is_ok();
        if !status.reachable {
            return status;
        }
        if let Ok(applied) = records::load_applied(handle.pool()).await {
            status.state = Some(records::state_of(&applied, &self.catalog));
        }
        if let Ok(Some((name, at))) = records::last_applied(handle.pool()).await {
            status.last_migration = Some(name);
            status.applied_at = Some(at);
        }
        status
    }
}
