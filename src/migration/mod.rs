//! Tenant schema lifecycle: bootstrap tables, drift repair, then domain modules in a fixed order.
//!
//! Every operation is idempotent (`IF NOT EXISTS`, column presence checks), each migration runs
//! in its own transaction, and applied migrations are recorded in `_sys_migrations` inside the
//! tenant database.

pub mod apply;
pub mod catalog;
pub mod drift;
pub mod orchestrator;
pub mod records;

pub use catalog::{MigrationCatalog, BOOTSTRAP_MODULE};
pub use drift::{ArtifactKind, LegacyArtifact};
pub use orchestrator::{MigrationOrchestrator, TenantRun, TenantStatus};

use crate::error::TenancyError;
use crate::tenant::TenantId;
use serde::Serialize;

/// One schema change. Each variant is safe to re-run against a database that already has it.
#[derive(Clone, Copy, Debug)]
pub enum Operation {
    CreateTable {
        table: &'static str,
        columns: &'static str,
    },
    CreateIndex {
        name: &'static str,
        table: &'static str,
        columns: &'static [&'static str],
        unique: bool,
    },
    /// Adds the column only when the table does not have it yet.
    AddColumn {
        table: &'static str,
        column: &'static str,
        definition: &'static str,
    },
    Sql(&'static str),
}

#[derive(Clone, Copy, Debug)]
pub struct Migration {
    pub name: &'static str,
    pub operations: &'static [Operation],
}

/// Migrations of one domain module, applied in declaration order.
#[derive(Clone, Copy, Debug)]
pub struct ModuleMigrations {
    pub module: &'static str,
    /// Entity kinds whose tables this module creates.
    pub entities: &'static [&'static str],
    pub migrations: &'static [Migration],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaState {
    Unprovisioned,
    BootstrapPending,
    DomainMigrationPending,
    Current,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ModuleReport {
    pub module: String,
    pub applied: Vec<String>,
    pub already_applied: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ModuleReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct MigrationReport {
    pub tenant: TenantId,
    pub database: String,
    pub initial_state: SchemaState,
    pub final_state: SchemaState,
    pub bootstrap_applied: Vec<String>,
    pub dropped_artifacts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drift_error: Option<String>,
    pub modules: Vec<ModuleReport>,
}

impl MigrationReport {
    pub fn is_complete(&self) -> bool {
        self.final_state == SchemaState::Current && self.modules.iter().all(ModuleReport::succeeded)
    }

    /// Names of modules to re-run.
    pub fn failed_modules(&self) -> Vec<&str> {
        self.modules
            .iter()
            .filter(|m| !m.succeeded())
            .map(|m| m.module.as_str())
            .collect()
    }

    pub fn failures(&self) -> Vec<TenancyError> {
        self.modules
            .iter()
            .filter_map(|m| {
                m.error.as_ref().map(|reason| TenancyError::ModuleMigrationFailed {
                    module: m.module.clone(),
                    reason: reason.clone(),
                })
            })
            .collect()
    }
}
