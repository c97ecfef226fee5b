//! Clinic tenancy: database-per-tenant routing for a multi-tenant clinic backend.
//!
//! Shared entities live in one central SQLite database; every tenant owns a separate database
//! file. Requests carry an active tenant (see [`middleware::tenant_context`]) and data access
//! asks [`TenantRouter`] for the right database. [`MigrationOrchestrator`] provisions and
//! migrates tenant databases.

pub mod classification;
pub mod config;
pub mod context;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod migration;
pub mod registry;
pub mod response;
pub mod router;
pub mod routes;
pub mod state;
pub mod store;
pub mod tenant;

pub use classification::{classify, Classification, EntityKind};
pub use config::{DiscoverySource, Environment, Settings};
pub use context::TenantContext;
pub use error::{AppError, ConfigError, TenancyError};
pub use extractors::{ActiveTenant, Caller};
pub use middleware::{AccountTenantLookup, AssignedTenantLookup, TenantResolver};
pub use migration::{MigrationCatalog, MigrationOrchestrator, MigrationReport, SchemaState};
pub use registry::{DatabaseConfig, DatabaseHandle, DatabaseRegistry, CENTRAL_DATABASE};
pub use router::{allow_migrate, RecordRef, TenantRouter};
pub use routes::{admin_routes, common_routes, record_routes};
pub use state::AppState;
pub use tenant::TenantId;
