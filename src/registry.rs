//! Tenant database registry: one handle (pool + immutable config + liveness flag) per tenant.
//!
//! The map is read-mostly. Each tenant owns a `OnceCell` slot, so concurrent registrations of
//! the same tenant share one initialisation and no map lock is held while a pool connects.

use crate::config::{DiscoverySource, Settings};
use crate::error::{AppError, TenancyError};
use crate::store;
use crate::tenant::TenantId;
use parking_lot::RwLock;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

/// Name of the central database handle.
pub const CENTRAL_DATABASE: &str = "default";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection configuration snapshot for one physical database.
#[derive(Clone, Debug, Serialize)]
pub struct DatabaseConfig {
    pub name: String,
    pub path: PathBuf,
    pub max_connections: u32,
    /// Create the file when it does not exist. Off for discovery so a vanished file is reported
    /// instead of silently recreated empty.
    pub create_if_missing: bool,
    #[serde(skip)]
    pub acquire_timeout: Duration,
}

impl DatabaseConfig {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        DatabaseConfig {
            name: name.into(),
            path: path.into(),
            max_connections: crate::config::DEFAULT_MAX_CONNECTIONS,
            create_if_missing: false,
            acquire_timeout: Duration::from_secs(5),
        }
    }

    pub fn creating(mut self) -> Self {
        self.create_if_missing = true;
        self
    }

    fn connect_options(&self) -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(self.create_if_missing)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true)
    }

    async fn connect(&self) -> Result<SqlitePool, sqlx::Error> {
        if self.create_if_missing {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let pool = SqlitePoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
            .connect_with(self.connect_options())
            .await?;
        if let Err(e) = sqlx::query("SELECT 1").execute(&pool).await {
            pool.close().await;
            return Err(e);
        }
        Ok(pool)
    }
}

/// One physical database. Owned by the registry; callers hold `Arc`s.
#[derive(Debug)]
pub struct DatabaseHandle {
    config: DatabaseConfig,
    pool: SqlitePool,
    available: AtomicBool,
}

impl DatabaseHandle {
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    pub fn mark_unavailable(&self) {
        if self.available.swap(false, Ordering::AcqRel) {
            tracing::warn!(database = %self.name(), "database marked unavailable");
        }
    }

    pub fn mark_available(&self) {
        self.available.store(true, Ordering::Release);
    }

    /// Ping the database within `deadline`. A failed ping clears the liveness flag; a
    /// successful one sets it. A timeout leaves the flag as it was.
    pub async fn probe(&self, deadline: Duration) -> Result<(), TenancyError> {
        match tokio::time::timeout(deadline, sqlx::query("SELECT 1").execute(&self.pool)).await {
            Ok(Ok(_)) => {
                self.mark_available();
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::warn!(database = %self.name(), error = %e, "liveness probe failed");
                self.mark_unavailable();
                Err(TenancyError::TenantUnavailable(self.name().to_string()))
            }
            Err(_) => Err(TenancyError::Timeout {
                operation: "liveness probe",
                after: deadline,
            }),
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct DiscoveryReport {
    /// Newly registered tenants.
    pub registered: Vec<TenantId>,
    /// Tenants that were already registered.
    pub already_known: Vec<TenantId>,
    pub failed: Vec<DiscoveryFailure>,
}

#[derive(Debug, Serialize)]
pub struct DiscoveryFailure {
    pub tenant: TenantId,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct DeregisterOutcome {
    pub tenant: TenantId,
    pub registry_row_removed: bool,
    pub storage_purged: bool,
}

type Slot = Arc<OnceCell<Arc<DatabaseHandle>>>;

pub struct DatabaseRegistry {
    central: Arc<DatabaseHandle>,
    data_dir: PathBuf,
    discovery: DiscoverySource,
    max_connections: u32,
    acquire_timeout: Duration,
    tenants: RwLock<HashMap<TenantId, Slot>>,
}

impl DatabaseRegistry {
    /// Open the central database (creating it and its tables when missing) and an empty
    /// tenant map. Call [`DatabaseRegistry::discover`] to recover provisioned tenants.
    pub async fn open(settings: &Settings) -> Result<Self, AppError> {
        let central_config = DatabaseConfig {
            name: CENTRAL_DATABASE.to_string(),
            path: settings.central_database.clone(),
            max_connections: settings.max_connections,
            create_if_missing: true,
            acquire_timeout: settings.resolve_timeout.max(Duration::from_secs(1)),
        };
        let pool = central_config.connect().await?;
        store::ensure_sys_tables(&pool).await?;
        tokio::fs::create_dir_all(&settings.data_dir).await?;
        tracing::info!(
            central = %settings.central_database.display(),
            data_dir = %settings.data_dir.display(),
            "database registry opened"
        );

        Ok(DatabaseRegistry {
            central: Arc::new(DatabaseHandle {
                config: central_config,
                pool,
                available: AtomicBool::new(true),
            }),
            data_dir: settings.data_dir.clone(),
            discovery: settings.discovery,
            max_connections: settings.max_connections,
            acquire_timeout: settings.resolve_timeout.max(Duration::from_secs(1)),
            tenants: RwLock::new(HashMap::new()),
        })
    }

    pub fn central(&self) -> &Arc<DatabaseHandle> {
        &self.central
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn discovery_source(&self) -> DiscoverySource {
        self.discovery
    }

    /// Deterministic configuration for a tenant under the data directory. Does not create.
    pub fn config_for(&self, tenant: &TenantId) -> DatabaseConfig {
        DatabaseConfig {
            name: tenant.database_name(),
            path: self.data_dir.join(tenant.file_name()),
            max_connections: self.max_connections,
            create_if_missing: false,
            acquire_timeout: self.acquire_timeout,
        }
    }

    /// Add a handle for `tenant`. A no-op returning the existing handle when already
    /// registered. On failure nothing is left behind.
    pub async fn register(
        &self,
        tenant: &TenantId,
        config: DatabaseConfig,
    ) -> Result<Arc<DatabaseHandle>, TenancyError> {
        let existing = self.tenants.read().get(tenant).cloned();
        let slot = match existing {
            Some(slot) => slot,
            None => self
                .tenants
                .write()
                .entry(tenant.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone(),
        };

        let result = slot
            .get_or_try_init(|| self.open_handle(tenant, config))
            .await
            .cloned();

        match result {
            Ok(handle) => self.confirm_registered(tenant, &slot, handle).await,
            Err(e) => {
                let mut map = self.tenants.write();
                let stale = map
                    .get(tenant)
                    .map(|current| Arc::ptr_eq(current, &slot) && current.get().is_none())
                    .unwrap_or(false);
                if stale {
                    map.remove(tenant);
                }
                Err(e)
            }
        }
    }

    /// The slot may have been dropped from the map while its handle was opening (a concurrent
    /// deregistration or clear). Such a handle is closed rather than handed out untracked.
    async fn confirm_registered(
        &self,
        tenant: &TenantId,
        slot: &Slot,
        handle: Arc<DatabaseHandle>,
    ) -> Result<Arc<DatabaseHandle>, TenancyError> {
        let current = self.tenants.read().get(tenant).cloned();
        if let Some(current) = &current {
            if Arc::ptr_eq(current, slot) {
                return Ok(handle);
            }
        }

        tracing::warn!(tenant = %tenant, "tenant removed while its database was opening, closing it");
        handle.mark_unavailable();
        handle.pool().close().await;
        if current.is_none() {
            if let Err(e) = store::delete_tenant_row(self.central.pool(), tenant).await {
                tracing::warn!(tenant = %tenant, error = %e, "could not drop registry row of removed tenant");
            }
        }
        Err(TenancyError::UnknownTenant(tenant.to_string()))
    }

    async fn open_handle(
        &self,
        tenant: &TenantId,
        config: DatabaseConfig,
    ) -> Result<Arc<DatabaseHandle>, TenancyError> {
        let unreachable = |reason: String| TenancyError::Unreachable {
            tenant: tenant.to_string(),
            reason,
        };
        let pool = config.connect().await.map_err(|e| unreachable(e.to_string()))?;
        if let Err(e) = store::upsert_tenant_row(self.central.pool(), tenant, &config.path).await {
            pool.close().await;
            return Err(unreachable(format!("recording tenant row: {}", e)));
        }
        tracing::info!(tenant = %tenant, database = %config.name, path = %config.path.display(), "tenant database registered");
        Ok(Arc::new(DatabaseHandle {
            config,
            pool,
            available: AtomicBool::new(true),
        }))
    }

    pub fn get(&self, tenant: &TenantId) -> Result<Arc<DatabaseHandle>, TenancyError> {
        self.tenants
            .read()
            .get(tenant)
            .and_then(|slot| slot.get().cloned())
            .ok_or_else(|| TenancyError::UnknownTenant(tenant.to_string()))
    }

    pub fn contains(&self, tenant: &TenantId) -> bool {
        self.get(tenant).is_ok()
    }

    /// Registered tenants in sorted order.
    pub fn tenant_ids(&self) -> Vec<TenantId> {
        let mut ids: Vec<TenantId> = self
            .tenants
            .read()
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.tenants.read().values().filter(|slot| slot.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register every tenant found in the durable source. Individual failures are reported,
    /// not fatal.
    pub async fn discover(&self) -> Result<DiscoveryReport, AppError> {
        let found: Vec<(TenantId, DatabaseConfig)> = match self.discovery {
            DiscoverySource::Directory => self
                .scan_data_dir()
                .await?
                .into_iter()
                .map(|id| {
                    let config = self.config_for(&id);
                    (id, config)
                })
                .collect(),
            DiscoverySource::RegistryTable => store::list_tenant_rows(self.central.pool())
                .await?
                .into_iter()
                .map(|(id, path)| {
                    let mut config = self.config_for(&id);
                    config.path = path;
                    (id, config)
                })
                .collect(),
        };

        let mut report = DiscoveryReport::default();
        for (tenant, config) in found {
            if self.contains(&tenant) {
                report.already_known.push(tenant);
                continue;
            }
            match self.register(&tenant, config).await {
                Ok(_) => report.registered.push(tenant),
                Err(e) => {
                    tracing::warn!(tenant = %tenant, error = %e, "discovered tenant could not be registered");
                    report.failed.push(DiscoveryFailure {
                        tenant,
                        reason: e.to_string(),
                    });
                }
            }
        }
        tracing::info!(
            registered = report.registered.len(),
            already_known = report.already_known.len(),
            failed = report.failed.len(),
            source = ?self.discovery,
            "tenant discovery finished"
        );
        Ok(report)
    }

    async fn scan_data_dir(&self) -> Result<Vec<TenantId>, AppError> {
        let mut entries = match tokio::fs::read_dir(&self.data_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(id) = entry.file_name().to_str().and_then(TenantId::from_file_name) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Close the tenant's pool, drop the handle and its registry row, and delete the database
    /// files when `purge` is set. Administrative use only.
    pub async fn deregister(&self, tenant: &TenantId, purge: bool) -> Result<DeregisterOutcome, AppError> {
        let slot = self.tenants.write().remove(tenant);
        let handle = slot
            .and_then(|slot| slot.get().cloned())
            .ok_or_else(|| TenancyError::UnknownTenant(tenant.to_string()))?;
        handle.mark_unavailable();
        handle.pool().close().await;

        let registry_row_removed = store::delete_tenant_row(self.central.pool(), tenant).await?;
        let mut storage_purged = false;
        if purge {
            remove_database_files(&handle.config().path).await?;
            storage_purged = true;
        }
        tracing::info!(tenant = %tenant, purge, "tenant database deregistered");
        Ok(DeregisterOutcome {
            tenant: tenant.clone(),
            registry_row_removed,
            storage_purged,
        })
    }

    /// Drop every in-memory tenant handle, closing pools. Storage and registry rows are kept,
    /// so a following [`DatabaseRegistry::discover`] restores the same set.
    pub async fn clear(&self) {
        let drained: Vec<Slot> = self.tenants.write().drain().map(|(_, slot)| slot).collect();
        for slot in drained {
            if let Some(handle) = slot.get() {
                handle.pool().close().await;
            }
        }
    }

    pub async fn close(&self) {
        self.clear().await;
        self.central.pool().close().await;
    }
}

async fn remove_database_files(path: &Path) -> Result<(), AppError> {
    let mut candidates = vec![path.to_path_buf()];
    for suffix in ["-wal", "-shm"] {
        let mut companion = path.as_os_str().to_owned();
        companion.push(suffix);
        candidates.push(PathBuf::from(companion));
    }
    for candidate in candidates {
        match tokio::fs::remove_file(&candidate).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn registry(dir: &Path) -> DatabaseRegistry {
        DatabaseRegistry::open(&Settings::rooted_at(dir)).await.unwrap()
    }

    fn tenant(id: &str) -> TenantId {
        TenantId::new(id).unwrap()
    }

    #[tokio::test]
    async fn register_twice_yields_one_handle() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path()).await;
        let acme = tenant("acme");

        let first = registry.register(&acme, registry.config_for(&acme).creating()).await.unwrap();
        let second = registry.register(&acme, registry.config_for(&acme).creating()).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
        assert_eq!(first.name(), "db_acme");
        assert!(dir.path().join("tenants/db_acme.sqlite3").exists());
    }

    #[tokio::test]
    async fn missing_file_without_create_is_unreachable_and_not_registered() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path()).await;
        let ghost = tenant("ghost");

        let err = registry.register(&ghost, registry.config_for(&ghost)).await.unwrap_err();
        assert!(matches!(err, TenancyError::Unreachable { .. }));
        assert!(!registry.contains(&ghost));
        assert!(registry.tenants.read().is_empty());
        assert!(store::list_tenant_rows(registry.central().pool()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_does_not_create() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path()).await;
        assert_eq!(
            registry.get(&tenant("acme")).unwrap_err(),
            TenancyError::UnknownTenant("acme".into())
        );
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn deregister_with_purge_removes_storage() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path()).await;
        let acme = tenant("acme");
        registry.register(&acme, registry.config_for(&acme).creating()).await.unwrap();

        let outcome = registry.deregister(&acme, true).await.unwrap();
        assert!(outcome.registry_row_removed);
        assert!(outcome.storage_purged);
        assert!(!registry.contains(&acme));
        assert!(!dir.path().join("tenants/db_acme.sqlite3").exists());

        let report = registry.discover().await.unwrap();
        assert!(report.registered.is_empty());
    }

    #[tokio::test]
    async fn deregister_unknown_tenant_fails() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path()).await;
        let err = registry.deregister(&tenant("ghost"), false).await.unwrap_err();
        assert!(matches!(err, AppError::Tenancy(TenancyError::UnknownTenant(_))));
    }

    #[tokio::test]
    async fn liveness_check_marks_handle_available() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path()).await;
        let acme = tenant("acme");
        let handle = registry.register(&acme, registry.config_for(&acme).creating()).await.unwrap();
        handle.mark_unavailable();
        assert!(!handle.is_available());
        handle.probe(Duration::from_secs(1)).await.unwrap();
        assert!(handle.is_available());
    }

    #[tokio::test]
    async fn handle_opened_after_deregistration_is_closed() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path()).await;
        let acme = tenant("acme");

        // a registration whose slot is removed before its handle finishes opening
        let slot: Slot = Arc::new(OnceCell::new());
        registry.tenants.write().insert(acme.clone(), slot.clone());
        let handle = slot
            .get_or_try_init(|| registry.open_handle(&acme, registry.config_for(&acme).creating()))
            .await
            .unwrap()
            .clone();
        registry.tenants.write().remove(&acme);

        let err = registry.confirm_registered(&acme, &slot, handle.clone()).await.unwrap_err();
        assert_eq!(err, TenancyError::UnknownTenant("acme".into()));
        assert!(!handle.is_available());
        assert!(handle.pool().is_closed());
        assert!(!registry.contains(&acme));
        assert!(store::list_tenant_rows(registry.central().pool()).await.unwrap().is_empty());

        // a fresh registration afterwards is unaffected
        let again = registry.register(&acme, registry.config_for(&acme)).await.unwrap();
        assert!(!Arc::ptr_eq(&again, &handle));
        assert!(again.is_available());
    }

    #[tokio::test]
    async fn discovery_ignores_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path()).await;
        std::fs::write(dir.path().join("tenants/notes.txt"), b"hello").unwrap();
        std::fs::create_dir(dir.path().join("tenants/db_folder.sqlite3")).unwrap();

        let report = registry.discover().await.unwrap();
        assert!(report.registered.is_empty());
        assert!(report.failed.is_empty());
    }
}
