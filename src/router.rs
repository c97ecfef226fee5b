//! Database routing for the data-access layer.

use crate::classification::{self, Classification};
use crate::context::TenantContext;
use crate::error::TenancyError;
use crate::registry::{DatabaseHandle, DatabaseRegistry, CENTRAL_DATABASE};
use crate::tenant::TenantId;
use std::sync::Arc;
use std::time::Duration;

/// One side of a relationship being persisted.
#[derive(Clone, Copy, Debug)]
pub struct RecordRef<'a> {
    pub kind: &'a str,
    pub tenant: Option<&'a TenantId>,
}

impl<'a> RecordRef<'a> {
    pub fn new(kind: &'a str, tenant: Option<&'a TenantId>) -> Self {
        RecordRef { kind, tenant }
    }
}

#[derive(Clone)]
pub struct TenantRouter {
    registry: Arc<DatabaseRegistry>,
    resolve_timeout: Duration,
}

impl TenantRouter {
    pub fn new(registry: Arc<DatabaseRegistry>, resolve_timeout: Duration) -> Self {
        TenantRouter {
            registry,
            resolve_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<DatabaseRegistry> {
        &self.registry
    }

    /// Database for an operation on `kind`. Shared kinds always go to the central database;
    /// tenant-scoped kinds require a tenant and never fall back to it.
    pub async fn resolve(
        &self,
        kind: &str,
        tenant: Option<&TenantId>,
    ) -> Result<Arc<DatabaseHandle>, TenancyError> {
        match classification::classify(kind)? {
            Classification::Shared => Ok(self.registry.central().clone()),
            Classification::TenantScoped => {
                let tenant = tenant.ok_or_else(|| TenancyError::AmbiguousTenant {
                    entity: kind.to_string(),
                })?;
                let handle = self.tenant_handle(tenant).await?;
                tracing::debug!(entity = kind, tenant = %tenant, database = %handle.name(), "routed");
                Ok(handle)
            }
        }
    }

    /// [`TenantRouter::resolve`] with the tenant taken from the request's [`TenantContext`].
    pub async fn resolve_current(&self, kind: &str) -> Result<Arc<DatabaseHandle>, TenancyError> {
        let tenant = TenantContext::get();
        self.resolve(kind, tenant.as_ref()).await
    }

    /// Registered handle for `tenant`, running discovery once on a miss. The discovery path
    /// is bounded by the resolution deadline.
    pub async fn tenant_handle(&self, tenant: &TenantId) -> Result<Arc<DatabaseHandle>, TenancyError> {
        let handle = match self.registry.get(tenant) {
            Ok(handle) => handle,
            Err(TenancyError::UnknownTenant(_)) => {
                tracing::debug!(tenant = %tenant, "tenant not registered, running discovery");
                match tokio::time::timeout(self.resolve_timeout, self.registry.discover()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => tracing::warn!(tenant = %tenant, error = %e, "discovery on miss failed"),
                    Err(_) => {
                        return Err(TenancyError::Timeout {
                            operation: "tenant discovery",
                            after: self.resolve_timeout,
                        })
                    }
                }
                self.registry.get(tenant)?
            }
            Err(e) => return Err(e),
        };
        if !handle.is_available() {
            return Err(TenancyError::TenantUnavailable(tenant.to_string()));
        }
        Ok(handle)
    }

    /// Whether two records may reference each other. Both shared, both in the same tenant
    /// database, or a whitelisted tenant-to-shared pair whose tenant side resolves.
    pub async fn allow_relation(&self, a: RecordRef<'_>, b: RecordRef<'_>) -> Result<(), TenancyError> {
        let class_a = classification::classify(a.kind)?;
        let class_b = classification::classify(b.kind)?;
        let illegal = || TenancyError::IllegalCrossTenantRelation {
            from: describe(a),
            to: describe(b),
        };

        match (class_a, class_b) {
            (Classification::Shared, Classification::Shared) => Ok(()),
            (Classification::TenantScoped, Classification::TenantScoped) => {
                let db_a = self.resolve(a.kind, a.tenant).await?;
                let db_b = self.resolve(b.kind, b.tenant).await?;
                if db_a.name() == db_b.name() {
                    Ok(())
                } else {
                    Err(illegal())
                }
            }
            _ => {
                let scoped = if class_a == Classification::TenantScoped { a } else { b };
                self.resolve(scoped.kind, scoped.tenant).await?;
                if classification::is_whitelisted_relation(a.kind, b.kind) {
                    Ok(())
                } else {
                    Err(illegal())
                }
            }
        }
    }

    /// Relation check for two kinds within one tenant.
    pub async fn resolve_relation(
        &self,
        kind_a: &str,
        kind_b: &str,
        tenant: Option<&TenantId>,
    ) -> Result<(), TenancyError> {
        self.allow_relation(RecordRef::new(kind_a, tenant), RecordRef::new(kind_b, tenant))
            .await
    }
}

/// Whether tables for `kind` belong in the database named `database`.
pub fn allow_migrate(kind: &str, database: &str) -> Result<bool, TenancyError> {
    let is_central = database == CENTRAL_DATABASE;
    Ok(match classification::classify(kind)? {
        Classification::Shared => is_central,
        Classification::TenantScoped => !is_central,
    })
}

fn describe(record: RecordRef<'_>) -> String {
    match record.tenant {
        Some(t) => format!("{}@{}", record.kind, t),
        None => record.kind.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    async fn router(dir: &std::path::Path) -> TenantRouter {
        let settings = Settings::rooted_at(dir);
        let registry = Arc::new(DatabaseRegistry::open(&settings).await.unwrap());
        TenantRouter::new(registry, settings.resolve_timeout)
    }

    fn tenant(id: &str) -> TenantId {
        TenantId::new(id).unwrap()
    }

    #[test]
    fn migrate_rules_follow_classification() {
        assert!(allow_migrate("Account", CENTRAL_DATABASE).unwrap());
        assert!(!allow_migrate("Account", "db_acme").unwrap());
        assert!(allow_migrate("Patient", "db_acme").unwrap());
        assert!(!allow_migrate("Patient", CENTRAL_DATABASE).unwrap());
        assert!(allow_migrate("Gadget", "db_acme").is_err());
    }

    #[tokio::test]
    async fn unavailable_handle_is_not_routed() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path()).await;
        let acme = tenant("acme");
        let handle = router
            .registry()
            .register(&acme, router.registry().config_for(&acme).creating())
            .await
            .unwrap();
        handle.mark_unavailable();

        assert_eq!(
            router.resolve("Patient", Some(&acme)).await.unwrap_err(),
            TenancyError::TenantUnavailable("acme".into())
        );
        assert_eq!(router.resolve("Account", Some(&acme)).await.unwrap().name(), CENTRAL_DATABASE);
    }

    #[tokio::test]
    async fn resolve_current_reads_the_request_scope() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path()).await;
        let acme = tenant("acme");
        router
            .registry()
            .register(&acme, router.registry().config_for(&acme).creating())
            .await
            .unwrap();

        let name = TenantContext::scope(Some(acme.clone()), async {
            router.resolve_current("Invoice").await.map(|h| h.name().to_string())
        })
        .await
        .unwrap();
        assert_eq!(name, "db_acme");

        let shared = TenantContext::scope(Some(acme), TenantContext::with_shared(async {
            router.resolve_current("Invoice").await
        }))
        .await;
        assert!(matches!(shared, Err(TenancyError::AmbiguousTenant { .. })));
    }

    #[tokio::test]
    async fn whitelisted_pair_crosses_databases_either_way() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path()).await;
        let acme = tenant("acme");
        router
            .registry()
            .register(&acme, router.registry().config_for(&acme).creating())
            .await
            .unwrap();

        let staff = RecordRef::new("StaffMember", Some(&acme));
        let account = RecordRef::new("Account", None);
        router.allow_relation(staff, account).await.unwrap();
        router.allow_relation(account, staff).await.unwrap();

        let patient = RecordRef::new("Patient", Some(&acme));
        assert!(matches!(
            router.allow_relation(patient, account).await,
            Err(TenancyError::IllegalCrossTenantRelation { .. })
        ));
    }
}
