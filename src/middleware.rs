//! Request middleware: caller identification and active-tenant resolution.
//!
//! `tenant_context` resolves the tenant for a request in priority order:
//!
//! 1. an explicit `X-Tenant-ID` override. Superusers may name any existing tenant; other
//!    callers only their own assigned tenant;
//! 2. the caller's assigned tenant, from [`AssignedTenantLookup`];
//! 3. outside production with `TENANT_DEV_FALLBACK` on, the first known tenant.
//!
//! The result is installed in a fresh [`TenantContext`] scope for the handler and in the
//! request extensions as [`ActiveTenant`]. The scope ends with the handler, whatever the outcome.

use crate::config::Settings;
use crate::context::TenantContext;
use crate::error::{AppError, TenancyError};
use crate::extractors::{ActiveTenant, Caller, TenantOverride, ACCOUNT_ID_HEADER};
use crate::router::TenantRouter;
use crate::state::AppState;
use crate::store;
use crate::tenant::TenantId;
use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use sqlx::SqlitePool;

/// Source of a caller's assigned tenant.
#[async_trait]
pub trait AssignedTenantLookup: Send + Sync {
    async fn assigned_tenant(&self, caller: &Caller) -> Result<Option<TenantId>, AppError>;
}

/// Reads `accounts.tenant_id` from the central database.
pub struct AccountTenantLookup {
    pool: SqlitePool,
}

impl AccountTenantLookup {
    pub fn new(pool: SqlitePool) -> Self {
        AccountTenantLookup { pool }
    }
}

#[async_trait]
impl AssignedTenantLookup for AccountTenantLookup {
    async fn assigned_tenant(&self, caller: &Caller) -> Result<Option<TenantId>, AppError> {
        match store::account_tenant(&self.pool, &caller.account_id).await? {
            Some(raw) => Ok(Some(TenantId::new(raw)?)),
            None => Ok(None),
        }
    }
}

/// The resolution chain, independent of HTTP.
pub struct TenantResolver<'a> {
    pub settings: &'a Settings,
    pub router: &'a TenantRouter,
    pub assignments: &'a dyn AssignedTenantLookup,
}

impl TenantResolver<'_> {
    /// Tenant for a request, bounded by the resolution deadline.
    pub async fn resolve(&self, caller: Option<&Caller>, requested: Option<&str>) -> Result<Option<TenantId>, AppError> {
        let deadline = self.settings.resolve_timeout;
        match tokio::time::timeout(deadline, self.resolve_chain(caller, requested)).await {
            Ok(result) => result,
            Err(_) => Err(TenancyError::Timeout {
                operation: "tenant resolution",
                after: deadline,
            }
            .into()),
        }
    }

    async fn resolve_chain(&self, caller: Option<&Caller>, requested: Option<&str>) -> Result<Option<TenantId>, AppError> {
        if let Some(raw) = requested {
            return self.resolve_override(caller, raw).await.map(Some);
        }

        if let Some(caller) = caller {
            if let Some(assigned) = self.assignments.assigned_tenant(caller).await? {
                self.router.tenant_handle(&assigned).await?;
                return Ok(Some(assigned));
            }
        }

        if self.settings.dev_fallback_active() {
            if let Some(first) = self.router.registry().tenant_ids().into_iter().next() {
                tracing::debug!(tenant = %first, "using development tenant fallback");
                return Ok(Some(first));
            }
        }

        match caller {
            Some(caller) if !caller.is_superuser => Err(TenancyError::UnauthorizedTenantAccess(format!(
                "account {} has no assigned tenant",
                caller.account_id
            ))
            .into()),
            _ => Ok(None),
        }
    }

    async fn resolve_override(&self, caller: Option<&Caller>, raw: &str) -> Result<TenantId, AppError> {
        let caller = caller.ok_or_else(|| {
            TenancyError::UnauthorizedTenantAccess("anonymous callers cannot select a tenant".into())
        })?;
        let requested = TenantId::new(raw)?;

        if !caller.is_superuser {
            let assigned = self.assignments.assigned_tenant(caller).await?;
            if assigned.as_ref() != Some(&requested) {
                return Err(TenancyError::UnauthorizedTenantAccess(format!(
                    "account {} may not act for tenant {}",
                    caller.account_id, requested
                ))
                .into());
            }
        }

        match self.router.tenant_handle(&requested).await {
            Ok(_) => Ok(requested),
            Err(TenancyError::UnknownTenant(_)) => {
                Err(TenancyError::UnauthorizedTenantAccess(format!("tenant {} does not exist", requested)).into())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Resolve the active tenant and run the rest of the stack inside its context scope.
pub async fn tenant_context(State(state): State<AppState>, mut req: Request, next: Next) -> Result<Response, AppError> {
    let caller = req.extensions().get::<Caller>().cloned();
    let TenantOverride(requested) = TenantOverride::from_headers(req.headers());

    let resolver = TenantResolver {
        settings: &state.settings,
        router: &state.router,
        assignments: state.assignments.as_ref(),
    };
    let tenant = resolver.resolve(caller.as_ref(), requested.as_deref()).await?;
    tracing::debug!(
        tenant = tenant.as_ref().map(TenantId::as_str).unwrap_or("-"),
        path = %req.uri().path(),
        "tenant context installed"
    );

    req.extensions_mut().insert(ActiveTenant(tenant.clone()));
    Ok(TenantContext::scope(tenant, next.run(req)).await)
}

/// Turn the trusted `X-Account-ID` header into a [`Caller`] extension. Requests without the
/// header continue anonymously; an id with no account behind it is refused.
pub async fn identify_caller(State(state): State<AppState>, mut req: Request, next: Next) -> Result<Response, AppError> {
    let account_id = req
        .headers()
        .get(ACCOUNT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    if let Some(account_id) = account_id {
        let is_superuser = store::account_is_superuser(state.registry.central().pool(), &account_id)
            .await?
            .ok_or_else(|| TenancyError::UnauthorizedTenantAccess(format!("unknown account {}", account_id)))?;
        req.extensions_mut().insert(Caller {
            account_id,
            is_superuser,
        });
    }
    Ok(next.run(req).await)
}
