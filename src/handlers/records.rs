//! Tenant-routed record endpoints. Every query goes through the router with the request's
//! active tenant.

use crate::classification;
use crate::error::{AppError, TenancyError};
use crate::extractors::{ActiveTenant, Caller};
use crate::response::success_one_ok;
use crate::router::RecordRef;
use crate::state::AppState;
use crate::store::quote_ident;
use crate::tenant::TenantId;
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct RecordCount {
    pub entity: &'static str,
    pub tenant: Option<TenantId>,
    pub database: String,
    pub count: i64,
}

pub async fn count(
    State(state): State<AppState>,
    ActiveTenant(tenant): ActiveTenant,
    Path(entity): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let kind = classification::entity_kind(&entity).map_err(|_| AppError::NotFound(format!("entity kind {}", entity)))?;
    let handle = state.router.resolve_current(kind.name).await?;
    let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", quote_ident(kind.table)))
        .fetch_one(handle.pool())
        .await?;
    Ok(success_one_ok(RecordCount {
        entity: kind.name,
        tenant,
        database: handle.name().to_string(),
        count,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RelationSide {
    pub kind: String,
    /// Defaults to the request's active tenant.
    #[serde(default)]
    pub tenant: Option<TenantId>,
}

#[derive(Debug, Deserialize)]
pub struct RelationCheck {
    pub from: RelationSide,
    pub to: RelationSide,
}

/// Whether a reference between the two records may be persisted. Illegal pairs answer 409.
/// Only operators may name a tenant other than the active one.
pub async fn check_relation(
    State(state): State<AppState>,
    caller: Option<Caller>,
    ActiveTenant(active): ActiveTenant,
    Json(body): Json<RelationCheck>,
) -> Result<impl IntoResponse, AppError> {
    let operator = caller.as_ref().map(|c| c.is_superuser).unwrap_or(false);
    if !operator {
        for named in [&body.from.tenant, &body.to.tenant].into_iter().flatten() {
            if active.as_ref() != Some(named) {
                let who = caller.as_ref().map(|c| c.account_id.as_str()).unwrap_or("anonymous caller");
                return Err(TenancyError::UnauthorizedTenantAccess(format!(
                    "{} may not reference records of tenant {}",
                    who, named
                ))
                .into());
            }
        }
    }
    let from_tenant = body.from.tenant.or_else(|| active.clone());
    let to_tenant = body.to.tenant.or(active);
    state
        .router
        .allow_relation(
            RecordRef::new(&body.from.kind, from_tenant.as_ref()),
            RecordRef::new(&body.to.kind, to_tenant.as_ref()),
        )
        .await?;
    Ok(success_one_ok(serde_json::json!({ "allowed": true })))
}
