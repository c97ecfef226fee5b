//! Operator handlers: discovery, schema runs, tenant status and deregistration.

use crate::error::AppError;
use crate::extractors::Operator;
use crate::response::{success_many, success_one_ok, success_one_with_meta};
use crate::state::AppState;
use crate::tenant::TenantId;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize)]
pub struct EnsureSchemaBody {
    /// Re-run only these modules. Absent runs the full catalog.
    #[serde(default)]
    pub modules: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeregisterParams {
    #[serde(default)]
    pub purge: bool,
}

#[derive(Debug, Serialize)]
pub struct TenantSummary {
    pub tenant: TenantId,
    pub database: String,
    pub available: bool,
}

fn parse_tenant(raw: String) -> Result<TenantId, AppError> {
    Ok(TenantId::new(raw)?)
}

fn parse_body(body: &Bytes) -> Result<EnsureSchemaBody, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(EnsureSchemaBody::default());
    }
    serde_json::from_slice(body).map_err(|e| AppError::BadRequest(format!("invalid body: {}", e)))
}

pub async fn discover(_op: Operator, State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let report = state.registry.discover().await?;
    Ok(success_one_ok(report))
}

pub async fn ensure_all_schemas(_op: Operator, State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let runs = state.orchestrator.ensure_all_schemas().await?;
    Ok(success_many(runs))
}

pub async fn ensure_schema(
    _op: Operator,
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let tenant = parse_tenant(tenant_id)?;
    let report = match parse_body(&body)?.modules {
        Some(modules) => state.orchestrator.ensure_modules(&tenant, &modules).await?,
        None => state.orchestrator.ensure_schema(&tenant).await?,
    };
    let meta = serde_json::json!({
        "complete": report.is_complete(),
        "failed_modules": report.failed_modules(),
    });
    Ok(success_one_with_meta(report, meta))
}

pub async fn list_tenants(_op: Operator, State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let mut tenants = Vec::new();
    for tenant in state.registry.tenant_ids() {
        // deregistered between listing and lookup
        let Ok(handle) = state.registry.get(&tenant) else {
            continue;
        };
        tenants.push(TenantSummary {
            database: handle.name().to_string(),
            available: handle.is_available(),
            tenant,
        });
    }
    Ok(success_many(tenants))
}

pub async fn describe_tenant(
    _op: Operator,
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let tenant = parse_tenant(tenant_id)?;
    Ok(success_one_ok(state.orchestrator.describe(&tenant).await))
}

pub async fn deregister_tenant(
    _op: Operator,
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Query(params): Query<DeregisterParams>,
) -> Result<impl IntoResponse, AppError> {
    let tenant = parse_tenant(tenant_id)?;
    let outcome = state.registry.deregister(&tenant, params.purge).await?;
    Ok(success_one_ok(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_runs_full_catalog() {
        assert!(parse_body(&Bytes::new()).unwrap().modules.is_none());
        assert!(parse_body(&Bytes::from_static(b"  \n")).unwrap().modules.is_none());
        assert_eq!(
            parse_body(&Bytes::from_static(br#"{"modules":["billing"]}"#)).unwrap().modules,
            Some(vec!["billing".to_string()])
        );
        assert!(matches!(
            parse_body(&Bytes::from_static(b"{nope")),
            Err(AppError::BadRequest(_))
        ));
    }
}
