//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
    #[error("migration catalog: {0}")]
    Catalog(String),
    #[error("validation: {0}")]
    Validation(String),
}

/// Routing and lifecycle failures. None of these may be masked by falling back to the
/// central database.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TenancyError {
    #[error("no tenant in context for tenant-scoped entity '{entity}'")]
    AmbiguousTenant { entity: String },
    #[error("unknown tenant: {0}")]
    UnknownTenant(String),
    #[error("tenant database unavailable: {0}")]
    TenantUnavailable(String),
    #[error("illegal relation between {from} and {to}")]
    IllegalCrossTenantRelation { from: String, to: String },
    #[error("bootstrap failed for tenant {tenant}: {reason}")]
    BootstrapFailed { tenant: String, reason: String },
    #[error("migration of module {module} failed: {reason}")]
    ModuleMigrationFailed { module: String, reason: String },
    #[error("unauthorized tenant access: {0}")]
    UnauthorizedTenantAccess(String),
    #[error("database for tenant {tenant} is unreachable: {reason}")]
    Unreachable { tenant: String, reason: String },
    #[error("unknown entity kind: {0}")]
    UnknownEntityKind(String),
    #[error("invalid tenant identifier: {0:?}")]
    InvalidTenantId(String),
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: &'static str, after: Duration },
    #[error("no request scope installed for tenant context")]
    NoRequestScope,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Tenancy(#[from] TenancyError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad request: {0}")]
    BadRequest(String),
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl TenancyError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            TenancyError::AmbiguousTenant { .. } => (StatusCode::BAD_REQUEST, "ambiguous_tenant"),
            TenancyError::UnknownTenant(_) => (StatusCode::NOT_FOUND, "unknown_tenant"),
            TenancyError::TenantUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "tenant_unavailable"),
            TenancyError::IllegalCrossTenantRelation { .. } => (StatusCode::CONFLICT, "illegal_cross_tenant_relation"),
            TenancyError::BootstrapFailed { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "bootstrap_failed"),
            TenancyError::ModuleMigrationFailed { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "module_migration_failed")
            }
            TenancyError::UnauthorizedTenantAccess(_) => (StatusCode::FORBIDDEN, "unauthorized_tenant_access"),
            TenancyError::Unreachable { .. } => (StatusCode::SERVICE_UNAVAILABLE, "tenant_unreachable"),
            TenancyError::UnknownEntityKind(_) => (StatusCode::INTERNAL_SERVER_ERROR, "unknown_entity_kind"),
            TenancyError::InvalidTenantId(_) => (StatusCode::BAD_REQUEST, "invalid_tenant_id"),
            TenancyError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            TenancyError::NoRequestScope => (StatusCode::INTERNAL_SERVER_ERROR, "no_request_scope"),
        }
    }
}

impl AppError {
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            AppError::Tenancy(e) => e.status_and_code(),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Db(e) => {
                if let sqlx::Error::RowNotFound = e {
                    (StatusCode::NOT_FOUND, "not_found")
                } else {
                    (StatusCode::INTERNAL_SERVER_ERROR, "database_error")
                }
            }
            AppError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
                details: None,
            },
        };
        (status, Json(body)).into_response()
    }
}

impl IntoResponse for TenancyError {
    fn into_response(self) -> Response {
        AppError::Tenancy(self).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_errors_map_to_distinct_statuses() {
        let cases = [
            (TenancyError::UnauthorizedTenantAccess("x".into()), StatusCode::FORBIDDEN),
            (TenancyError::UnknownTenant("ghost".into()), StatusCode::NOT_FOUND),
            (
                TenancyError::AmbiguousTenant { entity: "Patient".into() },
                StatusCode::BAD_REQUEST,
            ),
            (TenancyError::TenantUnavailable("acme".into()), StatusCode::SERVICE_UNAVAILABLE),
            (
                TenancyError::Timeout { operation: "tenant resolution", after: Duration::from_millis(5) },
                StatusCode::GATEWAY_TIMEOUT,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status_and_code().0, status);
        }
    }

    #[test]
    fn sqlx_row_not_found_is_404() {
        let (status, code) = AppError::Db(sqlx::Error::RowNotFound).status_and_code();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(code, "not_found");
    }
}
