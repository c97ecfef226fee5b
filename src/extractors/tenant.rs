//! Tenant-related request extractors.

use crate::error::{AppError, TenancyError};
use crate::tenant::TenantId;
use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};

/// Header an administrative caller uses to select a tenant explicitly.
pub const TENANT_ID_HEADER: &str = "X-Tenant-ID";

/// Raw tenant override from the `X-Tenant-ID` header, if present and non-empty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TenantOverride(pub Option<String>);

impl TenantOverride {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let value = headers
            .get(TENANT_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        TenantOverride(value)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for TenantOverride
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(TenantOverride::from_headers(&parts.headers))
    }
}

/// Tenant resolved for this request by the tenant middleware. `None` means the request
/// runs against shared data only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActiveTenant(pub Option<TenantId>);

#[async_trait]
impl<S> FromRequestParts<S> for ActiveTenant
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<ActiveTenant>()
            .cloned()
            .ok_or(AppError::Tenancy(TenancyError::NoRequestScope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn blank_override_is_absent() {
        let mut headers = HeaderMap::new();
        assert_eq!(TenantOverride::from_headers(&headers), TenantOverride(None));
        headers.insert(TENANT_ID_HEADER, HeaderValue::from_static("   "));
        assert_eq!(TenantOverride::from_headers(&headers), TenantOverride(None));
        headers.insert(TENANT_ID_HEADER, HeaderValue::from_static(" acme "));
        assert_eq!(TenantOverride::from_headers(&headers), TenantOverride(Some("acme".into())));
    }
}
