//! Caller identity forwarded by a trusted upstream (gateway or auth proxy).

use crate::error::{AppError, TenancyError};
use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};

/// Header carrying the authenticated account id.
pub const ACCOUNT_ID_HEADER: &str = "X-Account-ID";

/// Authenticated account making the request. Inserted into request extensions by
/// [`crate::middleware::identify_caller`]; absent for anonymous requests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Caller {
    pub account_id: String,
    pub is_superuser: bool,
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<Caller>().cloned().ok_or_else(|| {
            TenancyError::UnauthorizedTenantAccess("request carries no authenticated account".into()).into()
        })
    }
}

/// A superuser caller. Guards the operator surface.
#[derive(Clone, Debug)]
pub struct Operator(pub Caller);

#[async_trait]
impl<S> FromRequestParts<S> for Operator
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let caller = Caller::from_request_parts(parts, state).await?;
        if !caller.is_superuser {
            return Err(TenancyError::UnauthorizedTenantAccess(format!(
                "account {} is not an operator",
                caller.account_id
            ))
            .into());
        }
        Ok(Operator(caller))
    }
}
