//! Operator routes, mounted under `/admin`. Handlers require a superuser caller.

use crate::handlers::admin::{
    deregister_tenant, describe_tenant, discover, ensure_all_schemas, ensure_schema, list_tenants,
};
use crate::middleware::identify_caller;
use crate::state::AppState;
use axum::{middleware, routing::get, routing::post, Router};
use tower_http::limit::RequestBodyLimitLayer;

const ADMIN_BODY_LIMIT: usize = 64 * 1024;

pub fn admin_routes(state: AppState) -> Router {
    Router::new()
        .route("/tenants", get(list_tenants))
        .route("/tenants/discover", post(discover))
        .route("/tenants/schema", post(ensure_all_schemas))
        .route("/tenants/:tenant_id", get(describe_tenant).delete(deregister_tenant))
        .route("/tenants/:tenant_id/schema", post(ensure_schema))
        .layer(RequestBodyLimitLayer::new(ADMIN_BODY_LIMIT))
        .layer(middleware::from_fn_with_state(state.clone(), identify_caller))
        .with_state(state)
}
