//! Tenant-routed record routes. Callers are identified first, then the tenant context is
//! installed around each handler.

use crate::handlers::records::{check_relation, count};
use crate::middleware::{identify_caller, tenant_context};
use crate::state::AppState;
use axum::{middleware, routing::get, routing::post, Router};
use tower::ServiceBuilder;

pub fn record_routes(state: AppState) -> Router {
    Router::new()
        .route("/records/:entity/count", get(count))
        .route("/relations/check", post(check_relation))
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn_with_state(state.clone(), identify_caller))
                .layer(middleware::from_fn_with_state(state.clone(), tenant_context)),
        )
        .with_state(state)
}
