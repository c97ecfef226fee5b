//! Clinic server: central database, tenant discovery at startup, operator and record routes.
//!
//! Run from repo root: `cargo run -p clinic-server`

use axum::Router;
use clinic_tenancy::{admin_routes, common_routes, record_routes, AppState, Settings};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("clinic_tenancy=info,clinic_server=info")),
        )
        .init();

    let settings = Settings::from_env()?;
    tracing::info!(environment = ?settings.environment, discovery = ?settings.discovery, "starting");
    let state = AppState::initialize(settings).await?;

    let report = state.registry.discover().await?;
    for failure in &report.failed {
        tracing::warn!(tenant = %failure.tenant, reason = %failure.reason, "tenant not available at startup");
    }

    let app = Router::new()
        .merge(common_routes(state.clone()))
        .nest("/admin", admin_routes(state.clone()))
        .nest("/api/v1", record_routes(state.clone()))
        .layer(TraceLayer::new_for_http());

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".into());
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("clinic server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    state.registry.close().await;
    Ok(())
}
