#![allow(dead_code)]

use clinic_tenancy::{AppState, Settings, TenantId};
use std::path::Path;

pub fn tenant(id: &str) -> TenantId {
    TenantId::new(id).unwrap()
}

pub async fn state_with(settings: Settings) -> AppState {
    AppState::initialize(settings).await.unwrap()
}

pub async fn state_in(dir: &Path) -> AppState {
    state_with(Settings::rooted_at(dir)).await
}

/// Provision and fully migrate each tenant.
pub async fn provision(state: &AppState, ids: &[&str]) {
    for id in ids {
        let report = state.orchestrator.ensure_schema(&tenant(id)).await.unwrap();
        assert!(report.is_complete(), "{:?}", report);
    }
}

/// (type, name, sql) of every schema object, for before/after comparisons.
pub async fn schema_snapshot(pool: &sqlx::SqlitePool) -> Vec<(String, String, Option<String>)> {
    sqlx::query_as("SELECT type, name, sql FROM sqlite_master ORDER BY type, name")
        .fetch_all(pool)
        .await
        .unwrap()
}

pub async fn table_exists(pool: &sqlx::SqlitePool, name: &str) -> bool {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1")
        .bind(name)
        .fetch_one(pool)
        .await
        .unwrap();
    count > 0
}
