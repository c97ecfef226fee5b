//! `_sys_migrations` bookkeeping inside each tenant database.

use super::catalog::{MigrationCatalog, BOOTSTRAP_MODULE};
use super::SchemaState;
use chrono::NaiveDateTime;
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashSet;

pub const MIGRATIONS_TABLE: &str = "_sys_migrations";

/// (module, migration name) pairs already applied.
pub type Applied = HashSet<(String, String)>;

pub async fn table_exists(pool: &SqlitePool, table: &str) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1")
        .bind(table)
        .fetch_one(pool)
        .await?;
    Ok(count > 0)
}

/// Applied migrations; empty when the bookkeeping table does not exist yet.
pub async fn load_applied(pool: &SqlitePool) -> Result<Applied, sqlx::Error> {
    if !table_exists(pool, MIGRATIONS_TABLE).await? {
        return Ok(Applied::new());
    }
    let rows: Vec<(String, String)> = sqlx::query_as(&format!("SELECT module, name FROM {}", MIGRATIONS_TABLE))
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().collect())
}

pub async fn record(conn: &mut SqliteConnection, module: &str, name: &str) -> Result<(), sqlx::Error> {
    sqlx::query(&format!(
        "INSERT OR IGNORE INTO {} (module, name) VALUES (?1, ?2)",
        MIGRATIONS_TABLE
    ))
    .bind(module)
    .bind(name)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Most recently applied migration as `module.name`, with its timestamp.
pub async fn last_applied(pool: &SqlitePool) -> Result<Option<(String, NaiveDateTime)>, sqlx::Error> {
    if !table_exists(pool, MIGRATIONS_TABLE).await? {
        return Ok(None);
    }
    let row: Option<(String, String, NaiveDateTime)> = sqlx::query_as(&format!(
        "SELECT module, name, applied_at FROM {} ORDER BY id DESC LIMIT 1",
        MIGRATIONS_TABLE
    ))
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|(module, name, at)| (format!("{}.{}", module, name), at)))
}

/// State of an existing database relative to `catalog`.
pub fn state_of(applied: &Applied, catalog: &MigrationCatalog) -> SchemaState {
    let has = |module: &str, name: &str| applied.contains(&(module.to_string(), name.to_string()));

    if !catalog.bootstrap.iter().all(|m| has(BOOTSTRAP_MODULE, m.name)) {
        return SchemaState::BootstrapPending;
    }
    let domain_done = catalog
        .modules
        .iter()
        .all(|module| module.migrations.iter().all(|m| has(module.module, m.name)));
    if domain_done {
        SchemaState::Current
    } else {
        SchemaState::DomainMigrationPending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_follows_recorded_migrations() {
        let catalog = MigrationCatalog::clinic();
        let mut applied = Applied::new();
        assert_eq!(state_of(&applied, &catalog), SchemaState::BootstrapPending);

        for m in catalog.bootstrap {
            applied.insert((BOOTSTRAP_MODULE.to_string(), m.name.to_string()));
        }
        assert_eq!(state_of(&applied, &catalog), SchemaState::DomainMigrationPending);

        for module in &catalog.modules {
            for m in module.migrations {
                applied.insert((module.module.to_string(), m.name.to_string()));
            }
        }
        assert_eq!(state_of(&applied, &catalog), SchemaState::Current);

        applied.remove(&("billing".to_string(), "0001_initial".to_string()));
        assert_eq!(state_of(&applied, &catalog), SchemaState::DomainMigrationPending);
    }
}
