//! Central database DDL and tenant-registry persistence. Shared entities (accounts, the tenant
//! registry, system configuration) live only here.

use crate::error::AppError;
use crate::tenant::TenantId;
use sqlx::SqlitePool;
use std::path::PathBuf;

/// Central table holding one row per provisioned tenant.
pub const TENANTS_TABLE: &str = "_sys_tenants";

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Create the central tables if they do not exist. Safe to run on every startup.
pub async fn ensure_sys_tables(pool: &SqlitePool) -> Result<(), AppError> {
    let tenants_ddl = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            id TEXT PRIMARY KEY,
            database_path TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            comment TEXT
        )
        "#,
        TENANTS_TABLE
    );
    sqlx::query(&tenants_ddl).execute(pool).await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            is_superuser INTEGER NOT NULL DEFAULT 0,
            tenant_id TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS accounts_tenant_idx ON accounts (tenant_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS system_configuration (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Insert or refresh the registry row for a tenant.
pub async fn upsert_tenant_row(
    pool: &SqlitePool,
    tenant: &TenantId,
    database_path: &std::path::Path,
) -> Result<(), AppError> {
    let sql = format!(
        r#"
        INSERT INTO {} (id, database_path, updated_at)
        VALUES (?1, ?2, CURRENT_TIMESTAMP)
        ON CONFLICT (id)
        DO UPDATE SET database_path = ?2, updated_at = CURRENT_TIMESTAMP
        "#,
        TENANTS_TABLE
    );
    sqlx::query(&sql)
        .bind(tenant.as_str())
        .bind(database_path.to_string_lossy().into_owned())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete_tenant_row(pool: &SqlitePool, tenant: &TenantId) -> Result<bool, AppError> {
    let sql = format!("DELETE FROM {} WHERE id = ?1", TENANTS_TABLE);
    let result = sqlx::query(&sql).bind(tenant.as_str()).execute(pool).await?;
    Ok(result.rows_affected() > 0)
}

/// All registry rows ordered by id. Rows whose id is not a valid identifier are skipped.
pub async fn list_tenant_rows(pool: &SqlitePool) -> Result<Vec<(TenantId, PathBuf)>, AppError> {
    let sql = format!("SELECT id, database_path FROM {} ORDER BY id", TENANTS_TABLE);
    let rows = sqlx::query_as::<_, (String, String)>(&sql).fetch_all(pool).await?;

    let mut out = Vec::with_capacity(rows.len());
    for (id, path) in rows {
        match TenantId::new(id.clone()) {
            Ok(tenant) => out.push((tenant, PathBuf::from(path))),
            Err(_) => tracing::warn!("tenant registry row {:?}: invalid identifier, skipping", id),
        }
    }
    Ok(out)
}

/// Assigned tenant of an account, if any. `Ok(None)` both for unknown accounts and accounts
/// without an assignment.
pub async fn account_tenant(pool: &SqlitePool, account_id: &str) -> Result<Option<String>, AppError> {
    let row: Option<(Option<String>,)> = sqlx::query_as("SELECT tenant_id FROM accounts WHERE id = ?1")
        .bind(account_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.and_then(|(t,)| t).filter(|t| !t.is_empty()))
}

/// Superuser flag of an account; `None` when the account does not exist.
pub async fn account_is_superuser(pool: &SqlitePool, account_id: &str) -> Result<Option<bool>, AppError> {
    let row: Option<(bool,)> = sqlx::query_as("SELECT is_superuser FROM accounts WHERE id = ?1")
        .bind(account_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(s,)| s))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_pool() -> SqlitePool {
        sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[test]
    fn quotes_identifiers() {
        assert_eq!(quote_ident("patients"), "\"patients\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[tokio::test]
    async fn tenant_rows_round_trip() {
        let pool = memory_pool().await;
        ensure_sys_tables(&pool).await.unwrap();
        ensure_sys_tables(&pool).await.unwrap();

        let beta = TenantId::new("beta").unwrap();
        let acme = TenantId::new("acme").unwrap();
        upsert_tenant_row(&pool, &beta, std::path::Path::new("/d/db_beta.sqlite3")).await.unwrap();
        upsert_tenant_row(&pool, &acme, std::path::Path::new("/d/db_acme.sqlite3")).await.unwrap();
        upsert_tenant_row(&pool, &acme, std::path::Path::new("/e/db_acme.sqlite3")).await.unwrap();

        let rows = list_tenant_rows(&pool).await.unwrap();
        assert_eq!(
            rows,
            vec![
                (acme.clone(), PathBuf::from("/e/db_acme.sqlite3")),
                (beta.clone(), PathBuf::from("/d/db_beta.sqlite3")),
            ]
        );

        assert!(delete_tenant_row(&pool, &acme).await.unwrap());
        assert!(!delete_tenant_row(&pool, &acme).await.unwrap());
        assert_eq!(list_tenant_rows(&pool).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn account_assignment_lookup() {
        let pool = memory_pool().await;
        ensure_sys_tables(&pool).await.unwrap();
        sqlx::query(
            "INSERT INTO accounts (id, email, is_superuser, tenant_id) VALUES \
             ('u1', 'a@acme.test', 0, 'acme'), ('u2', 'root@clinic.test', 1, NULL), ('u3', 'x@y.test', 0, '')",
        )
        .execute(&pool)
        .await
        .unwrap();

        assert_eq!(account_tenant(&pool, "u1").await.unwrap(), Some("acme".into()));
        assert_eq!(account_tenant(&pool, "u2").await.unwrap(), None);
        assert_eq!(account_tenant(&pool, "u3").await.unwrap(), None);
        assert_eq!(account_tenant(&pool, "nobody").await.unwrap(), None);
        assert_eq!(account_is_superuser(&pool, "u2").await.unwrap(), Some(true));
        assert_eq!(account_is_superuser(&pool, "u1").await.unwrap(), Some(false));
        assert_eq!(account_is_superuser(&pool, "nobody").await.unwrap(), None);
    }
}
