//! Executing migrations against one database.

use super::records::{self, Applied};
use super::{Migration, Operation};
use crate::store::quote_ident;
use sqlx::{SqliteConnection, SqlitePool};

async fn column_exists(conn: &mut SqliteConnection, table: &str, column: &str) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2")
        .bind(table)
        .bind(column)
        .fetch_one(&mut *conn)
        .await?;
    Ok(count > 0)
}

pub(crate) fn operation_sql(op: &Operation) -> String {
    match op {
        Operation::CreateTable { table, columns } => {
            format!("CREATE TABLE IF NOT EXISTS {} ({})", quote_ident(table), columns)
        }
        Operation::CreateIndex {
            name,
            table,
            columns,
            unique,
        } => {
            let cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
            format!(
                "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
                if *unique { "UNIQUE " } else { "" },
                quote_ident(name),
                quote_ident(table),
                cols.join(", ")
            )
        }
        Operation::AddColumn {
            table,
            column,
            definition,
        } => format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            quote_ident(table),
            quote_ident(column),
            definition
        ),
        Operation::Sql(sql) => sql.to_string(),
    }
}

async fn apply_operation(conn: &mut SqliteConnection, op: &Operation) -> Result<(), sqlx::Error> {
    if let Operation::AddColumn { table, column, .. } = op {
        if column_exists(conn, table, column).await? {
            return Ok(());
        }
    }
    sqlx::query(&operation_sql(op)).execute(&mut *conn).await?;
    Ok(())
}

/// Apply one migration and record it, atomically.
pub async fn apply_migration(pool: &SqlitePool, module: &str, migration: &Migration) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    for op in migration.operations {
        apply_operation(&mut *tx, op).await?;
    }
    records::record(&mut *tx, module, migration.name).await?;
    tx.commit().await?;
    Ok(())
}

#[derive(Debug, Default)]
pub struct ModuleOutcome {
    pub applied: Vec<String>,
    pub already_applied: usize,
}

/// Apply the not-yet-recorded migrations of a module in order, stopping at the first failure.
/// On failure the migrations applied before it stay applied.
pub async fn apply_module(
    pool: &SqlitePool,
    module: &str,
    migrations: &[Migration],
    applied: &Applied,
) -> Result<ModuleOutcome, (ModuleOutcome, String)> {
    let mut outcome = ModuleOutcome::default();
    for migration in migrations {
        if applied.contains(&(module.to_string(), migration.name.to_string())) {
            outcome.already_applied += 1;
            continue;
        }
        if let Err(e) = apply_migration(pool, module, migration).await {
            let reason = format!("{}: {}", migration.name, e);
            return Err((outcome, reason));
        }
        tracing::debug!(module, migration = migration.name, "applied migration");
        outcome.applied.push(migration.name.to_string());
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_idempotent_ddl() {
        assert_eq!(
            operation_sql(&Operation::CreateIndex {
                name: "patients_mrn_idx",
                table: "patients",
                columns: &["mrn"],
                unique: true,
            }),
            "CREATE UNIQUE INDEX IF NOT EXISTS \"patients_mrn_idx\" ON \"patients\" (\"mrn\")"
        );
        assert_eq!(
            operation_sql(&Operation::CreateTable {
                table: "t",
                columns: "id INTEGER PRIMARY KEY",
            }),
            "CREATE TABLE IF NOT EXISTS \"t\" (id INTEGER PRIMARY KEY)"
        );
    }

    #[tokio::test]
    async fn add_column_skips_existing_column() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query("CREATE TABLE patients (id INTEGER PRIMARY KEY, phone TEXT)")
            .execute(&pool)
            .await
            .unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let op = Operation::AddColumn {
            table: "patients",
            column: "phone",
            definition: "TEXT",
        };
        apply_operation(&mut *conn, &op).await.unwrap();
        apply_operation(
            &mut *conn,
            &Operation::AddColumn {
                table: "patients",
                column: "email",
                definition: "TEXT",
            },
        )
        .await
        .unwrap();
        assert!(column_exists(&mut *conn, "patients", "email").await.unwrap());
    }
}
