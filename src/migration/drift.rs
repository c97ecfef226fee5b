//! Drift repair: drop stale objects left by superseded schema versions so that the
//! `IF NOT EXISTS` steps that follow do not silently keep them.

use crate::store::quote_ident;
use sqlx::{SqliteConnection, SqlitePool};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactKind {
    /// A table that a later version replaced.
    Table { name: &'static str },
    /// An index that is stale only while it still covers exactly `stale_columns`; the same
    /// name may be reused by the current schema over different columns.
    Index {
        name: &'static str,
        table: &'static str,
        stale_columns: &'static [&'static str],
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LegacyArtifact {
    /// Schema version that superseded the artifact.
    pub superseded_in: u32,
    pub kind: ArtifactKind,
}

impl LegacyArtifact {
    pub const fn table(superseded_in: u32, name: &'static str) -> Self {
        LegacyArtifact {
            superseded_in,
            kind: ArtifactKind::Table { name },
        }
    }

    pub const fn index(
        superseded_in: u32,
        name: &'static str,
        table: &'static str,
        stale_columns: &'static [&'static str],
    ) -> Self {
        LegacyArtifact {
            superseded_in,
            kind: ArtifactKind::Index {
                name,
                table,
                stale_columns,
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self.kind {
            ArtifactKind::Table { name } => name,
            ArtifactKind::Index { name, .. } => name,
        }
    }
}

async fn object_exists(conn: &mut SqliteConnection, kind: &str, name: &str) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = ?1 AND name = ?2")
        .bind(kind)
        .bind(name)
        .fetch_one(&mut *conn)
        .await?;
    Ok(count > 0)
}

async fn index_table(conn: &mut SqliteConnection, name: &str) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT tbl_name FROM sqlite_master WHERE type = 'index' AND name = ?1")
        .bind(name)
        .fetch_optional(&mut *conn)
        .await
}

/// Indexed column names in key order. Expression columns come back as `None`.
pub(crate) async fn index_columns(conn: &mut SqliteConnection, name: &str) -> Result<Vec<Option<String>>, sqlx::Error> {
    sqlx::query_scalar("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")
        .bind(name)
        .fetch_all(&mut *conn)
        .await
}

async fn is_stale(conn: &mut SqliteConnection, artifact: &LegacyArtifact) -> Result<bool, sqlx::Error> {
    match artifact.kind {
        ArtifactKind::Table { name } => object_exists(conn, "table", name).await,
        ArtifactKind::Index {
            name,
            table,
            stale_columns,
        } => {
            let Some(owner) = index_table(conn, name).await? else {
                return Ok(false);
            };
            if owner != table {
                return Ok(false);
            }
            let columns = index_columns(conn, name).await?;
            Ok(columns.len() == stale_columns.len()
                && columns
                    .iter()
                    .zip(stale_columns)
                    .all(|(have, stale)| have.as_deref() == Some(*stale)))
        }
    }
}

/// Drop every listed artifact present in the database, in one transaction. Returns the names
/// of dropped objects.
pub async fn repair(pool: &SqlitePool, artifacts: &[LegacyArtifact]) -> Result<Vec<String>, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let mut dropped = Vec::new();
    for artifact in artifacts {
        if !is_stale(&mut *tx, artifact).await? {
            continue;
        }
        let sql = match artifact.kind {
            ArtifactKind::Table { name } => format!("DROP TABLE IF EXISTS {}", quote_ident(name)),
            ArtifactKind::Index { name, .. } => format!("DROP INDEX IF EXISTS {}", quote_ident(name)),
        };
        sqlx::query(&sql).execute(&mut *tx).await?;
        tracing::info!(
            artifact = artifact.name(),
            superseded_in = artifact.superseded_in,
            "dropped legacy schema artifact"
        );
        dropped.push(artifact.name().to_string());
    }
    tx.commit().await?;
    Ok(dropped)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pool() -> SqlitePool {
        sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    const STALE_START: LegacyArtifact = LegacyArtifact::index(2, "appointments_start_idx", "appointments", &["scheduled_at"]);

    #[tokio::test]
    async fn drops_index_over_stale_columns() {
        let pool = pool().await;
        sqlx::query("CREATE TABLE appointments (id INTEGER PRIMARY KEY, scheduled_at TEXT, starts_at TEXT)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("CREATE INDEX appointments_start_idx ON appointments (scheduled_at)")
            .execute(&pool)
            .await
            .unwrap();

        let dropped = repair(&pool, &[STALE_START]).await.unwrap();
        assert_eq!(dropped, vec!["appointments_start_idx".to_string()]);
        assert!(repair(&pool, &[STALE_START]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn keeps_current_index_with_reused_name() {
        let pool = pool().await;
        sqlx::query("CREATE TABLE appointments (id INTEGER PRIMARY KEY, starts_at TEXT)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("CREATE INDEX appointments_start_idx ON appointments (starts_at)")
            .execute(&pool)
            .await
            .unwrap();

        assert!(repair(&pool, &[STALE_START]).await.unwrap().is_empty());
        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(
            index_columns(&mut *conn, "appointments_start_idx").await.unwrap(),
            vec![Some("starts_at".to_string())]
        );
    }

    #[tokio::test]
    async fn drops_duplicate_legacy_table() {
        let pool = pool().await;
        sqlx::query("CREATE TABLE patients_patient (id INTEGER PRIMARY KEY)")
            .execute(&pool)
            .await
            .unwrap();
        let dropped = repair(&pool, &[LegacyArtifact::table(2, "patients_patient")]).await.unwrap();
        assert_eq!(dropped, vec!["patients_patient".to_string()]);
    }
}
