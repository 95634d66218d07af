//! Materializing the target catalog.
//!
//! The target schema is never parsed by the engine. It is executed verbatim
//! against a private in-memory database and the resulting `sqlite_master` is
//! read back, so the target and live catalogs are described by the same
//! engine in the same canonical form.

use sqlx::sqlite::SqliteConnection;
use sqlx::Connection;
use tracing::debug;

use crate::catalog::{read_catalog, Catalog};
use crate::error::{Result, SyncError};

/// URL of the private scratch database.
const SCRATCH_URL: &str = "sqlite::memory:";

/// Builds the catalog a schema text describes.
#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogSnapshot;

impl CatalogSnapshot {
    /// Executes `schema` against a fresh scratch database and returns its
    /// catalog.
    ///
    /// Any error in the schema text is reported as [`SyncError::Schema`].
    /// The live database is never touched.
    pub async fn build(schema: &str) -> Result<Catalog> {
        let mut scratch = SqliteConnection::connect(SCRATCH_URL).await?;

        let result = Self::materialize(&mut scratch, schema).await;

        if let Err(e) = scratch.close().await {
            debug!(error = %e, "Failed to close scratch database");
        }

        let catalog = result?;
        debug!(objects = catalog.len(), "Target snapshot built");
        Ok(catalog)
    }

    async fn materialize(scratch: &mut SqliteConnection, schema: &str) -> Result<Catalog> {
        if !schema.trim().is_empty() {
            sqlx::raw_sql(schema)
                .execute(&mut *scratch)
                .await
                .map_err(|e| SyncError::Schema {
                    message: match e {
                        sqlx::Error::Database(db) => db.message().to_string(),
                        other => other.to_string(),
                    },
                })?;
        }

        read_catalog(scratch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ObjectKind;

    #[tokio::test]
    async fn test_build_snapshot() {
        let catalog = CatalogSnapshot::build(
            r#"
            CREATE TABLE "users" (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
            CREATE INDEX idx_users_name ON users (name);
            CREATE TRIGGER users_touch AFTER UPDATE ON users BEGIN
                SELECT 1;
            END;
            "#,
        )
        .await
        .unwrap();

        assert_eq!(catalog.len(), 3);
        assert!(catalog.get(ObjectKind::Table, "users").is_some());
        assert!(catalog.get(ObjectKind::Index, "idx_users_name").is_some());
        assert!(catalog.get(ObjectKind::Trigger, "users_touch").is_some());
    }

    #[tokio::test]
    async fn test_empty_schema_yields_empty_catalog() {
        let catalog = CatalogSnapshot::build("  \n").await.unwrap();
        assert!(catalog.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_schema_is_a_schema_error() {
        let result = CatalogSnapshot::build("CREATE TABLE t (id INTEGER,").await;
        assert!(matches!(result, Err(SyncError::Schema { .. })));

        let result = CatalogSnapshot::build("CREATE INDEX i ON missing (id)").await;
        assert!(matches!(result, Err(SyncError::Schema { .. })));
    }
}
