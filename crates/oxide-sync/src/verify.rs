//! Post-migration consistency checks.

use sqlx::sqlite::SqliteConnection;
use tracing::debug;

use crate::error::{Result, SyncError};

/// Row of `PRAGMA foreign_key_check`: table, rowid, parent, fkid.
type ForeignKeyViolation = (String, Option<i64>, String, i64);

/// Runs the foreign-key and integrity checks.
///
/// Any diagnostic row is fatal. Foreign-key violations are reported first;
/// the integrity check only runs when there are none.
pub async fn verify_integrity(conn: &mut SqliteConnection) -> Result<()> {
    let violations: Vec<ForeignKeyViolation> = sqlx::query_as("PRAGMA foreign_key_check")
        .fetch_all(&mut *conn)
        .await
        .map_err(SyncError::introspection("foreign keys"))?;

    if !violations.is_empty() {
        return Err(SyncError::Integrity {
            check: "foreign_key_check".to_string(),
            diagnostics: violations
                .into_iter()
                .map(|(table, rowid, parent, fkid)| match rowid {
                    Some(rowid) => format!(
                        "row {rowid} of '{table}' violates foreign key {fkid} to '{parent}'"
                    ),
                    None => format!("a row of '{table}' violates foreign key {fkid} to '{parent}'"),
                })
                .collect(),
        });
    }

    let report: Vec<String> = sqlx::query_scalar("PRAGMA integrity_check")
        .fetch_all(&mut *conn)
        .await
        .map_err(SyncError::introspection("integrity"))?;

    if report.len() != 1 || report[0] != "ok" {
        return Err(SyncError::Integrity {
            check: "integrity_check".to_string(),
            diagnostics: report,
        });
    }

    debug!("Integrity verified");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Connection;

    async fn connect_with(schema: &str) -> SqliteConnection {
        let mut conn = SqliteConnection::connect("sqlite::memory:")
            .await
            .expect("Failed to open in-memory SQLite connection");
        sqlx::raw_sql(schema).execute(&mut conn).await.unwrap();
        conn
    }

    #[tokio::test]
    async fn test_clean_database_passes() {
        let mut conn = connect_with(
            "CREATE TABLE p (id INTEGER PRIMARY KEY);
             CREATE TABLE c (p_id INTEGER REFERENCES p (id));
             INSERT INTO p VALUES (1);
             INSERT INTO c VALUES (1);",
        )
        .await;
        verify_integrity(&mut conn).await.unwrap();
    }

    #[tokio::test]
    async fn test_dangling_reference_fails() {
        let mut conn = connect_with(
            "PRAGMA foreign_keys = OFF;
             CREATE TABLE p (id INTEGER PRIMARY KEY);
             CREATE TABLE c (p_id INTEGER REFERENCES p (id));
             INSERT INTO c VALUES (7);",
        )
        .await;

        match verify_integrity(&mut conn).await {
            Err(SyncError::Integrity { check, diagnostics }) => {
                assert_eq!(check, "foreign_key_check");
                assert_eq!(diagnostics.len(), 1);
                assert!(diagnostics[0].contains("'c'"));
                assert!(diagnostics[0].contains("'p'"));
            }
            other => panic!("expected integrity failure, got {other:?}"),
        }
    }
}
