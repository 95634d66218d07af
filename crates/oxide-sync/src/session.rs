//! A connection borrowed for the length of one synchronization.

use sqlx::sqlite::SqliteConnection;
use tracing::debug;

use crate::error::Result;

/// Executes DDL on a borrowed connection and keeps a log of what ran.
pub struct Session<'c> {
    conn: &'c mut SqliteConnection,
    statements: Vec<String>,
}

impl<'c> Session<'c> {
    /// Wraps a connection, usually one with an open transaction.
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self {
            conn,
            statements: Vec::new(),
        }
    }

    /// Executes one or more statements and records them.
    pub async fn execute(&mut self, sql: &str) -> Result<()> {
        debug!(sql = %sql, "Executing SQL");
        sqlx::raw_sql(sql).execute(&mut *self.conn).await?;
        self.statements.push(sql.to_string());
        Ok(())
    }

    /// Returns the underlying connection for read queries.
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut *self.conn
    }

    /// Returns the statements executed so far, in order.
    #[must_use]
    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    /// Consumes the session, returning the executed statements.
    #[must_use]
    pub fn into_statements(self) -> Vec<String> {
        self.statements
    }
}
