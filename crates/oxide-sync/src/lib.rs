//! Declarative schema synchronization for SQLite.
//!
//! `oxide-sync` takes the desired schema as plain SQL DDL and brings a live
//! database to match it, keeping the rows of every table that survives:
//! - The target schema is executed against a private in-memory database, so
//!   it is described by SQLite itself rather than by a parser
//! - Tables, views, triggers and indexes are compared by definition text and
//!   synchronized in dependency order
//! - Changed tables are rebuilt (create, copy, drop, rename) with their
//!   indexes, triggers and views restored afterwards
//! - Everything runs in one transaction, verified with `foreign_key_check`
//!   and `integrity_check` before commit
//!
//! # Architecture
//!
//! - **Snapshot** - Materializes the target schema into a [`Catalog`]
//! - **Diff** - Classifies objects as create, update, unchanged or extraneous
//! - **Rebuild** - Rewrites a table in place, from a definition or from
//!   structured [`TableChange`]s
//! - **Sync** - Orchestrates the phases, transaction and verification
//!
//! # Example
//!
//! ```rust,ignore
//! use oxide_sync::prelude::*;
//! use sqlx::{Connection, SqliteConnection};
//!
//! let mut conn = SqliteConnection::connect("sqlite:app.db").await?;
//! let report = oxide_sync::synchronize(
//!     &mut conn,
//!     "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT NOT NULL UNIQUE);
//!      CREATE INDEX idx_users_email ON users (email);",
//! )
//! .await?;
//! println!("{} statements executed", report.statements.len());
//!
//! // Structured edits keep renamed columns' data.
//! alter_table(
//!     &mut conn,
//!     "users",
//!     &[TableChange::rename_column("email", "address")],
//! )
//! .await?;
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Show what would change
//! oxide-sync plan schema.sql
//!
//! # Synchronize the database
//! oxide-sync apply schema.sql
//!
//! # Run the consistency checks
//! oxide-sync check
//! ```

use sqlx::sqlite::SqliteConnection;

pub mod catalog;
pub mod changes;
pub mod diff;
pub mod error;
pub mod introspect;
pub mod lexer;
pub mod rebuild;
pub mod schema;
pub mod session;
pub mod snapshot;
pub mod sync;
pub mod verify;

pub use catalog::{Catalog, CatalogObject, ObjectKind};
pub use changes::TableChange;
pub use error::{RebuildError, Result, SyncError};
pub use sync::{SyncOptions, SyncReport, Synchronizer};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::catalog::{read_catalog, Catalog, CatalogObject, ObjectKind, UpdateStrategy};
    pub use crate::changes::{AddColumnOptions, ConstraintSelector, TableChange};
    pub use crate::diff::{diff, KindDiff};
    pub use crate::error::{RebuildError, Result, SyncError};
    pub use crate::schema::{
        render_schema, ColumnSpec, ConstraintSpec, DefaultValue, Entity, ForeignKeyAction,
        TableSpec,
    };
    pub use crate::snapshot::CatalogSnapshot;
    pub use crate::sync::{
        alter_table, KindCounts, SyncOptions, SyncPhase, SyncPlan, SyncReport, Synchronizer,
    };
    pub use crate::verify::verify_integrity;
}

/// Synchronizes `conn` with `schema` using the default options.
pub async fn synchronize(conn: &mut SqliteConnection, schema: &str) -> Result<SyncReport> {
    Synchronizer::default().synchronize(conn, schema).await
}
