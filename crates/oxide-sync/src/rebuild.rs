//! Rebuilding tables whose structure changed.
//!
//! SQLite's `ALTER TABLE` cannot change column types, constraints or
//! options, so a changed table is rewritten in full:
//!
//! 1. record the indexes, triggers and views that depend on the table and
//!    drop the views and triggers;
//! 2. create the new structure under a temporary name;
//! 3. copy the rows that survive into it;
//! 4. drop the original and rename the new table into its place;
//! 5. once every table of the session is done, recreate the dependents.
//!
//! The rebuilder runs inside a transaction opened by the caller, with
//! `foreign_keys` off and `legacy_alter_table` on. Both are connection
//! settings that cannot change inside a transaction, so setting them is left
//! to [`crate::sync`].

use sqlx::error::ErrorKind;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, CatalogObject, ObjectKind};
use crate::changes::{ColumnMapping, TableChange};
use crate::error::{RebuildError, Result, SyncError};
use crate::introspect;
use crate::lexer::{self, quote_identifier};
use crate::session::Session;

/// Prefix of the temporary table a rebuild writes into.
pub const TEMP_PREFIX: &str = "_oxide_sync_new_";

/// Returns the temporary name used while rebuilding `table`.
#[must_use]
pub fn temp_name(table: &str) -> String {
    format!("{TEMP_PREFIX}{table}")
}

/// Dependents in their creation order.
const DEPENDENTS_SQL: &str = r"
SELECT type, name, tbl_name, sql
FROM sqlite_master
WHERE sql IS NOT NULL
  AND type IN ('index', 'trigger', 'view')
ORDER BY rowid
";

/// What happened to a column of a rebuilt table.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ColumnEvent {
    Renamed { old: String, new: String },
    Dropped(String),
}

/// Rebuilds tables on a session and restores what depends on them.
pub struct TableRebuilder<'s, 'c> {
    session: &'s mut Session<'c>,
    dependents: Vec<CatalogObject>,
    events: Vec<(String, ColumnEvent)>,
}

impl<'s, 'c> TableRebuilder<'s, 'c> {
    /// Starts a rebuild session.
    pub fn new(session: &'s mut Session<'c>) -> Self {
        Self {
            session,
            dependents: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Rebuilds `table` so that its definition becomes `target_definition`.
    ///
    /// Columns present in both the old and new structure keep their data;
    /// every other old column is dropped. Renames are not inferred.
    pub async fn rebuild_to_definition(
        &mut self,
        table: &str,
        target_definition: &str,
    ) -> Result<()> {
        let temp = temp_name(table);
        let create = lexer::replace_name(target_definition, &quote_identifier(&temp))
            .ok_or_else(|| RebuildError::InvalidDefinition {
                table: table.to_string(),
                message: "no table name found in CREATE TABLE".to_string(),
            })?;

        info!(table = %table, "Rebuilding table");
        self.record_dependents(table).await?;

        let old_columns = introspect::column_names(self.session.conn(), table).await?;
        self.session.execute(&create).await?;

        let common: Vec<String> = sqlx::query_scalar(
            r"SELECT n.name
              FROM pragma_table_info(?1) AS n
              JOIN pragma_table_info(?2) AS o ON o.name = n.name COLLATE NOCASE
              ORDER BY n.cid",
        )
        .bind(temp.as_str())
        .bind(table)
        .fetch_all(self.session.conn())
        .await
        .map_err(SyncError::introspection(format!("table '{table}'")))?;

        for column in &old_columns {
            if !common.iter().any(|c| c.eq_ignore_ascii_case(column)) {
                debug!(table = %table, column = %column, "Column not carried over");
                self.events
                    .push((table.to_string(), ColumnEvent::Dropped(column.clone())));
            }
        }

        let mapping = ColumnMapping {
            pairs: common.into_iter().map(|c| (c.clone(), c)).collect(),
        };
        self.swap(table, &temp, &mapping).await
    }

    /// Applies structured changes to `table`, one rebuild per change.
    pub async fn apply_changes(&mut self, table: &str, changes: &[TableChange]) -> Result<()> {
        self.record_dependents(table).await?;

        let mut spec = introspect::table_spec(self.session.conn(), table).await?;
        let temp = temp_name(table);

        for change in changes {
            info!(table = %table, change = %change.description(), "Rebuilding table");
            let mapping = change.apply(&mut spec)?;

            self.session.execute(&spec.to_create_sql_as(&temp)).await?;
            self.swap(table, &temp, &mapping).await?;

            match change {
                TableChange::RenameColumn { old, new } => self.events.push((
                    table.to_string(),
                    ColumnEvent::Renamed {
                        old: old.clone(),
                        new: new.clone(),
                    },
                )),
                TableChange::DropColumn { name } => self
                    .events
                    .push((table.to_string(), ColumnEvent::Dropped(name.clone()))),
                _ => {}
            }
        }

        Ok(())
    }

    /// Recreates every recorded dependent.
    ///
    /// With a `target` catalog, a dependent the target does not contain is
    /// left dropped and the others are recreated from their target
    /// definition. Without one, recorded definitions are reused with renamed
    /// columns rewritten.
    pub async fn finish(self, target: Option<&Catalog>) -> Result<()> {
        let Self {
            session,
            mut dependents,
            events,
        } = self;

        // Views before triggers before indexes; creation order within a kind.
        dependents.sort_by_key(|d| {
            ObjectKind::SYNC_ORDER
                .iter()
                .position(|k| *k == d.kind)
        });

        for object in dependents {
            let definition = match target {
                Some(target) => match target.get(object.kind, &object.name) {
                    Some(wanted) => wanted.definition.clone(),
                    None => {
                        debug!(
                            kind = %object.kind,
                            name = %object.name,
                            "Dependent not in target, not recreated"
                        );
                        continue;
                    }
                },
                None => match replay(&object, &events) {
                    Some(definition) => definition,
                    None => {
                        warn!(
                            index = %object.name,
                            table = %object.table,
                            "Index refers to a dropped column, not recreated"
                        );
                        continue;
                    }
                },
            };

            debug!(kind = %object.kind, name = %object.name, "Recreating dependent");
            session.execute(&definition).await?;
        }

        Ok(())
    }

    /// Records the dependents of `table` and drops its views and triggers.
    async fn record_dependents(&mut self, table: &str) -> Result<()> {
        let rows: Vec<(String, String, String, String)> = sqlx::query_as(DEPENDENTS_SQL)
            .fetch_all(self.session.conn())
            .await
            .map_err(SyncError::introspection("catalog"))?;

        for (kind, name, owner, sql) in rows {
            let Some(kind) = ObjectKind::from_catalog_type(&kind) else {
                continue;
            };
            if self
                .dependents
                .iter()
                .any(|d| d.kind == kind && d.name == name)
            {
                continue;
            }

            let owned = owner.eq_ignore_ascii_case(table);
            let depends = match kind {
                ObjectKind::Index => owned,
                ObjectKind::Trigger => owned || lexer::mentions(&sql, table),
                ObjectKind::View => lexer::mentions(&sql, table),
                ObjectKind::Table => false,
            };
            if !depends {
                continue;
            }

            debug!(kind = %kind, name = %name, table = %table, "Recording dependent");
            let object = CatalogObject::new(kind, name, owner, sql);
            if kind != ObjectKind::Index {
                self.session.execute(&object.drop_sql()).await?;
            }
            self.dependents.push(object);
        }

        Ok(())
    }

    /// Copies rows into `temp`, then puts it in place of `table`.
    async fn swap(&mut self, table: &str, temp: &str, mapping: &ColumnMapping) -> Result<()> {
        if mapping.is_empty() {
            debug!(table = %table, "No common columns, rows are not copied");
        } else {
            let copy = format!(
                "INSERT INTO {} ({}) SELECT {} FROM {}",
                quote_identifier(temp),
                mapping.destination_list(),
                mapping.source_list(),
                quote_identifier(table)
            );
            self.session
                .execute(&copy)
                .await
                .map_err(|e| copy_error(table, e))?;
        }

        self.session
            .execute(&format!("DROP TABLE {}", quote_identifier(table)))
            .await?;
        self.session
            .execute(&format!(
                "ALTER TABLE {} RENAME TO {}",
                quote_identifier(temp),
                quote_identifier(table)
            ))
            .await
    }
}

/// Applies the column events of the object's table to a recorded
/// definition. Returns `None` for an index that refers to a dropped column
/// in its key, expressions or `WHERE` clause.
fn replay(object: &CatalogObject, events: &[(String, ColumnEvent)]) -> Option<String> {
    let mut definition = object.definition.clone();
    if object.kind != ObjectKind::Index {
        return Some(definition);
    }

    for (_, event) in events
        .iter()
        .filter(|(table, _)| table.eq_ignore_ascii_case(&object.table))
    {
        let body = &definition[index_body_start(&definition)..];
        match event {
            ColumnEvent::Dropped(name) => {
                if lexer::mentions(body, name) {
                    return None;
                }
            }
            ColumnEvent::Renamed { old, new } => {
                if lexer::mentions(body, old) {
                    definition = rename_index_column(&definition, old, new);
                }
            }
        }
    }

    Some(definition)
}

/// Offset of the column list of an index definition, past its index and
/// table names.
fn index_body_start(definition: &str) -> usize {
    lexer::tokenize(definition)
        .iter()
        .find(|t| t.is_symbol('('))
        .map_or(definition.len(), |t| t.span.start)
}

/// Renames a column in an index definition, leaving the index and table
/// names alone.
fn rename_index_column(definition: &str, old: &str, new: &str) -> String {
    let start = index_body_start(definition);
    format!(
        "{}{}",
        &definition[..start],
        lexer::rename_identifier(&definition[start..], old, new)
    )
}

fn copy_error(table: &str, error: SyncError) -> SyncError {
    match error {
        SyncError::Engine(sqlx::Error::Database(db))
            if matches!(
                db.kind(),
                ErrorKind::UniqueViolation
                    | ErrorKind::ForeignKeyViolation
                    | ErrorKind::NotNullViolation
                    | ErrorKind::CheckViolation
            ) =>
        {
            RebuildError::ConstraintViolation {
                table: table.to_string(),
                message: db.message().to_string(),
            }
            .into()
        }
        other => other,
    }
}
