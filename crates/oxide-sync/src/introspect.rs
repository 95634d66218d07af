//! Reading the structure of a live table.
//!
//! Columns, primary key, unique constraints and foreign keys come from the
//! `pragma_*` table-valued functions. `CHECK` constraints, `AUTOINCREMENT`
//! and table options are not exposed by any pragma and are recovered from the
//! stored definition with the [`lexer`](crate::lexer).
//!
//! Column collations are recovered from the definition too. Generated
//! columns are not modelled, so such tables are refused.

use sqlx::sqlite::SqliteConnection;

use crate::error::{RebuildError, Result, SyncError};
use crate::lexer;
use crate::schema::{ColumnSpec, ConstraintSpec, ForeignKeyAction, TableSpec};

/// Row of `pragma_foreign_key_list`.
type ForeignKeyRow = (i64, String, String, Option<String>, String, String);

/// Reads the full structure of `table`.
pub async fn table_spec(conn: &mut SqliteConnection, table: &str) -> Result<TableSpec> {
    let object = format!("table '{table}'");

    let definition: Option<String> =
        sqlx::query_scalar("SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1")
            .bind(table)
            .fetch_optional(&mut *conn)
            .await
            .map_err(SyncError::introspection(object.clone()))?;
    let definition = definition.ok_or_else(|| SyncError::Introspection {
        object: object.clone(),
        source: sqlx::Error::RowNotFound,
    })?;

    let mut spec = TableSpec::new(table);
    let extras = lexer::table_extras(&definition);
    if extras.generated {
        return Err(RebuildError::InvalidDefinition {
            table: table.to_string(),
            message: "generated columns cannot be carried through a rebuild".to_string(),
        }
        .into());
    }
    spec.without_rowid = extras.without_rowid;
    spec.strict = extras.strict;

    let rows: Vec<(String, String, i64, Option<String>, i64)> = sqlx::query_as(
        r#"SELECT name, type, "notnull", dflt_value, pk FROM pragma_table_info(?1) ORDER BY cid"#,
    )
    .bind(table)
    .fetch_all(&mut *conn)
    .await
    .map_err(SyncError::introspection(object.clone()))?;

    let mut key: Vec<(i64, String)> = Vec::new();
    for (name, declared_type, not_null, default, pk) in rows {
        if pk > 0 {
            key.push((pk, name.clone()));
        }
        spec.columns.push(ColumnSpec {
            name,
            declared_type,
            nullable: not_null == 0,
            default,
            is_primary_key: pk > 0,
            auto_increment: false,
            collation: None,
        });
    }

    for (name, collation) in extras.collations {
        if let Some(column) = spec.get_column_mut(&name) {
            column.collation = Some(collation);
        }
    }

    key.sort();
    if !key.is_empty() {
        if extras.auto_increment && key.len() == 1 {
            if let Some(column) = spec.get_column_mut(&key[0].1) {
                column.auto_increment = true;
            }
        }
        spec.constraints
            .push(ConstraintSpec::primary_key(key.into_iter().map(|(_, name)| name)));
    }

    let unique_indexes: Vec<String> = sqlx::query_scalar(
        r#"SELECT name FROM pragma_index_list(?1)
           WHERE "unique" = 1 AND origin = 'u' ORDER BY name"#,
    )
    .bind(table)
    .fetch_all(&mut *conn)
    .await
    .map_err(SyncError::introspection(object.clone()))?;

    for index in unique_indexes {
        let columns = index_columns(conn, &index).await?;
        spec.constraints.push(ConstraintSpec::unique(columns));
    }

    spec.constraints.extend(
        extras
            .checks
            .into_iter()
            .map(|expression| ConstraintSpec::Check { expression }),
    );

    let fk_rows: Vec<ForeignKeyRow> = sqlx::query_as(
        r#"SELECT id, "from", "table", "to", on_update, on_delete
           FROM pragma_foreign_key_list(?1) ORDER BY id, seq"#,
    )
    .bind(table)
    .fetch_all(&mut *conn)
    .await
    .map_err(SyncError::introspection(object))?;

    // One row per column; multi-column keys share an id.
    let mut foreign_keys: Vec<(i64, ConstraintSpec)> = Vec::new();
    for (id, from, parent, to, on_update, on_delete) in fk_rows {
        if let Some((
            last_id,
            ConstraintSpec::ForeignKey {
                columns,
                ref_columns,
                ..
            },
        )) = foreign_keys.last_mut()
        {
            if *last_id == id {
                columns.push(from);
                ref_columns.extend(to);
                continue;
            }
        }
        foreign_keys.push((
            id,
            ConstraintSpec::ForeignKey {
                columns: vec![from],
                ref_table: parent,
                ref_columns: to.into_iter().collect(),
                on_update: ForeignKeyAction::from_sql(&on_update),
                on_delete: ForeignKeyAction::from_sql(&on_delete),
            },
        ));
    }
    spec.constraints
        .extend(foreign_keys.into_iter().map(|(_, fk)| fk));

    Ok(spec)
}

/// Returns the column names of `index` in key order. Expression columns are
/// skipped.
pub async fn index_columns(conn: &mut SqliteConnection, index: &str) -> Result<Vec<String>> {
    let names: Vec<Option<String>> =
        sqlx::query_scalar("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")
            .bind(index)
            .fetch_all(&mut *conn)
            .await
            .map_err(SyncError::introspection(format!("index '{index}'")))?;
    Ok(names.into_iter().flatten().collect())
}

/// Returns the column names of `table` in declaration order.
pub async fn column_names(conn: &mut SqliteConnection, table: &str) -> Result<Vec<String>> {
    sqlx::query_scalar("SELECT name FROM pragma_table_info(?1) ORDER BY cid")
        .bind(table)
        .fetch_all(&mut *conn)
        .await
        .map_err(SyncError::introspection(format!("table '{table}'")))
}
