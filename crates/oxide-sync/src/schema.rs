//! Structural description of a table and deterministic DDL rendering.
//!
//! A [`TableSpec`] is what the rebuilder mutates: it can be introspected from
//! a live table (see [`crate::introspect`]) or built by hand with the builder
//! methods below. Rendering is deterministic; constraints are emitted grouped
//! by kind (primary key, unique, check, foreign key) no matter in which order
//! they were added, so the same spec always produces byte-identical SQL.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::lexer::{self, quote_identifier};

/// Default value helper for building column specs.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    /// NULL default.
    Null,
    /// Boolean default, stored as 0/1.
    Bool(bool),
    /// Integer default.
    Integer(i64),
    /// Float default.
    Float(f64),
    /// String default.
    String(String),
    /// SQL expression (e.g., "CURRENT_TIMESTAMP").
    Expression(String),
}

impl DefaultValue {
    /// Returns the SQL representation of this default value.
    #[must_use]
    pub fn to_sql(&self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            Self::Integer(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::String(s) => format!("'{}'", s.replace('\'', "''")),
            Self::Expression(expr) => expr.clone(),
        }
    }
}

/// Foreign key action (ON DELETE, ON UPDATE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ForeignKeyAction {
    /// No action (error if referenced row is deleted/updated).
    #[default]
    NoAction,
    /// Restrict (same as NoAction but checked immediately).
    Restrict,
    /// Cascade the delete/update to referencing rows.
    Cascade,
    /// Set the foreign key column to NULL.
    SetNull,
    /// Set the foreign key column to its default value.
    SetDefault,
}

impl ForeignKeyAction {
    /// Returns the SQL representation of this action.
    #[must_use]
    pub const fn to_sql(self) -> &'static str {
        match self {
            Self::NoAction => "NO ACTION",
            Self::Restrict => "RESTRICT",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
        }
    }

    /// Parses the action text reported by `pragma_foreign_key_list`.
    #[must_use]
    pub fn from_sql(text: &str) -> Self {
        match text.to_ascii_uppercase().as_str() {
            "RESTRICT" => Self::Restrict,
            "CASCADE" => Self::Cascade,
            "SET NULL" => Self::SetNull,
            "SET DEFAULT" => Self::SetDefault,
            _ => Self::NoAction,
        }
    }
}

/// One column of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Column name.
    pub name: String,
    /// Declared type exactly as written; may be empty.
    pub declared_type: String,
    /// Whether the column allows NULL values.
    pub nullable: bool,
    /// Default value as a raw SQL expression.
    pub default: Option<String>,
    /// Whether this column is part of the primary key.
    pub is_primary_key: bool,
    /// Whether the primary key uses `AUTOINCREMENT`.
    pub auto_increment: bool,
    /// Collating sequence from `COLLATE`, if declared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collation: Option<String>,
}

impl ColumnSpec {
    /// Creates a nullable column with the given declared type.
    #[must_use]
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared_type: declared_type.into(),
            nullable: true,
            default: None,
            is_primary_key: false,
            auto_increment: false,
            collation: None,
        }
    }

    /// Sets the collating sequence.
    #[must_use]
    pub fn collate(mut self, collation: impl Into<String>) -> Self {
        self.collation = Some(collation.into());
        self
    }

    /// Sets the column as NOT NULL.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Sets a default from a raw SQL expression.
    #[must_use]
    pub fn default_expr(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }

    /// Sets a typed default value.
    #[must_use]
    pub fn default(mut self, value: &DefaultValue) -> Self {
        self.default = Some(value.to_sql());
        self
    }

    /// Marks the column as (part of) the primary key.
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self
    }

    /// Sets the primary key to auto-increment.
    #[must_use]
    pub fn auto_increment(mut self) -> Self {
        self.is_primary_key = true;
        self.auto_increment = true;
        self
    }

    fn render(&self, inline_primary_key: bool) -> String {
        let mut parts = vec![quote_identifier(&self.name)];

        if !self.declared_type.is_empty() {
            parts.push(self.declared_type.clone());
        }

        if let Some(collation) = &self.collation {
            parts.push(format!("COLLATE {}", quote_identifier(collation)));
        }

        if inline_primary_key {
            parts.push("PRIMARY KEY AUTOINCREMENT".to_string());
        }

        if !self.nullable {
            parts.push("NOT NULL".to_string());
        }

        if let Some(default) = &self.default {
            if lexer::is_literal(default) {
                parts.push(format!("DEFAULT {default}"));
            } else {
                parts.push(format!("DEFAULT ({default})"));
            }
        }

        parts.join(" ")
    }
}

/// A table-level constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintSpec {
    /// `PRIMARY KEY (columns)`.
    PrimaryKey {
        /// Key columns in order.
        columns: Vec<String>,
    },
    /// `UNIQUE (columns)`.
    Unique {
        /// Constrained columns in order.
        columns: Vec<String>,
    },
    /// `CHECK (expression)`.
    Check {
        /// Expression text without the surrounding parentheses.
        expression: String,
    },
    /// `FOREIGN KEY (columns) REFERENCES ref_table (ref_columns)`.
    ForeignKey {
        /// Referencing columns.
        columns: Vec<String>,
        /// Referenced table.
        ref_table: String,
        /// Referenced columns; empty means the parent's primary key.
        ref_columns: Vec<String>,
        /// ON UPDATE action.
        on_update: ForeignKeyAction,
        /// ON DELETE action.
        on_delete: ForeignKeyAction,
    },
}

impl ConstraintSpec {
    /// Creates a primary key constraint.
    #[must_use]
    pub fn primary_key<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self::PrimaryKey {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    /// Creates a unique constraint.
    #[must_use]
    pub fn unique<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self::Unique {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    /// Creates a check constraint.
    #[must_use]
    pub fn check(expression: impl Into<String>) -> Self {
        Self::Check {
            expression: expression.into(),
        }
    }

    /// Creates a foreign key with `NO ACTION` on update and delete.
    #[must_use]
    pub fn foreign_key<S: Into<String>, R: Into<String>>(
        columns: impl IntoIterator<Item = S>,
        ref_table: impl Into<String>,
        ref_columns: impl IntoIterator<Item = R>,
    ) -> Self {
        Self::ForeignKey {
            columns: columns.into_iter().map(Into::into).collect(),
            ref_table: ref_table.into(),
            ref_columns: ref_columns.into_iter().map(Into::into).collect(),
            on_update: ForeignKeyAction::NoAction,
            on_delete: ForeignKeyAction::NoAction,
        }
    }

    /// Sets the ON DELETE action of a foreign key; other kinds are returned
    /// unchanged.
    #[must_use]
    pub fn on_delete(mut self, action: ForeignKeyAction) -> Self {
        if let Self::ForeignKey { on_delete, .. } = &mut self {
            *on_delete = action;
        }
        self
    }

    /// Sets the ON UPDATE action of a foreign key; other kinds are returned
    /// unchanged.
    #[must_use]
    pub fn on_update(mut self, action: ForeignKeyAction) -> Self {
        if let Self::ForeignKey { on_update, .. } = &mut self {
            *on_update = action;
        }
        self
    }

    /// Emission rank: primary key, unique, check, foreign key.
    #[must_use]
    pub const fn rank(&self) -> u8 {
        match self {
            Self::PrimaryKey { .. } => 0,
            Self::Unique { .. } => 1,
            Self::Check { .. } => 2,
            Self::ForeignKey { .. } => 3,
        }
    }

    /// Returns the local columns this constraint refers to.
    ///
    /// For checks this is every identifier in the expression that names one
    /// of `table_columns`.
    #[must_use]
    pub fn referenced_columns(&self, table_columns: &[ColumnSpec]) -> Vec<String> {
        match self {
            Self::PrimaryKey { columns }
            | Self::Unique { columns }
            | Self::ForeignKey { columns, .. } => columns.clone(),
            Self::Check { expression } => lexer::identifiers(expression)
                .into_iter()
                .filter(|ident| {
                    table_columns
                        .iter()
                        .any(|c| c.name.eq_ignore_ascii_case(ident))
                })
                .collect(),
        }
    }

    /// Renames `old` to `new` wherever this constraint refers to it.
    pub fn rename_column(&mut self, old: &str, new: &str) {
        match self {
            Self::PrimaryKey { columns }
            | Self::Unique { columns }
            | Self::ForeignKey { columns, .. } => {
                for column in columns.iter_mut().filter(|c| c.eq_ignore_ascii_case(old)) {
                    *column = new.to_string();
                }
            }
            Self::Check { expression } => {
                if lexer::mentions(expression, old) {
                    *expression = lexer::rename_identifier(expression, old, new);
                }
            }
        }
    }

    fn render(&self) -> String {
        match self {
            Self::PrimaryKey { columns } => format!("PRIMARY KEY ({})", quote_list(columns)),
            Self::Unique { columns } => format!("UNIQUE ({})", quote_list(columns)),
            Self::Check { expression } => format!("CHECK ({expression})"),
            Self::ForeignKey {
                columns,
                ref_table,
                ref_columns,
                on_update,
                on_delete,
            } => {
                let mut sql = format!(
                    "FOREIGN KEY ({}) REFERENCES {}",
                    quote_list(columns),
                    quote_identifier(ref_table)
                );
                if !ref_columns.is_empty() {
                    sql.push_str(&format!(" ({})", quote_list(ref_columns)));
                }
                if *on_update != ForeignKeyAction::NoAction {
                    sql.push_str(" ON UPDATE ");
                    sql.push_str(on_update.to_sql());
                }
                if *on_delete != ForeignKeyAction::NoAction {
                    sql.push_str(" ON DELETE ");
                    sql.push_str(on_delete.to_sql());
                }
                sql
            }
        }
    }
}

impl fmt::Display for ConstraintSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

fn quote_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Complete structural description of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    /// Table name.
    pub name: String,
    /// Columns in declaration order.
    pub columns: Vec<ColumnSpec>,
    /// Table-level constraints.
    pub constraints: Vec<ConstraintSpec>,
    /// Whether the table is `WITHOUT ROWID`.
    pub without_rowid: bool,
    /// Whether the table is `STRICT`.
    pub strict: bool,
}

impl TableSpec {
    /// Creates an empty table spec.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            constraints: Vec::new(),
            without_rowid: false,
            strict: false,
        }
    }

    /// Adds a column. Primary key columns are appended to the primary key
    /// constraint, which is created if needed.
    #[must_use]
    pub fn column(mut self, column: ColumnSpec) -> Self {
        if column.is_primary_key {
            self.add_primary_key_column(&column.name);
        }
        self.columns.push(column);
        self
    }

    /// Adds a table-level constraint.
    #[must_use]
    pub fn constraint(mut self, constraint: ConstraintSpec) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Marks the table `WITHOUT ROWID`.
    #[must_use]
    pub fn without_rowid(mut self) -> Self {
        self.without_rowid = true;
        self
    }

    /// Marks the table `STRICT`.
    #[must_use]
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Gets a column by name (case-insensitive, like SQLite).
    #[must_use]
    pub fn get_column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Gets a mutable column by name.
    #[must_use]
    pub fn get_column_mut(&mut self, name: &str) -> Option<&mut ColumnSpec> {
        self.columns
            .iter_mut()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Returns column names in declaration order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Returns the primary key columns, if any.
    #[must_use]
    pub fn primary_key(&self) -> Option<&[String]> {
        self.constraints.iter().find_map(|c| match c {
            ConstraintSpec::PrimaryKey { columns } => Some(columns.as_slice()),
            _ => None,
        })
    }

    pub(crate) fn add_primary_key_column(&mut self, column: &str) {
        let existing = self.constraints.iter_mut().find_map(|c| match c {
            ConstraintSpec::PrimaryKey { columns } => Some(columns),
            _ => None,
        });
        match existing {
            Some(columns) => {
                if !columns.iter().any(|c| c.eq_ignore_ascii_case(column)) {
                    columns.push(column.to_string());
                }
            }
            None => self
                .constraints
                .push(ConstraintSpec::primary_key([column.to_string()])),
        }
    }

    /// Renders `CREATE TABLE` for this spec.
    #[must_use]
    pub fn to_create_sql(&self) -> String {
        self.to_create_sql_as(&self.name)
    }

    /// Renders `CREATE TABLE` for this spec under a different table name.
    #[must_use]
    pub fn to_create_sql_as(&self, name: &str) -> String {
        // AUTOINCREMENT is only valid inline on a single INTEGER key column.
        let inline_key = match self.primary_key() {
            Some([only]) => self
                .get_column(only)
                .filter(|c| c.auto_increment)
                .map(|c| c.name.as_str()),
            _ => None,
        };

        let mut lines: Vec<String> = self
            .columns
            .iter()
            .map(|c| c.render(inline_key == Some(c.name.as_str())))
            .collect();

        let mut constraints: Vec<&ConstraintSpec> = self
            .constraints
            .iter()
            .filter(|c| !(inline_key.is_some() && matches!(c, ConstraintSpec::PrimaryKey { .. })))
            .collect();
        constraints.sort_by_key(|c| c.rank());
        lines.extend(constraints.into_iter().map(ConstraintSpec::render));

        let mut sql = format!(
            "CREATE TABLE {} (\n  {}\n)",
            quote_identifier(name),
            lines.join(",\n  ")
        );

        let mut options = Vec::new();
        if self.without_rowid {
            options.push("WITHOUT ROWID");
        }
        if self.strict {
            options.push("STRICT");
        }
        if !options.is_empty() {
            sql.push(' ');
            sql.push_str(&options.join(", "));
        }

        sql
    }
}

/// A type with a runtime table description.
///
/// Implementors describe their table once; the description can then be
/// rendered into target schema text with [`render_schema`].
pub trait Entity {
    /// Returns the table description for this type.
    fn table_spec() -> TableSpec;
}

/// Renders a target schema from table specs, one statement per table.
#[must_use]
pub fn render_schema(tables: &[TableSpec]) -> String {
    tables
        .iter()
        .map(|t| format!("{};\n", t.to_create_sql()))
        .collect()
}
