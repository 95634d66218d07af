//! Structured edits against a table.
//!
//! A [`TableChange`] is applied to a [`TableSpec`] in place. Applying one
//! also yields the [`ColumnMapping`] the rebuilder needs to copy rows from
//! the old structure into the new one.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RebuildError;
use crate::lexer;
use crate::schema::{ColumnSpec, ConstraintSpec, TableSpec};

/// Options for a column being added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddColumnOptions {
    /// Whether the column allows NULL values.
    pub nullable: bool,
    /// Default value as a raw SQL expression.
    pub default: Option<String>,
    /// Whether the column joins the primary key.
    pub primary_key: bool,
    /// Whether the column gets a UNIQUE constraint.
    pub unique: bool,
}

impl Default for AddColumnOptions {
    fn default() -> Self {
        Self {
            nullable: true,
            default: None,
            primary_key: false,
            unique: false,
        }
    }
}

impl AddColumnOptions {
    /// Creates options for a plain nullable column.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
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

    /// Adds the column to the primary key.
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Adds a UNIQUE constraint on the column.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Identifies constraints to drop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintSelector {
    /// The primary key.
    PrimaryKey,
    /// A UNIQUE constraint over exactly these columns.
    Unique(Vec<String>),
    /// A CHECK constraint with this expression (token-wise comparison).
    Check(String),
    /// A foreign key over exactly these local columns.
    ForeignKey(Vec<String>),
}

impl ConstraintSelector {
    /// Returns true if `constraint` is selected.
    #[must_use]
    pub fn matches(&self, constraint: &ConstraintSpec) -> bool {
        match (self, constraint) {
            (Self::PrimaryKey, ConstraintSpec::PrimaryKey { .. }) => true,
            (Self::Unique(wanted), ConstraintSpec::Unique { columns })
            | (Self::ForeignKey(wanted), ConstraintSpec::ForeignKey { columns, .. }) => {
                same_columns(wanted, columns)
            }
            (Self::Check(wanted), ConstraintSpec::Check { expression }) => {
                let a = lexer::tokenize(wanted);
                let b = lexer::tokenize(expression);
                a.len() == b.len()
                    && a.iter()
                        .zip(&b)
                        .all(|(x, y)| x.text.eq_ignore_ascii_case(y.text))
            }
            _ => false,
        }
    }
}

impl fmt::Display for ConstraintSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrimaryKey => write!(f, "PRIMARY KEY"),
            Self::Unique(columns) => write!(f, "UNIQUE ({})", columns.join(", ")),
            Self::Check(expr) => write!(f, "CHECK ({expr})"),
            Self::ForeignKey(columns) => write!(f, "FOREIGN KEY ({})", columns.join(", ")),
        }
    }
}

fn same_columns(a: &[String], b: &[String]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.eq_ignore_ascii_case(y))
}

/// A single edit against a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableChange {
    /// Append a column.
    AddColumn {
        /// Column name.
        name: String,
        /// Declared type.
        declared_type: String,
        /// Nullability, default and key options.
        options: AddColumnOptions,
    },
    /// Rename a column; its data follows it.
    RenameColumn {
        /// Current name.
        old: String,
        /// New name.
        new: String,
    },
    /// Drop a column and its data.
    DropColumn {
        /// Column name.
        name: String,
    },
    /// Add a table-level constraint.
    AddConstraint(ConstraintSpec),
    /// Drop the constraints matching a selector.
    DropConstraint(ConstraintSelector),
}

/// Source-to-destination column pairs for the copy step of a rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMapping {
    /// `(old name, new name)` for every column that carries data over.
    pub pairs: Vec<(String, String)>,
}

impl ColumnMapping {
    /// Returns the quoted source column list.
    #[must_use]
    pub fn source_list(&self) -> String {
        Self::quoted(self.pairs.iter().map(|(src, _)| src.as_str()))
    }

    /// Returns the quoted destination column list.
    #[must_use]
    pub fn destination_list(&self) -> String {
        Self::quoted(self.pairs.iter().map(|(_, dst)| dst.as_str()))
    }

    /// Returns true if no column carries data over.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    fn quoted<'a>(names: impl Iterator<Item = &'a str>) -> String {
        names
            .map(lexer::quote_identifier)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl TableChange {
    /// Creates an AddColumn change.
    #[must_use]
    pub fn add_column(
        name: impl Into<String>,
        declared_type: impl Into<String>,
        options: AddColumnOptions,
    ) -> Self {
        Self::AddColumn {
            name: name.into(),
            declared_type: declared_type.into(),
            options,
        }
    }

    /// Creates a RenameColumn change.
    #[must_use]
    pub fn rename_column(old: impl Into<String>, new: impl Into<String>) -> Self {
        Self::RenameColumn {
            old: old.into(),
            new: new.into(),
        }
    }

    /// Creates a DropColumn change.
    #[must_use]
    pub fn drop_column(name: impl Into<String>) -> Self {
        Self::DropColumn { name: name.into() }
    }

    /// Creates an AddConstraint change.
    #[must_use]
    pub const fn add_constraint(constraint: ConstraintSpec) -> Self {
        Self::AddConstraint(constraint)
    }

    /// Creates a DropConstraint change.
    #[must_use]
    pub const fn drop_constraint(selector: ConstraintSelector) -> Self {
        Self::DropConstraint(selector)
    }

    /// Returns a human-readable description of this change.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::AddColumn { name, .. } => format!("Add column '{name}'"),
            Self::RenameColumn { old, new } => format!("Rename column '{old}' to '{new}'"),
            Self::DropColumn { name } => format!("Drop column '{name}'"),
            Self::AddConstraint(constraint) => format!("Add constraint {constraint}"),
            Self::DropConstraint(selector) => format!("Drop constraint {selector}"),
        }
    }

    /// Applies this change to `spec` and returns how rows are carried over.
    ///
    /// On error `spec` is left untouched.
    pub fn apply(&self, spec: &mut TableSpec) -> Result<ColumnMapping, RebuildError> {
        let mut added: Option<&str> = None;
        let mut renamed: Option<(&str, &str)> = None;

        match self {
            Self::AddColumn {
                name,
                declared_type,
                options,
            } => {
                if spec.get_column(name).is_some() {
                    return Err(duplicate(spec, name));
                }
                let mut column = ColumnSpec::new(name.clone(), declared_type.clone());
                column.nullable = options.nullable;
                column.default.clone_from(&options.default);
                column.is_primary_key = options.primary_key;
                spec.columns.push(column);
                if options.primary_key {
                    spec.add_primary_key_column(name);
                }
                if options.unique {
                    spec.constraints
                        .push(ConstraintSpec::unique([name.clone()]));
                }
                added = Some(name.as_str());
            }

            Self::RenameColumn { old, new } => {
                if spec.get_column(new).is_some() && !old.eq_ignore_ascii_case(new) {
                    return Err(duplicate(spec, new));
                }
                let table = spec.name.clone();
                let column = spec.get_column_mut(old).ok_or_else(|| RebuildError::ColumnNotFound {
                    table,
                    column: old.clone(),
                })?;
                let previous = std::mem::replace(&mut column.name, new.clone());
                for constraint in &mut spec.constraints {
                    constraint.rename_column(&previous, new);
                }
                renamed = Some((old.as_str(), new.as_str()));
            }

            Self::DropColumn { name } => {
                let position = spec
                    .columns
                    .iter()
                    .position(|c| c.name.eq_ignore_ascii_case(name))
                    .ok_or_else(|| not_found(spec, name))?;
                let before = spec.columns.clone();
                spec.columns.remove(position);
                spec.constraints.retain(|constraint| {
                    let refs = constraint.referenced_columns(&before);
                    refs.is_empty() || !refs.iter().all(|r| r.eq_ignore_ascii_case(name))
                });
            }

            Self::AddConstraint(constraint) => {
                if let Some(missing) = constraint
                    .referenced_columns(&spec.columns)
                    .into_iter()
                    .find(|c| spec.get_column(c).is_none())
                {
                    return Err(not_found(spec, &missing));
                }
                if let ConstraintSpec::PrimaryKey { columns } = constraint {
                    spec.constraints
                        .retain(|c| !matches!(c, ConstraintSpec::PrimaryKey { .. }));
                    for column in &mut spec.columns {
                        column.is_primary_key =
                            columns.iter().any(|k| k.eq_ignore_ascii_case(&column.name));
                        column.auto_increment &= column.is_primary_key;
                    }
                }
                spec.constraints.push(constraint.clone());
            }

            Self::DropConstraint(selector) => {
                let before = spec.constraints.len();
                spec.constraints.retain(|c| !selector.matches(c));
                if spec.constraints.len() == before {
                    return Err(RebuildError::ConstraintNotFound {
                        table: spec.name.clone(),
                        selector: selector.to_string(),
                    });
                }
                if *selector == ConstraintSelector::PrimaryKey {
                    for column in &mut spec.columns {
                        column.is_primary_key = false;
                        column.auto_increment = false;
                    }
                }
            }
        }

        let pairs = spec
            .columns
            .iter()
            .filter(|c| added != Some(c.name.as_str()))
            .map(|c| match renamed {
                Some((old, new)) if new == c.name => (old.to_string(), c.name.clone()),
                _ => (c.name.clone(), c.name.clone()),
            })
            .collect();

        Ok(ColumnMapping { pairs })
    }
}

fn not_found(spec: &TableSpec, column: &str) -> RebuildError {
    RebuildError::ColumnNotFound {
        table: spec.name.clone(),
        column: column.to_string(),
    }
}

fn duplicate(spec: &TableSpec, column: &str) -> RebuildError {
    RebuildError::DuplicateColumn {
        table: spec.name.clone(),
        column: column.to_string(),
    }
}
