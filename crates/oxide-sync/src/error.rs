//! Error types for schema synchronization.

/// Failures raised while rebuilding a table.
#[derive(Debug, thiserror::Error)]
pub enum RebuildError {
    /// A rename or drop referenced a column the table does not have.
    #[error("Column '{column}' not found in table '{table}'")]
    ColumnNotFound {
        /// Table being rebuilt.
        table: String,
        /// The missing column.
        column: String,
    },

    /// An added column collides with an existing one.
    #[error("Column '{column}' already exists in table '{table}'")]
    DuplicateColumn {
        /// Table being rebuilt.
        table: String,
        /// The duplicated column.
        column: String,
    },

    /// A constraint drop matched nothing.
    #[error("No constraint matching {selector} in table '{table}'")]
    ConstraintNotFound {
        /// Table being rebuilt.
        table: String,
        /// Human-readable form of the selector.
        selector: String,
    },

    /// Copying existing rows into the new structure violated a constraint.
    #[error("Constraint violation while copying rows of '{table}': {message}")]
    ConstraintViolation {
        /// Table being rebuilt.
        table: String,
        /// Message reported by SQLite.
        message: String,
    },

    /// A stored table definition could not be retargeted.
    #[error("Cannot rewrite definition of table '{table}': {message}")]
    InvalidDefinition {
        /// Table whose definition was malformed.
        table: String,
        /// What went wrong.
        message: String,
    },
}

/// Errors that can occur during synchronization.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The target schema failed to execute against the scratch database.
    #[error("Invalid target schema: {message}")]
    Schema {
        /// Message reported by SQLite.
        message: String,
    },

    /// Catalog or column metadata could not be read.
    #[error("Failed to introspect {object}: {source}")]
    Introspection {
        /// What was being read (e.g. "catalog", "table 'users'").
        object: String,
        /// Underlying driver error.
        #[source]
        source: sqlx::Error,
    },

    /// A table rebuild failed.
    #[error(transparent)]
    Rebuild(#[from] RebuildError),

    /// The post-migration consistency check failed.
    #[error("{check} failed:\n{}", bullet_list(.diagnostics))]
    Integrity {
        /// Which check reported the failure.
        check: String,
        /// Diagnostic rows returned by the check.
        diagnostics: Vec<String>,
    },

    /// Database error surfaced verbatim from the driver.
    #[error("Database error: {0}")]
    Engine(#[from] sqlx::Error),
}

impl SyncError {
    /// Wraps a driver error raised while reading metadata for `object`.
    pub(crate) fn introspection(object: impl Into<String>) -> impl FnOnce(sqlx::Error) -> Self {
        let object = object.into();
        move |source| Self::Introspection { object, source }
    }
}

fn bullet_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("  - {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Result type for synchronization operations.
pub type Result<T> = std::result::Result<T, SyncError>;
