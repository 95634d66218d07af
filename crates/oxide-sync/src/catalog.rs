//! Catalog objects and reading them from `sqlite_master`.

use std::fmt;

use serde::Serialize;
use sqlx::sqlite::SqliteConnection;

use crate::error::{Result, SyncError};
use crate::lexer;

/// The kinds of schema object the engine synchronizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    /// A table.
    Table,
    /// A view.
    View,
    /// A trigger.
    Trigger,
    /// An index.
    Index,
}

/// How an object whose definition changed is brought up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStrategy {
    /// Rebuild in place, preserving rows.
    Rebuild,
    /// Drop and recreate; there is no data to keep.
    Recreate,
}

impl ObjectKind {
    /// Dependency order in which kinds are synchronized.
    pub const SYNC_ORDER: [Self; 4] = [Self::Table, Self::View, Self::Trigger, Self::Index];

    /// Returns the `sqlite_master.type` value for this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::View => "view",
            Self::Trigger => "trigger",
            Self::Index => "index",
        }
    }

    /// Parses a `sqlite_master.type` value.
    #[must_use]
    pub fn from_catalog_type(value: &str) -> Option<Self> {
        match value {
            "table" => Some(Self::Table),
            "view" => Some(Self::View),
            "trigger" => Some(Self::Trigger),
            "index" => Some(Self::Index),
            _ => None,
        }
    }

    /// Returns the keyword used in `CREATE`/`DROP` statements.
    #[must_use]
    pub const fn sql_keyword(self) -> &'static str {
        match self {
            Self::Table => "TABLE",
            Self::View => "VIEW",
            Self::Trigger => "TRIGGER",
            Self::Index => "INDEX",
        }
    }

    /// Returns how an updated object of this kind is applied.
    #[must_use]
    pub const fn update_strategy(self) -> UpdateStrategy {
        match self {
            Self::Table => UpdateStrategy::Rebuild,
            Self::View | Self::Trigger | Self::Index => UpdateStrategy::Recreate,
        }
    }

    /// Generates SQL dropping the named object of this kind.
    #[must_use]
    pub fn drop_sql(self, name: &str) -> String {
        format!(
            "DROP {} IF EXISTS {}",
            self.sql_keyword(),
            lexer::quote_identifier(name)
        )
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of catalog metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogObject {
    /// Object kind.
    pub kind: ObjectKind,
    /// Object name, unique within its kind.
    pub name: String,
    /// Table the object belongs to (the object itself for tables and views).
    pub table: String,
    /// SQL text that recreates the object.
    pub definition: String,
}

impl CatalogObject {
    /// Creates a catalog object, canonicalizing table definitions.
    ///
    /// The name token of a `CREATE TABLE` is rewritten as a double-quoted
    /// identifier. SQLite re-quotes that token whenever a table is renamed,
    /// so without this a rebuilt table would never compare equal to its
    /// target again.
    #[must_use]
    pub fn new(
        kind: ObjectKind,
        name: impl Into<String>,
        table: impl Into<String>,
        definition: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let mut definition = definition.into();
        if kind == ObjectKind::Table {
            if let Some(canonical) =
                lexer::replace_name(&definition, &lexer::quote_identifier(&name))
            {
                definition = canonical;
            }
        }
        Self {
            kind,
            name,
            table: table.into(),
            definition,
        }
    }

    /// Generates SQL dropping this object.
    #[must_use]
    pub fn drop_sql(&self) -> String {
        self.kind.drop_sql(&self.name)
    }
}

/// A snapshot of every user object in a database, ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Catalog {
    objects: Vec<CatalogObject>,
}

impl Catalog {
    /// Creates a catalog, sorting objects by name then kind.
    #[must_use]
    pub fn new(mut objects: Vec<CatalogObject>) -> Self {
        objects.sort_by(|a, b| a.name.cmp(&b.name).then(a.kind.cmp(&b.kind)));
        Self { objects }
    }

    /// Returns all objects.
    #[must_use]
    pub fn objects(&self) -> &[CatalogObject] {
        &self.objects
    }

    /// Returns objects of one kind, in name order.
    pub fn of_kind(&self, kind: ObjectKind) -> impl Iterator<Item = &CatalogObject> {
        self.objects.iter().filter(move |o| o.kind == kind)
    }

    /// Looks up an object by kind and name. Names match case-insensitively,
    /// as they do in SQLite.
    #[must_use]
    pub fn get(&self, kind: ObjectKind, name: &str) -> Option<&CatalogObject> {
        self.objects
            .iter()
            .find(|o| o.kind == kind && o.name.eq_ignore_ascii_case(name))
    }

    /// Returns the number of objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns true if the catalog holds no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Query listing user objects. Internal tables (`sqlite_sequence`,
/// `sqlite_stat*`) and automatic indexes (NULL `sql`) are excluded.
const CATALOG_SQL: &str = r"
SELECT type, name, tbl_name, sql
FROM sqlite_master
WHERE sql IS NOT NULL
  AND name NOT LIKE 'sqlite\_%' ESCAPE '\'
  AND type IN ('table', 'view', 'trigger', 'index')
ORDER BY name
";

/// Reads the catalog of the database behind `conn`.
pub async fn read_catalog(conn: &mut SqliteConnection) -> Result<Catalog> {
    let rows: Vec<(String, String, String, String)> = sqlx::query_as(CATALOG_SQL)
        .fetch_all(&mut *conn)
        .await
        .map_err(SyncError::introspection("catalog"))?;

    let objects = rows
        .into_iter()
        .filter_map(|(kind, name, table, sql)| {
            ObjectKind::from_catalog_type(&kind)
                .map(|kind| CatalogObject::new(kind, name, table, sql))
        })
        .collect();

    Ok(Catalog::new(objects))
}
