//! Synchronization orchestrator.
//!
//! This module drives a live database to a target schema: it builds the
//! target snapshot, walks the object kinds in dependency order inside one
//! transaction, verifies the result and commits.

use std::collections::BTreeMap;

use serde::Serialize;
use sqlx::sqlite::SqliteConnection;
use sqlx::Connection;
use tracing::{debug, info, warn};

use crate::catalog::{read_catalog, Catalog, ObjectKind, UpdateStrategy};
use crate::changes::TableChange;
use crate::diff::{diff, KindDiff};
use crate::error::Result;
use crate::rebuild::TableRebuilder;
use crate::session::Session;
use crate::snapshot::CatalogSnapshot;
use crate::verify::verify_integrity;

/// Options controlling a synchronization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Switch the database to WAL with `synchronous = FULL` before running.
    pub durability: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self { durability: true }
    }
}

impl SyncOptions {
    /// Creates the default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables the durability settings.
    #[must_use]
    pub fn durability(mut self, enabled: bool) -> Self {
        self.durability = enabled;
        self
    }
}

/// Progress of a synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    /// Nothing has run yet.
    Idle,
    /// The target catalog was materialized.
    SnapshotBuilt,
    /// Tables match the target.
    TablesSynced,
    /// Views match the target.
    ViewsSynced,
    /// Triggers match the target.
    TriggersSynced,
    /// Indexes match the target.
    IndexesSynced,
    /// Foreign-key and integrity checks passed.
    Verified,
    /// The transaction was committed.
    Committed,
    /// The run failed and was rolled back.
    Aborted,
}

impl SyncPhase {
    /// Returns the phase reached once `kind` is synchronized.
    #[must_use]
    pub const fn after(kind: ObjectKind) -> Self {
        match kind {
            ObjectKind::Table => Self::TablesSynced,
            ObjectKind::View => Self::ViewsSynced,
            ObjectKind::Trigger => Self::TriggersSynced,
            ObjectKind::Index => Self::IndexesSynced,
        }
    }
}

/// Per-kind tally of a synchronization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindCounts {
    /// Objects created.
    pub created: usize,
    /// Objects rebuilt or recreated.
    pub updated: usize,
    /// Objects already matching the target.
    pub unchanged: usize,
    /// Extraneous objects dropped.
    pub dropped: usize,
}

impl From<&KindDiff> for KindCounts {
    fn from(diff: &KindDiff) -> Self {
        Self {
            created: diff.create.len(),
            updated: diff.update.len(),
            unchanged: diff.unchanged.len(),
            dropped: diff.extraneous.len(),
        }
    }
}

/// Outcome of a successful synchronization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Final phase.
    pub phase: SyncPhase,
    /// DDL executed, in order.
    pub statements: Vec<String>,
    /// Tally per object kind.
    pub counts: BTreeMap<ObjectKind, KindCounts>,
}

impl Default for SyncReport {
    fn default() -> Self {
        Self {
            phase: SyncPhase::Idle,
            statements: Vec::new(),
            counts: BTreeMap::new(),
        }
    }
}

impl SyncReport {
    /// Returns true if the run executed no DDL at all.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.statements.is_empty()
    }

    fn enter(&mut self, phase: SyncPhase) {
        debug!(from = ?self.phase, to = ?phase, "Phase transition");
        self.phase = phase;
    }
}

/// What a synchronization would do, without doing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncPlan {
    /// One classification per kind, in synchronization order.
    pub diffs: Vec<KindDiff>,
}

impl SyncPlan {
    /// Returns true if the live database already matches the target.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.diffs.iter().all(KindDiff::is_empty)
    }
}

/// Synchronizes a live database with a target schema.
#[derive(Debug, Clone, Default)]
pub struct Synchronizer {
    options: SyncOptions,
}

impl Synchronizer {
    /// Creates a synchronizer.
    #[must_use]
    pub fn new(options: SyncOptions) -> Self {
        Self { options }
    }

    /// Returns the options in use.
    #[must_use]
    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Brings `conn` to the schema described by `schema`.
    ///
    /// The whole run is one transaction. On failure it is rolled back and
    /// the database is left as it was.
    pub async fn synchronize(
        &self,
        conn: &mut SqliteConnection,
        schema: &str,
    ) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        self.apply_durability(conn).await?;

        let target = CatalogSnapshot::build(schema).await?;
        report.enter(SyncPhase::SnapshotBuilt);
        info!(objects = target.len(), "Synchronizing schema");

        run(conn, Job::Schema(&target), &mut report).await?;
        info!(statements = report.statements.len(), "Schema synchronized");
        Ok(report)
    }

    /// Classifies every object without changing anything.
    pub async fn plan(&self, conn: &mut SqliteConnection, schema: &str) -> Result<SyncPlan> {
        let target = CatalogSnapshot::build(schema).await?;
        let live = read_catalog(conn).await?;
        let diffs = ObjectKind::SYNC_ORDER
            .iter()
            .map(|&kind| diff(&target, &live, kind))
            .collect();
        Ok(SyncPlan { diffs })
    }

    /// Applies structured changes to one table.
    pub async fn alter_table(
        &self,
        conn: &mut SqliteConnection,
        table: &str,
        changes: &[TableChange],
    ) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        self.apply_durability(conn).await?;

        info!(table = %table, changes = changes.len(), "Altering table");
        run(conn, Job::Alter { table, changes }, &mut report).await?;
        Ok(report)
    }

    async fn apply_durability(&self, conn: &mut SqliteConnection) -> Result<()> {
        if self.options.durability {
            debug!("Enabling WAL with synchronous = FULL");
            sqlx::raw_sql("PRAGMA journal_mode = WAL; PRAGMA synchronous = FULL;")
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    }
}

/// Applies structured changes to `table` with default options.
pub async fn alter_table(
    conn: &mut SqliteConnection,
    table: &str,
    changes: &[TableChange],
) -> Result<SyncReport> {
    Synchronizer::default()
        .alter_table(conn, table, changes)
        .await
}

/// Work done inside the transaction.
#[derive(Clone, Copy)]
enum Job<'a> {
    Schema(&'a Catalog),
    Alter {
        table: &'a str,
        changes: &'a [TableChange],
    },
}

/// Connection settings a run changes and puts back.
struct ConnectionSettings {
    foreign_keys: bool,
    legacy_alter_table: bool,
}

impl ConnectionSettings {
    async fn enter(conn: &mut SqliteConnection) -> Result<Self> {
        let foreign_keys: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(&mut *conn)
            .await?;
        let legacy_alter_table: i64 = sqlx::query_scalar("PRAGMA legacy_alter_table")
            .fetch_one(&mut *conn)
            .await?;

        sqlx::raw_sql("PRAGMA foreign_keys = OFF; PRAGMA legacy_alter_table = ON;")
            .execute(&mut *conn)
            .await?;

        Ok(Self {
            foreign_keys: foreign_keys != 0,
            legacy_alter_table: legacy_alter_table != 0,
        })
    }

    async fn restore(&self, conn: &mut SqliteConnection) -> Result<()> {
        let sql = format!(
            "PRAGMA foreign_keys = {}; PRAGMA legacy_alter_table = {};",
            on_off(self.foreign_keys),
            on_off(self.legacy_alter_table)
        );
        sqlx::raw_sql(&sql).execute(&mut *conn).await?;
        Ok(())
    }
}

const fn on_off(value: bool) -> &'static str {
    if value {
        "ON"
    } else {
        "OFF"
    }
}

/// Runs `job` in a transaction with foreign keys off, restoring the
/// connection settings afterwards whatever the outcome.
async fn run(conn: &mut SqliteConnection, job: Job<'_>, report: &mut SyncReport) -> Result<()> {
    let settings = ConnectionSettings::enter(conn).await?;
    let result = transact(conn, job, report).await;

    if let Err(e) = settings.restore(conn).await {
        warn!(error = %e, "Failed to restore connection settings");
        if result.is_ok() {
            return Err(e);
        }
    }

    if let Err(e) = &result {
        warn!(phase = ?report.phase, error = %e, "Synchronization aborted");
        report.enter(SyncPhase::Aborted);
    }
    result
}

async fn transact(
    conn: &mut SqliteConnection,
    job: Job<'_>,
    report: &mut SyncReport,
) -> Result<()> {
    let mut tx = conn.begin().await?;

    let outcome = {
        let mut session = Session::new(&mut *tx);
        let outcome = execute(&mut session, job, report).await;
        report.statements = session.into_statements();
        outcome
    };

    match outcome {
        Ok(()) => {
            tx.commit().await?;
            report.enter(SyncPhase::Committed);
            Ok(())
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "Rollback failed");
            }
            Err(e)
        }
    }
}

async fn execute(session: &mut Session<'_>, job: Job<'_>, report: &mut SyncReport) -> Result<()> {
    match job {
        Job::Schema(target) => {
            for kind in ObjectKind::SYNC_ORDER {
                let live = read_catalog(session.conn()).await?;
                let kind_diff = diff(target, &live, kind);
                sync_kind(session, target, &kind_diff).await?;

                let counts = KindCounts::from(&kind_diff);
                info!(
                    kind = %kind,
                    created = counts.created,
                    updated = counts.updated,
                    dropped = counts.dropped,
                    unchanged = counts.unchanged,
                    "Kind synchronized"
                );
                report.counts.insert(kind, counts);
                report.enter(SyncPhase::after(kind));
            }
        }
        Job::Alter { table, changes } => {
            let mut rebuilder = TableRebuilder::new(session);
            rebuilder.apply_changes(table, changes).await?;
            rebuilder.finish(None).await?;
            report.counts.insert(
                ObjectKind::Table,
                KindCounts {
                    updated: 1,
                    ..KindCounts::default()
                },
            );
            report.enter(SyncPhase::TablesSynced);
        }
    }

    verify_integrity(session.conn()).await?;
    report.enter(SyncPhase::Verified);
    Ok(())
}

async fn sync_kind(
    session: &mut Session<'_>,
    target: &Catalog,
    kind_diff: &KindDiff,
) -> Result<()> {
    for object in &kind_diff.create {
        info!(kind = %object.kind, name = %object.name, "Creating");
        session.execute(&object.definition).await?;
    }

    if !kind_diff.update.is_empty() {
        match kind_diff.kind.update_strategy() {
            UpdateStrategy::Rebuild => {
                let mut rebuilder = TableRebuilder::new(session);
                for object in &kind_diff.update {
                    rebuilder
                        .rebuild_to_definition(&object.name, &object.definition)
                        .await?;
                }
                rebuilder.finish(Some(target)).await?;
            }
            UpdateStrategy::Recreate => {
                for object in &kind_diff.update {
                    info!(kind = %object.kind, name = %object.name, "Recreating");
                    session.execute(&object.drop_sql()).await?;
                    session.execute(&object.definition).await?;
                }
            }
        }
    }

    for object in &kind_diff.extraneous {
        info!(kind = %object.kind, name = %object.name, "Dropping");
        session.execute(&object.drop_sql()).await?;
    }

    Ok(())
}
