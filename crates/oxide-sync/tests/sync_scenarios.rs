//! End-to-end synchronization against real SQLite databases.

use oxide_sync::prelude::*;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Connection};

async fn memory() -> SqliteConnection {
    SqliteConnection::connect("sqlite::memory:")
        .await
        .expect("Failed to open in-memory SQLite connection")
}

async fn exec(conn: &mut SqliteConnection, sql: &str) {
    sqlx::raw_sql(sql).execute(&mut *conn).await.unwrap();
}

async fn columns(conn: &mut SqliteConnection, table: &str) -> Vec<String> {
    sqlx::query_scalar("SELECT name FROM pragma_table_info(?1) ORDER BY cid")
        .bind(table)
        .fetch_all(&mut *conn)
        .await
        .unwrap()
}

async fn object_names(conn: &mut SqliteConnection) -> Vec<String> {
    read_catalog(conn)
        .await
        .unwrap()
        .objects()
        .iter()
        .map(|o| o.name.clone())
        .collect()
}

fn synchronizer() -> Synchronizer {
    Synchronizer::new(SyncOptions::new().durability(false))
}

#[tokio::test]
async fn test_creates_table_in_empty_database() {
    let mut conn = memory().await;
    let report = synchronizer()
        .synchronize(
            &mut conn,
            r#"CREATE TABLE "t" (id INTEGER PRIMARY KEY, name TEXT NOT NULL)"#,
        )
        .await
        .unwrap();

    assert_eq!(report.phase, SyncPhase::Committed);
    assert_eq!(columns(&mut conn, "t").await, vec!["id", "name"]);
    let rows: i64 = sqlx::query_scalar("SELECT count(*) FROM t")
        .fetch_one(&mut conn)
        .await
        .unwrap();
    assert_eq!(rows, 0);
}

#[tokio::test]
async fn test_renamed_column_keeps_its_data() {
    let mut conn = memory().await;
    exec(
        &mut conn,
        "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT);
         INSERT INTO t VALUES (1, 'Alice');",
    )
    .await;

    let report = alter_table(
        &mut conn,
        "t",
        &[TableChange::rename_column("name", "full_name")],
    )
    .await
    .unwrap();
    assert_eq!(report.phase, SyncPhase::Committed);

    assert_eq!(columns(&mut conn, "t").await, vec!["id", "full_name"]);
    let rows: Vec<(i64, String)> = sqlx::query_as("SELECT id, full_name FROM t")
        .fetch_all(&mut conn)
        .await
        .unwrap();
    assert_eq!(rows, vec![(1, "Alice".to_string())]);
}

#[tokio::test]
async fn test_dropped_column_loses_only_its_data() {
    let mut conn = memory().await;
    exec(
        &mut conn,
        "CREATE TABLE t (id INTEGER PRIMARY KEY, a TEXT, b TEXT);
         INSERT INTO t VALUES (1, 'x', 'gone'), (2, 'y', 'gone');",
    )
    .await;

    synchronizer()
        .synchronize(&mut conn, "CREATE TABLE t (id INTEGER PRIMARY KEY, a TEXT)")
        .await
        .unwrap();

    assert_eq!(columns(&mut conn, "t").await, vec!["id", "a"]);
    let rows: Vec<(i64, String)> = sqlx::query_as("SELECT id, a FROM t ORDER BY id")
        .fetch_all(&mut conn)
        .await
        .unwrap();
    assert_eq!(rows, vec![(1, "x".to_string()), (2, "y".to_string())]);
}

#[tokio::test]
async fn test_extraneous_index_is_dropped() {
    let mut conn = memory().await;
    exec(
        &mut conn,
        "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT);
         CREATE INDEX idx_t_name ON t (name);",
    )
    .await;

    let report = synchronizer()
        .synchronize(&mut conn, "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)")
        .await
        .unwrap();

    assert_eq!(report.counts[&ObjectKind::Index].dropped, 1);
    assert_eq!(object_names(&mut conn).await, vec!["t"]);
}

#[tokio::test]
async fn test_violating_check_leaves_database_unchanged() {
    let mut conn = memory().await;
    exec(
        &mut conn,
        "CREATE TABLE people (id INTEGER PRIMARY KEY, age INTEGER);
         CREATE INDEX idx_people_age ON people (age);
         INSERT INTO people VALUES (1, 30), (2, -1);",
    )
    .await;
    let before = read_catalog(&mut conn).await.unwrap();

    let err = synchronizer()
        .synchronize(
            &mut conn,
            "CREATE TABLE people (id INTEGER PRIMARY KEY, age INTEGER, CHECK (age > 0));
             CREATE INDEX idx_people_age ON people (age);",
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SyncError::Rebuild(RebuildError::ConstraintViolation { ref table, .. }) if table == "people"
    ));
    assert_eq!(read_catalog(&mut conn).await.unwrap(), before);
    let rows: Vec<(i64, i64)> = sqlx::query_as("SELECT id, age FROM people ORDER BY id")
        .fetch_all(&mut conn)
        .await
        .unwrap();
    assert_eq!(rows, vec![(1, 30), (2, -1)]);
}

#[tokio::test]
async fn test_unchanged_target_executes_nothing() {
    let schema = "
        CREATE TABLE IF NOT EXISTS authors (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL);
        CREATE TABLE books (
            id INTEGER PRIMARY KEY,
            author_id INTEGER NOT NULL REFERENCES authors (id) ON DELETE CASCADE,
            title TEXT NOT NULL DEFAULT ''
        );
        CREATE VIEW book_titles AS SELECT b.title, a.name FROM books b JOIN authors a ON a.id = b.author_id;
        CREATE TRIGGER books_title_trim AFTER INSERT ON books BEGIN
            UPDATE books SET title = trim(title) WHERE id = NEW.id;
        END;
        CREATE UNIQUE INDEX idx_books_title ON books (author_id, title);
    ";

    let mut conn = memory().await;
    let sync = synchronizer();
    let first = sync.synchronize(&mut conn, schema).await.unwrap();
    assert_eq!(first.statements.len(), 5);

    let second = sync.synchronize(&mut conn, schema).await.unwrap();
    assert!(second.is_noop(), "second run executed {:?}", second.statements);
    assert!(sync.plan(&mut conn, schema).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rebuild_is_idempotent_and_keeps_dependents() {
    let mut conn = memory().await;
    exec(
        &mut conn,
        "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT);
         CREATE INDEX idx_t_name ON t (name);
         CREATE VIEW t_names AS SELECT name FROM t;
         CREATE TABLE log (msg TEXT);
         CREATE TRIGGER t_log AFTER INSERT ON t BEGIN INSERT INTO log VALUES (NEW.name); END;
         INSERT INTO t VALUES (1, 'a');",
    )
    .await;

    let target = "
        CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, email TEXT);
        CREATE INDEX idx_t_name ON t (name);
        CREATE VIEW t_names AS SELECT name FROM t;
        CREATE TABLE log (msg TEXT);
        CREATE TRIGGER t_log AFTER INSERT ON t BEGIN INSERT INTO log VALUES (NEW.name); END;
    ";

    let sync = synchronizer();
    let report = sync.synchronize(&mut conn, target).await.unwrap();
    assert_eq!(report.counts[&ObjectKind::Table].updated, 1);
    assert_eq!(report.counts[&ObjectKind::Index].unchanged, 1);
    assert_eq!(report.counts[&ObjectKind::View].unchanged, 1);
    assert_eq!(report.counts[&ObjectKind::Trigger].unchanged, 1);

    assert_eq!(
        object_names(&mut conn).await,
        vec!["idx_t_name", "log", "t", "t_log", "t_names"]
    );

    // The recreated trigger still fires.
    exec(&mut conn, "INSERT INTO t (id, name) VALUES (2, 'b')").await;
    let logged: Vec<String> = sqlx::query_scalar("SELECT msg FROM log ORDER BY rowid")
        .fetch_all(&mut conn)
        .await
        .unwrap();
    assert_eq!(logged, vec!["a", "b"]);

    let again = sync.synchronize(&mut conn, target).await.unwrap();
    assert!(again.is_noop(), "second run executed {:?}", again.statements);
}

#[tokio::test]
async fn test_everything_extraneous_is_dropped() {
    let mut conn = memory().await;
    exec(
        &mut conn,
        "CREATE TABLE keep (id INTEGER PRIMARY KEY);
         CREATE TABLE old (id INTEGER PRIMARY KEY, keep_id INTEGER REFERENCES keep (id));
         CREATE VIEW old_ids AS SELECT id FROM old;
         CREATE TRIGGER keep_touch AFTER UPDATE ON keep BEGIN SELECT 1; END;
         CREATE INDEX idx_old_keep ON old (keep_id);",
    )
    .await;

    let report = synchronizer()
        .synchronize(&mut conn, "CREATE TABLE keep (id INTEGER PRIMARY KEY)")
        .await
        .unwrap();

    assert_eq!(object_names(&mut conn).await, vec!["keep"]);
    assert_eq!(report.counts[&ObjectKind::Table].dropped, 1);
    assert_eq!(report.counts[&ObjectKind::View].dropped, 1);
    assert_eq!(report.counts[&ObjectKind::Trigger].dropped, 1);
}

#[tokio::test]
async fn test_empty_target_drops_everything() {
    let mut conn = memory().await;
    exec(
        &mut conn,
        "CREATE TABLE a (id INTEGER PRIMARY KEY AUTOINCREMENT);
         INSERT INTO a DEFAULT VALUES;
         CREATE INDEX idx_a ON a (id);",
    )
    .await;

    synchronizer().synchronize(&mut conn, "").await.unwrap();
    assert!(object_names(&mut conn).await.is_empty());
}

#[tokio::test]
async fn test_dangling_foreign_key_aborts() {
    let mut conn = memory().await;
    exec(
        &mut conn,
        "PRAGMA foreign_keys = OFF;
         CREATE TABLE parent (id INTEGER PRIMARY KEY);
         CREATE TABLE child (id INTEGER PRIMARY KEY, parent_id INTEGER REFERENCES parent (id));
         INSERT INTO child VALUES (1, 42);
         PRAGMA foreign_keys = ON;",
    )
    .await;
    let before = read_catalog(&mut conn).await.unwrap();

    let err = synchronizer()
        .synchronize(
            &mut conn,
            "CREATE TABLE parent (id INTEGER PRIMARY KEY);
             CREATE TABLE child (id INTEGER PRIMARY KEY, parent_id INTEGER REFERENCES parent (id), note TEXT);",
        )
        .await
        .unwrap_err();

    match err {
        SyncError::Integrity { check, diagnostics } => {
            assert_eq!(check, "foreign_key_check");
            assert_eq!(diagnostics.len(), 1);
        }
        other => panic!("expected integrity failure, got {other:?}"),
    }
    assert_eq!(read_catalog(&mut conn).await.unwrap(), before);
    assert_eq!(columns(&mut conn, "child").await, vec!["id", "parent_id"]);
}

#[tokio::test]
async fn test_malformed_target_touches_nothing() {
    let mut conn = memory().await;
    exec(&mut conn, "CREATE TABLE t (id INTEGER PRIMARY KEY)").await;

    let err = synchronizer()
        .synchronize(&mut conn, "CREATE TABLE t (id INTEGER PRIMARY KEY,,)")
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Schema { .. }));
    assert_eq!(object_names(&mut conn).await, vec!["t"]);
}

#[tokio::test]
async fn test_structured_changes() {
    let mut conn = memory().await;
    exec(
        &mut conn,
        "CREATE TABLE accounts (id INTEGER PRIMARY KEY, email TEXT, legacy TEXT);
         CREATE INDEX idx_accounts_email ON accounts (email);
         INSERT INTO accounts VALUES (1, 'a@example.com', 'x'), (2, 'b@example.com', 'y');",
    )
    .await;

    let report = alter_table(
        &mut conn,
        "accounts",
        &[
            TableChange::rename_column("email", "address"),
            TableChange::drop_column("legacy"),
            TableChange::add_column(
                "active",
                "INTEGER",
                AddColumnOptions::new().not_null().default_expr("1"),
            ),
            TableChange::add_constraint(ConstraintSpec::unique(["address"])),
        ],
    )
    .await
    .unwrap();
    assert_eq!(report.phase, SyncPhase::Committed);

    assert_eq!(
        columns(&mut conn, "accounts").await,
        vec!["id", "address", "active"]
    );
    let rows: Vec<(i64, String, i64)> =
        sqlx::query_as("SELECT id, address, active FROM accounts ORDER BY id")
            .fetch_all(&mut conn)
            .await
            .unwrap();
    assert_eq!(
        rows,
        vec![
            (1, "a@example.com".to_string(), 1),
            (2, "b@example.com".to_string(), 1)
        ]
    );

    let index = read_catalog(&mut conn)
        .await
        .unwrap()
        .get(ObjectKind::Index, "idx_accounts_email")
        .map(|o| o.definition.clone());
    assert_eq!(
        index.as_deref(),
        Some("CREATE INDEX idx_accounts_email ON accounts (\"address\")")
    );
}

#[tokio::test]
async fn test_structured_change_on_unknown_column_rolls_back() {
    let mut conn = memory().await;
    exec(
        &mut conn,
        "CREATE TABLE t (id INTEGER PRIMARY KEY, a TEXT);
         INSERT INTO t VALUES (1, 'x');",
    )
    .await;

    let err = alter_table(
        &mut conn,
        "t",
        &[
            TableChange::add_column("b", "TEXT", AddColumnOptions::new()),
            TableChange::drop_column("missing"),
        ],
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        SyncError::Rebuild(RebuildError::ColumnNotFound { ref column, .. }) if column == "missing"
    ));
    // The first change was rebuilt already and must be rolled back too.
    assert_eq!(columns(&mut conn, "t").await, vec!["id", "a"]);
}

#[tokio::test]
async fn test_rename_rewrites_partial_index_predicate() {
    let mut conn = memory().await;
    exec(
        &mut conn,
        "CREATE TABLE t (id INTEGER PRIMARY KEY, a INTEGER, name TEXT);
         CREATE INDEX idx_a ON t (a) WHERE name IS NOT NULL;
         INSERT INTO t VALUES (1, 10, 'x');",
    )
    .await;

    let report = alter_table(
        &mut conn,
        "t",
        &[TableChange::rename_column("name", "full_name")],
    )
    .await
    .unwrap();
    assert_eq!(report.phase, SyncPhase::Committed);

    let index = read_catalog(&mut conn)
        .await
        .unwrap()
        .get(ObjectKind::Index, "idx_a")
        .map(|o| o.definition.clone());
    assert_eq!(
        index.as_deref(),
        Some("CREATE INDEX idx_a ON t (a) WHERE \"full_name\" IS NOT NULL")
    );
}

#[tokio::test]
async fn test_drop_skips_expression_index_on_the_column() {
    let mut conn = memory().await;
    exec(
        &mut conn,
        "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, code TEXT);
         CREATE INDEX idx_lower ON t (lower(name));
         CREATE INDEX idx_code ON t (code);
         INSERT INTO t VALUES (1, 'Ada', 'a');",
    )
    .await;

    let report = alter_table(&mut conn, "t", &[TableChange::drop_column("name")])
        .await
        .unwrap();
    assert_eq!(report.phase, SyncPhase::Committed);

    assert_eq!(columns(&mut conn, "t").await, vec!["id", "code"]);
    assert_eq!(object_names(&mut conn).await, vec!["idx_code", "t"]);
}

#[tokio::test]
async fn test_table_names_match_case_insensitively() {
    let mut conn = memory().await;
    exec(
        &mut conn,
        "CREATE TABLE users (id INTEGER PRIMARY KEY);
         INSERT INTO users VALUES (1);",
    )
    .await;

    let target = "CREATE TABLE Users (id INTEGER PRIMARY KEY, x TEXT)";
    let sync = synchronizer();
    let report = sync.synchronize(&mut conn, target).await.unwrap();

    let tables = &report.counts[&ObjectKind::Table];
    assert_eq!(tables.updated, 1);
    assert_eq!(tables.created, 0);
    assert_eq!(tables.dropped, 0);

    assert_eq!(columns(&mut conn, "users").await, vec!["id", "x"]);
    let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM users")
        .fetch_all(&mut conn)
        .await
        .unwrap();
    assert_eq!(ids, vec![1]);

    let again = sync.synchronize(&mut conn, target).await.unwrap();
    assert!(again.is_noop(), "second run executed {:?}", again.statements);
}

#[tokio::test]
async fn test_structured_change_keeps_column_collation() {
    let mut conn = memory().await;
    exec(
        &mut conn,
        "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT COLLATE NOCASE UNIQUE, z TEXT);
         INSERT INTO t VALUES (1, 'a', NULL);",
    )
    .await;

    alter_table(&mut conn, "t", &[TableChange::drop_column("z")])
        .await
        .unwrap();

    let duplicate = sqlx::raw_sql("INSERT INTO t (id, name) VALUES (2, 'A')")
        .execute(&mut conn)
        .await;
    assert!(duplicate.is_err(), "NOCASE uniqueness was lost");
}

#[tokio::test]
async fn test_changed_view_trigger_and_index_are_recreated() {
    let before = "
        CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, score INTEGER);
        CREATE TABLE log (msg TEXT);
        CREATE VIEW t_names AS SELECT name FROM t;
        CREATE TRIGGER t_log AFTER INSERT ON t BEGIN INSERT INTO log VALUES (NEW.name); END;
        CREATE INDEX idx_t_name ON t (name);
    ";
    let after = "
        CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, score INTEGER);
        CREATE TABLE log (msg TEXT);
        CREATE VIEW t_names AS SELECT id, name FROM t;
        CREATE TRIGGER t_log AFTER INSERT ON t BEGIN INSERT INTO log VALUES ('new ' || NEW.name); END;
        CREATE INDEX idx_t_name ON t (name, score);
    ";

    let mut conn = memory().await;
    let sync = synchronizer();
    sync.synchronize(&mut conn, before).await.unwrap();

    let report = sync.synchronize(&mut conn, after).await.unwrap();
    assert_eq!(report.phase, SyncPhase::Committed);
    assert_eq!(report.counts[&ObjectKind::Table].unchanged, 2);
    for kind in [ObjectKind::View, ObjectKind::Trigger, ObjectKind::Index] {
        assert_eq!(report.counts[&kind].updated, 1, "{kind}");
        assert_eq!(report.counts[&kind].created, 0, "{kind}");
        assert_eq!(report.counts[&kind].dropped, 0, "{kind}");
    }

    let catalog = read_catalog(&mut conn).await.unwrap();
    let definition = |kind, name| {
        catalog
            .get(kind, name)
            .map(|o| o.definition.clone())
            .unwrap_or_default()
    };
    assert_eq!(
        definition(ObjectKind::View, "t_names"),
        "CREATE VIEW t_names AS SELECT id, name FROM t"
    );
    assert_eq!(
        definition(ObjectKind::Trigger, "t_log"),
        "CREATE TRIGGER t_log AFTER INSERT ON t BEGIN INSERT INTO log VALUES ('new ' || NEW.name); END"
    );
    assert_eq!(
        definition(ObjectKind::Index, "idx_t_name"),
        "CREATE INDEX idx_t_name ON t (name, score)"
    );

    exec(&mut conn, "INSERT INTO t (id, name) VALUES (1, 'a')").await;
    let logged: Vec<String> = sqlx::query_scalar("SELECT msg FROM log")
        .fetch_all(&mut conn)
        .await
        .unwrap();
    assert_eq!(logged, vec!["new a"]);

    let again = sync.synchronize(&mut conn, after).await.unwrap();
    assert!(again.is_noop(), "second run executed {:?}", again.statements);
}

#[tokio::test]
async fn test_on_disk_database_switches_to_wal() {
    let dir = tempfile::tempdir().unwrap();
    let mut conn = SqliteConnectOptions::new()
        .filename(dir.path().join("app.db"))
        .create_if_missing(true)
        .connect()
        .await
        .unwrap();

    oxide_sync::synchronize(&mut conn, "CREATE TABLE t (id INTEGER PRIMARY KEY)")
        .await
        .unwrap();

    let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
        .fetch_one(&mut conn)
        .await
        .unwrap();
    assert_eq!(mode, "wal");
    let synchronous: i64 = sqlx::query_scalar("PRAGMA synchronous")
        .fetch_one(&mut conn)
        .await
        .unwrap();
    assert_eq!(synchronous, 2);
}
