use launchpad::migration::{
    registry, render_script, Dialect, Direction, Environment, Migration, MigrationRunner,
    SqliteConnection, HISTORY_TABLE,
};
use tempfile::tempdir;

const SCHEMA_TABLES: [&str; 5] = [
    "chat_messages",
    "chat_sessions",
    "documents",
    "embeddings",
    "users",
];

fn user_tables(conn: &SqliteConnection) -> Vec<String> {
    conn.table_names()
        .unwrap()
        .into_iter()
        .filter(|name| name != HISTORY_TABLE)
        .collect()
}

#[test]
fn apply_then_rollback_restores_the_database() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("app.db");

    {
        let mut conn = SqliteConnection::open(&db_path).unwrap();
        let before = user_tables(&conn);
        assert!(before.is_empty());

        let mut runner = MigrationRunner::new(&mut conn, Environment::Staging, registry());
        let report = runner.run_all(false).unwrap();
        assert_eq!(report.applied, vec!["001_initial_schema".to_string()]);
    }

    // Reopen: the schema and its history row were committed.
    let mut conn = SqliteConnection::open(&db_path).unwrap();
    assert_eq!(user_tables(&conn), SCHEMA_TABLES.to_vec());

    {
        let mut runner = MigrationRunner::new(&mut conn, Environment::Staging, registry());
        assert!(runner.pending().unwrap().is_empty());

        let rollback = runner.rollback("001").unwrap();
        assert_eq!(rollback.migration, "001_initial_schema");
        assert!(rollback.rollback_sql.starts_with("DROP TABLE IF EXISTS embeddings;"));

        let status = runner.status().unwrap();
        assert_eq!(status.rolled_back, 1);
        assert_eq!(status.pending_migrations, vec!["001_initial_schema".to_string()]);
    }

    assert!(user_tables(&conn).is_empty());
}

#[test]
fn foreign_keys_hold_after_apply() {
    let dir = tempdir().unwrap();
    let mut conn = SqliteConnection::open(&dir.path().join("app.db")).unwrap();
    MigrationRunner::new(&mut conn, Environment::Development, registry())
        .run_all(false)
        .unwrap();

    let orphan = conn.connection().execute(
        "INSERT INTO chat_sessions (session_id, user_id) VALUES ('s-1', 42)",
        [],
    );
    assert!(orphan.is_err());

    conn.connection()
        .execute(
            "INSERT INTO users (username, email) VALUES ('ada', 'ada@example.com')",
            [],
        )
        .unwrap();
    conn.connection()
        .execute(
            "INSERT INTO chat_sessions (session_id, user_id) VALUES ('s-1', 1)",
            [],
        )
        .unwrap();
}

#[test]
fn rendered_postgres_rollback_matches_metadata() {
    let registry = registry();
    let migration = &*registry[0];
    let script = render_script(migration, Direction::Down, Dialect::Postgres);

    for statement in migration.metadata().rollback_sql.lines() {
        assert!(script.contains(statement), "missing {}", statement);
    }
    assert!(script.starts_with("-- 001_initial_schema (down, postgres)"));
    assert!(script.trim_end().ends_with("COMMIT;"));
}
