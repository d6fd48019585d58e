use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use rusqlite::{params, Row};
use serde::Serialize;
use serde_json::json;

use crate::error::{Error, Result};

use super::{find, ordered, Migration, MigrationMetadata, SqlConnection, SqliteConnection};

pub const HISTORY_TABLE: &str = "migration_history";

const CREATE_HISTORY: &str = "CREATE TABLE IF NOT EXISTS migration_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    migration_name TEXT NOT NULL,
    version TEXT NOT NULL,
    applied_at TEXT NOT NULL,
    environment TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'success',
    rollback_sql TEXT,
    metadata TEXT
)";

const INSERT_HISTORY: &str = "INSERT INTO migration_history \
    (migration_name, version, applied_at, environment, status, rollback_sql, metadata) \
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";

const MARK_ROLLED_BACK: &str = "UPDATE migration_history \
    SET status = 'rolled_back', \
        metadata = json_set(COALESCE(metadata, '{}'), '$.rolled_back_at', ?1) \
    WHERE version = ?2 AND environment = ?3 AND status = 'success'";

const SELECT_ENTRIES: &str = "SELECT id, migration_name, version, applied_at, environment, status, rollback_sql \
    FROM migration_history";

const RECENT_LIMIT: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(Error::validation_invalid_argument(
                "environment",
                format!("Unknown environment '{}'", other),
                None,
                Some(vec![
                    "development".to_string(),
                    "staging".to_string(),
                    "production".to_string(),
                ]),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    Success,
    Failed,
    RolledBack,
}

impl HistoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryStatus::Success => "success",
            HistoryStatus::Failed => "failed",
            HistoryStatus::RolledBack => "rolled_back",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub migration_name: String,
    pub version: String,
    pub applied_at: String,
    pub environment: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_sql: Option<String>,
}

impl HistoryEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            migration_name: row.get(1)?,
            version: row.get(2)?,
            applied_at: row.get(3)?,
            environment: row.get(4)?,
            status: row.get(5)?,
            rollback_sql: row.get(6)?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub environment: Environment,
    pub dry_run: bool,
    /// Migrations pending when the run started, in execution order.
    pub pending: Vec<String>,
    pub applied: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RollbackReport {
    pub environment: Environment,
    pub migration: String,
    pub rollback_sql: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub environment: Environment,
    pub total_migrations: i64,
    pub successful: i64,
    pub failed: i64,
    pub rolled_back: i64,
    pub recent_migrations: Vec<HistoryEntry>,
    pub pending_migrations: Vec<String>,
}

/// Applies registry migrations against one SQLite database and records
/// each attempt in `migration_history`, scoped by environment.
pub struct MigrationRunner<'c> {
    conn: &'c mut SqliteConnection,
    environment: Environment,
    registry: Vec<Box<dyn Migration>>,
}

impl<'c> MigrationRunner<'c> {
    pub fn new(
        conn: &'c mut SqliteConnection,
        environment: Environment,
        registry: Vec<Box<dyn Migration>>,
    ) -> Self {
        Self {
            conn,
            environment,
            registry,
        }
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn ensure_history_table(&mut self) -> Result<()> {
        self.conn.execute(CREATE_HISTORY)?;
        self.conn.commit()
    }

    /// Versions applied successfully in this environment, oldest first.
    pub fn applied(&mut self) -> Result<Vec<String>> {
        self.ensure_history_table()?;
        self.recorded_versions()
    }

    /// Registry migrations not yet applied, in dependency order.
    pub fn pending(&mut self) -> Result<Vec<MigrationMetadata>> {
        let applied = self.applied()?;
        self.pending_after(&applied)
    }

    /// Like `applied`, but reads an absent history table as empty instead
    /// of creating it.
    fn recorded_versions(&self) -> Result<Vec<String>> {
        if !self.conn.table_names()?.iter().any(|name| name == HISTORY_TABLE) {
            return Ok(Vec::new());
        }
        Ok(self
            .entries("WHERE environment = ?1 AND status = 'success' ORDER BY id", None)?
            .into_iter()
            .map(|entry| entry.version)
            .collect())
    }

    fn pending_after(&self, applied: &[String]) -> Result<Vec<MigrationMetadata>> {
        Ok(ordered(&self.registry)?
            .into_iter()
            .map(|m| m.metadata())
            .filter(|meta| !applied.contains(&meta.version))
            .collect())
    }

    /// Apply every pending migration, each in its own transaction together
    /// with its history row. The first failure is rolled back, recorded as
    /// `failed` and returned; later migrations do not run.
    pub fn run_all(&mut self, dry_run: bool) -> Result<RunReport> {
        let pending = if dry_run {
            let applied = self.recorded_versions()?;
            self.pending_after(&applied)?
        } else {
            self.pending()?
        };
        let mut report = RunReport {
            environment: self.environment,
            dry_run,
            pending: pending.iter().map(MigrationMetadata::qualified_name).collect(),
            applied: Vec::new(),
        };

        if pending.is_empty() {
            crate::log_status!("migrate", "No pending migrations ({})", self.environment);
            return Ok(report);
        }

        crate::log_status!(
            "migrate",
            "{} {} migration(s) in {}",
            if dry_run { "Checking" } else { "Applying" },
            pending.len(),
            self.environment
        );

        for meta in &pending {
            let migration = find(&self.registry, &meta.version)?;

            if dry_run {
                crate::log_status!("migrate", "Would apply {}", meta.qualified_name());
                continue;
            }

            crate::log_status!("migrate", "Applying {}", meta.qualified_name());
            if let Err(err) = apply_recorded(self.conn, migration, self.environment) {
                crate::log_status!(
                    "migrate",
                    "{} failed: {}",
                    meta.qualified_name(),
                    err.describe()
                );
                abandon_transaction(self.conn, &meta.qualified_name());
                record_failure(self.conn, meta, self.environment, &err);
                return Err(err);
            }
            report.applied.push(meta.qualified_name());
        }

        Ok(report)
    }

    /// Run a migration's rollback and mark its history rows `rolled_back`.
    /// Refused while an applied migration still depends on it.
    pub fn rollback(&mut self, reference: &str) -> Result<RollbackReport> {
        let applied = self.applied()?;
        let migration = find(&self.registry, reference)?;
        let meta = migration.metadata();

        if !applied.contains(&meta.version) {
            return Err(Error::migration_not_applied(&meta.version, self.environment.as_str()));
        }

        let dependents: Vec<String> = self
            .registry
            .iter()
            .map(|m| m.metadata())
            .filter(|other| other.dependencies.contains(&meta.version))
            .filter(|other| applied.contains(&other.version))
            .map(|other| other.qualified_name())
            .collect();
        if !dependents.is_empty() {
            return Err(Error::precondition_failed(
                format!("rollback of {}", meta.qualified_name()),
                format!("rolling back {} first", dependents.join(", ")),
            ));
        }

        crate::log_status!("migrate", "Rolling back {}", meta.qualified_name());
        if let Err(err) = rollback_recorded(self.conn, migration, self.environment) {
            abandon_transaction(self.conn, &meta.qualified_name());
            return Err(err);
        }

        Ok(RollbackReport {
            environment: self.environment,
            migration: meta.qualified_name(),
            rollback_sql: migration.rollback_sql(self.conn.dialect()),
        })
    }

    pub fn status(&mut self) -> Result<MigrationStatus> {
        let pending_migrations = self
            .pending()?
            .iter()
            .map(MigrationMetadata::qualified_name)
            .collect();

        let sql = "SELECT COUNT(*), \
                   COALESCE(SUM(CASE WHEN status = 'success' THEN 1 ELSE 0 END), 0), \
                   COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0), \
                   COALESCE(SUM(CASE WHEN status = 'rolled_back' THEN 1 ELSE 0 END), 0) \
                   FROM migration_history WHERE environment = ?1";
        let (total_migrations, successful, failed, rolled_back) = self
            .conn
            .connection()
            .query_row(sql, params![self.environment.as_str()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })
            .map_err(|e| Error::database_statement(sql, e.to_string()))?;

        let recent_migrations =
            self.entries("WHERE environment = ?1 ORDER BY id DESC", Some(RECENT_LIMIT))?;

        Ok(MigrationStatus {
            environment: self.environment,
            total_migrations,
            successful,
            failed,
            rolled_back,
            recent_migrations,
            pending_migrations,
        })
    }

    /// History rows for this environment. `clause` binds the environment
    /// as `?1`.
    pub fn entries(&self, clause: &str, limit: Option<i64>) -> Result<Vec<HistoryEntry>> {
        let mut sql = format!("{} {}", SELECT_ENTRIES, clause);
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut stmt = self
            .conn
            .connection()
            .prepare(&sql)
            .map_err(|e| Error::database_statement(&sql, e.to_string()))?;
        let rows = stmt
            .query_map(params![self.environment.as_str()], HistoryEntry::from_row)
            .map_err(|e| Error::database_statement(&sql, e.to_string()))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::database_statement(&sql, e.to_string()))
    }
}

fn apply_recorded(
    conn: &mut SqliteConnection,
    migration: &dyn Migration,
    environment: Environment,
) -> Result<()> {
    let meta = migration.metadata();
    let rollback_sql = migration.rollback_sql(conn.dialect());
    migration.execute_up(conn)?;

    let metadata = json!({
        "description": meta.description,
        "author": meta.author,
        "created_at": meta.created_at,
        "dependencies": meta.dependencies,
        "dry_run": false,
    });
    conn.execute_with(
        INSERT_HISTORY,
        params![
            meta.qualified_name(),
            meta.version,
            Utc::now().to_rfc3339(),
            environment.as_str(),
            HistoryStatus::Success.as_str(),
            rollback_sql,
            metadata.to_string(),
        ],
    )?;

    conn.commit()
}

fn rollback_recorded(
    conn: &mut SqliteConnection,
    migration: &dyn Migration,
    environment: Environment,
) -> Result<()> {
    let meta = migration.metadata();
    migration.execute_down(conn)?;
    conn.execute_with(
        MARK_ROLLED_BACK,
        params![Utc::now().to_rfc3339(), meta.version, environment.as_str()],
    )?;
    conn.commit()
}

/// Roll back after a failed unit. A failed ROLLBACK is logged; the error
/// that caused it is the one returned.
fn abandon_transaction(conn: &mut SqliteConnection, what: &str) {
    if let Err(err) = conn.rollback() {
        crate::log_status!("migrate", "Could not roll back {}: {}", what, err.describe());
    }
}

/// Best effort: the original error is what the caller sees, so a failure
/// to record it is only logged.
fn record_failure(
    conn: &mut SqliteConnection,
    meta: &MigrationMetadata,
    environment: Environment,
    err: &Error,
) {
    let metadata = json!({ "error": err.describe() });
    let recorded = conn
        .execute_with(
            INSERT_HISTORY,
            params![
                meta.qualified_name(),
                meta.version,
                Utc::now().to_rfc3339(),
                environment.as_str(),
                HistoryStatus::Failed.as_str(),
                Option::<String>::None,
                metadata.to_string(),
            ],
        )
        .and_then(|_| conn.commit());

    if let Err(record_err) = recorded {
        abandon_transaction(conn, "failure record");
        crate::log_status!(
            "migrate",
            "Could not record failure of {}: {}",
            meta.qualified_name(),
            record_err.describe()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::{registry, Dialect, InitialSchema};

    const SCHEMA_TABLES: [&str; 5] = [
        "chat_messages",
        "chat_sessions",
        "documents",
        "embeddings",
        "users",
    ];

    struct Broken;

    impl Migration for Broken {
        fn metadata(&self) -> MigrationMetadata {
            MigrationMetadata {
                version: "002".to_string(),
                name: "broken".to_string(),
                description: "fails halfway".to_string(),
                author: "tests".to_string(),
                created_at: "2025-01-15".to_string(),
                dependencies: vec!["001".to_string()],
                rollback_sql: String::new(),
            }
        }

        fn up_statements(&self, _dialect: Dialect) -> Vec<String> {
            vec![
                "CREATE TABLE partial (id INTEGER)".to_string(),
                "CREATE TABLE (".to_string(),
            ]
        }

        fn down_statements(&self, _dialect: Dialect) -> Vec<String> {
            vec!["DROP TABLE IF EXISTS partial".to_string()]
        }
    }

    struct AddsAudit;

    impl Migration for AddsAudit {
        fn metadata(&self) -> MigrationMetadata {
            MigrationMetadata {
                version: "002".to_string(),
                name: "audit_log".to_string(),
                description: "audit trail".to_string(),
                author: "tests".to_string(),
                created_at: "2025-01-15".to_string(),
                dependencies: vec!["001".to_string()],
                rollback_sql: String::new(),
            }
        }

        fn up_statements(&self, _dialect: Dialect) -> Vec<String> {
            vec!["CREATE TABLE IF NOT EXISTS audit_log (user_id INTEGER REFERENCES users(id))"
                .to_string()]
        }

        fn down_statements(&self, _dialect: Dialect) -> Vec<String> {
            vec!["DROP TABLE IF EXISTS audit_log".to_string()]
        }
    }

    fn schema_tables(conn: &SqliteConnection) -> Vec<String> {
        conn.table_names()
            .unwrap()
            .into_iter()
            .filter(|name| name != HISTORY_TABLE)
            .collect()
    }

    #[test]
    fn run_all_applies_and_records_history() {
        let mut conn = SqliteConnection::open_in_memory().unwrap();
        let mut runner = MigrationRunner::new(&mut conn, Environment::Development, registry());

        let report = runner.run_all(false).unwrap();
        assert_eq!(report.applied, vec!["001_initial_schema".to_string()]);
        assert_eq!(runner.applied().unwrap(), vec!["001".to_string()]);
        assert!(runner.pending().unwrap().is_empty());

        let entries = runner.entries("WHERE environment = ?1", None).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, "success");
        assert_eq!(
            entries[0].rollback_sql.as_deref(),
            Some(InitialSchema::new().rollback_sql(Dialect::Sqlite).as_str())
        );

        drop(runner);
        assert_eq!(schema_tables(&conn), SCHEMA_TABLES.to_vec());
    }

    #[test]
    fn second_run_has_nothing_to_do() {
        let mut conn = SqliteConnection::open_in_memory().unwrap();
        let mut runner = MigrationRunner::new(&mut conn, Environment::Development, registry());

        runner.run_all(false).unwrap();
        let again = runner.run_all(false).unwrap();
        assert!(again.pending.is_empty());
        assert!(again.applied.is_empty());
    }

    #[test]
    fn dry_run_touches_no_schema() {
        let mut conn = SqliteConnection::open_in_memory().unwrap();
        let mut runner = MigrationRunner::new(&mut conn, Environment::Development, registry());

        let report = runner.run_all(true).unwrap();
        assert_eq!(report.pending, vec!["001_initial_schema".to_string()]);
        assert!(report.applied.is_empty());

        drop(runner);
        assert!(conn.table_names().unwrap().is_empty());
        assert!(!conn.in_transaction());
    }

    #[test]
    fn dry_run_reads_existing_history() {
        let mut conn = SqliteConnection::open_in_memory().unwrap();
        let mut runner = MigrationRunner::new(&mut conn, Environment::Development, registry());
        runner.run_all(false).unwrap();

        let report = runner.run_all(true).unwrap();
        assert!(report.pending.is_empty());
        drop(runner);

        let mut staging = MigrationRunner::new(&mut conn, Environment::Staging, registry());
        let report = staging.run_all(true).unwrap();
        assert_eq!(report.pending, vec!["001_initial_schema".to_string()]);
    }

    #[test]
    fn rollback_restores_the_empty_schema() {
        let mut conn = SqliteConnection::open_in_memory().unwrap();
        let mut runner = MigrationRunner::new(&mut conn, Environment::Development, registry());

        runner.run_all(false).unwrap();
        let report = runner.rollback("001").unwrap();
        assert_eq!(report.migration, "001_initial_schema");

        let status = runner.status().unwrap();
        assert_eq!(status.total_migrations, 1);
        assert_eq!(status.rolled_back, 1);
        assert_eq!(status.successful, 0);
        assert_eq!(status.pending_migrations, vec!["001_initial_schema".to_string()]);

        drop(runner);
        assert!(schema_tables(&conn).is_empty());
    }

    #[test]
    fn rollback_requires_an_applied_migration() {
        let mut conn = SqliteConnection::open_in_memory().unwrap();
        let mut runner = MigrationRunner::new(&mut conn, Environment::Staging, registry());

        let err = runner.rollback("001").unwrap_err();
        assert_eq!(err.code.as_str(), "migration.not_applied");
        assert_eq!(err.details["environment"], "staging");

        let err = runner.rollback("042").unwrap_err();
        assert_eq!(err.code.as_str(), "migration.not_found");
    }

    #[test]
    fn failed_migration_rolls_back_and_is_recorded() {
        let mut conn = SqliteConnection::open_in_memory().unwrap();
        let migrations: Vec<Box<dyn Migration>> =
            vec![Box::new(InitialSchema::new()), Box::new(Broken)];
        let mut runner = MigrationRunner::new(&mut conn, Environment::Development, migrations);

        let err = runner.run_all(false).unwrap_err();
        assert_eq!(err.code.as_str(), "database.statement_failed");
        assert!(!runner.conn.in_transaction());

        assert_eq!(runner.applied().unwrap(), vec!["001".to_string()]);
        let status = runner.status().unwrap();
        assert_eq!(status.failed, 1);
        assert_eq!(status.pending_migrations, vec!["002_broken".to_string()]);
        assert_eq!(status.recent_migrations[0].status, "failed");

        drop(runner);
        let tables = schema_tables(&conn);
        assert!(!tables.contains(&"partial".to_string()));
        assert!(tables.contains(&"users".to_string()));
    }

    #[test]
    fn environments_are_tracked_separately() {
        let mut conn = SqliteConnection::open_in_memory().unwrap();
        MigrationRunner::new(&mut conn, Environment::Development, registry())
            .run_all(false)
            .unwrap();

        let mut staging = MigrationRunner::new(&mut conn, Environment::Staging, registry());
        assert_eq!(staging.pending().unwrap().len(), 1);
        assert_eq!(staging.status().unwrap().total_migrations, 0);
    }

    #[test]
    fn rollback_refuses_while_dependents_are_applied() {
        let mut conn = SqliteConnection::open_in_memory().unwrap();
        let migrations: Vec<Box<dyn Migration>> =
            vec![Box::new(AddsAudit), Box::new(InitialSchema::new())];
        let mut runner = MigrationRunner::new(&mut conn, Environment::Production, migrations);

        let report = runner.run_all(false).unwrap();
        assert_eq!(
            report.applied,
            vec!["001_initial_schema".to_string(), "002_audit_log".to_string()]
        );

        let err = runner.rollback("001").unwrap_err();
        assert_eq!(err.code.as_str(), "state.precondition_failed");

        runner.rollback("002").unwrap();
        runner.rollback("001").unwrap();
        drop(runner);
        assert!(schema_tables(&conn).is_empty());
    }

    #[test]
    fn environment_parses_short_names() {
        assert_eq!("prod".parse::<Environment>().unwrap(), Environment::Production);
        assert_eq!("Staging".parse::<Environment>().unwrap(), Environment::Staging);
        assert!("qa".parse::<Environment>().is_err());
    }
}
