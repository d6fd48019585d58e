//! Versioned schema migrations.
//!
//! A migration is a pair of statement lists (up and down) rendered for a
//! [`Dialect`]. The same lists drive live execution against SQLite, the
//! `rollback_sql` recorded in history, and scripts rendered for Postgres,
//! so the three never disagree.

mod connection;
mod runner;
mod schema;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::dependency::order_by_dependencies;
use crate::error::{Error, Result};

pub use connection::{SqlConnection, SqliteConnection};
pub use runner::{
    Environment, HistoryEntry, HistoryStatus, MigrationRunner, MigrationStatus, RollbackReport,
    RunReport, HISTORY_TABLE,
};
pub use schema::{Column, ColumnType, IndexDef, InitialSchema, TableDef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            other => Err(Error::validation_invalid_argument(
                "dialect",
                format!("Unknown dialect '{}'", other),
                None,
                Some(vec!["postgres".to_string(), "sqlite".to_string()]),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationMetadata {
    pub version: String,
    pub name: String,
    pub description: String,
    pub author: String,
    pub created_at: String,
    /// Versions that must be applied first.
    pub dependencies: Vec<String>,
    /// Postgres rollback script, generated from the drop statements.
    pub rollback_sql: String,
}

impl MigrationMetadata {
    /// `001_initial_schema`, the name recorded in history.
    pub fn qualified_name(&self) -> String {
        format!("{}_{}", self.version, self.name)
    }

    pub fn matches(&self, reference: &str) -> bool {
        self.version == reference || self.qualified_name() == reference
    }
}

pub trait Migration {
    fn metadata(&self) -> MigrationMetadata;

    fn up_statements(&self, dialect: Dialect) -> Vec<String>;

    fn down_statements(&self, dialect: Dialect) -> Vec<String>;

    /// The rollback as one script, exactly the statements `rollback` runs.
    fn rollback_sql(&self, dialect: Dialect) -> String {
        join_statements(&self.down_statements(dialect))
    }

    /// Run the up statements inside the connection's open transaction
    /// without committing.
    fn execute_up(&self, conn: &mut dyn SqlConnection) -> Result<()> {
        for statement in self.up_statements(conn.dialect()) {
            conn.execute(&statement)?;
        }
        Ok(())
    }

    fn execute_down(&self, conn: &mut dyn SqlConnection) -> Result<()> {
        for statement in self.down_statements(conn.dialect()) {
            conn.execute(&statement)?;
        }
        Ok(())
    }

    /// Apply and commit. A failing statement returns its error with the
    /// transaction still open; rolling back is the caller's call.
    fn apply(&self, conn: &mut dyn SqlConnection) -> Result<()> {
        self.execute_up(conn)?;
        conn.commit()
    }

    fn rollback(&self, conn: &mut dyn SqlConnection) -> Result<()> {
        self.execute_down(conn)?;
        conn.commit()
    }
}

/// Every migration this build knows about.
pub fn registry() -> Vec<Box<dyn Migration>> {
    vec![Box::new(InitialSchema::new())]
}

/// Registry entries ordered so each migration follows its dependencies.
pub fn ordered(registry: &[Box<dyn Migration>]) -> Result<Vec<&dyn Migration>> {
    let ordered = order_by_dependencies(
        registry,
        "migrations",
        |m| m.metadata().version,
        |m| m.metadata().dependencies,
    )?;
    Ok(ordered.into_iter().map(|m| &**m).collect())
}

pub fn find<'a>(registry: &'a [Box<dyn Migration>], reference: &str) -> Result<&'a dyn Migration> {
    registry
        .iter()
        .find(|m| m.metadata().matches(reference))
        .map(|m| &**m)
        .ok_or_else(|| Error::migration_not_found(reference))
}

fn join_statements(statements: &[String]) -> String {
    statements
        .iter()
        .map(|s| format!("{};", s))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render one direction of a migration as a standalone script wrapped in a
/// transaction, for running with `psql -f` or `sqlite3`.
pub fn render_script(migration: &dyn Migration, direction: Direction, dialect: Dialect) -> String {
    let meta = migration.metadata();
    let statements = match direction {
        Direction::Up => migration.up_statements(dialect),
        Direction::Down => migration.down_statements(dialect),
    };

    let mut script = format!(
        "-- {} ({}, {})\n-- {}\n\nBEGIN;\n\n",
        meta.qualified_name(),
        direction.as_str(),
        dialect,
        meta.description
    );
    for statement in &statements {
        script.push_str(statement);
        script.push_str(";\n\n");
    }
    script.push_str("COMMIT;\n");
    script
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialect_parses_aliases() {
        assert_eq!("PostgreSQL".parse::<Dialect>().unwrap(), Dialect::Postgres);
        assert_eq!("sqlite3".parse::<Dialect>().unwrap(), Dialect::Sqlite);
        assert!("mysql".parse::<Dialect>().is_err());
    }

    #[test]
    fn find_accepts_version_or_qualified_name() {
        let registry = registry();
        assert_eq!(find(&registry, "001").unwrap().metadata().name, "initial_schema");
        assert_eq!(find(&registry, "001_initial_schema").unwrap().metadata().version, "001");

        let err = find(&registry, "999").err().unwrap();
        assert_eq!(err.code.as_str(), "migration.not_found");
    }

    #[test]
    fn rollback_sql_matches_executed_statements() {
        let schema = InitialSchema::new();
        for dialect in [Dialect::Postgres, Dialect::Sqlite] {
            let expected = schema
                .down_statements(dialect)
                .iter()
                .map(|s| format!("{};", s))
                .collect::<Vec<_>>()
                .join("\n");
            assert_eq!(schema.rollback_sql(dialect), expected);
        }
    }

    #[test]
    fn metadata_rollback_sql_is_the_postgres_rollback() {
        let schema = InitialSchema::new();
        assert_eq!(schema.metadata().rollback_sql, schema.rollback_sql(Dialect::Postgres));
    }

    #[test]
    fn postgres_rollback_cascades() {
        let sql = InitialSchema::new().rollback_sql(Dialect::Postgres);
        assert_eq!(
            sql,
            "DROP TABLE IF EXISTS embeddings CASCADE;\n\
             DROP TABLE IF EXISTS documents CASCADE;\n\
             DROP TABLE IF EXISTS chat_messages CASCADE;\n\
             DROP TABLE IF EXISTS chat_sessions CASCADE;\n\
             DROP TABLE IF EXISTS users CASCADE;"
        );
        assert!(!InitialSchema::new().rollback_sql(Dialect::Sqlite).contains("CASCADE"));
    }

    #[test]
    fn render_script_wraps_statements_in_a_transaction() {
        let script = render_script(&InitialSchema::new(), Direction::Up, Dialect::Postgres);
        assert!(script.starts_with("-- 001_initial_schema (up, postgres)\n"));
        assert!(script.contains("\nBEGIN;\n"));
        assert!(script.trim_end().ends_with("COMMIT;"));
        assert!(script.contains("id SERIAL PRIMARY KEY"));
        assert!(script.contains("CREATE INDEX IF NOT EXISTS idx_embeddings_document_id"));
    }

    #[test]
    fn registry_orders_cleanly() {
        let registry = registry();
        let ordered = ordered(&registry).unwrap();
        assert_eq!(ordered.len(), registry.len());
        assert_eq!(ordered[0].metadata().version, "001");
    }
}
