use std::path::Path;

use rusqlite::{Connection, Params};

use crate::error::{Error, Result};

use super::Dialect;

/// The slice of a database connection migrations need: statements run in
/// an implicit transaction that `commit` or `rollback` closes.
pub trait SqlConnection {
    fn dialect(&self) -> Dialect;

    fn execute(&mut self, sql: &str) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;
}

pub struct SqliteConnection {
    conn: Connection,
    in_transaction: bool,
}

impl SqliteConnection {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| Error::database_connect(path.display().to_string(), e.to_string()))?;
        Self::configure(conn, &path.display().to_string())
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::database_connect(":memory:", e.to_string()))?;
        Self::configure(conn, ":memory:")
    }

    fn configure(conn: Connection, label: &str) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| Error::database_connect(label, e.to_string()))?;
        Ok(Self {
            conn,
            in_transaction: false,
        })
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    fn begin(&mut self) -> Result<()> {
        if !self.in_transaction {
            self.conn
                .execute_batch("BEGIN")
                .map_err(|e| Error::database_statement("BEGIN", e.to_string()))?;
            self.in_transaction = true;
        }
        Ok(())
    }

    /// Parameterised statement inside the current transaction.
    pub fn execute_with<P: Params>(&mut self, sql: &str, params: P) -> Result<usize> {
        self.begin()?;
        self.conn
            .execute(sql, params)
            .map_err(|e| Error::database_statement(sql, e.to_string()))
    }

    /// Read-only access for queries.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// User tables currently present, sorted by name.
    pub fn table_names(&self) -> Result<Vec<String>> {
        let sql = "SELECT name FROM sqlite_master \
                   WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name";
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| Error::database_statement(sql, e.to_string()))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| Error::database_statement(sql, e.to_string()))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::database_statement(sql, e.to_string()))
    }
}

impl SqlConnection for SqliteConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn execute(&mut self, sql: &str) -> Result<()> {
        self.begin()?;
        self.conn
            .execute_batch(sql)
            .map_err(|e| Error::database_statement(sql, e.to_string()))
    }

    fn commit(&mut self) -> Result<()> {
        if self.in_transaction {
            self.conn
                .execute_batch("COMMIT")
                .map_err(|e| Error::database_statement("COMMIT", e.to_string()))?;
            self.in_transaction = false;
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if self.in_transaction {
            self.in_transaction = false;
            self.conn
                .execute_batch("ROLLBACK")
                .map_err(|e| Error::database_statement("ROLLBACK", e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statements_stay_invisible_until_commit() {
        let mut conn = SqliteConnection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE t (id INTEGER)").unwrap();
        assert!(conn.in_transaction());

        conn.rollback().unwrap();
        assert!(conn.table_names().unwrap().is_empty());

        conn.execute("CREATE TABLE t (id INTEGER)").unwrap();
        conn.commit().unwrap();
        assert!(!conn.in_transaction());
        assert_eq!(conn.table_names().unwrap(), vec!["t".to_string()]);
    }

    #[test]
    fn failed_statement_reports_sql() {
        let mut conn = SqliteConnection::open_in_memory().unwrap();
        let err = conn.execute("CREATE TABLE (").unwrap_err();
        assert_eq!(err.code.as_str(), "database.statement_failed");
        assert_eq!(err.details["statement"], "CREATE TABLE (");
        conn.rollback().unwrap();
    }

    #[test]
    fn commit_without_statements_is_a_no_op() {
        let mut conn = SqliteConnection::open_in_memory().unwrap();
        conn.commit().unwrap();
        conn.rollback().unwrap();
    }

    #[test]
    fn open_reports_unreachable_path() {
        let err = SqliteConnection::open(Path::new("/nonexistent/dir/app.db"))
            .err()
            .unwrap();
        assert_eq!(err.code.as_str(), "database.connect_failed");
    }
}
