use crate::dependency::order_by_dependencies;

use super::{Dialect, Migration, MigrationMetadata};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Auto-incrementing integer primary key.
    SerialKey,
    /// Type and constraints written out as-is, e.g. `VARCHAR(255) NOT NULL`.
    Sql(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub column_type: ColumnType,
    /// Referenced `(table, column)`.
    pub references: Option<(&'static str, &'static str)>,
}

impl Column {
    fn render(&self, dialect: Dialect) -> String {
        let definition = match (self.column_type, dialect) {
            (ColumnType::SerialKey, Dialect::Postgres) => "SERIAL PRIMARY KEY",
            (ColumnType::SerialKey, Dialect::Sqlite) => "INTEGER PRIMARY KEY AUTOINCREMENT",
            (ColumnType::Sql(sql), _) => sql,
        };

        match self.references {
            Some((table, column)) => {
                format!("{} {} REFERENCES {}({})", self.name, definition, table, column)
            }
            None => format!("{} {}", self.name, definition),
        }
    }
}

fn serial(name: &'static str) -> Column {
    Column {
        name,
        column_type: ColumnType::SerialKey,
        references: None,
    }
}

fn col(name: &'static str, sql: &'static str) -> Column {
    Column {
        name,
        column_type: ColumnType::Sql(sql),
        references: None,
    }
}

fn fk(name: &'static str, sql: &'static str, table: &'static str, column: &'static str) -> Column {
    Column {
        name,
        column_type: ColumnType::Sql(sql),
        references: Some((table, column)),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub name: &'static str,
    pub columns: Vec<Column>,
}

impl TableDef {
    /// Tables this one references.
    pub fn depends_on(&self) -> Vec<String> {
        let mut tables: Vec<String> = self
            .columns
            .iter()
            .filter_map(|c| c.references.map(|(table, _)| table.to_string()))
            .collect();
        tables.dedup();
        tables
    }

    pub fn create_sql(&self, dialect: Dialect) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| format!("    {}", c.render(dialect)))
            .collect::<Vec<_>>()
            .join(",\n");
        format!("CREATE TABLE IF NOT EXISTS {} (\n{}\n)", self.name, columns)
    }

    pub fn drop_sql(&self, dialect: Dialect) -> String {
        match dialect {
            Dialect::Postgres => format!("DROP TABLE IF EXISTS {} CASCADE", self.name),
            Dialect::Sqlite => format!("DROP TABLE IF EXISTS {}", self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    pub name: &'static str,
    pub table: &'static str,
    pub column: &'static str,
}

impl IndexDef {
    pub fn create_sql(&self) -> String {
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {}({})",
            self.name, self.table, self.column
        )
    }
}

/// `001_initial_schema`: users, chat sessions and messages, uploaded
/// documents and their embeddings.
#[derive(Debug, Clone)]
pub struct InitialSchema {
    tables: Vec<TableDef>,
    indexes: Vec<IndexDef>,
}

impl Default for InitialSchema {
    fn default() -> Self {
        Self::new()
    }
}

impl InitialSchema {
    pub fn new() -> Self {
        let tables = vec![
            TableDef {
                name: "users",
                columns: vec![
                    serial("id"),
                    col("username", "VARCHAR(100) UNIQUE NOT NULL"),
                    col("email", "VARCHAR(255) UNIQUE NOT NULL"),
                    col("created_at", "TIMESTAMP DEFAULT CURRENT_TIMESTAMP"),
                    col("updated_at", "TIMESTAMP DEFAULT CURRENT_TIMESTAMP"),
                ],
            },
            TableDef {
                name: "chat_sessions",
                columns: vec![
                    serial("id"),
                    col("session_id", "VARCHAR(255) UNIQUE NOT NULL"),
                    fk("user_id", "INTEGER", "users", "id"),
                    col("title", "VARCHAR(500)"),
                    col("created_at", "TIMESTAMP DEFAULT CURRENT_TIMESTAMP"),
                    col("updated_at", "TIMESTAMP DEFAULT CURRENT_TIMESTAMP"),
                ],
            },
            TableDef {
                name: "chat_messages",
                columns: vec![
                    serial("id"),
                    fk("session_id", "VARCHAR(255)", "chat_sessions", "session_id"),
                    col(
                        "role",
                        "VARCHAR(20) NOT NULL CHECK (role IN ('user', 'assistant'))",
                    ),
                    col("content", "TEXT NOT NULL"),
                    col("response", "TEXT"),
                    col("context", "JSONB"),
                    col("source", "JSONB"),
                    col("confidence", "FLOAT"),
                    col("created_at", "TIMESTAMP DEFAULT CURRENT_TIMESTAMP"),
                ],
            },
            TableDef {
                name: "documents",
                columns: vec![
                    serial("id"),
                    col("filename", "VARCHAR(255) NOT NULL"),
                    col("file_path", "VARCHAR(500)"),
                    col("file_size", "BIGINT"),
                    col("content_type", "VARCHAR(100)"),
                    col("uploaded_at", "TIMESTAMP DEFAULT CURRENT_TIMESTAMP"),
                    col("processed_at", "TIMESTAMP"),
                    col("status", "VARCHAR(20) DEFAULT 'pending'"),
                ],
            },
            TableDef {
                name: "embeddings",
                columns: vec![
                    serial("id"),
                    fk("document_id", "INTEGER", "documents", "id"),
                    col("chunk_text", "TEXT NOT NULL"),
                    col("embedding_vector", "JSONB NOT NULL"),
                    col("metadata", "JSONB"),
                    col("created_at", "TIMESTAMP DEFAULT CURRENT_TIMESTAMP"),
                ],
            },
        ];

        let indexes = vec![
            IndexDef {
                name: "idx_chat_sessions_user_id",
                table: "chat_sessions",
                column: "user_id",
            },
            IndexDef {
                name: "idx_chat_messages_session_id",
                table: "chat_messages",
                column: "session_id",
            },
            IndexDef {
                name: "idx_embeddings_document_id",
                table: "embeddings",
                column: "document_id",
            },
        ];

        Self { tables, indexes }
    }

    pub fn tables(&self) -> &[TableDef] {
        &self.tables
    }

    pub fn indexes(&self) -> &[IndexDef] {
        &self.indexes
    }

    /// Tables in creation order: every table after the tables it references.
    /// The declarations are static, so a failure here is a programming
    /// error and falls back to declaration order.
    pub fn creation_order(&self) -> Vec<&TableDef> {
        order_by_dependencies(
            &self.tables,
            "tables",
            |t| t.name.to_string(),
            TableDef::depends_on,
        )
        .unwrap_or_else(|_| self.tables.iter().collect())
    }
}

impl Migration for InitialSchema {
    fn metadata(&self) -> MigrationMetadata {
        MigrationMetadata {
            version: "001".to_string(),
            name: "initial_schema".to_string(),
            description: "Create initial database schema for finance chatbot".to_string(),
            author: "NeuroGent Team".to_string(),
            created_at: "2025-01-14".to_string(),
            dependencies: Vec::new(),
            rollback_sql: self.rollback_sql(Dialect::Postgres),
        }
    }

    fn up_statements(&self, dialect: Dialect) -> Vec<String> {
        self.creation_order()
            .into_iter()
            .map(|t| t.create_sql(dialect))
            .chain(self.indexes.iter().map(IndexDef::create_sql))
            .collect()
    }

    fn down_statements(&self, dialect: Dialect) -> Vec<String> {
        self.creation_order()
            .into_iter()
            .rev()
            .map(|t| t.drop_sql(dialect))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::{SqlConnection, SqliteConnection};

    fn position(order: &[&TableDef], name: &str) -> usize {
        order.iter().position(|t| t.name == name).unwrap()
    }

    #[test]
    fn creation_order_respects_foreign_keys() {
        let schema = InitialSchema::new();
        let order = schema.creation_order();

        assert_eq!(order.len(), 5);
        assert!(position(&order, "users") < position(&order, "chat_sessions"));
        assert!(position(&order, "chat_sessions") < position(&order, "chat_messages"));
        assert!(position(&order, "documents") < position(&order, "embeddings"));
    }

    #[test]
    fn creation_order_reorders_out_of_order_declarations() {
        let mut schema = InitialSchema::new();
        schema.tables.reverse();

        let order = schema.creation_order();
        assert!(position(&order, "users") < position(&order, "chat_sessions"));
        assert!(position(&order, "chat_sessions") < position(&order, "chat_messages"));
        assert!(position(&order, "documents") < position(&order, "embeddings"));
    }

    #[test]
    fn down_statements_reverse_creation_order() {
        let schema = InitialSchema::new();
        let created: Vec<&str> = schema.creation_order().iter().map(|t| t.name).collect();
        let dropped: Vec<String> = schema.down_statements(Dialect::Sqlite);

        let expected: Vec<String> = created
            .iter()
            .rev()
            .map(|name| format!("DROP TABLE IF EXISTS {}", name))
            .collect();
        assert_eq!(dropped, expected);
    }

    #[test]
    fn up_statements_create_tables_then_indexes() {
        let statements = InitialSchema::new().up_statements(Dialect::Postgres);
        assert_eq!(statements.len(), 8);
        assert!(statements[..5].iter().all(|s| s.starts_with("CREATE TABLE IF NOT EXISTS")));
        assert!(statements[5..].iter().all(|s| s.starts_with("CREATE INDEX IF NOT EXISTS")));
    }

    #[test]
    fn serial_keys_render_per_dialect() {
        let schema = InitialSchema::new();
        let users = &schema.tables()[0];
        assert!(users.create_sql(Dialect::Postgres).contains("    id SERIAL PRIMARY KEY,\n"));
        assert!(users
            .create_sql(Dialect::Sqlite)
            .contains("    id INTEGER PRIMARY KEY AUTOINCREMENT,\n"));
    }

    #[test]
    fn references_render_inline() {
        let schema = InitialSchema::new();
        let sessions = &schema.tables()[1];
        assert!(sessions
            .create_sql(Dialect::Postgres)
            .contains("user_id INTEGER REFERENCES users(id)"));
        assert_eq!(sessions.depends_on(), vec!["users".to_string()]);
    }

    #[test]
    fn apply_twice_then_rollback_leaves_no_tables() {
        let mut conn = SqliteConnection::open_in_memory().unwrap();
        let schema = InitialSchema::new();

        schema.apply(&mut conn).unwrap();
        schema.apply(&mut conn).unwrap();
        assert_eq!(conn.table_names().unwrap().len(), 5);

        schema.rollback(&mut conn).unwrap();
        assert!(conn.table_names().unwrap().is_empty());
        assert!(!conn.in_transaction());
    }

    struct HalfBuilt;

    impl Migration for HalfBuilt {
        fn metadata(&self) -> MigrationMetadata {
            MigrationMetadata {
                version: "900".to_string(),
                name: "half_built".to_string(),
                description: "second statement is malformed".to_string(),
                author: "tests".to_string(),
                created_at: "2025-01-15".to_string(),
                dependencies: Vec::new(),
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

    #[test]
    fn failed_apply_leaves_transaction_open_for_caller() {
        let mut conn = SqliteConnection::open_in_memory().unwrap();

        let err = HalfBuilt.apply(&mut conn).unwrap_err();
        assert_eq!(err.code.as_str(), "database.statement_failed");
        assert!(conn.in_transaction());

        conn.rollback().unwrap();
        assert!(!conn.in_transaction());
        assert!(conn.table_names().unwrap().is_empty());
    }
}
