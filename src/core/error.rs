use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigInvalidJson,
    ConfigInvalidValue,

    ValidationMissingArgument,
    ValidationInvalidArgument,
    ValidationInvalidJson,

    StatePreconditionFailed,

    MigrationNotFound,
    MigrationNotApplied,

    DatabaseConnectFailed,
    DatabaseStatementFailed,

    CommandFailed,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigInvalidJson => "config.invalid_json",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",

            ErrorCode::ValidationMissingArgument => "validation.missing_argument",
            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",
            ErrorCode::ValidationInvalidJson => "validation.invalid_json",

            ErrorCode::StatePreconditionFailed => "state.precondition_failed",

            ErrorCode::MigrationNotFound => "migration.not_found",
            ErrorCode::MigrationNotApplied => "migration.not_applied",

            ErrorCode::DatabaseConnectFailed => "database.connect_failed",
            ErrorCode::DatabaseStatementFailed => "database.statement_failed",

            ErrorCode::CommandFailed => "command.failed",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidJsonDetails {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingArgumentDetails {
    pub args: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tried: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreconditionFailedDetails {
    pub phase: String,
    pub required: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationDetails {
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseStatementDetails {
    pub statement: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandFailedDetails {
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub stderr: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalJsonErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

const STATEMENT_PREVIEW_CHARS: usize = 200;

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
        }
    }

    pub fn validation_missing_argument(args: Vec<String>) -> Self {
        Self::new(
            ErrorCode::ValidationMissingArgument,
            "Missing required argument",
            to_details(MissingArgumentDetails { args }),
        )
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        id: Option<String>,
        tried: Option<Vec<String>>,
    ) -> Self {
        let details = to_details(InvalidArgumentDetails {
            field: field.into(),
            problem: problem.into(),
            id,
            tried,
        });

        Self::new(
            ErrorCode::ValidationInvalidArgument,
            "Invalid argument",
            details,
        )
    }

    pub fn validation_invalid_json(
        err: serde_json::Error,
        context: Option<String>,
        input: Option<String>,
    ) -> Self {
        let details = serde_json::json!({
            "error": err.to_string(),
            "context": context,
            "input": input,
        });

        Self::new(ErrorCode::ValidationInvalidJson, "Invalid JSON", details)
    }

    /// A stage was asked to run before the stage it depends on completed.
    pub fn precondition_failed(phase: impl Into<String>, required: impl Into<String>) -> Self {
        let phase = phase.into();
        let required = required.into();
        let message = format!("{} requires {}", phase, required);

        Self::new(
            ErrorCode::StatePreconditionFailed,
            message,
            to_details(PreconditionFailedDetails { phase, required }),
        )
    }

    pub fn migration_not_found(version: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::MigrationNotFound,
            "Migration not found",
            to_details(MigrationDetails {
                version: version.into(),
                environment: None,
            }),
        )
        .with_hint("Run 'launchpad migrate status' to see known migrations")
    }

    pub fn migration_not_applied(version: impl Into<String>, environment: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::MigrationNotApplied,
            "Migration has not been applied in this environment",
            to_details(MigrationDetails {
                version: version.into(),
                environment: Some(environment.into()),
            }),
        )
    }

    pub fn database_connect(path: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::DatabaseConnectFailed,
            "Failed to open database",
            serde_json::json!({ "path": path.into(), "error": error.into() }),
        )
    }

    pub fn database_statement(statement: &str, error: impl Into<String>) -> Self {
        let statement = statement
            .trim()
            .chars()
            .take(STATEMENT_PREVIEW_CHARS)
            .collect::<String>();

        Self::new(
            ErrorCode::DatabaseStatementFailed,
            "Database statement failed",
            to_details(DatabaseStatementDetails {
                statement,
                error: error.into(),
            }),
        )
    }

    pub fn command_failed(
        command: impl Into<String>,
        exit_code: Option<i32>,
        stderr: impl Into<String>,
    ) -> Self {
        let command = command.into();
        Self::new(
            ErrorCode::CommandFailed,
            format!("Command failed: {}", command),
            to_details(CommandFailedDetails {
                command,
                exit_code,
                stderr: stderr.into(),
            }),
        )
    }

    pub fn config_invalid_json(path: impl Into<String>, err: serde_json::Error) -> Self {
        let details = to_details(ConfigInvalidJsonDetails {
            path: path.into(),
            error: err.to_string(),
        });

        Self::new(
            ErrorCode::ConfigInvalidJson,
            "Invalid JSON in configuration",
            details,
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        let details = to_details(ConfigInvalidValueDetails {
            key: key.into(),
            value,
            problem: problem.into(),
        });

        Self::new(
            ErrorCode::ConfigInvalidValue,
            "Invalid configuration value",
            details,
        )
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        let details = to_details(InternalIoErrorDetails {
            error: error.into(),
            context,
        });

        Self::new(ErrorCode::InternalIoError, "IO error", details)
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        let details = to_details(InternalJsonErrorDetails {
            error: error.into(),
            context,
        });

        Self::new(ErrorCode::InternalJsonError, "JSON error", details)
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalUnexpected,
            "Unexpected error",
            serde_json::json!({ "error": error.into() }),
        )
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::internal_unexpected(message)
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }

    /// Message plus the low-level error detail or validation problem, for
    /// logs and step outcomes.
    pub fn describe(&self) -> String {
        let detail = ["error", "problem"].iter().find_map(|key| {
            self.details
                .get(*key)
                .and_then(Value::as_str)
                .filter(|detail| !detail.is_empty())
        });

        match detail {
            Some(detail) => format!("{}: {}", self.message, detail),
            None => self.message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precondition_failed_carries_phase_and_requirement() {
        let err = Error::precondition_failed("secrets", "infrastructure setup");
        assert_eq!(err.code.as_str(), "state.precondition_failed");
        assert_eq!(err.message, "secrets requires infrastructure setup");
        assert_eq!(err.details["phase"], "secrets");
        assert_eq!(err.details["required"], "infrastructure setup");
    }

    #[test]
    fn database_statement_truncates_long_sql() {
        let sql = "X".repeat(500);
        let err = Error::database_statement(&sql, "syntax error");
        let statement = err.details["statement"].as_str().unwrap();
        assert_eq!(statement.len(), STATEMENT_PREVIEW_CHARS);
        assert_eq!(err.describe(), "Database statement failed: syntax error");
    }

    #[test]
    fn describe_falls_back_to_message() {
        let err = Error::validation_missing_argument(vec!["database".to_string()]);
        assert_eq!(err.describe(), "Missing required argument");
    }
}
