//! CLI response formatting and output.
//!
//! Provides JSON envelope, printing, and exit code mapping.

use launchpad::error::Hint;
use launchpad::step::StepOutcome;
use launchpad::{Error, ErrorCode, Result};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct CliResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CliError>,
}

#[derive(Debug, Serialize)]
pub struct CliError {
    pub code: String,
    pub message: String,
    pub details: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hints: Option<Vec<Hint>>,
}

impl<T: Serialize> CliResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            Error::internal_json(e.to_string(), Some("serialize response".to_string()))
        })
    }
}

impl CliResponse<()> {
    pub fn from_error(err: &Error) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(CliError {
                code: err.code.as_str().to_string(),
                message: err.message.clone(),
                details: err.details.clone(),
                hints: if err.hints.is_empty() {
                    None
                } else {
                    Some(err.hints.clone())
                },
            }),
        }
    }
}

fn print_response<T: Serialize>(response: &CliResponse<T>) -> Result<()> {
    use std::io::{self, Write};

    let payload = response.to_json()?;
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    if let Err(e) = writeln!(handle, "{}", payload) {
        if e.kind() == io::ErrorKind::BrokenPipe {
            return Ok(()); // Exit gracefully on SIGPIPE
        }
        return Err(Error::internal_io(
            e.to_string(),
            Some("write stdout".to_string()),
        ));
    }
    Ok(())
}

pub fn print_success<T: Serialize>(data: T) -> Result<()> {
    print_response(&CliResponse::success(data))
}

pub fn print_result<T: Serialize>(result: Result<T>) -> Result<()> {
    match result {
        Ok(data) => print_success(data),
        Err(err) => print_response(&CliResponse::<()>::from_error(&err)),
    }
}

pub fn map_cmd_result_to_json<T: Serialize>(
    result: Result<(T, i32)>,
) -> (Result<serde_json::Value>, i32) {
    match result {
        Ok((data, exit_code)) => match serde_json::to_value(data) {
            Ok(value) => (Ok(value), exit_code),
            Err(err) => (
                Err(Error::internal_json(
                    err.to_string(),
                    Some("serialize response".to_string()),
                )),
                1,
            ),
        },
        Err(err) => {
            let exit_code = exit_code_for_error(err.code);
            (Err(err), exit_code)
        }
    }
}

pub fn exit_code_for_error(code: ErrorCode) -> i32 {
    match code {
        ErrorCode::ConfigInvalidJson
        | ErrorCode::ConfigInvalidValue
        | ErrorCode::ValidationMissingArgument
        | ErrorCode::ValidationInvalidArgument
        | ErrorCode::ValidationInvalidJson => 2,

        ErrorCode::StatePreconditionFailed => 3,

        ErrorCode::MigrationNotFound | ErrorCode::MigrationNotApplied => 4,

        ErrorCode::DatabaseConnectFailed | ErrorCode::DatabaseStatementFailed => 5,

        ErrorCode::CommandFailed
        | ErrorCode::InternalIoError
        | ErrorCode::InternalJsonError
        | ErrorCode::InternalUnexpected => 1,
    }
}

/// Exit code for a stage that reported its own failure.
pub fn exit_code_for_outcome(outcome: &StepOutcome) -> i32 {
    if outcome.success {
        0
    } else if outcome.is_precondition_failure() {
        exit_code_for_error(ErrorCode::StatePreconditionFailed)
    } else {
        1
    }
}

pub fn print_json_result(result: Result<serde_json::Value>) -> Result<()> {
    match result {
        Ok(data) => print_success(data),
        Err(err) => print_response(&CliResponse::<()>::from_error(&err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_map_to_exit_codes() {
        assert_eq!(exit_code_for_error(ErrorCode::ValidationInvalidJson), 2);
        assert_eq!(exit_code_for_error(ErrorCode::StatePreconditionFailed), 3);
        assert_eq!(exit_code_for_error(ErrorCode::MigrationNotApplied), 4);
        assert_eq!(exit_code_for_error(ErrorCode::DatabaseStatementFailed), 5);
        assert_eq!(exit_code_for_error(ErrorCode::InternalIoError), 1);
    }

    #[test]
    fn failed_outcomes_use_their_kind() {
        let precondition = StepOutcome::from_error(
            "secrets.extract",
            &Error::precondition_failed("secrets", "infrastructure setup"),
        );
        assert_eq!(exit_code_for_outcome(&precondition), 3);

        let io = StepOutcome::from_error("workflow.generate", &Error::internal_io("denied", None));
        assert_eq!(exit_code_for_outcome(&io), 1);

        let ok = StepOutcome::succeeded("workflow.generate", "done");
        assert_eq!(exit_code_for_outcome(&ok), 0);
    }

    #[test]
    fn error_envelope_omits_empty_hints() {
        let response = CliResponse::<()>::from_error(&Error::internal_unexpected("boom"));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "internal.unexpected");
        assert!(json["error"].get("hints").is_none());
        assert!(json.get("data").is_none());
    }
}
