//! Result type shared by the gated bootstrap stages.
//!
//! Stages never return `Err` for expected failures: an unmet precondition
//! or an I/O problem becomes a failed [`StepOutcome`] carrying the reason,
//! so the caller decides what runs next.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, ErrorCode, Result};
use crate::state::{Phase, StateStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    PreconditionFailed,
    IoFailure,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub step: String,
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl StepOutcome {
    pub fn succeeded(step: &str, message: impl Into<String>) -> Self {
        Self {
            step: step.to_string(),
            success: true,
            message: message.into(),
            failure: None,
            error_code: None,
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Convert an error raised inside a stage. Precondition errors keep
    /// their kind, everything else is an I/O failure.
    pub fn from_error(step: &str, err: &Error) -> Self {
        let failure = if err.code == ErrorCode::StatePreconditionFailed {
            FailureKind::PreconditionFailed
        } else {
            FailureKind::IoFailure
        };

        Self {
            step: step.to_string(),
            success: false,
            message: err.describe(),
            failure: Some(failure),
            error_code: Some(err.code.as_str().to_string()),
            details: Some(err.details.clone()),
        }
    }

    pub fn is_precondition_failure(&self) -> bool {
        self.failure == Some(FailureKind::PreconditionFailed)
    }
}

/// Mirror an outcome into the error bucket: failures are recorded against
/// `phase`, a success clears a previously recorded error.
pub fn record_outcome(store: &dyn StateStore, phase: Phase, outcome: &StepOutcome) -> Result<()> {
    if !outcome.success {
        return store.set_error(&outcome.message, phase);
    }
    if store.get_error()?.has_error {
        store.clear_error()?;
    }
    Ok(())
}
