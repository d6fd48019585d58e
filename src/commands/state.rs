use clap::{Args, Subcommand};
use serde::Serialize;
use serde_json::Value;

use launchpad::state::{
    AuthStateUpdate, ErrorState, InfrastructureState, Phase, PhaseReport, PipelineStateUpdate,
    PipelineStatus, ProgressReport, StateSnapshot, StateStore,
};

use super::{merge_json_sources, CmdResult, GlobalArgs};

#[derive(Args)]
pub struct StateArgs {
    #[command(subcommand)]
    command: StateCommand,
}

#[derive(Subcommand)]
enum StateCommand {
    /// Print the full state snapshot
    Show,
    /// Per-phase status and overall progress
    Status,
    /// Record infrastructure provisioning output (merged into the current values)
    Infra(InfraArgs),
    /// Record authentication results
    Auth {
        #[arg(long)]
        gcp: Option<bool>,
        #[arg(long)]
        github: Option<bool>,
        #[arg(long)]
        gcp_project: Option<String>,
        #[arg(long)]
        github_user: Option<String>,
    },
    /// Record pipeline progress
    Pipeline {
        #[arg(long)]
        committed: Option<bool>,
        #[arg(long)]
        running: Option<bool>,
        /// pending, running, success or failed
        #[arg(long)]
        status: Option<String>,
    },
    /// Reset every phase after the given one
    Reset {
        /// Phase to keep (authentication, infrastructure, secrets, github_setup, pipeline)
        phase: String,
    },
    /// Clear the recorded error
    ClearError,
}

/// Infrastructure fields as JSON plus `--key value` overrides.
///
/// When combining `--json` with overrides, add an explicit `--` first:
/// `launchpad state infra --json '{"region":"us-east1"}' -- --setup_complete true`
#[derive(Args, Default, Debug)]
pub struct InfraArgs {
    /// JSON spec (positional, supports @file and - for stdin)
    pub spec: Option<String>,

    /// Explicit JSON spec (takes precedence over positional)
    #[arg(long, value_name = "JSON")]
    pub json: Option<String>,

    /// Field overrides (e.g., --project_id my-project)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub extra: Vec<String>,
}

impl InfraArgs {
    fn json_spec(&self) -> Option<&str> {
        self.json.as_deref().or(self.spec.as_deref())
    }
}

#[derive(Debug, Default, Serialize)]
pub struct StateOutput {
    command: String,
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<StateSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    phases: Option<Vec<PhaseReport>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    progress: Option<ProgressReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    updated: Option<Vec<String>>,
}

pub fn run(args: StateArgs, global: &GlobalArgs) -> CmdResult<StateOutput> {
    let store = global.store()?;
    let path = store.path().display().to_string();

    let output = match args.command {
        StateCommand::Show => StateOutput {
            command: "state.show".to_string(),
            state: Some(store.snapshot()?),
            ..Default::default()
        },
        StateCommand::Status => {
            let snapshot = store.snapshot()?;
            StateOutput {
                command: "state.status".to_string(),
                phases: Some(snapshot.phase_status()),
                progress: Some(snapshot.progress()),
                error: Some(snapshot.error),
                ..Default::default()
            }
        }
        StateCommand::Infra(infra) => {
            let (state, updated) = set_infrastructure(&store, &infra)?;
            StateOutput {
                command: "state.infra".to_string(),
                state: Some(state),
                updated: Some(updated),
                ..Default::default()
            }
        }
        StateCommand::Auth {
            gcp,
            github,
            gcp_project,
            github_user,
        } => {
            store.update_auth_state(&AuthStateUpdate {
                gcp_authenticated: gcp,
                github_authenticated: github,
                gcp_project,
                github_user,
            })?;
            StateOutput {
                command: "state.auth".to_string(),
                state: Some(store.snapshot()?),
                ..Default::default()
            }
        }
        StateCommand::Pipeline {
            committed,
            running,
            status,
        } => {
            let status = status.as_deref().map(parse_pipeline_status).transpose()?;
            store.update_pipeline_state(&PipelineStateUpdate {
                committed,
                running,
                status,
            })?;
            StateOutput {
                command: "state.pipeline".to_string(),
                state: Some(store.snapshot()?),
                ..Default::default()
            }
        }
        StateCommand::Reset { phase } => {
            let phase: Phase = phase.parse()?;
            let state = store.reset_to_phase(phase)?;
            launchpad::log_status!("state", "Reset to {}", phase);
            StateOutput {
                command: "state.reset".to_string(),
                state: Some(state),
                ..Default::default()
            }
        }
        StateCommand::ClearError => {
            store.clear_error()?;
            StateOutput {
                command: "state.clear_error".to_string(),
                error: Some(store.get_error()?),
                ..Default::default()
            }
        }
    };

    Ok((StateOutput { path, ..output }, 0))
}

fn set_infrastructure(
    store: &dyn StateStore,
    args: &InfraArgs,
) -> launchpad::Result<(StateSnapshot, Vec<String>)> {
    let patch = merge_json_sources(args.json_spec(), &args.extra)?;
    let Value::Object(fields) = patch else {
        return Err(launchpad::Error::validation_invalid_argument(
            "json",
            "Infrastructure spec must be a JSON object",
            None,
            None,
        ));
    };
    if fields.is_empty() {
        return Err(launchpad::Error::validation_missing_argument(vec![
            "json".to_string(),
        ]));
    }

    let current = store.get_infrastructure_state()?;
    let mut merged = serde_json::to_value(&current).map_err(|e| {
        launchpad::Error::internal_json(e.to_string(), Some("serialize infrastructure".to_string()))
    })?;
    let mut updated: Vec<String> = fields.keys().cloned().collect();
    updated.sort();
    if let Value::Object(target) = &mut merged {
        target.extend(fields);
    }

    let infrastructure: InfrastructureState = serde_json::from_value(merged).map_err(|e| {
        launchpad::Error::validation_invalid_json(
            e,
            Some("deserialize infrastructure".to_string()),
            None,
        )
    })?;
    store.update_infrastructure_state(&infrastructure)?;

    Ok((store.snapshot()?, updated))
}

fn parse_pipeline_status(raw: &str) -> launchpad::Result<PipelineStatus> {
    serde_json::from_value(Value::String(raw.to_ascii_lowercase())).map_err(|_| {
        launchpad::Error::validation_invalid_argument(
            "status",
            format!("Unknown pipeline status '{}'", raw),
            None,
            Some(
                ["pending", "running", "success", "failed"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            ),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use launchpad::state::MemoryStateStore;

    fn infra_args(spec: &str, extra: &[&str]) -> InfraArgs {
        InfraArgs {
            spec: Some(spec.to_string()),
            json: None,
            extra: extra.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn infra_fields_merge_into_current_values() {
        let store = MemoryStateStore::new();
        set_infrastructure(&store, &infra_args(r#"{"project_id":"proj-1"}"#, &[])).unwrap();
        let (state, updated) = set_infrastructure(
            &store,
            &infra_args(r#"{"region":"europe-west1"}"#, &["--iam_configured", "true"]),
        )
        .unwrap();

        assert_eq!(state.infrastructure.project_id, "proj-1");
        assert_eq!(state.infrastructure.region, "europe-west1");
        assert!(state.infrastructure.iam_configured);
        assert_eq!(updated, vec!["iam_configured".to_string(), "region".to_string()]);
    }

    #[test]
    fn incomplete_identifiers_cannot_be_marked_complete() {
        let store = MemoryStateStore::new();
        let err = set_infrastructure(
            &store,
            &infra_args(r#"{"project_id":"proj-1","setup_complete":true}"#, &[]),
        )
        .unwrap_err();

        assert_eq!(err.code.as_str(), "validation.invalid_argument");
        assert_eq!(store.commit_count(), 0);
    }

    #[test]
    fn non_object_spec_is_rejected() {
        let store = MemoryStateStore::new();
        let err = set_infrastructure(&store, &infra_args("[1,2]", &[])).unwrap_err();
        assert_eq!(err.code.as_str(), "validation.invalid_argument");
    }

    #[test]
    fn pipeline_status_parses_known_values() {
        assert_eq!(parse_pipeline_status("Success").unwrap(), PipelineStatus::Success);
        assert!(parse_pipeline_status("deployed").is_err());
    }
}
