//! Runs the gated stages in order: extract secrets, optionally push them,
//! generate the workflow. The first failed stage stops the run.

use serde::Serialize;

use crate::defaults::Defaults;
use crate::error::Result;
use crate::secrets::{SecretSink, SecretsExtractor, SecretsSettings, STEP_EXTRACT, STEP_PUSH};
use crate::state::{Phase, ProgressReport, StateStore};
use crate::step::{record_outcome, StepOutcome};
use crate::workflow::{PipelineGenerator, WorkflowSettings, STEP_GENERATE};

#[derive(Debug, Clone, Default)]
pub struct BootstrapOptions {
    pub push_secrets: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: String,
    pub phase: Phase,
    pub status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<StepOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BootstrapReport {
    pub success: bool,
    pub stages: Vec<StageReport>,
    pub progress: ProgressReport,
}

impl BootstrapReport {
    pub fn failed_stage(&self) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.status == StageStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    Extract,
    Push,
    Generate,
}

impl Stage {
    fn name(&self) -> &'static str {
        match self {
            Stage::Extract => STEP_EXTRACT,
            Stage::Push => STEP_PUSH,
            Stage::Generate => STEP_GENERATE,
        }
    }

    fn phase(&self) -> Phase {
        match self {
            Stage::Extract => Phase::Secrets,
            Stage::Push | Stage::Generate => Phase::GithubSetup,
        }
    }
}

/// Run every stage against `store`. Failures come back inside the report
/// and are recorded in the error bucket; `Err` means the store itself
/// could not be read or written.
pub fn run_bootstrap(
    store: &dyn StateStore,
    defaults: &Defaults,
    options: &BootstrapOptions,
    sink: &dyn SecretSink,
) -> Result<BootstrapReport> {
    let extractor = SecretsExtractor::new(store, SecretsSettings::from(defaults));
    let generator = PipelineGenerator::new(store, WorkflowSettings::from(defaults));

    let mut plan = vec![Stage::Extract];
    if options.push_secrets {
        plan.push(Stage::Push);
    }
    plan.push(Stage::Generate);

    let mut stages = Vec::with_capacity(plan.len());
    let mut failed = false;

    for stage in plan {
        if failed {
            stages.push(StageReport {
                stage: stage.name().to_string(),
                phase: stage.phase(),
                status: StageStatus::Skipped,
                outcome: None,
            });
            continue;
        }

        let outcome = match stage {
            Stage::Extract => extractor.extract_all_secrets(),
            Stage::Push => extractor.push_secrets(sink),
            Stage::Generate => generator.generate_cicd_yaml(),
        };
        record_outcome(store, stage.phase(), &outcome)?;

        failed = !outcome.success;
        stages.push(StageReport {
            stage: stage.name().to_string(),
            phase: stage.phase(),
            status: if outcome.success {
                StageStatus::Succeeded
            } else {
                StageStatus::Failed
            },
            outcome: Some(outcome),
        });
    }

    let progress = store.snapshot()?.progress();
    crate::log_status!(
        "bootstrap",
        "{} ({}/{} phases complete)",
        if failed { "Stopped" } else { "Done" },
        progress.completed_steps,
        progress.total_steps
    );

    Ok(BootstrapReport {
        success: !failed,
        stages,
        progress,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::builtin_defaults;
    use crate::error::Error;
    use crate::state::{MemoryStateStore, StateSnapshot};
    use std::cell::RefCell;
    use tempfile::tempdir;

    #[derive(Default)]
    struct RecordingSink {
        names: RefCell<Vec<String>>,
        fail: bool,
    }

    impl SecretSink for RecordingSink {
        fn set_secret(&self, name: &str, _value: &str) -> Result<()> {
            if self.fail {
                return Err(Error::command_failed("gh secret set", Some(1), "HTTP 403"));
            }
            self.names.borrow_mut().push(name.to_string());
            Ok(())
        }
    }

    fn provisioned() -> StateSnapshot {
        let mut snapshot = StateSnapshot::default();
        let infra = &mut snapshot.infrastructure;
        infra.project_id = "proj-1".to_string();
        infra.region = "europe-west1".to_string();
        infra.service_account_email = "deploy@proj-1.iam.gserviceaccount.com".to_string();
        infra.wif_pool = "github-pool".to_string();
        infra.wif_provider = "github-provider".to_string();
        infra.artifact_registry = "repo-1".to_string();
        infra.setup_complete = true;
        snapshot
    }

    fn defaults_in(dir: &std::path::Path) -> Defaults {
        let mut defaults = builtin_defaults();
        defaults.workflow_path = dir.join("deploy.yml").display().to_string();
        defaults
    }

    #[test]
    fn runs_every_stage_on_provisioned_state() {
        let dir = tempdir().unwrap();
        let store = MemoryStateStore::with_snapshot(provisioned());
        let sink = RecordingSink::default();

        let report = run_bootstrap(
            &store,
            &defaults_in(dir.path()),
            &BootstrapOptions { push_secrets: true },
            &sink,
        )
        .unwrap();

        assert!(report.success);
        let statuses: Vec<_> = report.stages.iter().map(|s| s.status).collect();
        assert_eq!(statuses, vec![StageStatus::Succeeded; 3]);
        assert_eq!(sink.names.borrow().len(), 7);
        assert!(dir.path().join("deploy.yml").exists());

        let github = store.get_github_state().unwrap();
        assert!(github.secrets_pushed && github.yaml_generated && github.setup_complete);
        assert!(!store.get_error().unwrap().has_error);
    }

    #[test]
    fn push_is_opt_in() {
        let dir = tempdir().unwrap();
        let store = MemoryStateStore::with_snapshot(provisioned());
        let sink = RecordingSink::default();

        let report = run_bootstrap(
            &store,
            &defaults_in(dir.path()),
            &BootstrapOptions::default(),
            &sink,
        )
        .unwrap();

        assert!(report.success);
        assert_eq!(report.stages.len(), 2);
        assert!(sink.names.borrow().is_empty());
    }

    #[test]
    fn unprovisioned_state_stops_at_extraction() {
        let dir = tempdir().unwrap();
        let store = MemoryStateStore::new();

        let report = run_bootstrap(
            &store,
            &defaults_in(dir.path()),
            &BootstrapOptions::default(),
            &RecordingSink::default(),
        )
        .unwrap();

        assert!(!report.success);
        let failed = report.failed_stage().unwrap();
        assert_eq!(failed.stage, STEP_EXTRACT);
        assert!(failed.outcome.as_ref().unwrap().is_precondition_failure());
        assert_eq!(report.stages[1].status, StageStatus::Skipped);
        assert!(!dir.path().join("deploy.yml").exists());

        let error = store.get_error().unwrap();
        assert!(error.has_error);
        assert_eq!(error.error_phase, Some(Phase::Secrets));
    }

    #[test]
    fn failed_push_skips_generation() {
        let dir = tempdir().unwrap();
        let store = MemoryStateStore::with_snapshot(provisioned());
        let sink = RecordingSink {
            fail: true,
            ..Default::default()
        };

        let report = run_bootstrap(
            &store,
            &defaults_in(dir.path()),
            &BootstrapOptions { push_secrets: true },
            &sink,
        )
        .unwrap();

        assert!(!report.success);
        assert_eq!(report.failed_stage().unwrap().stage, STEP_PUSH);
        assert_eq!(report.stages[2].status, StageStatus::Skipped);
        assert!(!dir.path().join("deploy.yml").exists());
        assert_eq!(store.get_error().unwrap().error_phase, Some(Phase::GithubSetup));
        assert!(store.get_secrets_state().unwrap().secrets_extracted);
    }
}
