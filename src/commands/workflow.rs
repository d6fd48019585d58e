use std::path::PathBuf;

use clap::{Args, Subcommand};
use serde::Serialize;

use launchpad::defaults::Defaults;
use launchpad::patcher::{PatchReport, WorkflowPatcher};
use launchpad::state::{Phase, StateStore};
use launchpad::step::StepOutcome;
use launchpad::workflow::{PipelineGenerator, WorkflowSettings};

use super::{finish_outcome, CmdResult, GlobalArgs};

#[derive(Args)]
pub struct WorkflowArgs {
    #[command(subcommand)]
    command: WorkflowCommand,
}

#[derive(Subcommand)]
enum WorkflowCommand {
    /// Write the deployment workflow for the current state
    Generate,
    /// Print the workflow that `generate` would write
    Render,
    /// Rewrite legacy Container Registry references to Artifact Registry
    Patch {
        /// Workflow file (defaults to the configured workflow path)
        #[arg(long)]
        path: Option<String>,
        /// Registry region (defaults to the infrastructure region)
        #[arg(long)]
        region: Option<String>,
        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,
    },
}

pub fn is_text_output(args: &WorkflowArgs) -> bool {
    matches!(args.command, WorkflowCommand::Render)
}

#[derive(Debug, Serialize)]
#[serde(tag = "command")]
pub enum WorkflowOutput {
    #[serde(rename = "workflow.generate")]
    Generate { outcome: StepOutcome },
    #[serde(rename = "workflow.patch")]
    Patch { report: PatchReport, dry_run: bool },
}

pub fn run(args: WorkflowArgs, global: &GlobalArgs) -> CmdResult<WorkflowOutput> {
    let store = global.store()?;
    let defaults = global.defaults();

    match args.command {
        WorkflowCommand::Generate => {
            let generator = PipelineGenerator::new(&store, WorkflowSettings::from(&defaults));
            let (outcome, exit_code) =
                finish_outcome(&store, Phase::GithubSetup, generator.generate_cicd_yaml())?;
            Ok((WorkflowOutput::Generate { outcome }, exit_code))
        }
        WorkflowCommand::Patch {
            path,
            region,
            dry_run,
        } => {
            let report = patch(&store, &defaults, path, region, dry_run)?;
            Ok((WorkflowOutput::Patch { report, dry_run }, 0))
        }
        WorkflowCommand::Render => Err(launchpad::Error::validation_invalid_argument(
            "output_mode",
            "workflow render uses text output",
            None,
            None,
        )),
    }
}

pub fn run_text(args: WorkflowArgs, global: &GlobalArgs) -> launchpad::Result<(String, i32)> {
    match args.command {
        WorkflowCommand::Render => {
            let store = global.store()?;
            let generator =
                PipelineGenerator::new(&store, WorkflowSettings::from(&global.defaults()));
            Ok((generator.render_cicd_yaml()?, 0))
        }
        _ => Err(launchpad::Error::validation_invalid_argument(
            "output_mode",
            "Command does not support text output",
            None,
            None,
        )),
    }
}

fn patch(
    store: &dyn StateStore,
    defaults: &Defaults,
    path: Option<String>,
    region: Option<String>,
    dry_run: bool,
) -> launchpad::Result<PatchReport> {
    let region = match region {
        Some(region) => region,
        None => {
            let infra = store.get_infrastructure_state()?;
            if infra.region.trim().is_empty() {
                defaults.default_region.clone()
            } else {
                infra.region
            }
        }
    };
    let path = match path {
        Some(raw) => launchpad::paths::expand(&raw)?,
        None => PathBuf::from(&defaults.workflow_path),
    };

    let patcher = WorkflowPatcher::new(&region);
    if !dry_run {
        return patcher.patch_file(&path);
    }

    let content = launchpad::io::read_file(&path, "read workflow")?;
    let (_, mut report) = patcher.patch_text(&content);
    report.path = Some(path.display().to_string());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use launchpad::state::MemoryStateStore;
    use tempfile::tempdir;

    const LEGACY: &str = "      - name: Build\n        run: docker build -t gcr.io/$PROJECT_ID/app:${{ github.sha }} .\n";

    #[test]
    fn patch_region_falls_back_to_infrastructure_then_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("deploy.yml");
        std::fs::write(&path, LEGACY).unwrap();
        let raw_path = Some(path.display().to_string());

        let store = MemoryStateStore::new();
        let report = patch(&store, &Defaults::default(), raw_path.clone(), None, true).unwrap();
        assert_eq!(report.registry_host, "us-central1-docker.pkg.dev");

        store
            .update(&mut |s| s.infrastructure.region = "asia-east1".to_string())
            .unwrap();
        let report = patch(&store, &Defaults::default(), raw_path, None, true).unwrap();
        assert_eq!(report.registry_host, "asia-east1-docker.pkg.dev");
    }

    #[test]
    fn dry_run_leaves_file_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("deploy.yml");
        std::fs::write(&path, LEGACY).unwrap();

        let report = patch(
            &MemoryStateStore::new(),
            &Defaults::default(),
            Some(path.display().to_string()),
            Some("europe-west1".to_string()),
            true,
        )
        .unwrap();

        assert!(report.changed);
        assert!(!report.written);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), LEGACY);
    }
}
