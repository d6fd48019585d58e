use clap::{Args, Subcommand};
use serde::Serialize;

use launchpad::secrets::{GhCliSink, SecretsExtractor, SecretsPushPlan, SecretsSettings};
use launchpad::state::Phase;
use launchpad::step::StepOutcome;

use super::{finish_outcome, CmdResult, GlobalArgs};

#[derive(Args)]
pub struct SecretsArgs {
    #[command(subcommand)]
    command: SecretsCommand,
}

#[derive(Subcommand)]
enum SecretsCommand {
    /// Derive GitHub secrets and env vars from the infrastructure state
    Extract,
    /// List the `gh secret set` commands a push would run (values redacted)
    Plan {
        /// Target repository (owner/name); defaults to the current checkout
        #[arg(long)]
        repo: Option<String>,
    },
    /// Push extracted secrets to GitHub
    Push {
        /// Actually run `gh secret set`; without it only the plan is returned
        #[arg(long)]
        execute: bool,
        /// Target repository (owner/name); defaults to the current checkout
        #[arg(long)]
        repo: Option<String>,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "command")]
pub enum SecretsOutput {
    #[serde(rename = "secrets.extract")]
    Extract { outcome: StepOutcome },
    #[serde(rename = "secrets.plan")]
    Plan { plan: SecretsPushPlan, executed: bool },
    #[serde(rename = "secrets.push")]
    Push { outcome: StepOutcome },
}

pub fn run(args: SecretsArgs, global: &GlobalArgs) -> CmdResult<SecretsOutput> {
    let store = global.store()?;
    let extractor = SecretsExtractor::new(&store, SecretsSettings::from(&global.defaults()));

    match args.command {
        SecretsCommand::Extract => {
            let (outcome, exit_code) =
                finish_outcome(&store, Phase::Secrets, extractor.extract_all_secrets())?;
            Ok((SecretsOutput::Extract { outcome }, exit_code))
        }
        SecretsCommand::Plan { repo } => {
            let plan = extractor.plan_secrets_push(repo.as_deref())?;
            Ok((
                SecretsOutput::Plan {
                    plan,
                    executed: false,
                },
                0,
            ))
        }
        SecretsCommand::Push { execute, repo } => {
            if !execute {
                let plan = extractor.plan_secrets_push(repo.as_deref())?;
                launchpad::log_status!(
                    "secrets",
                    "Dry run: {} secrets planned, pass --execute to push",
                    plan.secrets.len()
                );
                return Ok((
                    SecretsOutput::Plan {
                        plan,
                        executed: false,
                    },
                    0,
                ));
            }

            let sink = GhCliSink::new(repo);
            let (outcome, exit_code) =
                finish_outcome(&store, Phase::GithubSetup, extractor.push_secrets(&sink))?;
            Ok((SecretsOutput::Push { outcome }, exit_code))
        }
    }
}
