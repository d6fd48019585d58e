use clap::Args;

use launchpad::bootstrap::{run_bootstrap, BootstrapOptions, BootstrapReport};
use launchpad::secrets::GhCliSink;

use super::{CmdResult, GlobalArgs};

#[derive(Args)]
pub struct BootstrapArgs {
    /// Push extracted secrets with `gh secret set` before generating the workflow
    #[arg(long)]
    push: bool,

    /// Target repository for pushed secrets (owner/name)
    #[arg(long, requires = "push")]
    repo: Option<String>,
}

pub fn run(args: BootstrapArgs, global: &GlobalArgs) -> CmdResult<BootstrapReport> {
    let store = global.store()?;
    let sink = GhCliSink::new(args.repo);
    let options = BootstrapOptions {
        push_secrets: args.push,
    };

    let report = run_bootstrap(&store, &global.defaults(), &options, &sink)?;
    let exit_code = report
        .failed_stage()
        .and_then(|stage| stage.outcome.as_ref())
        .map(crate::output::exit_code_for_outcome)
        .unwrap_or(0);

    Ok((report, exit_code))
}
