use clap::{Parser, Subcommand};

use commands::GlobalArgs;

#[derive(Debug, Clone, Copy)]
enum ResponseMode {
    Json,
    Text,
}

mod commands;
mod output;
mod tty;

use commands::{bootstrap, config, migrate, secrets, state, workflow};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "launchpad")]
#[command(version = VERSION)]
#[command(about = "Bootstrap CI/CD for Cloud Run: secrets, workflows and schema migrations")]
struct Cli {
    /// State file (defaults to ~/.config/launchpad/state.json)
    #[arg(long, global = true, value_name = "PATH")]
    state: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and edit the bootstrap state
    State(state::StateArgs),
    /// Extract and push deployment secrets
    Secrets(secrets::SecretsArgs),
    /// Generate, render or patch the deployment workflow
    Workflow(workflow::WorkflowArgs),
    /// Apply, roll back and inspect schema migrations
    Migrate(migrate::MigrateArgs),
    /// Run secrets extraction and workflow generation in order
    Bootstrap(bootstrap::BootstrapArgs),
    /// Manage global launchpad configuration
    Config(config::ConfigArgs),
}

fn response_mode(command: &Commands) -> ResponseMode {
    match command {
        Commands::Workflow(args) if workflow::is_text_output(args) => ResponseMode::Text,
        Commands::Migrate(args) if migrate::is_text_output(args) => ResponseMode::Text,
        _ => ResponseMode::Json,
    }
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    let global = GlobalArgs { state: cli.state };

    if let ResponseMode::Text = response_mode(&cli.command) {
        return match commands::run_text(cli.command, &global) {
            Ok((content, exit_code)) => {
                print!("{}", content);
                std::process::ExitCode::from(exit_code_to_u8(exit_code))
            }
            Err(err) => {
                let exit_code = output::exit_code_for_error(err.code);
                report_print_failure(output::print_result::<serde_json::Value>(Err(err)));
                std::process::ExitCode::from(exit_code_to_u8(exit_code))
            }
        };
    }

    let (json_result, exit_code) = commands::run_json(cli.command, &global);
    report_print_failure(output::print_json_result(json_result));

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn report_print_failure(result: launchpad::Result<()>) {
    if let Err(err) = result {
        eprintln!("launchpad: {}", err.describe());
    }
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mode_for(args: &[&str]) -> ResponseMode {
        let cli = Cli::try_parse_from(args).unwrap();
        response_mode(&cli.command)
    }

    #[test]
    fn render_and_sql_print_text() {
        assert!(matches!(mode_for(&["launchpad", "workflow", "render"]), ResponseMode::Text));
        assert!(matches!(mode_for(&["launchpad", "migrate", "sql", "001"]), ResponseMode::Text));
        assert!(matches!(mode_for(&["launchpad", "workflow", "generate"]), ResponseMode::Json));
        assert!(matches!(mode_for(&["launchpad", "migrate", "status"]), ResponseMode::Json));
    }
}
