use std::path::PathBuf;

use clap::{Args, Subcommand};
use serde::Serialize;

use launchpad::defaults;
use launchpad::migration::{
    self, Dialect, Direction, Environment, MigrationRunner, MigrationStatus, RollbackReport,
    RunReport, SqliteConnection,
};

use super::CmdResult;

#[derive(Args)]
pub struct MigrateArgs {
    /// SQLite database file (or sqlite:// URL)
    #[arg(long, short = 'd', global = true, value_name = "PATH")]
    database: Option<String>,

    /// Target environment (development, staging, production)
    #[arg(long, short = 'e', global = true)]
    environment: Option<String>,

    #[command(subcommand)]
    command: MigrateCommand,
}

#[derive(Subcommand)]
enum MigrateCommand {
    /// Apply every pending migration
    Run {
        /// List what would run without touching the database
        #[arg(long)]
        dry_run: bool,
    },
    /// Roll back one applied migration
    Rollback {
        /// Version (001) or full name (001_initial_schema)
        version: String,
    },
    /// History counts, recent runs and pending migrations
    Status,
    /// Print a migration as a SQL script
    Sql {
        /// Version (001) or full name (001_initial_schema)
        version: String,
        /// Print the rollback script instead
        #[arg(long)]
        rollback: bool,
        /// postgres or sqlite
        #[arg(long, default_value = "postgres")]
        dialect: String,
    },
}

pub fn is_text_output(args: &MigrateArgs) -> bool {
    matches!(args.command, MigrateCommand::Sql { .. })
}

#[derive(Debug, Serialize)]
#[serde(tag = "command")]
pub enum MigrateOutput {
    #[serde(rename = "migrate.run")]
    Run {
        database: String,
        #[serde(flatten)]
        report: RunReport,
    },
    #[serde(rename = "migrate.rollback")]
    Rollback {
        database: String,
        #[serde(flatten)]
        report: RollbackReport,
    },
    #[serde(rename = "migrate.status")]
    Status {
        database: String,
        #[serde(flatten)]
        status: MigrationStatus,
    },
}

pub fn run_json(args: MigrateArgs) -> CmdResult<MigrateOutput> {
    let environment = environment(args.environment.as_deref())?;
    let path = database_path(args.database.as_deref())?;
    let database = path.display().to_string();

    let mut conn = SqliteConnection::open(&path)?;
    let mut runner = MigrationRunner::new(&mut conn, environment, migration::registry());

    let output = match args.command {
        MigrateCommand::Run { dry_run } => MigrateOutput::Run {
            database,
            report: runner.run_all(dry_run)?,
        },
        MigrateCommand::Rollback { version } => MigrateOutput::Rollback {
            database,
            report: runner.rollback(&version)?,
        },
        MigrateCommand::Status => MigrateOutput::Status {
            database,
            status: runner.status()?,
        },
        MigrateCommand::Sql { .. } => {
            return Err(launchpad::Error::validation_invalid_argument(
                "output_mode",
                "migrate sql uses text output",
                None,
                None,
            ))
        }
    };

    Ok((output, 0))
}

pub fn run_text(args: MigrateArgs) -> launchpad::Result<(String, i32)> {
    match args.command {
        MigrateCommand::Sql {
            version,
            rollback,
            dialect,
        } => {
            let dialect: Dialect = dialect.parse()?;
            let registry = migration::registry();
            let migration = migration::find(&registry, &version)?;
            let direction = if rollback {
                Direction::Down
            } else {
                Direction::Up
            };
            Ok((migration::render_script(migration, direction, dialect), 0))
        }
        _ => Err(launchpad::Error::validation_invalid_argument(
            "output_mode",
            "Command does not support text output",
            None,
            None,
        )),
    }
}

fn environment(raw: Option<&str>) -> launchpad::Result<Environment> {
    match raw {
        Some(raw) => raw.parse(),
        None => defaults::load_defaults().environment.parse(),
    }
}

/// Accepts a file path or a `sqlite://` URL. Server URLs are rejected:
/// those databases take the scripts from `migrate sql`.
fn database_path(raw: Option<&str>) -> launchpad::Result<PathBuf> {
    let raw = raw.ok_or_else(|| {
        launchpad::Error::validation_missing_argument(vec!["--database".to_string()])
    })?;

    if let Some(path) = raw
        .strip_prefix("sqlite:///")
        .map(|p| format!("/{}", p))
        .or_else(|| raw.strip_prefix("sqlite://").map(str::to_string))
    {
        return launchpad::paths::expand(&path);
    }

    if raw.contains("://") {
        return Err(launchpad::Error::validation_invalid_argument(
            "database",
            "Only SQLite databases can be migrated directly",
            Some(raw.split("://").next().unwrap_or_default().to_string()),
            None,
        )
        .with_hint("Use 'launchpad migrate sql <version> --dialect postgres' and run the script with psql"));
    }

    launchpad::paths::expand(raw)
}
