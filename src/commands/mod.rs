use serde_json::{json, Map, Value};
use std::io::Read;
use std::path::Path;

use launchpad::defaults::{self, Defaults};
use launchpad::state::{JsonFileStateStore, Phase, StateStore};
use launchpad::step::{record_outcome, StepOutcome};

pub type CmdResult<T> = launchpad::Result<(T, i32)>;

pub(crate) struct GlobalArgs {
    /// State file override (`--state`).
    pub state: Option<String>,
}

impl GlobalArgs {
    /// State store at `--state`, or the default location.
    pub fn store(&self) -> launchpad::Result<JsonFileStateStore> {
        match &self.state {
            Some(raw) => Ok(JsonFileStateStore::new(launchpad::paths::expand(raw)?)),
            None => JsonFileStateStore::default_location(),
        }
    }

    pub fn defaults(&self) -> Defaults {
        defaults::load_defaults()
    }
}

/// Record a stage outcome in the error bucket and derive the exit code.
pub(crate) fn finish_outcome(
    store: &dyn StateStore,
    phase: Phase,
    outcome: StepOutcome,
) -> CmdResult<StepOutcome> {
    record_outcome(store, phase, &outcome)?;
    let exit_code = crate::output::exit_code_for_outcome(&outcome);
    Ok((outcome, exit_code))
}

// ============================================================================
// JSON Input Parsing (CLI layer)
// ============================================================================

/// Parse --key value pairs into a JSON object.
fn parse_kv_flags(extra: &[String]) -> launchpad::Result<Value> {
    let mut obj = Map::new();
    let mut iter = extra.iter().peekable();

    while let Some(arg) = iter.next() {
        if let Some(key) = arg.strip_prefix("--") {
            let value = iter.next().ok_or_else(|| {
                launchpad::Error::validation_invalid_argument(
                    key,
                    format!("Missing value for flag --{}", key),
                    None,
                    None,
                )
            })?;
            obj.insert(key.to_string(), parse_value(value));
        }
    }

    Ok(Value::Object(obj))
}

/// Parse a string value into appropriate JSON type.
/// Order: JSON literal → bool → number → string
fn parse_value(s: &str) -> Value {
    if let Ok(v) = serde_json::from_str(s) {
        return v;
    }
    if s == "true" {
        return json!(true);
    }
    if s == "false" {
        return json!(false);
    }
    if let Ok(n) = s.parse::<i64>() {
        return json!(n);
    }
    if let Ok(n) = s.parse::<f64>() {
        return json!(n);
    }
    json!(s)
}

/// Read JSON spec from string, file (@path), or stdin (-).
fn read_json_spec_to_string(spec: &str) -> launchpad::Result<String> {
    use std::io::IsTerminal;

    if spec.trim() == "-" {
        let mut buf = String::new();
        let mut stdin = std::io::stdin();
        if stdin.is_terminal() {
            return Err(launchpad::Error::validation_invalid_argument(
                "json",
                "Cannot read JSON from stdin when stdin is a TTY",
                None,
                None,
            ));
        }
        stdin.read_to_string(&mut buf).map_err(|e| {
            launchpad::Error::internal_io(e.to_string(), Some("read stdin".to_string()))
        })?;
        return Ok(buf);
    }

    if let Some(path) = spec.strip_prefix('@') {
        if path.trim().is_empty() {
            return Err(launchpad::Error::validation_invalid_argument(
                "json",
                "Invalid JSON spec '@' (missing file path)",
                None,
                None,
            ));
        }
        return launchpad::io::read_file(Path::new(path), "read JSON spec");
    }

    Ok(spec.to_string())
}

/// Merge JSON spec with --key value flags. Flags override spec values.
pub fn merge_json_sources(spec: Option<&str>, extra: &[String]) -> launchpad::Result<Value> {
    let mut base = if let Some(spec) = spec {
        let raw = read_json_spec_to_string(spec)?;
        serde_json::from_str(&raw).map_err(|e| {
            launchpad::Error::validation_invalid_json(
                e,
                Some("parse JSON spec".to_string()),
                Some(raw.chars().take(200).collect::<String>()),
            )
        })?
    } else {
        Value::Object(Map::new())
    };

    if !extra.is_empty() {
        let flags = parse_kv_flags(extra)?;
        if let (Value::Object(base_obj), Value::Object(flags_obj)) = (&mut base, flags) {
            for (k, v) in flags_obj {
                base_obj.insert(k, v);
            }
        }
    }

    Ok(base)
}

pub mod bootstrap;
pub mod config;
pub mod migrate;
pub mod secrets;
pub mod state;
pub mod workflow;

pub(crate) fn run_text(
    command: crate::Commands,
    global: &GlobalArgs,
) -> launchpad::Result<(String, i32)> {
    match command {
        crate::Commands::Workflow(args) => workflow::run_text(args, global),
        crate::Commands::Migrate(args) => migrate::run_text(args),
        _ => Err(launchpad::Error::validation_invalid_argument(
            "output_mode",
            "Command does not support text output",
            None,
            None,
        )),
    }
}

/// Dispatch a command to its handler and map result to JSON.
macro_rules! dispatch {
    ($args:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run_json($args))
    };
    ($args:expr, $global:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args, $global))
    };
}

pub(crate) fn run_json(
    command: crate::Commands,
    global: &GlobalArgs,
) -> (launchpad::Result<serde_json::Value>, i32) {
    crate::tty::status("launchpad is working...");

    match command {
        crate::Commands::Migrate(args) => dispatch!(args, migrate),
        crate::Commands::Config(args) => dispatch!(args, config),

        crate::Commands::State(args) => dispatch!(args, global, state),
        crate::Commands::Secrets(args) => dispatch!(args, global, secrets),
        crate::Commands::Workflow(args) => dispatch!(args, global, workflow),
        crate::Commands::Bootstrap(args) => dispatch!(args, global, bootstrap),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_spec_values() {
        let merged = merge_json_sources(
            Some(r#"{"project_id":"a","region":"us-east1"}"#),
            &["--project_id".to_string(), "b".to_string()],
        )
        .unwrap();
        assert_eq!(merged["project_id"], "b");
        assert_eq!(merged["region"], "us-east1");
    }

    #[test]
    fn flag_values_are_typed() {
        let merged = merge_json_sources(
            None,
            &[
                "--setup_complete".to_string(),
                "true".to_string(),
                "--apis_enabled".to_string(),
                r#"["run.googleapis.com"]"#.to_string(),
            ],
        )
        .unwrap();
        assert_eq!(merged["setup_complete"], true);
        assert_eq!(merged["apis_enabled"][0], "run.googleapis.com");
    }

    #[test]
    fn dangling_flag_is_rejected() {
        let err = merge_json_sources(None, &["--region".to_string()]).unwrap_err();
        assert_eq!(err.code.as_str(), "validation.invalid_argument");
    }

    #[test]
    fn spec_can_come_from_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("infra.json");
        std::fs::write(&path, r#"{"project_id":"from-file"}"#).unwrap();

        let merged = merge_json_sources(Some(&format!("@{}", path.display())), &[]).unwrap();
        assert_eq!(merged["project_id"], "from-file");
    }
}
