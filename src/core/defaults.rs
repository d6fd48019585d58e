use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;

use crate::error::{Error, Result};
use crate::paths;

/// Root configuration structure for launchpad.json
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LaunchpadConfig {
    #[serde(default)]
    pub defaults: Defaults,
}

/// All configurable defaults that can be overridden via launchpad.json
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Defaults {
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Region used when the infrastructure state does not record one.
    #[serde(default = "default_region")]
    pub default_region: String,

    #[serde(default = "default_workflow_path")]
    pub workflow_path: String,

    #[serde(default = "default_workflow_name")]
    pub workflow_name: String,

    #[serde(default = "default_branches")]
    pub branches: Vec<String>,

    #[serde(default = "default_container_port")]
    pub container_port: u16,

    /// Migration environment used when `--environment` is omitted.
    #[serde(default = "default_environment")]
    pub environment: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            default_region: default_region(),
            workflow_path: default_workflow_path(),
            workflow_name: default_workflow_name(),
            branches: default_branches(),
            container_port: default_container_port(),
            environment: default_environment(),
        }
    }
}

// =============================================================================
// Default value functions
// =============================================================================

fn default_service_name() -> String {
    "neurogent-finance-assistant".to_string()
}

fn default_region() -> String {
    "us-central1".to_string()
}

fn default_workflow_path() -> String {
    ".github/workflows/deploy.yml".to_string()
}

fn default_workflow_name() -> String {
    "Deploy to Cloud Run".to_string()
}

fn default_branches() -> Vec<String> {
    vec!["main".to_string()]
}

fn default_container_port() -> u16 {
    8501
}

fn default_environment() -> String {
    "development".to_string()
}

// =============================================================================
// Loading functions
// =============================================================================

/// Load defaults, merging file config with built-in defaults.
/// If launchpad.json is missing or invalid, silently returns built-in defaults.
pub fn load_defaults() -> Defaults {
    load_config().defaults
}

/// Load the full launchpad.json config, falling back to defaults on any error.
pub fn load_config() -> LaunchpadConfig {
    load_config_from_file().unwrap_or_default()
}

fn load_config_from_file() -> Result<LaunchpadConfig> {
    let path = paths::launchpad_json()?;

    if !path.exists() {
        return Err(Error::other("launchpad.json not found"));
    }

    let content = fs::read_to_string(&path).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("read {}", path.display())))
    })?;

    serde_json::from_str(&content)
        .map_err(|e| Error::config_invalid_json(path.display().to_string(), e))
}

/// Save config to launchpad.json (creates if missing).
pub fn save_config(config: &LaunchpadConfig) -> Result<()> {
    let path = paths::launchpad_json()?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            Error::internal_io(e.to_string(), Some(format!("create {}", parent.display())))
        })?;
    }

    let content = serde_json::to_string_pretty(config).map_err(|e| {
        Error::internal_json(e.to_string(), Some("serialize launchpad.json".to_string()))
    })?;

    crate::io::write_file_atomic(&path, &content, "write launchpad.json")
}

/// Check if launchpad.json exists
pub fn config_exists() -> bool {
    paths::launchpad_json()
        .map(|p| p.exists())
        .unwrap_or(false)
}

/// Delete launchpad.json (reset to defaults)
pub fn reset_config() -> Result<bool> {
    let path = paths::launchpad_json()?;

    if path.exists() {
        fs::remove_file(&path).map_err(|e| {
            Error::internal_io(e.to_string(), Some(format!("delete {}", path.display())))
        })?;
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Get the path to launchpad.json (for display purposes)
pub fn config_path() -> Result<String> {
    Ok(paths::launchpad_json()?.display().to_string())
}

/// Get built-in defaults (ignoring any file config)
pub fn builtin_defaults() -> Defaults {
    Defaults::default()
}

// =============================================================================
// JSON pointer edits
// =============================================================================

/// Set `value` at `pointer` inside `config`, re-validating the result.
pub fn set_pointer(config: &LaunchpadConfig, pointer: &str, value: Value) -> Result<LaunchpadConfig> {
    if !pointer.starts_with('/') || pointer == "/" {
        return Err(Error::validation_invalid_argument(
            "pointer",
            format!("JSON pointer must start with '/' and name a field: {}", pointer),
            None,
            None,
        ));
    }

    let mut root = serde_json::to_value(config)
        .map_err(|e| Error::internal_json(e.to_string(), Some("serialize config".to_string())))?;

    let tokens: Vec<String> = pointer.split('/').skip(1).map(unescape_token).collect();
    let (last, parents) = tokens
        .split_last()
        .ok_or_else(|| Error::validation_invalid_argument("pointer", "Empty pointer", None, None))?;

    let mut current = &mut root;
    for token in parents {
        current = match current {
            Value::Object(map) => map
                .entry(token.clone())
                .or_insert_with(|| Value::Object(serde_json::Map::new())),
            Value::Array(arr) => {
                let index = parse_array_index(token)?;
                arr.get_mut(index).ok_or_else(|| {
                    Error::config_invalid_value(
                        pointer,
                        Some(index.to_string()),
                        "Array index out of bounds",
                    )
                })?
            }
            _ => {
                return Err(Error::config_invalid_value(
                    pointer,
                    None,
                    "Expected object/array at pointer",
                ))
            }
        };
    }

    match current {
        Value::Object(map) => {
            map.insert(last.clone(), value);
        }
        Value::Array(arr) => {
            let index = parse_array_index(last)?;
            let slot = arr.get_mut(index).ok_or_else(|| {
                Error::config_invalid_value(
                    pointer,
                    Some(index.to_string()),
                    "Array index out of bounds",
                )
            })?;
            *slot = value;
        }
        _ => {
            return Err(Error::config_invalid_value(
                pointer,
                None,
                "Cannot set child on non-container",
            ))
        }
    }

    serde_json::from_value(root).map_err(|e| {
        Error::validation_invalid_json(e, Some("deserialize config".to_string()), None)
    })
}

fn parse_array_index(token: &str) -> Result<usize> {
    token.parse::<usize>().map_err(|_| {
        Error::validation_invalid_argument(
            "arrayIndex",
            "Invalid array index token",
            Some(token.to_string()),
            None,
        )
    })
}

fn unescape_token(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}
