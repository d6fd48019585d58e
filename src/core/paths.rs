use crate::error::{Error, Result};
use std::env;
use std::path::PathBuf;

/// Base launchpad config directory (~/.config/launchpad/ on all platforms)
pub fn launchpad() -> Result<PathBuf> {
    #[cfg(windows)]
    {
        let appdata = env::var("APPDATA").map_err(|_| {
            Error::internal_unexpected(
                "APPDATA environment variable not set on Windows".to_string(),
            )
        })?;
        Ok(PathBuf::from(appdata).join("launchpad"))
    }

    #[cfg(not(windows))]
    {
        let home = env::var("HOME").map_err(|_| {
            Error::internal_unexpected(
                "HOME environment variable not set on Unix-like system".to_string(),
            )
        })?;
        Ok(PathBuf::from(home).join(".config").join("launchpad"))
    }
}

/// Global launchpad.json config file path
pub fn launchpad_json() -> Result<PathBuf> {
    Ok(launchpad()?.join("launchpad.json"))
}

/// Default state file shared by every bootstrap stage
pub fn state_json() -> Result<PathBuf> {
    Ok(launchpad()?.join("state.json"))
}

/// Expand `~` and environment variables in a user-supplied path.
pub fn expand(raw: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(raw).map_err(|e| {
        Error::validation_invalid_argument("path", e.to_string(), Some(raw.to_string()), None)
    })?;
    Ok(PathBuf::from(expanded.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_leaves_plain_paths_alone() {
        let path = expand("relative/state.json").unwrap();
        assert_eq!(path, PathBuf::from("relative/state.json"));
    }

    #[test]
    fn expand_rejects_unknown_variables() {
        let err = expand("$LAUNCHPAD_SURELY_UNSET_VAR/state.json").unwrap_err();
        assert_eq!(err.code.as_str(), "validation.invalid_argument");
    }
}
