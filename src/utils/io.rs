//! File I/O primitives with consistent error handling.

use crate::error::{Error, Result};
use std::fs;
use std::path::Path;

/// Read file contents with standardized error handling.
pub fn read_file(path: &Path, operation: &str) -> Result<String> {
    fs::read_to_string(path).map_err(|e| {
        Error::internal_io(
            format!("{}: {}", path.display(), e),
            Some(operation.to_string()),
        )
    })
}

/// Create the parent directory of `path` if it does not exist yet.
pub fn ensure_parent_dir(path: &Path, operation: &str) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
            fs::create_dir_all(parent).map_err(|e| {
                Error::internal_io(
                    format!("{}: {}", parent.display(), e),
                    Some(format!("{} (create directory)", operation)),
                )
            })
        }
        _ => Ok(()),
    }
}

/// Write content to file atomically (write to .tmp, then rename).
///
/// Readers always see either the old content or the new content, never
/// a partial write. The caller renders the full content before calling.
pub fn write_file_atomic(path: &Path, content: &str, operation: &str) -> Result<()> {
    let filename = path.file_name().ok_or_else(|| {
        Error::internal_io(
            format!("Invalid path: {}", path.display()),
            Some(operation.to_string()),
        )
    })?;

    let tmp_path = path.with_file_name(format!("{}.tmp", filename.to_string_lossy()));

    fs::write(&tmp_path, content)
        .map_err(|e| Error::internal_io(e.to_string(), Some(format!("{} (write temp)", operation))))?;

    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(Error::internal_io(
            e.to_string(),
            Some(format!("{} (rename)", operation)),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn read_file_reports_path_on_missing_file() {
        let err = read_file(Path::new("/nonexistent/deploy.yml"), "read workflow").unwrap_err();
        assert_eq!(err.code.as_str(), "internal.io_error");
        assert!(err.describe().contains("/nonexistent/deploy.yml"));
    }

    #[test]
    fn ensure_parent_dir_creates_nested_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".github").join("workflows").join("deploy.yml");

        ensure_parent_dir(&path, "test").unwrap();
        assert!(path.parent().unwrap().is_dir());
    }

    #[test]
    fn ensure_parent_dir_accepts_bare_filename() {
        assert!(ensure_parent_dir(Path::new("deploy.yml"), "test").is_ok());
    }

    #[test]
    fn write_file_atomic_overwrites_and_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        write_file_atomic(&path, "first", "test write").unwrap();
        write_file_atomic(&path, "second", "test write").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[test]
    fn write_file_atomic_fails_for_missing_directory() {
        let err = write_file_atomic(Path::new("/nonexistent/dir/file.txt"), "x", "test write")
            .unwrap_err();
        assert_eq!(err.code.as_str(), "internal.io_error");
    }
}
