//! Command execution with consistent error handling.

use std::io::Write;
use std::process::{Command, Output, Stdio};

use crate::error::{Error, Result};

/// Run a command, feeding `input` on stdin. Secret values travel this way
/// so they never show up in the process list.
pub fn run_with_stdin(program: &str, args: &[&str], input: &str, context: &str) -> Result<String> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            Error::internal_io(
                format!("Failed to run {}: {}", context, e),
                Some(context.to_string()),
            )
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(input.as_bytes()).map_err(|e| {
            Error::internal_io(e.to_string(), Some(format!("{} (write stdin)", context)))
        })?;
    }

    let output = child.wait_with_output().map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("{} (wait)", context)))
    })?;

    finish(program, args, &output)
}

fn finish(program: &str, args: &[&str], output: &Output) -> Result<String> {
    if !output.status.success() {
        let command = std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        return Err(Error::command_failed(
            command,
            output.status.code(),
            error_text(output),
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Extract error text from command output.
///
/// Prefers stderr, falls back to stdout if stderr is empty.
pub fn error_text(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        stderr.trim().to_string()
    } else {
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_program_is_an_io_error() {
        let err = run_with_stdin("nonexistent_command_xyz", &[], "", "test").unwrap_err();
        assert_eq!(err.code.as_str(), "internal.io_error");
    }

    #[test]
    fn nonzero_exit_reports_full_command() {
        let err = run_with_stdin("sh", &["-c", "exit 3"], "", "sh test").unwrap_err();
        assert_eq!(err.code.as_str(), "command.failed");
        assert_eq!(err.details["command"], "sh -c exit 3");
        assert_eq!(err.details["exitCode"], 3);
    }

    #[test]
    fn run_with_stdin_pipes_input() {
        let out = run_with_stdin("cat", &[], "secret-value", "cat test").unwrap();
        assert_eq!(out, "secret-value");
    }

    #[test]
    fn error_text_prefers_stderr() {
        let output = Output {
            status: std::process::ExitStatus::default(),
            stdout: b"stdout content".to_vec(),
            stderr: b"stderr content".to_vec(),
        };
        assert_eq!(error_text(&output), "stderr content");
    }

    #[test]
    fn error_text_falls_back_to_stdout() {
        let output = Output {
            status: std::process::ExitStatus::default(),
            stdout: b"stdout content".to_vec(),
            stderr: b"".to_vec(),
        };
        assert_eq!(error_text(&output), "stdout content");
    }
}
