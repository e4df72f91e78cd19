//! Child process execution with captured output and an optional timeout.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;

/// Result of one external command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code (-1 when killed by a signal, timed out or never spawned).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Whether the command exited successfully.
    pub success: bool,
}

impl CommandOutput {
    /// stdout and stderr joined, trimmed, in that order.
    pub fn combined(&self) -> String {
        let stdout = self.stdout.trim();
        let stderr = self.stderr.trim();
        match (stdout.is_empty(), stderr.is_empty()) {
            (true, true) => String::new(),
            (false, true) => stdout.to_string(),
            (true, false) => stderr.to_string(),
            (false, false) => format!("{stdout}\n{stderr}"),
        }
    }

    fn failed(message: String, duration_ms: u64) -> Self {
        Self {
            exit_code: -1,
            stdout: String::new(),
            stderr: message,
            duration_ms,
            success: false,
        }
    }
}

/// Run `argv` in `cwd`, never returning an error: spawn failures and
/// timeouts are reported as an unsuccessful `CommandOutput`.
pub async fn run_captured(argv: &[String], cwd: &Path, timeout_secs: u64) -> CommandOutput {
    let start = Instant::now();

    let Some((exe, args)) = argv.split_first() else {
        return CommandOutput::failed("empty command".to_string(), 0);
    };

    let child = Command::new(exe)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let child = match child {
        Ok(child) => child,
        Err(e) => {
            return CommandOutput::failed(
                format!("failed to spawn {exe}: {e}"),
                start.elapsed().as_millis() as u64,
            )
        }
    };

    let output = if timeout_secs > 0 {
        match tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait_with_output())
            .await
        {
            Ok(result) => result,
            Err(_) => {
                return CommandOutput::failed(
                    format!("{exe} timed out after {timeout_secs} seconds"),
                    start.elapsed().as_millis() as u64,
                )
            }
        }
    } else {
        child.wait_with_output().await
    };

    let duration_ms = start.elapsed().as_millis() as u64;
    match output {
        Ok(output) => CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms,
            success: output.status.success(),
        },
        Err(e) => CommandOutput::failed(format!("failed to wait for {exe}: {e}"), duration_ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_combined_joins_streams() {
        let out = CommandOutput {
            exit_code: 1,
            stdout: "out\n".to_string(),
            stderr: "  err ".to_string(),
            duration_ms: 1,
            success: false,
        };
        assert_eq!(out.combined(), "out\nerr");
    }

    #[tokio::test]
    async fn test_empty_command_fails() {
        let out = run_captured(&[], Path::new("."), 0).await;
        assert!(!out.success);
        assert_eq!(out.exit_code, -1);
    }

    #[tokio::test]
    async fn test_missing_binary_is_reported_not_raised() {
        let out = run_captured(&argv(&["gencompare-no-such-binary"]), Path::new("."), 0).await;
        assert!(!out.success);
        assert!(out.stderr.contains("failed to spawn"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_captures_output_and_exit_code() {
        let out = run_captured(
            &argv(&["sh", "-c", "echo hello; echo oops >&2; exit 3"]),
            Path::new("."),
            0,
        )
        .await;
        assert!(!out.success);
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout() {
        let out = run_captured(&argv(&["sleep", "5"]), Path::new("."), 1).await;
        assert!(!out.success);
        assert!(out.stderr.contains("timed out"));
    }
}
