//! Subprocess execution for the external collaborators (git, ooil).

use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::domain::error::{PublishError, Result};

const REDACTED: &str = "[REDACTED]";

/// Run `program` with `args` and return its stdout.
///
/// Stderr only reaches the debug log, or the error when the command fails.
/// Any substring listed in `sensitive` is masked in logs and errors.
pub async fn command_output(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    sensitive: &[&str],
) -> Result<String> {
    let shown = redact(&format!("{program} {}", args.join(" ")), sensitive);
    debug!(command = %shown, "Running command");

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }

    let output = command.output().await.map_err(|e| PublishError::CommandFailed {
        command: shown.clone(),
        output: e.to_string(),
    })?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr);

    if !output.status.success() {
        return Err(PublishError::CommandFailed {
            command: shown,
            output: redact(&format!("{stdout}{stderr}"), sensitive),
        });
    }
    if !stderr.trim().is_empty() {
        let stderr = redact(stderr.trim(), sensitive);
        debug!(command = %shown, stderr = %stderr, "Command wrote to stderr");
    }

    Ok(stdout)
}

fn redact(text: &str, sensitive: &[&str]) -> String {
    sensitive
        .iter()
        .filter(|s| !s.is_empty())
        .fold(text.to_string(), |acc, s| acc.replace(s, REDACTED))
}
