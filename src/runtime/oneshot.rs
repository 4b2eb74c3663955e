//! One-shot prompt mode.
//!
//! Background (ASYNC) tasks run through a fresh CLI invocation rather than
//! the long-lived ACP session: the agent is launched with the prompt on
//! argv, its stdout is the response, and a non-zero exit is a failure
//! carrying the tail of stderr.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info};

use crate::agent::AgentProfile;
use crate::{AppError, Result};

/// How many trailing stderr characters ride along in a failure message.
const STDERR_EXCERPT_CHARS: usize = 500;

/// Launch the agent in one-shot prompt mode and capture its response.
///
/// # Errors
///
/// - `AppError::Process` when the spawn fails or the agent exits non-zero
///   (the message carries the last [`STDERR_EXCERPT_CHARS`] of stderr).
/// - `AppError::Timeout` when `timeout` elapses first; the child is killed
///   via `kill_on_drop`.
pub async fn run_oneshot_prompt(
    profile: &AgentProfile,
    cwd: &std::path::Path,
    text: &str,
    timeout: Duration,
) -> Result<String> {
    let mut cmd = Command::new(profile.command());
    cmd.args(profile.prompt_args(text))
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(agent = profile.display_name(), "launching one-shot worker");

    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| {
            AppError::Timeout(format!(
                "one-shot agent did not finish within {} ms",
                timeout.as_millis()
            ))
        })?
        .map_err(|err| AppError::Process(format!("failed to launch one-shot agent: {err}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let excerpt = tail_chars(&stderr, STDERR_EXCERPT_CHARS);
        return Err(AppError::Process(format!(
            "one-shot agent exited with {}: {excerpt}",
            output.status
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_owned();
    info!(
        agent = profile.display_name(),
        bytes = stdout.len(),
        "one-shot worker finished"
    );
    Ok(stdout)
}

/// Last `max` characters of `text`, on a char boundary.
fn tail_chars(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max {
        return text.to_owned();
    }
    text.chars().skip(count - max).collect()
}
