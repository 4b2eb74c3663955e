//! Startup validation of the chosen agent executable.
//!
//! The bridge refuses to start when the agent binary is absent or does not
//! answer a `--version` probe; a broken agent would otherwise surface as a
//! confusing prewarm-retry loop at the first user message.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::info;

use crate::agent::AgentProfile;
use crate::{AppError, Result};

/// Maximum time the `--version` probe may take.
const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// Verify that the profile's executable exists and answers `--version`.
///
/// # Errors
///
/// Returns `AppError::Agent` when the executable cannot be spawned, exits
/// non-zero, or does not answer within [`PROBE_TIMEOUT`].
pub async fn validate_agent(profile: &AgentProfile) -> Result<()> {
    let mut cmd = Command::new(profile.command());
    cmd.arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = tokio::time::timeout(PROBE_TIMEOUT, cmd.output())
        .await
        .map_err(|_| {
            AppError::Agent(format!(
                "{} did not answer --version within {PROBE_TIMEOUT:?}",
                profile.command()
            ))
        })?
        .map_err(|err| {
            AppError::Agent(format!(
                "cannot launch '{}': {err} — is {} installed and on PATH?",
                profile.command(),
                profile.display_name()
            ))
        })?;

    if !output.status.success() {
        return Err(AppError::Agent(format!(
            "'{} --version' exited with {}",
            profile.command(),
            output.status
        )));
    }

    let version = String::from_utf8_lossy(&output.stdout);
    info!(
        agent = profile.display_name(),
        version = version.trim(),
        "agent executable validated"
    );
    Ok(())
}
