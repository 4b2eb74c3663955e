//! Agent process supervision.
//!
//! Spawns the agent child with piped stdio and no shell, pumps its stderr
//! into a bounded tail ring (mirrored to the bridge's own stderr), and
//! terminates it gracefully: SIGTERM first, SIGKILL after the grace period.

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::agent::AgentProfile;
use crate::{AppError, Result};

/// Poll interval while waiting for a terminating child to exit.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ── Stderr tail ──────────────────────────────────────────────────────────────

/// Bounded ring of the agent's most recent stderr output.
///
/// Keeps at most `max_chars` characters, dropping from the front on
/// char boundaries. Surfaced in init-failure logs so the operator sees why
/// the agent died.
#[derive(Debug)]
pub struct StderrTail {
    max_chars: usize,
    buf: String,
}

impl StderrTail {
    /// Create an empty tail bounded to `max_chars` characters.
    #[must_use]
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars,
            buf: String::new(),
        }
    }

    /// Append `text`, evicting the oldest characters beyond the bound.
    pub fn append(&mut self, text: &str) {
        self.buf.push_str(text);
        let excess = self.buf.chars().count().saturating_sub(self.max_chars);
        if excess > 0 {
            let keep_from = self
                .buf
                .char_indices()
                .nth(excess)
                .map_or(self.buf.len(), |(idx, _)| idx);
            self.buf.drain(..keep_from);
        }
    }

    /// Current tail contents.
    #[must_use]
    pub fn snapshot(&self) -> String {
        self.buf.clone()
    }

    /// Number of characters currently held.
    #[must_use]
    pub fn len_chars(&self) -> usize {
        self.buf.chars().count()
    }

    /// Drop all held output.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

// ── Liveness tracking ────────────────────────────────────────────────────────

/// Timestamp of the most recent agent activity (stdout chunk or stderr byte).
///
/// The no-output watchdog reads this to decide whether the agent went
/// silent; both the prompt collector and the stderr pump refresh it.
#[derive(Debug, Clone)]
pub struct ActivityTracker(Arc<Mutex<Instant>>);

impl ActivityTracker {
    /// Start tracking from now.
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Instant::now())))
    }

    /// Record activity at the current instant.
    pub fn touch(&self) {
        if let Ok(mut last) = self.0.lock() {
            *last = Instant::now();
        }
    }

    /// Most recent activity instant.
    #[must_use]
    pub fn last(&self) -> Instant {
        self.0.lock().map_or_else(|_| Instant::now(), |last| *last)
    }
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

// ── Spawning ─────────────────────────────────────────────────────────────────

/// A freshly spawned agent with its stdio handles split out.
pub struct SpawnedAgent {
    /// The child process handle.
    pub child: Child,
    /// Agent stdin for the NDJSON writer.
    pub stdin: ChildStdin,
    /// Agent stdout for the NDJSON reader.
    pub stdout: ChildStdout,
    /// Agent stderr for the tail pump.
    pub stderr: ChildStderr,
}

/// Spawn the agent in ACP mode with piped stdio, inherited cwd, no shell.
///
/// # Errors
///
/// Returns `AppError::Process` when the OS spawn fails or a stdio handle
/// cannot be captured.
pub fn spawn_agent(profile: &AgentProfile, cwd: &std::path::Path) -> Result<SpawnedAgent> {
    let mut cmd = Command::new(profile.command());
    cmd.args(profile.acp_args())
        .current_dir(cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|err| AppError::Process(format!("failed to spawn agent: {err}")))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Process("failed to capture agent stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Process("failed to capture agent stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Process("failed to capture agent stderr".into()))?;

    info!(
        agent = profile.display_name(),
        pid = child.id(),
        "agent process spawned"
    );

    Ok(SpawnedAgent {
        child,
        stdin,
        stdout,
        stderr,
    })
}

/// Pump the agent's stderr until EOF.
///
/// Each line is mirrored to the bridge's stderr with a `[<token>] ` prefix,
/// appended to the shared tail ring, and counted as liveness.
#[must_use]
pub fn spawn_stderr_pump(
    stderr: ChildStderr,
    token: String,
    tail: Arc<Mutex<StderrTail>>,
    activity: ActivityTracker,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    eprintln!("[{token}] {line}");
                    if let Ok(mut tail) = tail.lock() {
                        tail.append(&line);
                        tail.append("\n");
                    }
                    activity.touch();
                }
                Ok(None) => {
                    debug!(agent = token, "stderr pump: EOF");
                    break;
                }
                Err(err) => {
                    debug!(agent = token, %err, "stderr pump: read error, stopping");
                    break;
                }
            }
        }
    })
}

// ── Termination ──────────────────────────────────────────────────────────────

/// Terminate a child gracefully: SIGTERM, then SIGKILL after `grace`.
///
/// Resolves immediately when the process has already exited; otherwise
/// resolves once the exit is observed. The SIGKILL escalation is logged
/// once.
pub async fn terminate_gracefully(
    child: &Arc<tokio::sync::Mutex<Child>>,
    grace: Duration,
    label: &str,
) {
    let pid = {
        let mut guard = child.lock().await;
        match guard.try_wait() {
            Ok(Some(status)) => {
                debug!(agent = label, %status, "terminate: process already exited");
                return;
            }
            Ok(None) => guard.id(),
            Err(err) => {
                warn!(agent = label, %err, "terminate: cannot poll process, killing");
                let _ = guard.kill().await;
                return;
            }
        }
    };

    send_term(pid, child, label).await;

    let deadline = Instant::now() + grace;
    loop {
        {
            let mut guard = child.lock().await;
            if let Ok(Some(status)) = guard.try_wait() {
                info!(agent = label, %status, "agent terminated gracefully");
                return;
            }
        }
        if Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(EXIT_POLL_INTERVAL).await;
    }

    warn!(
        agent = label,
        grace_ms = grace.as_millis(),
        "agent ignored SIGTERM; escalating to SIGKILL"
    );
    let mut guard = child.lock().await;
    let _ = guard.kill().await;
}

#[cfg(unix)]
async fn send_term(pid: Option<u32>, child: &Arc<tokio::sync::Mutex<Child>>, label: &str) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = pid {
        if let Ok(raw) = i32::try_from(pid) {
            if let Err(err) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
                debug!(agent = label, %err, "SIGTERM delivery failed");
            }
            return;
        }
    }
    // No usable pid — fall back to an immediate kill.
    let _ = child.lock().await.start_kill();
}

#[cfg(not(unix))]
async fn send_term(_pid: Option<u32>, child: &Arc<tokio::sync::Mutex<Child>>, _label: &str) {
    // No SIGTERM on this platform; begin the hard kill immediately.
    let _ = child.lock().await.start_kill();
}
