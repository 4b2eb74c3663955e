//! ACP runtime — one agent session at a time, prompts serialized against it.
//!
//! The runtime owns the agent child process and its transport, absorbs
//! crashes (full state reset plus a rescheduled prewarm), enforces the
//! single-session/single-prompt discipline, and applies the dual timeout
//! regime: an overall deadline and a no-output watchdog refreshed by every
//! stdout chunk and stderr byte.
//!
//! # State machine
//!
//! `Idle → Initializing → Ready → Prompting → Ready`, with a crash edge
//! from any state back to `Idle` (prewarm rescheduled). `Initializing` is
//! entered at most once concurrently: racing callers serialize on the init
//! lock and the loser observes the winner's session.

pub mod collector;
pub mod oneshot;
pub mod supervisor;

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::acp::protocol::{self, SessionNotification, SessionUpdate, StopReason};
use crate::acp::transport::{AcpClient, AcpTransport};
use crate::agent::AgentProfile;
use crate::config::Settings;
use crate::runtime::collector::{ChunkSink, CollectedPrompt, PromptCollector, SharedCollector};
use crate::runtime::supervisor::{ActivityTracker, StderrTail};
use crate::{AppError, Result};

/// Poll interval of the child exit monitor.
const EXIT_MONITOR_INTERVAL: Duration = Duration::from_millis(250);

/// Reply text substituted when a turn settles without any output.
pub const NO_RESPONSE_TEXT: &str = "No response received.";

type SharedChild = Arc<tokio::sync::Mutex<Child>>;

/// Connection-scoped state; reset wholesale on crash or shutdown.
#[derive(Default)]
struct ConnState {
    transport: Option<Arc<AcpTransport>>,
    session_id: Option<String>,
    child: Option<SharedChild>,
    monitor: Option<JoinHandle<()>>,
}

/// Long-lived ACP runtime for the chosen agent.
pub struct AcpRuntime {
    profile: AgentProfile,
    settings: Arc<Settings>,
    conn: Mutex<ConnState>,
    init_lock: tokio::sync::Mutex<()>,
    prompt_lock: tokio::sync::Mutex<()>,
    collector: SharedCollector,
    current_session: Arc<Mutex<Option<String>>>,
    activity: ActivityTracker,
    stderr_tail: Arc<Mutex<StderrTail>>,
    manual_abort: Arc<AtomicBool>,
    prewarm_attempts: AtomicU32,
    prewarm_armed: AtomicBool,
    prompt_seq: AtomicU64,
}

impl AcpRuntime {
    /// Build a runtime for `profile`; no process is spawned yet.
    #[must_use]
    pub fn new(profile: AgentProfile, settings: Arc<Settings>) -> Arc<Self> {
        let tail = StderrTail::new(settings.stderr_tail_max_chars);
        Arc::new(Self {
            profile,
            settings,
            conn: Mutex::new(ConnState::default()),
            init_lock: tokio::sync::Mutex::new(()),
            prompt_lock: tokio::sync::Mutex::new(()),
            collector: Arc::new(Mutex::new(None)),
            current_session: Arc::new(Mutex::new(None)),
            activity: ActivityTracker::new(),
            stderr_tail: Arc::new(Mutex::new(tail)),
            manual_abort: Arc::new(AtomicBool::new(false)),
            prewarm_attempts: AtomicU32::new(0),
            prewarm_armed: AtomicBool::new(false),
            prompt_seq: AtomicU64::new(0),
        })
    }

    /// The profile this runtime drives.
    #[must_use]
    pub fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    /// Whether a live session exists: transport open and session recorded.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.conn.lock().is_ok_and(|state| {
            state.session_id.is_some()
                && state.transport.as_ref().is_some_and(|t| t.is_alive())
        })
    }

    /// Whether a prompt is currently executing.
    #[must_use]
    pub fn has_active_prompt(&self) -> bool {
        self.collector.lock().is_ok_and(|slot| slot.is_some())
    }

    // ── Session lifecycle ────────────────────────────────────────────────

    /// Idempotent, race-free session bring-up.
    ///
    /// Healthy sessions return immediately. A second caller arriving while
    /// initialization is in flight waits on the same attempt rather than
    /// spawning a second agent.
    ///
    /// # Errors
    ///
    /// Returns the spawn / `initialize` / `session/new` failure after a
    /// full state reset. Errors mentioning "Internal error" carry an
    /// MCP/skills configuration hint.
    pub async fn ensure_session(self: &Arc<Self>) -> Result<()> {
        if self.is_healthy() {
            return Ok(());
        }
        let _init = self.init_lock.lock().await;
        if self.is_healthy() {
            return Ok(());
        }

        info!(agent = self.profile.display_name(), "starting agent session");
        match self.bring_up().await {
            Ok(session_id) => {
                info!(session_id, "agent session ready");
                Ok(())
            }
            Err(err) => {
                let tail = self
                    .stderr_tail
                    .lock()
                    .map(|t| t.snapshot())
                    .unwrap_or_default();
                if tail.is_empty() {
                    error!(%err, "agent session initialization failed");
                } else {
                    error!(%err, stderr_tail = %tail, "agent session initialization failed");
                }
                self.reset_connection("init failed");
                Err(wrap_internal_error_hint(err))
            }
        }
    }

    async fn bring_up(self: &Arc<Self>) -> Result<String> {
        let spawned = supervisor::spawn_agent(&self.profile, &self.settings.workspace_dir)?;
        let token = self.profile.log_token();

        let child: SharedChild = Arc::new(tokio::sync::Mutex::new(spawned.child));
        let _pump = supervisor::spawn_stderr_pump(
            spawned.stderr,
            token.clone(),
            Arc::clone(&self.stderr_tail),
            self.activity.clone(),
        );

        let client = Arc::new(RuntimeClient {
            collector: Arc::clone(&self.collector),
            current_session: Arc::clone(&self.current_session),
            settings: Arc::clone(&self.settings),
        });
        let transport = AcpTransport::spawn(spawned.stdout, spawned.stdin, client, &token);

        let init = transport.initialize().await?;
        debug!(server_info = %init, "agent initialized");

        let session_id = transport
            .new_session(&self.settings.workspace_dir, self.profile.mcp_servers())
            .await?;

        if let Ok(mut current) = self.current_session.lock() {
            *current = Some(session_id.clone());
        }
        let monitor = self.spawn_exit_monitor(Arc::clone(&child));
        if let Ok(mut state) = self.conn.lock() {
            state.transport = Some(transport);
            state.session_id = Some(session_id.clone());
            state.child = Some(child);
            state.monitor = Some(monitor);
        }

        Ok(session_id)
    }

    fn spawn_exit_monitor(self: &Arc<Self>, child: SharedChild) -> JoinHandle<()> {
        let runtime = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                {
                    let mut guard = child.lock().await;
                    match guard.try_wait() {
                        Ok(Some(status)) => {
                            drop(guard);
                            warn!(
                                code = status.code(),
                                %status,
                                "agent process exited unexpectedly"
                            );
                            runtime.reset_connection("process exited");
                            runtime.schedule_prewarm("crash");
                            return;
                        }
                        Ok(None) => {}
                        Err(err) => {
                            drop(guard);
                            warn!(%err, "exit monitor: cannot poll agent process");
                            runtime.reset_connection("process unpollable");
                            runtime.schedule_prewarm("crash");
                            return;
                        }
                    }
                }
                tokio::time::sleep(EXIT_MONITOR_INTERVAL).await;
            }
        })
    }

    /// Drop all connection state synchronously and terminate the child in
    /// the background. In-flight requests reject through the transport.
    fn reset_connection(&self, reason: &str) {
        debug!(reason, "resetting agent runtime state");
        let (transport, child, monitor) = match self.conn.lock() {
            Ok(mut state) => (
                state.transport.take(),
                state.child.take(),
                state.monitor.take(),
            ),
            Err(_) => (None, None, None),
        };
        if let Ok(mut current) = self.current_session.lock() {
            *current = None;
        }
        if let Ok(mut slot) = self.collector.lock() {
            slot.take();
        }
        if let Some(transport) = transport {
            transport.shutdown();
        }
        if let Some(monitor) = monitor {
            monitor.abort();
        }
        if let Some(child) = child {
            let grace = self.profile.kill_grace();
            let label = self.profile.log_token();
            tokio::spawn(async move {
                supervisor::terminate_gracefully(&child, grace, &label).await;
            });
        }
    }

    /// Kick a non-blocking session bring-up with bounded retries.
    ///
    /// No-op while healthy or while an initialization (or another prewarm)
    /// is already in flight. Failures arm a single retry timer until
    /// `prewarm_max_retries` is reached; exhaustion stops automatic
    /// retries — a later `ensure_session` still works.
    pub fn schedule_prewarm(self: &Arc<Self>, reason: &'static str) {
        if self.is_healthy() {
            return;
        }
        match self.init_lock.try_lock() {
            Ok(guard) => drop(guard),
            Err(_) => return, // Initialization already in flight.
        }
        if self.prewarm_armed.swap(true, Ordering::SeqCst) {
            return;
        }

        let runtime = Arc::clone(self);
        tokio::spawn(async move {
            debug!(reason, "prewarming agent session");
            let result = runtime.ensure_session().await;
            runtime.prewarm_armed.store(false, Ordering::SeqCst);
            match result {
                Ok(()) => {
                    runtime.prewarm_attempts.store(0, Ordering::SeqCst);
                }
                Err(err) => {
                    let attempts = runtime.prewarm_attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    let max = runtime.settings.prewarm_max_retries;
                    let retry_ms = runtime.settings.prewarm_retry_ms;
                    warn!(%err, attempts, max, "prewarm attempt failed");
                    if attempts < max && retry_ms > 0 {
                        let again = Arc::clone(&runtime);
                        tokio::spawn(async move {
                            tokio::time::sleep(Duration::from_millis(retry_ms)).await;
                            again.schedule_prewarm("retry");
                        });
                    } else {
                        warn!("prewarm retries exhausted; stopping automatic retries");
                    }
                }
            }
        });
    }

    // ── Prompt execution ─────────────────────────────────────────────────

    /// Run one prompt to completion, streaming chunks through `on_chunk`.
    ///
    /// Prompts are serialized: a second caller waits until the current turn
    /// settles. Two independent clocks bound the wait — the overall
    /// deadline and the no-output watchdog; either fires a
    /// `session/cancel` and rejects exactly once.
    ///
    /// # Errors
    ///
    /// - `AppError::Timeout` when either clock fires.
    /// - `AppError::Aborted` when the turn was cancelled empty after a
    ///   manual abort request.
    /// - `AppError::Cancelled` when the agent cancelled an empty turn.
    /// - Session bring-up and transport errors otherwise.
    pub async fn run_prompt(
        self: &Arc<Self>,
        text: &str,
        on_chunk: Option<ChunkSink>,
    ) -> Result<String> {
        let _turn = self.prompt_lock.lock().await;
        self.manual_abort.store(false, Ordering::SeqCst);
        self.ensure_session().await?;

        let (transport, session_id) = {
            let state = self
                .conn
                .lock()
                .map_err(|_| AppError::Acp("runtime state poisoned".into()))?;
            match (&state.transport, &state.session_id) {
                (Some(transport), Some(session_id)) => {
                    (Arc::clone(transport), session_id.clone())
                }
                _ => return Err(AppError::Acp("no agent session after bring-up".into())),
            }
        };

        let invocation = self.prompt_seq.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut slot) = self.collector.lock() {
            *slot = Some(PromptCollector::new(
                invocation,
                session_id.clone(),
                on_chunk,
                self.settings.stream_stdout,
                self.activity.clone(),
            ));
        }
        self.activity.touch();

        let overall = Duration::from_millis(self.settings.acp_timeout_ms);
        let no_output = Duration::from_millis(self.settings.acp_no_output_timeout_ms);
        let overall_deadline = Instant::now() + overall;

        let prompt_fut = transport.prompt(&session_id, text);
        tokio::pin!(prompt_fut);

        let result = loop {
            let silence_deadline = self.activity.last() + no_output;
            tokio::select! {
                res = &mut prompt_fut => break res,

                () = tokio::time::sleep_until(overall_deadline) => {
                    warn!(invocation, timeout_ms = overall.as_millis(), "overall prompt deadline reached");
                    let _ = transport.cancel(&session_id).await;
                    self.take_collector();
                    return Err(AppError::Timeout(format!(
                        "agent did not finish within {} ms", overall.as_millis()
                    )));
                }

                () = tokio::time::sleep_until(silence_deadline) => {
                    // Re-check: activity may have moved the deadline forward.
                    if self.activity.last() + no_output <= Instant::now() {
                        warn!(invocation, timeout_ms = no_output.as_millis(), "no agent output, cancelling");
                        let _ = transport.cancel(&session_id).await;
                        self.take_collector();
                        return Err(AppError::Timeout(format!(
                            "agent produced no output for {} ms", no_output.as_millis()
                        )));
                    }
                }
            }
        };

        let collected = self.take_collector();
        self.settle(invocation, result, collected)
    }

    fn take_collector(&self) -> Option<CollectedPrompt> {
        self.collector
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .map(PromptCollector::into_collected)
    }

    fn settle(
        &self,
        invocation: u64,
        result: Result<StopReason>,
        collected: Option<CollectedPrompt>,
    ) -> Result<String> {
        let (buffer, chunk_count, first_chunk_delay) = collected.map_or_else(
            || (String::new(), 0, None),
            |c| (c.buffer, c.chunk_count, c.first_chunk_delay),
        );

        match result {
            Ok(stop_reason) => {
                debug!(
                    invocation,
                    ?stop_reason,
                    chunk_count,
                    first_chunk_delay_ms = first_chunk_delay.map(|d| d.as_millis()),
                    "prompt settled"
                );
                if stop_reason == StopReason::Cancelled && buffer.is_empty() {
                    if self.manual_abort.swap(false, Ordering::SeqCst) {
                        Err(AppError::Aborted("agent action aborted by user".into()))
                    } else {
                        Err(AppError::Cancelled(
                            "prompt cancelled by agent before any output".into(),
                        ))
                    }
                } else if buffer.is_empty() {
                    Ok(NO_RESPONSE_TEXT.to_owned())
                } else {
                    Ok(buffer)
                }
            }
            Err(err) => Err(err),
        }
    }

    // ── Cancellation ─────────────────────────────────────────────────────

    /// Best-effort `session/cancel` for the in-flight prompt.
    ///
    /// Does not settle the prompt itself — settlement arrives through the
    /// turn's stop reason. Returns whether a prompt was active.
    pub async fn cancel_active_prompt(&self) -> bool {
        if !self.has_active_prompt() {
            return false;
        }
        let (transport, session_id) = {
            let Ok(state) = self.conn.lock() else {
                return false;
            };
            match (&state.transport, &state.session_id) {
                (Some(transport), Some(session_id)) => {
                    (Arc::clone(transport), session_id.clone())
                }
                _ => return false,
            }
        };
        if let Err(err) = transport.cancel(&session_id).await {
            debug!(%err, "cancel_active_prompt: cancel delivery failed");
        }
        true
    }

    /// Latch the next cancelled-empty settlement as a user-initiated abort.
    pub fn request_manual_abort(&self) {
        self.manual_abort.store(true, Ordering::SeqCst);
    }

    /// Inject a silent context message into the live session.
    ///
    /// Used after background jobs complete so the long-running conversation
    /// sees the finished work; the agent's acknowledgement is discarded.
    ///
    /// # Errors
    ///
    /// Propagates `run_prompt` failures.
    pub async fn append_context(self: &Arc<Self>, text: &str) -> Result<()> {
        let reply = self.run_prompt(text, None).await?;
        debug!(reply_len = reply.len(), "context appended to live session");
        Ok(())
    }

    /// Shut the runtime down: final cancel, state reset, graceful
    /// termination of the agent process.
    pub async fn shutdown(self: &Arc<Self>, reason: &str) {
        info!(reason, "shutting down agent runtime");
        let (transport, child, monitor) = match self.conn.lock() {
            Ok(mut state) => (
                state.transport.take(),
                state.child.take(),
                state.monitor.take(),
            ),
            Err(_) => (None, None, None),
        };
        if let Ok(mut current) = self.current_session.lock() {
            *current = None;
        }
        if let Ok(mut slot) = self.collector.lock() {
            slot.take();
        }
        if let Some(transport) = transport {
            transport.shutdown();
        }
        if let Some(monitor) = monitor {
            monitor.abort();
        }
        if let Ok(mut tail) = self.stderr_tail.lock() {
            tail.clear();
        }
        if let Some(child) = child {
            supervisor::terminate_gracefully(
                &child,
                self.profile.kill_grace(),
                &self.profile.log_token(),
            )
            .await;
        }
    }
}

/// Append the MCP/skills hint to agent-internal errors.
fn wrap_internal_error_hint(err: AppError) -> AppError {
    if let AppError::Acp(msg) = &err {
        if msg.contains("Internal error") {
            return AppError::Acp(format!(
                "{msg} — the agent reported an internal error; check its MCP server \
                 and skills configuration"
            ));
        }
    }
    err
}

// ── Client responder ─────────────────────────────────────────────────────────

/// Handles agent-initiated traffic for the runtime.
struct RuntimeClient {
    collector: SharedCollector,
    current_session: Arc<Mutex<Option<String>>>,
    settings: Arc<Settings>,
}

impl AcpClient for RuntimeClient {
    fn request_permission(&self, params: &Value) -> Value {
        protocol::permission_outcome(params, &self.settings.permission_strategy)
    }

    fn session_update(&self, note: SessionNotification) {
        let matches_current = self
            .current_session
            .lock()
            .is_ok_and(|current| current.as_deref() == Some(note.session_id.as_str()));
        if !matches_current {
            debug!(session_id = note.session_id, "ignoring update for stale session");
            return;
        }

        let Ok(mut slot) = self.collector.lock() else {
            return;
        };
        let Some(collector) = slot.as_mut() else {
            return;
        };
        match note.update {
            SessionUpdate::AgentMessageChunk { text } => collector.append(&text),
            SessionUpdate::Other => {
                // Liveness only.
                collector.touch();
            }
        }
    }
}
