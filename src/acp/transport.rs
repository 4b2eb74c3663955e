//! ACP session transport.
//!
//! Owns the reader and writer tasks over a spawned agent's stdio, correlates
//! JSON-RPC responses to requests by monotonic integer id, answers
//! agent-initiated requests through an [`AcpClient`], and dispatches
//! `session/update` notifications. Malformed frames are logged and skipped;
//! they never terminate the stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::acp::codec::NdjsonCodec;
use crate::acp::protocol::{
    self, Frame, SessionNotification, StopReason, PROTOCOL_VERSION,
};
use crate::agent::McpServer;
use crate::{AppError, Result};

/// Outbound queue depth before senders back off.
const OUT_QUEUE_CAPACITY: usize = 64;

/// Callbacks for agent-initiated traffic.
///
/// `request_permission` must answer synchronously (the decision is pure
/// policy); `session_update` is fire-and-forget.
pub trait AcpClient: Send + Sync + 'static {
    /// Decide the outcome of a `session/request_permission` call.
    fn request_permission(&self, params: &Value) -> Value;

    /// Handle a parsed `session/update` notification.
    fn session_update(&self, note: SessionNotification);
}

type PendingMap = Mutex<HashMap<i64, oneshot::Sender<Result<Value>>>>;

/// Bidirectional JSON-RPC session over an agent's stdio.
pub struct AcpTransport {
    next_id: AtomicI64,
    pending: Arc<PendingMap>,
    out_tx: mpsc::Sender<Value>,
    cancel: CancellationToken,
    alive: Arc<AtomicBool>,
}

impl AcpTransport {
    /// Wire the transport over the given streams and start its tasks.
    ///
    /// `label` tags log lines (usually the agent's command token).
    pub fn spawn<R, W>(stdout: R, stdin: W, client: Arc<dyn AcpClient>, label: &str) -> Arc<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (out_tx, out_rx) = mpsc::channel(OUT_QUEUE_CAPACITY);
        let cancel = CancellationToken::new();
        let pending: Arc<PendingMap> = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));

        let transport = Arc::new(Self {
            next_id: AtomicI64::new(1),
            pending: Arc::clone(&pending),
            out_tx: out_tx.clone(),
            cancel: cancel.clone(),
            alive: Arc::clone(&alive),
        });

        tokio::spawn(run_writer(stdin, out_rx, cancel.clone(), label.to_owned()));
        tokio::spawn(run_reader(
            stdout,
            out_tx,
            pending,
            client,
            cancel,
            alive,
            label.to_owned(),
        ));

        transport
    }

    /// Whether the agent's stdout is still open.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.cancel.is_cancelled()
    }

    /// Stop both stream tasks and reject every in-flight request.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.alive.store(false, Ordering::SeqCst);
        fail_pending(&self.pending, "transport shut down");
    }

    /// Send a request and await its correlated response.
    ///
    /// # Errors
    ///
    /// Returns the agent's JSON-RPC error mapped to `AppError::Acp`, or
    /// `AppError::Transport` when the stream closes before a response.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(id, tx);
        }

        let frame = protocol::request_frame(id, method, params);
        if self.out_tx.send(frame).await.is_err() {
            if let Ok(mut pending) = self.pending.lock() {
                pending.remove(&id);
            }
            return Err(AppError::Transport(format!(
                "agent stream closed before '{method}' could be sent"
            )));
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(AppError::Transport(format!(
                "agent stream closed before '{method}' response arrived"
            ))),
        }
    }

    /// Send a one-way notification; errors are surfaced, not retried.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` when the stream is closed.
    pub async fn notify(&self, method: &str, params: Value) -> Result<()> {
        let frame = protocol::notification_frame(method, params);
        self.out_tx.send(frame).await.map_err(|_| {
            AppError::Transport(format!("agent stream closed before '{method}' could be sent"))
        })
    }

    // ── Typed methods the bridge invokes on the agent ────────────────────

    /// `initialize` with the supported protocol version and no client
    /// filesystem capabilities.
    ///
    /// # Errors
    ///
    /// Propagates agent and transport errors.
    pub async fn initialize(&self) -> Result<Value> {
        self.request(
            "initialize",
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "clientCapabilities": {
                    "fs": { "readTextFile": false, "writeTextFile": false }
                }
            }),
        )
        .await
    }

    /// `session/new` with the working directory and verbatim MCP servers.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Acp` when the response lacks a `sessionId`.
    pub async fn new_session(&self, cwd: &std::path::Path, mcp: &[McpServer]) -> Result<String> {
        let result = self
            .request(
                "session/new",
                json!({
                    "cwd": cwd.to_string_lossy(),
                    "mcpServers": mcp,
                }),
            )
            .await?;

        result
            .get("sessionId")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| AppError::Acp("session/new response without sessionId".into()))
    }

    /// `session/prompt` with a single text block; resolves with the turn's
    /// stop reason once the agent settles.
    ///
    /// # Errors
    ///
    /// Propagates agent and transport errors.
    pub async fn prompt(&self, session_id: &str, text: &str) -> Result<StopReason> {
        let result = self
            .request(
                "session/prompt",
                json!({
                    "sessionId": session_id,
                    "prompt": [ { "type": "text", "text": text } ],
                }),
            )
            .await?;
        Ok(StopReason::from_result(&result))
    }

    /// `session/cancel` notification; the in-flight prompt settles through
    /// its own stop reason.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` when the stream is already closed.
    pub async fn cancel(&self, session_id: &str) -> Result<()> {
        self.notify("session/cancel", json!({ "sessionId": session_id }))
            .await
    }
}

// ── Stream tasks ─────────────────────────────────────────────────────────────

async fn run_writer<W>(
    mut stdin: W,
    mut out_rx: mpsc::Receiver<Value>,
    cancel: CancellationToken,
    label: String,
) where
    W: AsyncWrite + Unpin + Send,
{
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(agent = label, "acp writer: cancellation received, stopping");
                break;
            }

            msg = out_rx.recv() => {
                let Some(value) = msg else {
                    debug!(agent = label, "acp writer: outbound channel closed, stopping");
                    break;
                };
                let mut bytes = match serde_json::to_vec(&value) {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        warn!(agent = label, %err, "acp writer: serialisation failed, dropping frame");
                        continue;
                    }
                };
                bytes.push(b'\n');
                if let Err(err) = stdin.write_all(&bytes).await {
                    warn!(agent = label, %err, "acp writer: write to agent stdin failed");
                    break;
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)] // Internal task plumbing.
async fn run_reader<R>(
    stdout: R,
    out_tx: mpsc::Sender<Value>,
    pending: Arc<PendingMap>,
    client: Arc<dyn AcpClient>,
    cancel: CancellationToken,
    alive: Arc<AtomicBool>,
    label: String,
) where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stdout, NdjsonCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(agent = label, "acp reader: cancellation received, stopping");
                break;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!(agent = label, "acp reader: EOF on agent stdout");
                        break;
                    }
                    Some(Err(AppError::Acp(msg))) => {
                        // Framing error (e.g. oversized line) — skip and continue.
                        warn!(agent = label, error = msg.as_str(), "acp reader: framing error, skipping");
                    }
                    Some(Err(err)) => {
                        warn!(agent = label, %err, "acp reader: stream error, stopping");
                        break;
                    }
                    Some(Ok(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match protocol::classify_frame(&line) {
                            Ok(frame) => {
                                dispatch_frame(frame, &out_tx, &pending, client.as_ref(), &label)
                                    .await;
                            }
                            Err(err) => {
                                warn!(agent = label, %err, raw = %line, "acp reader: malformed frame, skipping");
                            }
                        }
                    }
                }
            }
        }
    }

    alive.store(false, Ordering::SeqCst);
    fail_pending(&pending, "agent stream closed");
}

async fn dispatch_frame(
    frame: Frame,
    out_tx: &mpsc::Sender<Value>,
    pending: &Arc<PendingMap>,
    client: &dyn AcpClient,
    label: &str,
) {
    match frame {
        Frame::Response { id, result } => {
            let waiter = pending.lock().ok().and_then(|mut map| map.remove(&id));
            match waiter {
                Some(tx) => {
                    let _ = tx.send(result);
                }
                None => {
                    debug!(agent = label, id, "acp reader: response for unknown request id");
                }
            }
        }
        Frame::Request { id, method, params } => {
            let response = match method.as_str() {
                "session/request_permission" => {
                    protocol::response_frame(&id, client.request_permission(&params))
                }
                // No filesystem exposure through the bridge.
                "fs/read_text_file" | "fs/write_text_file" => {
                    protocol::response_frame(&id, json!({}))
                }
                other => {
                    debug!(agent = label, method = other, "acp reader: unsupported agent request");
                    protocol::method_not_found_frame(&id, other)
                }
            };
            if out_tx.send(response).await.is_err() {
                warn!(agent = label, method, "acp reader: cannot answer agent request, writer gone");
            }
        }
        Frame::Notification { method, params } => {
            if method == "session/update" {
                match protocol::parse_session_update(&params) {
                    Ok(note) => client.session_update(note),
                    Err(err) => {
                        warn!(agent = label, %err, "acp reader: bad session/update, skipping");
                    }
                }
            } else {
                debug!(agent = label, method, "acp reader: ignoring notification");
            }
        }
    }
}

fn fail_pending(pending: &PendingMap, reason: &str) {
    let Ok(mut map) = pending.lock() else {
        return;
    };
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(AppError::Transport(reason.to_owned())));
    }
}
