//! ACP wire-protocol types and pure protocol decisions.
//!
//! Untrusted JSON is classified and parsed here, once, at the transport
//! boundary. Nothing above this module sees a raw [`serde_json::Value`]
//! except as an opaque request/response payload.

use serde_json::{json, Value};

use crate::config::PermissionStrategy;
use crate::{AppError, Result};

/// Protocol version advertised in `initialize`.
pub const PROTOCOL_VERSION: u16 = 1;

// ── Frame classification ─────────────────────────────────────────────────────

/// One decoded JSON-RPC frame from the agent.
#[derive(Debug)]
pub enum Frame {
    /// Response to one of our requests, correlated by integer id.
    Response {
        /// Request id this frame answers.
        id: i64,
        /// `Ok(result)` or `Err` mapped from the JSON-RPC error object.
        result: Result<Value>,
    },
    /// Request initiated by the agent; we must answer with the echoed id.
    Request {
        /// Raw id to echo back (the agent may use numbers or strings).
        id: Value,
        /// Method name.
        method: String,
        /// Method parameters.
        params: Value,
    },
    /// One-way notification from the agent.
    Notification {
        /// Method name.
        method: String,
        /// Method parameters.
        params: Value,
    },
}

/// Classify a single NDJSON line into a [`Frame`].
///
/// # Errors
///
/// Returns `AppError::Acp` when the line is not a JSON object or fits none
/// of the three frame shapes.
pub fn classify_frame(line: &str) -> Result<Frame> {
    let value: Value = serde_json::from_str(line)
        .map_err(|e| AppError::Acp(format!("malformed frame: {e}")))?;

    let obj = value
        .as_object()
        .ok_or_else(|| AppError::Acp("malformed frame: not a JSON object".into()))?;

    let method = obj.get("method").and_then(Value::as_str);
    let id = obj.get("id");

    match (method, id) {
        (Some(method), Some(id)) => Ok(Frame::Request {
            id: id.clone(),
            method: method.to_owned(),
            params: obj.get("params").cloned().unwrap_or(Value::Null),
        }),
        (Some(method), None) => Ok(Frame::Notification {
            method: method.to_owned(),
            params: obj.get("params").cloned().unwrap_or(Value::Null),
        }),
        (None, Some(id)) => {
            let id = id
                .as_i64()
                .ok_or_else(|| AppError::Acp("response id is not an integer".into()))?;
            let result = if let Some(error) = obj.get("error") {
                let message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error");
                let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
                Err(AppError::Acp(format!("agent error {code}: {message}")))
            } else {
                Ok(obj.get("result").cloned().unwrap_or(Value::Null))
            };
            Ok(Frame::Response { id, result })
        }
        (None, None) => Err(AppError::Acp(
            "malformed frame: neither request, notification, nor response".into(),
        )),
    }
}

// ── Outbound frame builders ──────────────────────────────────────────────────

/// Build an outbound request frame.
#[must_use]
pub fn request_frame(id: i64, method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
}

/// Build an outbound notification frame.
#[must_use]
pub fn notification_frame(method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "method": method, "params": params })
}

/// Build a success response for an agent-initiated request.
#[must_use]
pub fn response_frame(id: &Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

/// Build a method-not-found error response for an agent-initiated request.
#[must_use]
pub fn method_not_found_frame(id: &Value, method: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": -32601, "message": format!("method not found: {method}") }
    })
}

// ── Session updates ──────────────────────────────────────────────────────────

/// Parsed `session/update` notification.
#[derive(Debug, Clone)]
pub struct SessionNotification {
    /// Session the update belongs to.
    pub session_id: String,
    /// The update payload.
    pub update: SessionUpdate,
}

/// Consumed subset of the `session/update` payload.
///
/// Only text chunks of the agent's message are collected; every other
/// update kind counts as liveness and nothing else.
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    /// `agent_message_chunk` with `content.type == "text"`.
    AgentMessageChunk {
        /// The chunk text.
        text: String,
    },
    /// Any other update kind, observed for liveness only.
    Other,
}

/// Parse `session/update` parameters.
///
/// # Errors
///
/// Returns `AppError::Acp` when `sessionId` is absent.
pub fn parse_session_update(params: &Value) -> Result<SessionNotification> {
    let session_id = params
        .get("sessionId")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::Acp("session/update without sessionId".into()))?
        .to_owned();

    let update = params.get("update");
    let kind = update
        .and_then(|u| u.get("sessionUpdate"))
        .and_then(Value::as_str);

    let update = if kind == Some("agent_message_chunk") {
        let content = update.and_then(|u| u.get("content"));
        let is_text = content.and_then(|c| c.get("type")).and_then(Value::as_str) == Some("text");
        match content.and_then(|c| c.get("text")).and_then(Value::as_str) {
            Some(text) if is_text => SessionUpdate::AgentMessageChunk {
                text: text.to_owned(),
            },
            _ => SessionUpdate::Other,
        }
    } else {
        SessionUpdate::Other
    };

    Ok(SessionNotification { session_id, update })
}

// ── Permission policy ────────────────────────────────────────────────────────

/// Decide the outcome of a `session/request_permission` call.
///
/// Empty options or a `cancelled` strategy decline the request. Otherwise
/// the first option whose `kind` matches the strategy wins; when none
/// matches, the agent's first option is taken.
#[must_use]
pub fn permission_outcome(params: &Value, strategy: &PermissionStrategy) -> Value {
    let options = params
        .get("options")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    if options.is_empty() || *strategy == PermissionStrategy::Cancelled {
        return json!({ "outcome": { "outcome": "cancelled" } });
    }

    let wanted = strategy.option_kind();
    let chosen = options
        .iter()
        .find(|opt| opt.get("kind").and_then(Value::as_str) == Some(wanted))
        .unwrap_or(&options[0]);

    let option_id = chosen
        .get("optionId")
        .cloned()
        .unwrap_or(Value::Null);

    json!({ "outcome": { "outcome": "selected", "optionId": option_id } })
}

// ── Stop reasons ─────────────────────────────────────────────────────────────

/// Why a `session/prompt` turn ended.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum StopReason {
    /// Agent finished its turn normally.
    EndTurn,
    /// Turn was cancelled (by us or by the agent).
    Cancelled,
    /// Token or turn-request budget exhausted.
    MaxTokens,
    /// The agent refused to continue.
    Refusal,
    /// Any other reported reason, carried verbatim.
    Other(String),
}

impl StopReason {
    /// Parse a `session/prompt` result object.
    #[must_use]
    pub fn from_result(result: &Value) -> Self {
        match result.get("stopReason").and_then(Value::as_str) {
            Some("end_turn") | None => Self::EndTurn,
            Some("cancelled") => Self::Cancelled,
            Some("max_tokens" | "max_turn_requests") => Self::MaxTokens,
            Some("refusal") => Self::Refusal,
            Some(other) => Self::Other(other.to_owned()),
        }
    }
}
