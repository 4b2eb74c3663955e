//! Callback / schedule HTTP listener.
//!
//! All requests pass one auth check: with an empty configured token every
//! caller is allowed, otherwise either `x-callback-token: <t>` or
//! `Authorization: Bearer <t>` must match. Bodies are bounded by
//! `callback_max_body_bytes`; oversize reads answer 413 with a JSON error.
//! Every error body is `{ok:false, error:"…"}`. A port already in use is
//! non-fatal: the bridge logs a warning and runs without the listener.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Settings;
use crate::http::OutboundSender;
use crate::scheduler::model::{NewSchedule, ScheduleMetadata, SchedulePatch, ScheduleType};
use crate::scheduler::Scheduler;
use crate::{AppError, Result};

/// Shared state of the HTTP surface.
pub struct HttpState {
    /// Global settings (auth token, body limit).
    pub settings: Arc<Settings>,
    /// Scheduler behind the `/api/schedule` routes.
    pub scheduler: Arc<Scheduler>,
    /// Delivery surface for `/callback/*`.
    pub outbound: Arc<dyn OutboundSender>,
}

/// Bind the listener and start serving in a background task.
///
/// Returns the bound address, or `None` when the port is already in use
/// (logged as a warning, not an error).
///
/// # Errors
///
/// Returns `AppError::Http` for bind failures other than `EADDRINUSE`.
pub async fn start(
    state: Arc<HttpState>,
    cancel: CancellationToken,
) -> Result<Option<(SocketAddr, JoinHandle<()>)>> {
    let host = state.settings.http_host.clone();
    let port = state.settings.http_port;
    let bind = format!("{host}:{port}");

    let listener = match tokio::net::TcpListener::bind(&bind).await {
        Ok(listener) => listener,
        Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
            warn!(%bind, "callback port already in use; continuing without the HTTP server");
            return Ok(None);
        }
        Err(err) => {
            return Err(AppError::Http(format!("failed to bind {bind}: {err}")));
        }
    };
    let addr = listener
        .local_addr()
        .map_err(|err| AppError::Http(format!("cannot read bound address: {err}")))?;

    let app = router(Arc::clone(&state));
    info!(%addr, "callback HTTP server listening");

    let task = tokio::spawn(async move {
        let shutdown = cancel.cancelled_owned();
        if let Err(err) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            warn!(%err, "callback HTTP server stopped with error");
        }
    });

    Ok(Some((addr, task)))
}

/// Build the route table.
#[must_use]
pub fn router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/callback/{platform}", axum::routing::post(callback))
        .route(
            "/api/schedule",
            get(list_schedules).post(create_schedule),
        )
        .route(
            "/api/schedule/{id}",
            get(get_schedule)
                .patch(patch_schedule)
                .delete(delete_schedule),
        )
        .route(
            "/api/memory/semantic-recall",
            axum::routing::post(semantic_recall),
        )
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(Arc::clone(&state), auth))
        .with_state(state)
}

// ── Auth ─────────────────────────────────────────────────────────────────────

async fn auth(State(state): State<Arc<HttpState>>, req: Request, next: Next) -> Response {
    let token = &state.settings.callback_auth_token;
    if token.is_empty() {
        return next.run(req).await;
    }

    let headers = req.headers();
    let header_token = headers
        .get("x-callback-token")
        .and_then(|v| v.to_str().ok());
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if header_token == Some(token.as_str()) || bearer == Some(token.as_str()) {
        next.run(req).await
    } else {
        json_error(StatusCode::UNAUTHORIZED, "invalid or missing callback token")
    }
}

// ── Routes ───────────────────────────────────────────────────────────────────

async fn healthz() -> Response {
    (StatusCode::OK, Json(json!({ "ok": true }))).into_response()
}

async fn not_found() -> Response {
    json_error(StatusCode::NOT_FOUND, "no such route")
}

async fn semantic_recall() -> Response {
    json_error(
        StatusCode::NOT_FOUND,
        "semantic recall store is not configured",
    )
}

/// `POST /callback/{platform}` — `{text, chatId?}`.
///
/// Target resolution prefers the body's `chatId`, then the query string,
/// then the bound chat.
async fn callback(
    State(state): State<Arc<HttpState>>,
    Path(platform): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    req: Request,
) -> Response {
    let body = match read_json_body(&state, req.into_body()).await {
        Ok(body) => body,
        Err(response) => return response,
    };

    let Some(text) = body.get("text").and_then(Value::as_str) else {
        return json_error(StatusCode::BAD_REQUEST, "missing 'text' field");
    };

    let chat_id = body
        .get("chatId")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .or_else(|| query.get("chatId").cloned())
        .or_else(|| state.outbound.bound_chat());

    let Some(chat_id) = chat_id else {
        return json_error(
            StatusCode::BAD_REQUEST,
            "no chatId given and no chat bound yet",
        );
    };

    info!(platform, chat_id, "callback delivery");
    match state.outbound.send(&chat_id, text).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "ok": true, "chatId": chat_id })),
        )
            .into_response(),
        Err(err) => json_error(
            StatusCode::BAD_GATEWAY,
            &format!("delivery failed: {err}"),
        ),
    }
}

async fn create_schedule(State(state): State<Arc<HttpState>>, req: Request) -> Response {
    let body = match read_json_body(&state, req.into_body()).await {
        Ok(body) => body,
        Err(response) => return response,
    };

    let new = match parse_new_schedule(&body) {
        Ok(new) => new,
        Err(msg) => return json_error(StatusCode::BAD_REQUEST, &msg),
    };

    match state.scheduler.create(new).await {
        Ok(config) => (
            StatusCode::CREATED,
            Json(json!({ "ok": true, "schedule": config })),
        )
            .into_response(),
        Err(err) => json_error(StatusCode::BAD_REQUEST, &err.to_string()),
    }
}

async fn list_schedules(State(state): State<Arc<HttpState>>) -> Response {
    let schedules = state.scheduler.list().await;
    (
        StatusCode::OK,
        Json(json!({ "ok": true, "schedules": schedules })),
    )
        .into_response()
}

async fn get_schedule(State(state): State<Arc<HttpState>>, Path(id): Path<String>) -> Response {
    match state.scheduler.get(&id).await {
        Some(config) => (
            StatusCode::OK,
            Json(json!({ "ok": true, "schedule": config })),
        )
            .into_response(),
        None => json_error(StatusCode::NOT_FOUND, &format!("no schedule '{id}'")),
    }
}

async fn patch_schedule(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
    req: Request,
) -> Response {
    let body = match read_json_body(&state, req.into_body()).await {
        Ok(body) => body,
        Err(response) => return response,
    };

    let patch = match parse_schedule_patch(&body) {
        Ok(patch) => patch,
        Err(msg) => return json_error(StatusCode::BAD_REQUEST, &msg),
    };
    if patch.is_empty() {
        return json_error(
            StatusCode::BAD_REQUEST,
            "at least one updatable field is required",
        );
    }

    match state.scheduler.update(&id, patch).await {
        Ok(config) => (
            StatusCode::OK,
            Json(json!({ "ok": true, "schedule": config })),
        )
            .into_response(),
        Err(AppError::NotFound(msg)) => json_error(StatusCode::NOT_FOUND, &msg),
        Err(err) => json_error(StatusCode::BAD_REQUEST, &err.to_string()),
    }
}

async fn delete_schedule(State(state): State<Arc<HttpState>>, Path(id): Path<String>) -> Response {
    match state.scheduler.remove(&id).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "ok": true }))).into_response(),
        Err(AppError::NotFound(msg)) => json_error(StatusCode::NOT_FOUND, &msg),
        Err(err) => json_error(StatusCode::BAD_REQUEST, &err.to_string()),
    }
}

// ── Body parsing helpers ─────────────────────────────────────────────────────

/// Read the body within the configured byte cap and parse it as JSON.
async fn read_json_body(state: &HttpState, body: Body) -> std::result::Result<Value, Response> {
    let limit = state.settings.callback_max_body_bytes;
    let bytes = axum::body::to_bytes(body, limit).await.map_err(|_| {
        json_error(
            StatusCode::PAYLOAD_TOO_LARGE,
            &format!("body exceeds {limit} bytes"),
        )
    })?;
    serde_json::from_slice(&bytes)
        .map_err(|err| json_error(StatusCode::BAD_REQUEST, &format!("invalid json body: {err}")))
}

fn parse_new_schedule(body: &Value) -> std::result::Result<NewSchedule, String> {
    let message = match body.get("message") {
        Some(Value::String(s)) => s.clone(),
        Some(_) => return Err("'message' must be a string".into()),
        None => return Err("missing 'message' field".into()),
    };
    let description = opt_string(body, "description")?;
    let cron_expression = opt_string(body, "cronExpression")?;
    let one_time = match body.get("oneTime") {
        Some(Value::Bool(flag)) => *flag,
        Some(_) => return Err("'oneTime' must be a boolean".into()),
        None => body.get("runAt").is_some(),
    };
    let run_at = match opt_string(body, "runAt")? {
        Some(raw) => Some(parse_run_at(&raw)?),
        None => None,
    };
    let schedule_type = match body.get("type") {
        Some(Value::String(s)) => match s.as_str() {
            "standard" => ScheduleType::Standard,
            "async_conversation" => ScheduleType::AsyncConversation,
            other => return Err(format!("unknown schedule type '{other}'")),
        },
        Some(_) => return Err("'type' must be a string".into()),
        None => ScheduleType::Standard,
    };
    let metadata = match body.get("metadata") {
        Some(Value::Object(map)) => ScheduleMetadata {
            chat_id: map
                .get("chatId")
                .and_then(Value::as_str)
                .map(str::to_owned),
        },
        Some(Value::Null) | None => ScheduleMetadata::default(),
        Some(_) => return Err("'metadata' must be an object".into()),
    };

    Ok(NewSchedule {
        message,
        description,
        cron_expression,
        one_time,
        run_at,
        schedule_type,
        metadata,
    })
}

fn parse_schedule_patch(body: &Value) -> std::result::Result<SchedulePatch, String> {
    let message = opt_string(body, "message")?;
    let description = match body.get("description") {
        None => None,
        Some(Value::Null) => Some(None),
        Some(Value::String(s)) => Some(Some(s.clone())),
        Some(_) => return Err("'description' must be a string or null".into()),
    };
    let cron_expression = opt_string(body, "cronExpression")?;
    let run_at = match opt_string(body, "runAt")? {
        Some(raw) => Some(parse_run_at(&raw)?),
        None => None,
    };
    let active = match body.get("active") {
        Some(Value::Bool(flag)) => Some(*flag),
        Some(_) => return Err("'active' must be a boolean".into()),
        None => None,
    };
    Ok(SchedulePatch {
        message,
        description,
        cron_expression,
        run_at,
        active,
    })
}

fn parse_run_at(raw: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| format!("'runAt' is not a valid ISO-8601 timestamp: {err}"))
}

fn opt_string(body: &Value, key: &str) -> std::result::Result<Option<String>, String> {
    match body.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(format!("'{key}' must be a string")),
    }
}

fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "ok": false, "error": message }))).into_response()
}
