//! Runtime lifecycle tests against scripted shell agents.
//!
//! Each test spawns a real child process (`sh -c …`) that speaks just
//! enough NDJSON to play an ACP agent: the bridge's request ids are
//! deterministic per connection (initialize=1, session/new=2, prompt=3),
//! so the scripts can answer positionally.

use std::sync::Arc;

use clawless::agent::{AgentProfile, ProfileOptions};
use clawless::config::Settings;
use clawless::runtime::{AcpRuntime, NO_RESPONSE_TEXT};
use clawless::AppError;

use super::test_helpers::test_settings;

const INIT_RESPONSE: &str =
    r#"{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":1,"serverInfo":{"name":"stub"}}}"#;
const SESSION_RESPONSE: &str = r#"{"jsonrpc":"2.0","id":2,"result":{"sessionId":"sess-1"}}"#;
const CHUNK_NOTE: &str = r#"{"jsonrpc":"2.0","method":"session/update","params":{"sessionId":"sess-1","update":{"sessionUpdate":"agent_message_chunk","content":{"type":"text","text":"[MODE: QUICK] 4"}}}}"#;
const END_TURN: &str = r#"{"jsonrpc":"2.0","id":3,"result":{"stopReason":"end_turn"}}"#;
const CANCELLED: &str = r#"{"jsonrpc":"2.0","id":3,"result":{"stopReason":"cancelled"}}"#;

fn stub_profile(script: &str, settings: &Settings) -> AgentProfile {
    AgentProfile::custom(
        "sh",
        "Stub agent",
        vec!["-c".to_owned(), script.to_owned()],
        vec![],
        ProfileOptions {
            kill_grace: Some(std::time::Duration::from_millis(settings.kill_grace_ms)),
            ..ProfileOptions::default()
        },
    )
}

fn runtime_with(script: &str, settings: Settings) -> Arc<AcpRuntime> {
    let profile = stub_profile(script, &settings);
    AcpRuntime::new(profile, Arc::new(settings))
}

/// Script: answer the handshake, stream one chunk, end the turn, linger.
fn happy_script() -> String {
    format!(
        "read a; printf '%s\\n' '{INIT_RESPONSE}'; \
         read b; printf '%s\\n' '{SESSION_RESPONSE}'; \
         read c; printf '%s\\n' '{CHUNK_NOTE}'; printf '%s\\n' '{END_TURN}'; \
         sleep 5"
    )
}

#[tokio::test]
async fn prompt_streams_chunks_and_resolves_with_the_buffer() {
    let runtime = runtime_with(&happy_script(), test_settings());

    let chunks: Arc<std::sync::Mutex<Vec<String>>> = Arc::default();
    let sink_chunks = Arc::clone(&chunks);
    let reply = runtime
        .run_prompt(
            "ping",
            Some(Box::new(move |chunk| {
                sink_chunks.lock().expect("chunks lock").push(chunk.to_owned());
            })),
        )
        .await
        .expect("prompt resolves");

    assert_eq!(reply, "[MODE: QUICK] 4");
    assert_eq!(*chunks.lock().expect("chunks lock"), vec!["[MODE: QUICK] 4"]);
    assert!(runtime.is_healthy(), "session survives a completed prompt");
    assert!(!runtime.has_active_prompt(), "collector cleared at settlement");

    runtime.shutdown("test done").await;
    assert!(!runtime.is_healthy());
}

#[tokio::test]
async fn ensure_session_is_idempotent_and_collapses_racers() {
    let runtime = runtime_with(&happy_script(), test_settings());

    let (a, b) = tokio::join!(runtime.ensure_session(), runtime.ensure_session());
    a.expect("first caller");
    b.expect("second caller");
    assert!(runtime.is_healthy());

    // A third call on a healthy runtime is a no-op.
    runtime.ensure_session().await.expect("still healthy");

    runtime.shutdown("test done").await;
}

#[tokio::test]
async fn zero_chunk_end_turn_resolves_with_the_placeholder() {
    let script = format!(
        "read a; printf '%s\\n' '{INIT_RESPONSE}'; \
         read b; printf '%s\\n' '{SESSION_RESPONSE}'; \
         read c; printf '%s\\n' '{END_TURN}'; \
         sleep 5"
    );
    let runtime = runtime_with(&script, test_settings());

    let reply = runtime.run_prompt("ping", None).await.expect("resolves");
    assert_eq!(reply, NO_RESPONSE_TEXT);

    runtime.shutdown("test done").await;
}

#[tokio::test]
async fn cancelled_with_empty_buffer_rejects_as_agent_cancel() {
    let script = format!(
        "read a; printf '%s\\n' '{INIT_RESPONSE}'; \
         read b; printf '%s\\n' '{SESSION_RESPONSE}'; \
         read c; printf '%s\\n' '{CANCELLED}'; \
         sleep 5"
    );
    let runtime = runtime_with(&script, test_settings());

    let result = runtime.run_prompt("ping", None).await;
    assert!(
        matches!(result, Err(AppError::Cancelled(_))),
        "expected Cancelled, got {result:?}"
    );

    runtime.shutdown("test done").await;
}

#[tokio::test]
async fn manual_abort_turns_cancelled_empty_into_aborted() {
    // The agent stalls for a moment before reporting a cancelled turn,
    // leaving room to latch the manual abort.
    let script = format!(
        "read a; printf '%s\\n' '{INIT_RESPONSE}'; \
         read b; printf '%s\\n' '{SESSION_RESPONSE}'; \
         read c; sleep 1; printf '%s\\n' '{CANCELLED}'; \
         sleep 5"
    );
    let runtime = runtime_with(&script, test_settings());

    let prompt_runtime = Arc::clone(&runtime);
    let pending =
        tokio::spawn(async move { prompt_runtime.run_prompt("long search", None).await });

    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    assert!(runtime.has_active_prompt());
    runtime.request_manual_abort();
    assert!(runtime.cancel_active_prompt().await, "a prompt was active");

    let result = pending.await.expect("join");
    assert!(
        matches!(result, Err(AppError::Aborted(_))),
        "expected Aborted, got {result:?}"
    );

    runtime.shutdown("test done").await;
}

#[tokio::test]
async fn no_output_timeout_cancels_and_rejects() {
    let script = format!(
        "read a; printf '%s\\n' '{INIT_RESPONSE}'; \
         read b; printf '%s\\n' '{SESSION_RESPONSE}'; \
         read c; sleep 30"
    );
    let settings = Settings {
        acp_no_output_timeout_ms: 300,
        ..test_settings()
    };
    let runtime = runtime_with(&script, settings);

    let started = std::time::Instant::now();
    let result = runtime.run_prompt("ping", None).await;
    assert!(
        matches!(result, Err(AppError::Timeout(_))),
        "expected Timeout, got {result:?}"
    );
    assert!(
        started.elapsed() < std::time::Duration::from_secs(5),
        "no-output watchdog must fire long before the overall deadline"
    );

    runtime.shutdown("test done").await;
}

#[tokio::test]
async fn overall_deadline_cancels_even_with_steady_output() {
    // The agent streams a chunk every 100 ms forever; only the overall
    // clock can stop it.
    let script = format!(
        "read a; printf '%s\\n' '{INIT_RESPONSE}'; \
         read b; printf '%s\\n' '{SESSION_RESPONSE}'; \
         read c; while true; do printf '%s\\n' '{CHUNK_NOTE}'; sleep 0.1; done"
    );
    let settings = Settings {
        acp_timeout_ms: 800,
        acp_no_output_timeout_ms: 5_000,
        ..test_settings()
    };
    let runtime = runtime_with(&script, settings);

    let result = runtime.run_prompt("ping", None).await;
    assert!(
        matches!(result, Err(AppError::Timeout(_))),
        "expected Timeout, got {result:?}"
    );

    runtime.shutdown("test done").await;
}

#[tokio::test]
async fn crash_mid_prompt_rejects_resets_and_recovers() {
    let dir = tempfile::tempdir().expect("tempdir");
    let marker = dir.path().join("crashed-once");
    let marker_str = marker.to_string_lossy();

    // First connection crashes after accepting the prompt; later
    // connections behave.
    let script = format!(
        "if [ -f '{marker_str}' ]; then \
           read a; printf '%s\\n' '{INIT_RESPONSE}'; \
           read b; printf '%s\\n' '{SESSION_RESPONSE}'; \
           read c; printf '%s\\n' '{CHUNK_NOTE}'; printf '%s\\n' '{END_TURN}'; \
           sleep 5; \
         else \
           touch '{marker_str}'; \
           read a; printf '%s\\n' '{INIT_RESPONSE}'; \
           read b; printf '%s\\n' '{SESSION_RESPONSE}'; \
           read c; exit 1; \
         fi"
    );
    let runtime = runtime_with(&script, test_settings());

    let result = runtime.run_prompt("first", None).await;
    assert!(result.is_err(), "in-flight prompt must reject on crash");

    // Give the exit monitor a moment to reset state.
    tokio::time::sleep(std::time::Duration::from_millis(600)).await;
    assert!(!runtime.has_active_prompt());

    // The next message succeeds on a freshly spawned agent.
    let reply = runtime.run_prompt("second", None).await.expect("recovered");
    assert_eq!(reply, "[MODE: QUICK] 4");

    runtime.shutdown("test done").await;
}

#[tokio::test]
async fn init_failure_surfaces_the_internal_error_hint() {
    // The agent answers initialize with a JSON-RPC "Internal error".
    let script = "read a; printf '%s\\n' \
        '{\"jsonrpc\":\"2.0\",\"id\":1,\"error\":{\"code\":-32603,\"message\":\"Internal error\"}}'; \
        sleep 2"
        .to_owned();
    let runtime = runtime_with(&script, test_settings());

    let result = runtime.ensure_session().await;
    match result {
        Err(AppError::Acp(msg)) => {
            assert!(msg.contains("Internal error"), "got: {msg}");
            assert!(
                msg.contains("MCP") || msg.contains("skills"),
                "hint must mention MCP/skills configuration, got: {msg}"
            );
        }
        other => panic!("expected Acp error with hint, got {other:?}"),
    }
    assert!(!runtime.is_healthy(), "state must reset after init failure");

    runtime.shutdown("test done").await;
}

#[tokio::test]
async fn stderr_activity_keeps_the_no_output_watchdog_alive() {
    // The agent is silent on stdout for ~1 s but chatters on stderr the
    // whole time; with a 400 ms no-output window the prompt must still
    // complete.
    let script = format!(
        "read a; printf '%s\\n' '{INIT_RESPONSE}'; \
         read b; printf '%s\\n' '{SESSION_RESPONSE}'; \
         read c; \
         i=0; while [ $i -lt 5 ]; do echo thinking >&2; sleep 0.2; i=$((i+1)); done; \
         printf '%s\\n' '{CHUNK_NOTE}'; printf '%s\\n' '{END_TURN}'; \
         sleep 5"
    );
    let settings = Settings {
        acp_no_output_timeout_ms: 400,
        ..test_settings()
    };
    let runtime = runtime_with(&script, settings);

    let reply = runtime
        .run_prompt("ping", None)
        .await
        .expect("stderr bytes must refresh the liveness clock");
    assert_eq!(reply, "[MODE: QUICK] 4");

    runtime.shutdown("test done").await;
}

#[tokio::test]
async fn updates_for_a_stale_session_are_ignored() {
    // A chunk tagged with a foreign session id arrives before the real one;
    // only the current session's text may reach the buffer.
    let stale_chunk = r#"{"jsonrpc":"2.0","method":"session/update","params":{"sessionId":"someone-else","update":{"sessionUpdate":"agent_message_chunk","content":{"type":"text","text":"WRONG"}}}}"#;
    let script = format!(
        "read a; printf '%s\\n' '{INIT_RESPONSE}'; \
         read b; printf '%s\\n' '{SESSION_RESPONSE}'; \
         read c; printf '%s\\n' '{stale_chunk}'; \
         printf '%s\\n' '{CHUNK_NOTE}'; printf '%s\\n' '{END_TURN}'; \
         sleep 5"
    );
    let runtime = runtime_with(&script, test_settings());

    let reply = runtime.run_prompt("ping", None).await.expect("resolves");
    assert_eq!(reply, "[MODE: QUICK] 4", "stale-session text must not leak in");

    runtime.shutdown("test done").await;
}

#[tokio::test]
async fn broken_agent_still_allows_manual_attempts_after_prewarm() {
    // The agent dies instantly; automatic prewarm exhausts, but a direct
    // prompt still makes one more (failing) attempt instead of wedging.
    let settings = Settings {
        prewarm_max_retries: 2,
        prewarm_retry_ms: 50,
        ..test_settings()
    };
    let runtime = runtime_with("exit 7", settings);

    runtime.schedule_prewarm("startup");
    tokio::time::sleep(std::time::Duration::from_millis(600)).await;
    assert!(!runtime.is_healthy());

    let result = runtime.run_prompt("ping", None).await;
    assert!(result.is_err(), "manual attempt runs and surfaces the failure");

    runtime.shutdown("test done").await;
}

#[tokio::test]
async fn cancel_without_active_prompt_reports_nothing_to_do() {
    let runtime = runtime_with(&happy_script(), test_settings());
    assert!(!runtime.cancel_active_prompt().await);
}
