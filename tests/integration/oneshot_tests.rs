//! One-shot prompt-mode worker tests with stub shell agents.

use std::time::Duration;

use clawless::agent::{AgentProfile, ProfileOptions};
use clawless::runtime::oneshot::run_oneshot_prompt;
use clawless::AppError;

fn stub(oneshot_script: &str) -> AgentProfile {
    AgentProfile::custom(
        "sh",
        "Stub agent",
        vec![],
        vec!["-c".to_owned(), oneshot_script.to_owned()],
        ProfileOptions::default(),
    )
}

#[tokio::test]
async fn stdout_is_the_response() {
    let profile = stub("echo background result");
    let output = run_oneshot_prompt(
        &profile,
        std::path::Path::new("."),
        "scan the repo",
        Duration::from_secs(10),
    )
    .await
    .expect("worker succeeds");

    assert_eq!(output, "background result");
}

#[tokio::test]
async fn the_prompt_rides_on_argv() {
    // `sh -c` binds the appended prompt text to `$0`.
    let profile = stub(r#"echo "got: $0""#);
    let output = run_oneshot_prompt(
        &profile,
        std::path::Path::new("."),
        "list TODO comments",
        Duration::from_secs(10),
    )
    .await
    .expect("worker succeeds");

    assert_eq!(output, "got: list TODO comments");
}

#[tokio::test]
async fn nonzero_exit_fails_with_the_stderr_tail() {
    let profile = stub("echo scary diagnostics >&2; exit 3");
    let result = run_oneshot_prompt(
        &profile,
        std::path::Path::new("."),
        "task",
        Duration::from_secs(10),
    )
    .await;

    match result {
        Err(AppError::Process(msg)) => {
            assert!(msg.contains("scary diagnostics"), "got: {msg}");
            assert!(msg.contains('3'), "exit code must be reported, got: {msg}");
        }
        other => panic!("expected Process error, got {other:?}"),
    }
}

#[tokio::test]
async fn hung_workers_hit_the_deadline() {
    let profile = stub("sleep 30");
    let result = run_oneshot_prompt(
        &profile,
        std::path::Path::new("."),
        "task",
        Duration::from_millis(300),
    )
    .await;

    assert!(
        matches!(result, Err(AppError::Timeout(_))),
        "expected Timeout, got {result:?}"
    );
}
