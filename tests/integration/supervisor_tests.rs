//! Process-supervision tests with real child processes.

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::process::Command;

use clawless::runtime::supervisor::{
    spawn_stderr_pump, terminate_gracefully, ActivityTracker, StderrTail,
};

fn shell(script: &str) -> tokio::process::Child {
    Command::new("sh")
        .arg("-c")
        .arg(script)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .expect("spawn shell")
}

#[tokio::test]
async fn sigterm_ends_a_cooperative_process_quickly() {
    let child = Arc::new(tokio::sync::Mutex::new(shell("sleep 30")));
    let started = Instant::now();

    terminate_gracefully(&child, Duration::from_secs(5), "coop").await;

    assert!(
        started.elapsed() < Duration::from_secs(3),
        "SIGTERM must end the process well before the grace period"
    );
    let status = child.lock().await.try_wait().expect("poll");
    assert!(status.is_some(), "process must be gone");
}

#[tokio::test]
async fn already_exited_process_resolves_immediately() {
    let child = Arc::new(tokio::sync::Mutex::new(shell("true")));
    tokio::time::sleep(Duration::from_millis(300)).await;

    let started = Instant::now();
    terminate_gracefully(&child, Duration::from_secs(10), "done").await;
    assert!(
        started.elapsed() < Duration::from_millis(500),
        "no signals and no waiting for a dead process"
    );
}

#[tokio::test]
async fn stubborn_process_is_escalated_to_sigkill() {
    // Ignores SIGTERM; only SIGKILL can end it.
    let child = Arc::new(tokio::sync::Mutex::new(shell(
        "trap '' TERM; sleep 30",
    )));
    // Give the shell a moment to install the trap.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = Instant::now();
    terminate_gracefully(&child, Duration::from_millis(500), "stubborn").await;

    assert!(
        started.elapsed() < Duration::from_secs(5),
        "SIGKILL escalation must end the process shortly after the grace period"
    );
}

#[tokio::test]
async fn stderr_pump_fills_the_tail_and_refreshes_liveness() {
    let mut child = shell("echo first-line >&2; echo second-line >&2");
    let stderr = child.stderr.take().expect("stderr piped");

    let tail = Arc::new(Mutex::new(StderrTail::new(4_000)));
    let activity = ActivityTracker::new();
    let before = activity.last();

    let pump = spawn_stderr_pump(stderr, "stub".to_owned(), Arc::clone(&tail), activity.clone());
    pump.await.expect("pump ends at EOF");

    let snapshot = tail.lock().expect("tail lock").snapshot();
    assert!(snapshot.contains("first-line"), "got: {snapshot}");
    assert!(snapshot.contains("second-line"), "got: {snapshot}");
    assert!(
        activity.last() >= before,
        "stderr output must count as liveness activity"
    );

    let _ = child.wait().await;
}

#[tokio::test]
async fn stderr_tail_stays_bounded_under_load() {
    let mut child = shell("i=0; while [ $i -lt 200 ]; do echo 0123456789012345678901234567890123456789 >&2; i=$((i+1)); done");
    let stderr = child.stderr.take().expect("stderr piped");

    let tail = Arc::new(Mutex::new(StderrTail::new(500)));
    let pump = spawn_stderr_pump(
        stderr,
        "noisy".to_owned(),
        Arc::clone(&tail),
        ActivityTracker::new(),
    );
    pump.await.expect("pump ends at EOF");

    assert!(tail.lock().expect("tail lock").len_chars() <= 500);
    let _ = child.wait().await;
}
