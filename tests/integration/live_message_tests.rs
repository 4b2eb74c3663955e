//! Live-message manager tests against the recording adapter.

use std::sync::Arc;
use std::time::Duration;

use clawless::pipeline::live::LiveMessageManager;
use clawless::platform::ChatAdapter;

use super::test_helpers::{AdapterOp, MockAdapter};

fn manager(adapter: &Arc<MockAdapter>, debounce_ms: u64, max_preview: usize) -> LiveMessageManager {
    let dyn_adapter: Arc<dyn ChatAdapter> = Arc::clone(adapter) as Arc<dyn ChatAdapter>;
    LiveMessageManager::new(
        dyn_adapter,
        "chat-1".to_owned(),
        Duration::from_millis(debounce_ms),
        max_preview,
    )
}

#[tokio::test]
async fn first_flush_starts_the_live_message() {
    let adapter = MockAdapter::new();
    let live = manager(&adapter, 30, 4_000);

    live.append("hello").await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let ops = adapter.ops();
    assert_eq!(
        ops,
        vec![AdapterOp::Start {
            chat_id: "chat-1".to_owned(),
            text: "hello".to_owned()
        }]
    );
}

#[tokio::test]
async fn later_flushes_update_in_place() {
    let adapter = MockAdapter::new();
    let live = manager(&adapter, 20, 4_000);

    live.append("part one").await;
    tokio::time::sleep(Duration::from_millis(80)).await;
    live.append(" part two").await;
    tokio::time::sleep(Duration::from_millis(80)).await;

    let ops = adapter.ops();
    assert!(matches!(&ops[0], AdapterOp::Start { .. }));
    assert!(
        matches!(&ops[1], AdapterOp::Update { text, .. } if text == "part one part two"),
        "second flush must edit the same message, got {ops:?}"
    );
}

#[tokio::test]
async fn racing_flushes_start_exactly_one_message() {
    let adapter = MockAdapter::new();
    let live = manager(&adapter, 10, 4_000);

    live.append("racy").await;
    tokio::join!(
        live.flush(true, true),
        live.flush(true, true),
        live.flush(true, true),
    );

    assert_eq!(adapter.starts().len(), 1, "single-flight start must hold");
}

#[tokio::test]
async fn preview_is_truncated_with_an_ellipsis() {
    let adapter = MockAdapter::new();
    let live = manager(&adapter, 10, 20);

    live.append(&"x".repeat(100)).await;
    live.flush(true, true).await;

    let ops = adapter.ops();
    match &ops[0] {
        AdapterOp::Start { text, .. } => {
            assert!(text.chars().count() <= 20, "preview over cap: {}", text.len());
            assert!(text.ends_with('…'));
        }
        other => panic!("expected Start, got {other:?}"),
    }
}

#[tokio::test]
async fn finalize_edits_the_live_message_with_the_full_buffer() {
    let adapter = MockAdapter::new();
    let live = manager(&adapter, 10, 4_000);

    live.append("final answer").await;
    live.flush(true, true).await;
    live.finalize(None).await.expect("finalize");

    let ops = adapter.ops();
    assert!(matches!(
        ops.last(),
        Some(AdapterOp::Finalize { text, .. }) if text == "final answer"
    ));
}

#[tokio::test]
async fn finalize_without_a_live_message_sends_plain_text() {
    let adapter = MockAdapter::new();
    let live = manager(&adapter, 10_000, 4_000);

    // Debounce never fires; no live message exists at finalize time.
    live.append("quick reply").await;
    live.finalize(None).await.expect("finalize");

    let ops = adapter.ops();
    assert_eq!(
        ops,
        vec![AdapterOp::Send {
            chat_id: "chat-1".to_owned(),
            text: "quick reply".to_owned()
        }]
    );
}

#[tokio::test]
async fn finalize_is_idempotent_and_stops_flushes() {
    let adapter = MockAdapter::new();
    let live = manager(&adapter, 10, 4_000);

    live.append("done").await;
    live.flush(true, true).await;
    live.finalize(None).await.expect("first finalize");
    let ops_after_first = adapter.ops().len();

    live.finalize(None).await.expect("second finalize is a no-op");
    live.append("late chunk").await;
    live.flush(true, true).await;

    assert_eq!(adapter.ops().len(), ops_after_first, "nothing after finalize");
}

#[tokio::test]
async fn cleanup_on_failure_deletes_an_unfinalized_message() {
    let adapter = MockAdapter::new();
    let live = manager(&adapter, 10, 4_000);

    live.append("doomed").await;
    live.flush(true, true).await;
    live.cleanup(false).await;

    assert!(matches!(
        adapter.ops().last(),
        Some(AdapterOp::Remove { .. })
    ));
}

#[tokio::test]
async fn cleanup_on_success_leaves_the_message_alone() {
    let adapter = MockAdapter::new();
    let live = manager(&adapter, 10, 4_000);

    live.append("kept").await;
    live.flush(true, true).await;
    live.cleanup(true).await;

    assert!(!adapter
        .ops()
        .iter()
        .any(|op| matches!(op, AdapterOp::Remove { .. })));
}

#[tokio::test]
async fn start_failure_is_swallowed() {
    let adapter = MockAdapter::failing();
    let dyn_adapter: Arc<dyn ChatAdapter> = Arc::clone(&adapter) as Arc<dyn ChatAdapter>;
    let live = LiveMessageManager::new(
        dyn_adapter,
        "chat-1".to_owned(),
        Duration::from_millis(10),
        4_000,
    );

    live.append("text").await;
    // Must not panic or propagate.
    live.flush(true, true).await;
}
