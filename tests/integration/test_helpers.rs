//! Shared fixtures for integration tests: a recording platform adapter,
//! short-timer settings, and scripted shell agents.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use clawless::config::Settings;
use clawless::platform::{AdapterFuture, ChatAdapter, IncomingMessage};
use clawless::{AppError, Result};

/// One recorded platform operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterOp {
    Send { chat_id: String, text: String },
    Start { chat_id: String, text: String },
    Update { message_id: String, text: String },
    Finalize { message_id: String, text: String },
    Remove { message_id: String },
    Typing,
}

/// In-memory adapter that records every call and mints message ids.
pub struct MockAdapter {
    ops: Mutex<Vec<AdapterOp>>,
    next_id: AtomicUsize,
    max_len: usize,
    fail_sends: bool,
}

impl MockAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            ops: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(1),
            max_len: 4096,
            fail_sends: false,
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            ops: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(1),
            max_len: 4096,
            fail_sends: true,
        })
    }

    pub fn ops(&self) -> Vec<AdapterOp> {
        self.ops.lock().expect("ops lock").clone()
    }

    pub fn starts(&self) -> Vec<AdapterOp> {
        self.ops()
            .into_iter()
            .filter(|op| matches!(op, AdapterOp::Start { .. }))
            .collect()
    }

    fn record(&self, op: AdapterOp) {
        self.ops.lock().expect("ops lock").push(op);
    }

    fn check(&self) -> Result<()> {
        if self.fail_sends {
            Err(AppError::Platform("mock adapter configured to fail".into()))
        } else {
            Ok(())
        }
    }
}

impl ChatAdapter for MockAdapter {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn max_message_length(&self) -> usize {
        self.max_len
    }

    fn launch(&self, _inbound: mpsc::Sender<IncomingMessage>) -> AdapterFuture<'_, ()> {
        Box::pin(async move { Ok(()) })
    }

    fn stop(&self, _reason: &str) -> AdapterFuture<'_, ()> {
        Box::pin(async move { Ok(()) })
    }

    fn send_text(&self, chat_id: &str, text: &str) -> AdapterFuture<'_, ()> {
        let op = AdapterOp::Send {
            chat_id: chat_id.to_owned(),
            text: text.to_owned(),
        };
        Box::pin(async move {
            self.check()?;
            self.record(op);
            Ok(())
        })
    }

    fn start_live_message(&self, chat_id: &str, text: &str) -> AdapterFuture<'_, String> {
        let op = AdapterOp::Start {
            chat_id: chat_id.to_owned(),
            text: text.to_owned(),
        };
        Box::pin(async move {
            self.check()?;
            self.record(op);
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            Ok(format!("m{id}"))
        })
    }

    fn update_live_message(
        &self,
        _chat_id: &str,
        message_id: &str,
        text: &str,
    ) -> AdapterFuture<'_, ()> {
        let op = AdapterOp::Update {
            message_id: message_id.to_owned(),
            text: text.to_owned(),
        };
        Box::pin(async move {
            self.check()?;
            self.record(op);
            Ok(())
        })
    }

    fn finalize_live_message(
        &self,
        _chat_id: &str,
        message_id: &str,
        text: &str,
    ) -> AdapterFuture<'_, ()> {
        let op = AdapterOp::Finalize {
            message_id: message_id.to_owned(),
            text: text.to_owned(),
        };
        Box::pin(async move {
            self.check()?;
            self.record(op);
            Ok(())
        })
    }

    fn remove_message(&self, _chat_id: &str, message_id: &str) -> AdapterFuture<'_, ()> {
        let op = AdapterOp::Remove {
            message_id: message_id.to_owned(),
        };
        Box::pin(async move {
            self.record(op);
            Ok(())
        })
    }

    fn send_typing(&self, _chat_id: &str) -> AdapterFuture<'_, ()> {
        Box::pin(async move {
            self.record(AdapterOp::Typing);
            Ok(())
        })
    }
}

/// Settings tuned for fast tests: short debounce, short timeouts, no
/// prewarm retries.
pub fn test_settings() -> Settings {
    Settings {
        telegram_bot_token: "test-token".to_owned(),
        acp_timeout_ms: 10_000,
        acp_no_output_timeout_ms: 5_000,
        kill_grace_ms: 2_000,
        prewarm_retry_ms: 0,
        prewarm_max_retries: 1,
        stream_update_interval_ms: 50,
        message_gap_threshold_ms: 100,
        max_response_length: 4_000,
        heartbeat_interval_ms: 60_000,
        ..Settings::default()
    }
}
