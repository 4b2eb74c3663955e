//! Live-message manager.
//!
//! Maintains a preview buffer whose content is reconciled onto a single
//! platform message on a trailing-debounced schedule. Starting the live
//! message is single-flighted: racing flushes collapse onto one
//! `start_live_message` call. Finalization edits the live message with the
//! final text (platform-chunked by the adapter) and never starts a new one.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::pipeline::chunker::truncate_with_ellipsis;
use crate::platform::ChatAdapter;
use crate::Result;

/// Debounced streaming preview bound to one platform message.
#[derive(Clone)]
pub struct LiveMessageManager {
    adapter: Arc<dyn ChatAdapter>,
    chat_id: String,
    debounce: Duration,
    max_preview: usize,
    state: Arc<tokio::sync::Mutex<LiveState>>,
    start_lock: Arc<tokio::sync::Mutex<()>>,
}

#[derive(Default)]
struct LiveState {
    message_id: Option<String>,
    buffer: String,
    last_flush: Option<Instant>,
    finalized: bool,
    flush_task: Option<JoinHandle<()>>,
}

impl LiveMessageManager {
    /// Create a manager for `chat_id` with the given debounce window and
    /// preview cap.
    #[must_use]
    pub fn new(
        adapter: Arc<dyn ChatAdapter>,
        chat_id: String,
        debounce: Duration,
        max_preview: usize,
    ) -> Self {
        Self {
            adapter,
            chat_id,
            debounce,
            max_preview,
            state: Arc::new(tokio::sync::Mutex::new(LiveState::default())),
            start_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Whether the platform message exists and holds non-empty text.
    pub async fn has_content(&self) -> bool {
        let state = self.state.lock().await;
        state.message_id.is_some() && !state.buffer.trim().is_empty()
    }

    /// Append a chunk to the preview buffer and arm the debounced flush.
    pub async fn append(&self, chunk: &str) {
        let mut state = self.state.lock().await;
        if state.finalized {
            return;
        }
        state.buffer.push_str(chunk);

        if state.flush_task.is_none() {
            let manager = self.clone();
            let delay = self.debounce;
            state.flush_task = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                manager.state.lock().await.flush_task = None;
                manager.flush(false, true).await;
            }));
        }
    }

    /// Reconcile the preview buffer onto the platform message.
    ///
    /// Skipped while finalized or, unless `force`, within the debounce
    /// window of the previous flush. When no live message exists yet, one
    /// is started only if `allow_start` — at most one start proceeds even
    /// under racing flushes. Platform "message is not modified" errors are
    /// swallowed; other update errors are logged and not propagated.
    pub async fn flush(&self, force: bool, allow_start: bool) {
        let (text, message_id) = {
            let state = self.state.lock().await;
            if state.finalized {
                return;
            }
            if !force {
                if let Some(last) = state.last_flush {
                    if last.elapsed() < self.debounce {
                        return;
                    }
                }
            }
            let text = truncate_with_ellipsis(&state.buffer, self.max_preview.saturating_sub(1));
            (text, state.message_id.clone())
        };

        if text.trim().is_empty() {
            return;
        }

        let message_id = match message_id {
            Some(id) => id,
            None => {
                if allow_start {
                    self.start_singleflight(&text).await;
                }
                return;
            }
        };

        match self
            .adapter
            .update_live_message(&self.chat_id, &message_id, &text)
            .await
        {
            Ok(()) => self.stamp_flush().await,
            Err(err) => {
                let msg = err.to_string();
                if msg.contains("message is not modified") {
                    debug!("live update skipped: content unchanged");
                } else {
                    info!(%err, "live message update failed");
                }
            }
        }
    }

    /// Start the platform message exactly once under racing flushes.
    ///
    /// The start lock is held across both the platform call and the state
    /// stamp, so a racing flush observes the recorded message id instead of
    /// starting a second message.
    async fn start_singleflight(&self, text: &str) {
        let _start = self.start_lock.lock().await;
        {
            let state = self.state.lock().await;
            if state.finalized || state.message_id.is_some() {
                return;
            }
        }
        match self
            .adapter
            .start_live_message(&self.chat_id, text)
            .await
        {
            Ok(id) => {
                debug!(message_id = id, "live message started");
                let mut state = self.state.lock().await;
                state.message_id.get_or_insert(id);
                state.last_flush = Some(Instant::now());
            }
            Err(err) => {
                info!(%err, "failed to start live message");
            }
        }
    }

    async fn stamp_flush(&self) {
        let mut state = self.state.lock().await;
        state.last_flush = Some(Instant::now());
    }

    /// Finish the live message with the buffer (or `text_override`).
    ///
    /// Cancels the debounce and performs the final edit; a live message is
    /// never *started* here — when none exists, the final text is sent as
    /// ordinary (chunked) messages instead.
    ///
    /// # Errors
    ///
    /// Returns the platform error of the final edit or send.
    pub async fn finalize(&self, text_override: Option<String>) -> Result<()> {
        let (message_id, text) = {
            let mut state = self.state.lock().await;
            if state.finalized {
                return Ok(());
            }
            state.finalized = true;
            if let Some(task) = state.flush_task.take() {
                task.abort();
            }
            let text = text_override.unwrap_or_else(|| state.buffer.clone());
            (state.message_id.clone(), text)
        };

        if text.trim().is_empty() {
            return Ok(());
        }

        match message_id {
            Some(id) => {
                self.adapter
                    .finalize_live_message(&self.chat_id, &id, &text)
                    .await
            }
            None => self.adapter.send_text(&self.chat_id, &text).await,
        }
    }

    /// Cancel the debounce; on failure, best-effort delete a live message
    /// that was never finalized.
    pub async fn cleanup(&self, success: bool) {
        let message_id = {
            let mut state = self.state.lock().await;
            if let Some(task) = state.flush_task.take() {
                task.abort();
            }
            if state.finalized || success {
                None
            } else {
                state.message_id.clone()
            }
        };
        if let Some(id) = message_id {
            if let Err(err) = self.adapter.remove_message(&self.chat_id, &id).await {
                debug!(%err, "cleanup: live message delete failed");
            }
        }
    }
}
