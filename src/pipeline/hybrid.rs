//! Per-prompt hybrid delivery stream.
//!
//! Glues the online mode detector to the live-message manager for one
//! prompt: QUICK chunks stream into the live message (with gap-based
//! finalization splitting visually separate messages when the agent
//! pauses), ASYNC chunks accumulate into the background-task description,
//! and an undecided stream is resolved against the full response at
//! completion (defaulting to QUICK with a log line).

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::pipeline::live::LiveMessageManager;
use crate::pipeline::mode::{self, ConversationMode, ModeDetector};
use crate::platform::ChatAdapter;

/// What the stream resolved to once the prompt settled.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum StreamOutcome {
    /// The reply was (or defaulted to) an immediate answer; delivery is done.
    Quick,
    /// The reply described a background task to schedule.
    AsyncTask(String),
}

/// Stream state for one in-flight prompt.
pub struct HybridStream {
    adapter: Arc<dyn ChatAdapter>,
    chat_id: String,
    settings: Arc<Settings>,
    detector: ModeDetector,
    live: Option<LiveMessageManager>,
    last_chunk: Option<Instant>,
}

impl HybridStream {
    /// Create the stream for `chat_id`; `skip_hybrid` pins the mode to
    /// QUICK for contexts that bypass the mode protocol.
    #[must_use]
    pub fn new(
        adapter: Arc<dyn ChatAdapter>,
        chat_id: String,
        settings: Arc<Settings>,
        skip_hybrid: bool,
    ) -> Self {
        let detector = if skip_hybrid {
            ModeDetector::pinned_quick()
        } else {
            ModeDetector::new()
        };
        Self {
            adapter,
            chat_id,
            settings,
            detector,
            live: None,
            last_chunk: None,
        }
    }

    fn gap_threshold(&self) -> Duration {
        Duration::from_millis(self.settings.message_gap_threshold_ms)
    }

    fn new_live(&self) -> LiveMessageManager {
        LiveMessageManager::new(
            Arc::clone(&self.adapter),
            self.chat_id.clone(),
            Duration::from_millis(self.settings.stream_update_interval_ms),
            self.settings.max_response_length,
        )
    }

    /// Consume one streamed chunk in arrival order.
    pub async fn on_chunk(&mut self, chunk: &str, task_text: &mut String) {
        let now = Instant::now();
        let delivered = self.detector.feed(chunk);
        match delivered {
            Some((ConversationMode::Quick, text)) => {
                self.maybe_split_on_gap(now).await;
                if !text.is_empty() {
                    if self.live.is_none() {
                        self.live = Some(self.new_live());
                    }
                    if let Some(live) = &self.live {
                        live.append(&text).await;
                    }
                }
            }
            Some((ConversationMode::Async, text)) => {
                task_text.push_str(&text);
            }
            Some((ConversationMode::Unknown, _)) | None => {
                // Still buffering in the detector.
            }
        }
        self.last_chunk = Some(now);
    }

    /// Finalize the current live message when the inter-chunk gap exceeded
    /// the threshold and the live message already shows text.
    async fn maybe_split_on_gap(&mut self, now: Instant) {
        let Some(last) = self.last_chunk else {
            return;
        };
        if now.duration_since(last) <= self.gap_threshold() {
            return;
        }
        let Some(live) = self.live.take() else {
            return;
        };
        if live.has_content().await {
            debug!(chat_id = self.chat_id, "chunk gap exceeded; splitting live message");
            if let Err(err) = live.finalize(None).await {
                info!(%err, "gap finalization failed");
            }
        } else {
            self.live = Some(live);
        }
    }

    /// Settle the stream against the prompt's full response.
    ///
    /// Returns the outcome; for QUICK the live message is finalized (or the
    /// stripped response is sent when streaming never started).
    pub async fn complete(mut self, full_response: &str, task_text: String) -> StreamOutcome {
        let mut resolved = self.detector.mode();
        let mut async_task = task_text;

        if resolved == ConversationMode::Unknown {
            let (detected, stripped) = mode::detect(full_response);
            match detected {
                ConversationMode::Async => {
                    resolved = ConversationMode::Async;
                    async_task = stripped.to_owned();
                }
                ConversationMode::Quick => {
                    resolved = ConversationMode::Quick;
                }
                ConversationMode::Unknown => {
                    warn!(
                        chat_id = self.chat_id,
                        "response carried no mode tag; defaulting to QUICK"
                    );
                    resolved = ConversationMode::Quick;
                }
            }
        }

        match resolved {
            ConversationMode::Async => {
                if let Some(live) = self.live.take() {
                    // Nothing should have streamed; drop any preview quietly.
                    live.cleanup(true).await;
                }
                StreamOutcome::AsyncTask(async_task.trim().to_owned())
            }
            ConversationMode::Quick | ConversationMode::Unknown => {
                match self.live.take() {
                    Some(live) => {
                        if let Err(err) = live.finalize(None).await {
                            info!(%err, "live message finalization failed");
                        }
                    }
                    None => {
                        let (_, stripped) = mode::detect(full_response);
                        let text = stripped.trim();
                        if !text.is_empty() {
                            if let Err(err) = self.adapter.send_text(&self.chat_id, text).await {
                                info!(%err, "failed to send final reply");
                            }
                        }
                    }
                }
                StreamOutcome::Quick
            }
        }
    }

    /// Abandon the stream after a failed prompt: cancel the debounce and
    /// best-effort delete an unfinalized live message.
    pub async fn fail(mut self) {
        if let Some(live) = self.live.take() {
            live.cleanup(false).await;
        }
    }
}
