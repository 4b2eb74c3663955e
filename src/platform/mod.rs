//! Chat-platform adapter contract.
//!
//! The [`ChatAdapter`] trait decouples the bridge core (queue, pipeline,
//! scheduler, HTTP surface) from the concrete chat platform. Adapters own
//! every platform-specific concern: message chunking, escaping, and
//! edit/delete idempotence (e.g. swallowing "message is not modified").
//! The core never assumes Markdown support.

pub mod slack;
pub mod telegram;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::Result;

/// Boxed future in the adapter seam, mirroring the driver-trait style.
pub type AdapterFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// One inbound text message from the bound platform.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Message text.
    pub text: String,
    /// Platform chat identifier, stringly typed across platforms.
    pub chat_id: String,
    /// Sending user's id, when the platform exposes one.
    pub user_id: Option<String>,
    /// Sending user's handle or email, when available.
    pub username: Option<String>,
}

/// Abstract send / edit / delete / typing surface of a chat platform.
///
/// Live-message primitives operate on platform message ids returned by
/// `start_live_message`. All text-sending methods chunk internally to the
/// platform's message-length limit.
pub trait ChatAdapter: Send + Sync {
    /// Platform name for logs and the HTTP callback path segment.
    fn name(&self) -> &'static str;

    /// Hard per-message length limit of the platform.
    fn max_message_length(&self) -> usize;

    /// Start receiving messages, delivering each into `inbound`.
    ///
    /// Resolves once the adapter's background tasks are running.
    fn launch(&self, inbound: mpsc::Sender<IncomingMessage>) -> AdapterFuture<'_, ()>;

    /// Stop background tasks.
    fn stop(&self, reason: &str) -> AdapterFuture<'_, ()>;

    /// Send text to a chat, chunked to the platform limit.
    fn send_text(&self, chat_id: &str, text: &str) -> AdapterFuture<'_, ()>;

    /// Post the initial live message; returns its platform message id.
    fn start_live_message(&self, chat_id: &str, text: &str) -> AdapterFuture<'_, String>;

    /// Replace the live message's content.
    fn update_live_message(
        &self,
        chat_id: &str,
        message_id: &str,
        text: &str,
    ) -> AdapterFuture<'_, ()>;

    /// Final edit of the live message: the first chunk of `text` replaces
    /// the live content, remaining chunks are sent as new messages.
    fn finalize_live_message(
        &self,
        chat_id: &str,
        message_id: &str,
        text: &str,
    ) -> AdapterFuture<'_, ()>;

    /// Best-effort delete of a message.
    fn remove_message(&self, chat_id: &str, message_id: &str) -> AdapterFuture<'_, ()>;

    /// Emit one typing indicator; no-op where unsupported.
    fn send_typing(&self, chat_id: &str) -> AdapterFuture<'_, ()>;
}

// ── Typing indicator loop ────────────────────────────────────────────────────

/// Interval between repeated typing-indicator sends.
const TYPING_REFRESH: Duration = Duration::from_secs(4);

/// A typing indicator that repeats until dropped.
///
/// Platforms expire typing state after a few seconds, so the guard re-sends
/// on an interval. Dropping the guard stops the loop.
pub struct TypingGuard {
    task: JoinHandle<()>,
}

impl TypingGuard {
    /// Start a repeating typing indicator for `chat_id`.
    #[must_use]
    pub fn start(adapter: Arc<dyn ChatAdapter>, chat_id: String) -> Self {
        let task = tokio::spawn(async move {
            loop {
                if let Err(err) = adapter.send_typing(&chat_id).await {
                    debug!(%err, "typing indicator send failed");
                }
                tokio::time::sleep(TYPING_REFRESH).await;
            }
        });
        Self { task }
    }
}

impl Drop for TypingGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}
