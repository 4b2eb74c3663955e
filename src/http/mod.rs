//! HTTP callback and scheduler API.
//!
//! A small single-host listener through which the agent itself (or any
//! local producer) pushes notifications into the bound chat and manages
//! schedules. See [`server`] for routes, auth, and body limits.

pub mod server;

use std::future::Future;
use std::pin::Pin;

use crate::Result;

/// Outbound bridge surface the HTTP layer delivers through.
///
/// Implemented by the orchestrator; keeps the HTTP layer free of adapter
/// and bound-chat plumbing.
pub trait OutboundSender: Send + Sync {
    /// Send plain text to a chat.
    fn send(&self, chat_id: &str, text: &str)
        -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// The currently bound chat id, if any message arrived yet.
    fn bound_chat(&self) -> Option<String>;
}
