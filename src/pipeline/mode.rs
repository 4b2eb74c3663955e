//! Conversation-mode detection.
//!
//! Every hybrid-wrapped prompt instructs the agent to prefix its reply
//! with `[MODE: QUICK]` (answer now) or `[MODE: ASYNC]` (describe a
//! background task). The detector reads the stream online: while the mode
//! is unknown, chunks accumulate in a prefix buffer; once a literal
//! matches, the tag is stripped and the remainder flows through.

/// Literal prefix announcing an immediate answer.
pub const QUICK_PREFIX: &str = "[MODE: QUICK]";

/// Literal prefix announcing a background-task description.
pub const ASYNC_PREFIX: &str = "[MODE: ASYNC]";

/// How the agent chose to answer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConversationMode {
    /// Answer streams to the chat immediately.
    Quick,
    /// The reply describes a background task to schedule.
    Async,
    /// Not yet decided; chunks are buffered.
    Unknown,
}

/// Online prefix detector for one prompt's stream.
#[derive(Debug)]
pub struct ModeDetector {
    mode: ConversationMode,
    pending: String,
}

impl ModeDetector {
    /// Detector that starts undecided.
    #[must_use]
    pub fn new() -> Self {
        Self {
            mode: ConversationMode::Unknown,
            pending: String::new(),
        }
    }

    /// Detector pinned to QUICK — used when hybrid wrapping is skipped and
    /// the reply carries no tag.
    #[must_use]
    pub fn pinned_quick() -> Self {
        Self {
            mode: ConversationMode::Quick,
            pending: String::new(),
        }
    }

    /// Current decision.
    #[must_use]
    pub fn mode(&self) -> ConversationMode {
        self.mode
    }

    /// Feed one chunk; returns text ready for delivery once the mode is
    /// known, `None` while still buffering.
    ///
    /// On the chunk that completes a tag match, the returned text is the
    /// buffered remainder with the tag stripped.
    pub fn feed(&mut self, chunk: &str) -> Option<(ConversationMode, String)> {
        if self.mode != ConversationMode::Unknown {
            return Some((self.mode, chunk.to_owned()));
        }

        self.pending.push_str(chunk);
        let trimmed = self.pending.trim_start();

        let matched = if trimmed.starts_with(QUICK_PREFIX) {
            Some((ConversationMode::Quick, QUICK_PREFIX.len()))
        } else if trimmed.starts_with(ASYNC_PREFIX) {
            Some((ConversationMode::Async, ASYNC_PREFIX.len()))
        } else {
            None
        };

        match matched {
            Some((mode, tag_len)) => {
                self.mode = mode;
                let remainder = trimmed[tag_len..].trim_start().to_owned();
                self.pending.clear();
                Some((mode, remainder))
            }
            None => None,
        }
    }

    /// Text accumulated while the mode was unknown.
    #[must_use]
    pub fn pending(&self) -> &str {
        &self.pending
    }
}

impl Default for ModeDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Detect the mode of a complete response, returning the stripped text.
///
/// Re-detecting on the same text is idempotent. Unmatched text comes back
/// as [`ConversationMode::Unknown`] unchanged.
#[must_use]
pub fn detect(text: &str) -> (ConversationMode, &str) {
    let trimmed = text.trim_start();
    if let Some(rest) = trimmed.strip_prefix(QUICK_PREFIX) {
        (ConversationMode::Quick, rest.trim_start())
    } else if let Some(rest) = trimmed.strip_prefix(ASYNC_PREFIX) {
        (ConversationMode::Async, rest.trim_start())
    } else {
        (ConversationMode::Unknown, text)
    }
}

/// Wrap a user message in the hybrid-mode system prompt.
///
/// The user text is embedded verbatim; the instructions force the agent to
/// announce its choice with one of the two literals.
#[must_use]
pub fn hybrid_wrap(user_text: &str) -> String {
    format!(
        "You are a hybrid assistant. Decide how to handle the user's message and \
         prefix your reply with exactly one tag:\n\
         - {QUICK_PREFIX} when you can answer right away; continue with the answer.\n\
         - {ASYNC_PREFIX} when the request needs substantial background work; continue \
         with a precise, self-contained description of the task to run.\n\
         Reply with the tag first, then your content. Do not use any other tag.\n\n\
         User message:\n{user_text}"
    )
}
