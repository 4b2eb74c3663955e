//! Per-prompt chunk collection.
//!
//! Exactly one [`PromptCollector`] exists while a prompt is in flight on
//! the current session; the transport's `session/update` handler appends
//! text chunks into it. Creation and teardown happen inside
//! [`run_prompt`](crate::runtime::AcpRuntime::run_prompt).

use std::io::Write;
use std::sync::{Arc, Mutex};

use tokio::time::Instant;
use tracing::debug;

use crate::runtime::supervisor::ActivityTracker;

/// Callback invoked with each delivered chunk; failures inside the callback
/// must not reach the transport, so it is infallible by construction.
pub type ChunkSink = Box<dyn Fn(&str) + Send + Sync>;

/// Shared slot holding the collector of the currently executing prompt.
///
/// `Some` iff a prompt is in flight on the current session.
pub type SharedCollector = Arc<Mutex<Option<PromptCollector>>>;

/// Accumulates the agent's streamed reply for one prompt invocation.
pub struct PromptCollector {
    id: u64,
    session_id: String,
    started_at: Instant,
    chunk_count: u64,
    first_chunk_at: Option<Instant>,
    buffer: String,
    on_chunk: Option<ChunkSink>,
    stream_stdout: bool,
    activity: ActivityTracker,
}

/// Summary returned when a collector is torn down at settlement.
#[derive(Debug)]
pub struct CollectedPrompt {
    /// Monotonic invocation id.
    pub id: u64,
    /// Full concatenated reply text.
    pub buffer: String,
    /// Number of chunks received.
    pub chunk_count: u64,
    /// Latency from prompt start to the first chunk, when any arrived.
    pub first_chunk_delay: Option<std::time::Duration>,
}

impl PromptCollector {
    /// Create a collector for invocation `id` on `session_id`.
    #[must_use]
    pub fn new(
        id: u64,
        session_id: String,
        on_chunk: Option<ChunkSink>,
        stream_stdout: bool,
        activity: ActivityTracker,
    ) -> Self {
        Self {
            id,
            session_id,
            started_at: Instant::now(),
            chunk_count: 0,
            first_chunk_at: None,
            buffer: String::new(),
            on_chunk,
            stream_stdout,
            activity,
        }
    }

    /// Session this collector belongs to.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Refresh the liveness clock without consuming a chunk.
    ///
    /// Used for session updates that carry no collectable text.
    pub fn touch(&self) {
        self.activity.touch();
    }

    /// Append one streamed chunk.
    ///
    /// Refreshes the liveness clock, records first-chunk latency, forwards
    /// to the sink, and optionally mirrors to the bridge's stdout.
    pub fn append(&mut self, text: &str) {
        self.activity.touch();
        self.chunk_count += 1;
        if self.first_chunk_at.is_none() {
            self.first_chunk_at = Some(Instant::now());
            debug!(
                invocation = self.id,
                delay_ms = self.started_at.elapsed().as_millis(),
                "first chunk received"
            );
        }
        self.buffer.push_str(text);
        if let Some(sink) = &self.on_chunk {
            sink(text);
        }
        if self.stream_stdout {
            let mut out = std::io::stdout().lock();
            let _ = out.write_all(text.as_bytes());
            let _ = out.flush();
        }
    }

    /// Tear the collector down into its settlement summary.
    #[must_use]
    pub fn into_collected(self) -> CollectedPrompt {
        CollectedPrompt {
            id: self.id,
            buffer: self.buffer,
            chunk_count: self.chunk_count,
            first_chunk_delay: self.first_chunk_at.map(|at| at - self.started_at),
        }
    }
}
