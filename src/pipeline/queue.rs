//! Strict-FIFO message queue.
//!
//! Chat messages are processed one at a time in arrival order: a single
//! drain task dequeues the head, awaits the processor, reports the outcome
//! to the enqueuer, and only then takes the next item. There is no
//! internal parallelism. The queued count is observable for heartbeat
//! logging.

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::Result;

/// Handle for enqueuing work into the drain loop.
pub struct MessageQueue<T> {
    tx: mpsc::UnboundedSender<Envelope<T>>,
    queued: Arc<AtomicUsize>,
    next_id: AtomicU64,
}

struct Envelope<T> {
    id: u64,
    item: T,
    done: oneshot::Sender<Result<()>>,
}

impl<T: Send + 'static> MessageQueue<T> {
    /// Start the drain loop with `processor` handling each item.
    ///
    /// The processor receives the item and its stamped request id; its
    /// outcome is forwarded to the corresponding enqueuer.
    pub fn start<F, Fut>(processor: F) -> Self
    where
        F: Fn(T, u64) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope<T>>();
        let queued = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&queued);
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                counter.fetch_sub(1, Ordering::SeqCst);
                debug!(request_id = envelope.id, "queue: processing message");
                let outcome = processor(envelope.item, envelope.id).await;
                let _ = envelope.done.send(outcome);
            }
            debug!("queue: drain loop stopped");
        });

        Self {
            tx,
            queued,
            next_id: AtomicU64::new(1),
        }
    }

    /// Enqueue an item; the returned receiver resolves with the processing
    /// outcome. Dropping the receiver detaches from the outcome without
    /// removing the item.
    pub fn enqueue(&self, item: T) -> oneshot::Receiver<Result<()>> {
        let (done, outcome) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.queued.fetch_add(1, Ordering::SeqCst);
        let envelope = Envelope { id, item, done };
        if self.tx.send(envelope).is_err() {
            // Drain loop gone (shutdown) — the receiver sees a closed channel.
            self.queued.fetch_sub(1, Ordering::SeqCst);
        }
        outcome
    }

    /// Messages waiting to be processed (excludes the in-flight one).
    #[must_use]
    pub fn len(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Whether the queue is currently empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
