//! Message queue and the fixed-size worker pool that drains it.

use crate::InboundMessage;
use crate::error::Result;

use futures::FutureExt as _;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;

/// Notice sent when handling a message fails.
pub const FAILURE_NOTICE: &str =
    "An error occurred while processing your request. Please try again.";

/// Unbounded FIFO of messages awaiting a worker.
#[derive(Debug, Clone)]
pub struct MessageQueue {
    sender: mpsc::UnboundedSender<InboundMessage>,
    depth: Arc<AtomicUsize>,
    warn_depth: usize,
}

/// Receiving half of a [`MessageQueue`], handed to [`WorkerPool::spawn`].
#[derive(Debug)]
pub struct QueueReceiver {
    receiver: mpsc::UnboundedReceiver<InboundMessage>,
    depth: Arc<AtomicUsize>,
}

impl MessageQueue {
    /// Create a queue that warns once depth exceeds `warn_depth`.
    pub fn new(warn_depth: usize) -> (Self, QueueReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        (
            Self {
                sender,
                depth: depth.clone(),
                warn_depth,
            },
            QueueReceiver { receiver, depth },
        )
    }

    /// Enqueue a message. Returns `false` if the workers are gone.
    pub fn push(&self, message: InboundMessage) -> bool {
        let message_id = message.id;
        // Count before sending so a worker never decrements ahead of us.
        let depth = self.depth.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        if self.sender.send(message).is_err() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
            tracing::warn!(message_id, "message queue closed, dropping message");
            return false;
        }

        if depth > self.warn_depth {
            tracing::warn!(depth, threshold = self.warn_depth, "message queue is backing up");
        } else {
            tracing::debug!(message_id, depth, "message queued");
        }
        true
    }

    /// Messages enqueued but not yet picked up by a worker.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }
}

impl QueueReceiver {
    async fn recv(&mut self) -> Option<InboundMessage> {
        let message = self.receiver.recv().await?;
        let _ = self
            .depth
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |depth| {
                Some(depth.saturating_sub(1))
            });
        Some(message)
    }
}

/// Processes one queued message.
#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, message: &InboundMessage) -> Result<()>;

    /// Tell the author their message could not be processed.
    async fn report_failure(&self, message: &InboundMessage);
}

/// Fixed set of tasks sharing one queue receiver.
#[derive(Debug)]
pub struct WorkerPool {
    tasks: JoinSet<()>,
}

impl WorkerPool {
    /// Spawn `count` workers.
    pub fn spawn(count: usize, handler: Arc<dyn MessageHandler>, receiver: QueueReceiver) -> Self {
        let receiver = Arc::new(Mutex::new(receiver));
        let mut tasks = JoinSet::new();

        for worker_id in 0..count.max(1) {
            let receiver = receiver.clone();
            let handler = handler.clone();
            tasks.spawn(async move {
                run_worker(worker_id, handler, receiver).await;
            });
        }

        tracing::info!(workers = count.max(1), "worker pool started");
        Self { tasks }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Stop every worker, waiting at most `timeout` for them to exit.
    pub async fn shutdown(mut self, timeout: Duration) {
        self.tasks.abort_all();
        let drained = tokio::time::timeout(timeout, async {
            while self.tasks.join_next().await.is_some() {}
        })
        .await;

        match drained {
            Ok(()) => tracing::info!("worker pool stopped"),
            Err(_) => tracing::warn!(?timeout, "timed out waiting for workers to stop"),
        }
    }
}

async fn run_worker(
    worker_id: usize,
    handler: Arc<dyn MessageHandler>,
    receiver: Arc<Mutex<QueueReceiver>>,
) {
    loop {
        let next = receiver.lock().await.recv().await;
        let Some(message) = next else {
            tracing::debug!(worker_id, "queue closed, worker exiting");
            break;
        };

        tracing::info!(
            worker_id,
            message_id = message.id,
            author_id = message.author_id,
            "handling message"
        );

        let result = AssertUnwindSafe(handler.handle(&message))
            .catch_unwind()
            .await;

        let failed = match result {
            Ok(Ok(())) => false,
            Ok(Err(error)) => {
                tracing::error!(worker_id, message_id = message.id, ?error, "failed to handle message");
                true
            }
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".into());
                tracing::error!(worker_id, message_id = message.id, %reason, "message handler panicked");
                true
            }
        };

        if failed {
            handler.report_failure(&message).await;
        }
    }
}
