use crate::error::QueueError;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Producer side of a durable message broker
///
/// One publish attempt per call. Whatever happens to the payload after a
/// successful return belongs to the broker and its consumers.
#[async_trait]
pub trait DurableQueue: Send + Sync {
    async fn publish(&self, queue: &str, payload: Bytes) -> Result<(), QueueError>;
}

/// A payload handed to a [`ChannelQueue`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    pub queue: String,
    pub payload: Bytes,
}

/// In-process bounded queue for single-instance deployments and tests
///
/// Publishing never waits for room: a full channel is reported as
/// [`QueueError::Full`] immediately.
#[derive(Debug, Clone)]
pub struct ChannelQueue {
    tx: mpsc::Sender<QueuedMessage>,
}

impl ChannelQueue {
    /// Create the queue and the receiver its consumer drains
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<QueuedMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl DurableQueue for ChannelQueue {
    async fn publish(&self, queue: &str, payload: Bytes) -> Result<(), QueueError> {
        let message = QueuedMessage {
            queue: queue.to_string(),
            payload,
        };
        self.tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => QueueError::Full {
                queue: queue.to_string(),
            },
            TrySendError::Closed(_) => QueueError::Closed {
                queue: queue.to_string(),
            },
        })
    }
}
