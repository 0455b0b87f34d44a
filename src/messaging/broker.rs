//! # Task Broker Contract
//!
//! What the execution core needs from a queueing backend: named FIFO queues,
//! delayed delivery, reserve/ack semantics and depth statistics. Consumers
//! pass queues in priority order and the broker drains them strictly in that
//! order.

use super::message::{MessageState, QueueStats, ReceiptHandle, ReceivedMessage, TaskMessage};
use super::MessagingError;
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait TaskBroker: Send + Sync + 'static {
    /// Create a queue if it doesn't exist (idempotent)
    async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError>;

    /// Append a message to `queue_name`. Messages with a future `eta` are
    /// held back until it passes.
    async fn enqueue(&self, queue_name: &str, message: TaskMessage) -> Result<u64, MessagingError>;

    /// Reserve the oldest deliverable message from the first queue in
    /// `queue_names` that has one.
    async fn dequeue(
        &self,
        queue_names: &[String],
    ) -> Result<Option<ReceivedMessage>, MessagingError>;

    /// Acknowledge processing (delete the reserved message)
    async fn ack(&self, receipt: &ReceiptHandle) -> Result<(), MessagingError>;

    /// Release a reserved message, back to the head of its queue when
    /// `requeue` is set, otherwise dropped.
    async fn nack(&self, receipt: &ReceiptHandle, requeue: bool) -> Result<(), MessagingError>;

    async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats, MessagingError>;

    /// Where the message for `task_id` sits, if the broker still holds it
    async fn task_state(&self, task_id: Uuid) -> Result<Option<MessageState>, MessagingError>;

    async fn health_check(&self) -> Result<bool, MessagingError>;

    /// Cheap connectivity check used for fail-fast submission
    fn is_connected(&self) -> bool;

    fn provider_name(&self) -> &'static str;
}
