//! # In-Memory Task Broker
//!
//! Thread-safe in-process broker for single-node deployments and tests.
//!
//! - **Delayed delivery**: messages with a future eta sit aside until due
//! - **Reserve/ack**: dequeued messages stay reserved until acked or nacked
//! - **Connectivity simulation**: [`InMemoryBroker::disconnect`] makes every
//!   operation fail as a lost broker connection would

use super::broker::TaskBroker;
use super::message::{MessageState, QueueStats, ReceiptHandle, ReceivedMessage, TaskMessage};
use super::MessagingError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct StoredMessage {
    id: u64,
    task_id: Uuid,
    eta: Option<DateTime<Utc>>,
    payload: Vec<u8>,
    receive_count: u32,
}

#[derive(Debug, Default)]
struct InMemoryQueue {
    ready: VecDeque<StoredMessage>,
    /// Kept ordered by (eta, id)
    delayed: Vec<StoredMessage>,
    reserved: HashMap<u64, StoredMessage>,
}

impl InMemoryQueue {
    fn push_delayed(&mut self, message: StoredMessage) {
        let key = (message.eta, message.id);
        let position = self
            .delayed
            .partition_point(|existing| (existing.eta, existing.id) <= key);
        self.delayed.insert(position, message);
    }

    /// Move delayed messages whose eta has passed onto the ready queue
    fn promote_due(&mut self, now: DateTime<Utc>) {
        let due = self
            .delayed
            .partition_point(|message| message.eta.map(|eta| eta <= now).unwrap_or(true));
        self.ready.extend(self.delayed.drain(..due));
    }

    fn state_of(&self, task_id: Uuid) -> Option<MessageState> {
        if self.ready.iter().any(|m| m.task_id == task_id) {
            Some(MessageState::Ready)
        } else if self.delayed.iter().any(|m| m.task_id == task_id) {
            Some(MessageState::Delayed)
        } else if self.reserved.values().any(|m| m.task_id == task_id) {
            Some(MessageState::Reserved)
        } else {
            None
        }
    }
}

#[derive(Debug)]
pub struct InMemoryBroker {
    queues: RwLock<HashMap<String, InMemoryQueue>>,
    next_id: AtomicU64,
    connected: AtomicBool,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            connected: AtomicBool::new(true),
        }
    }

    /// Create with pre-initialized queues
    pub fn with_queues(queue_names: &[&str]) -> Self {
        let queues = queue_names
            .iter()
            .map(|name| (name.to_string(), InMemoryQueue::default()))
            .collect();
        Self {
            queues: RwLock::new(queues),
            ..Self::new()
        }
    }

    /// Simulate losing the broker connection
    pub fn disconnect(&self) {
        warn!(provider = self.provider_name(), "Broker connection dropped");
        self.connected.store(false, Ordering::Release);
    }

    pub fn reconnect(&self) {
        info!(provider = self.provider_name(), "Broker connection restored");
        self.connected.store(true, Ordering::Release);
    }

    /// Messages in a queue across all states (for testing)
    pub async fn queue_length(&self, queue_name: &str) -> usize {
        let queues = self.queues.read().await;
        queues
            .get(queue_name)
            .map(|q| q.ready.len() + q.delayed.len() + q.reserved.len())
            .unwrap_or(0)
    }

    fn ensure_connected(&self) -> Result<(), MessagingError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(MessagingError::disconnected(self.provider_name()))
        }
    }

    fn validate_queue_name(queue_name: &str) -> Result<(), MessagingError> {
        if queue_name.trim().is_empty() {
            return Err(MessagingError::invalid_queue_name(
                queue_name,
                "queue name must not be empty",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskBroker for InMemoryBroker {
    async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        self.ensure_connected()?;
        Self::validate_queue_name(queue_name)?;

        let mut queues = self.queues.write().await;
        queues.entry(queue_name.to_string()).or_default();
        Ok(())
    }

    async fn enqueue(&self, queue_name: &str, message: TaskMessage) -> Result<u64, MessagingError> {
        self.ensure_connected()?;
        let payload = message.to_bytes()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let stored = StoredMessage {
            id,
            task_id: message.task_id,
            eta: message.eta,
            payload,
            receive_count: 0,
        };

        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        if message.is_due(Utc::now()) {
            queue.ready.push_back(stored);
        } else {
            queue.push_delayed(stored);
        }

        debug!(
            queue = queue_name,
            message_id = id,
            task_id = %message.task_id,
            delayed = message.eta.is_some(),
            "Message enqueued"
        );
        Ok(id)
    }

    async fn dequeue(
        &self,
        queue_names: &[String],
    ) -> Result<Option<ReceivedMessage>, MessagingError> {
        self.ensure_connected()?;
        let now = Utc::now();
        let mut queues = self.queues.write().await;

        for queue_name in queue_names {
            let Some(queue) = queues.get_mut(queue_name) else {
                continue;
            };
            queue.promote_due(now);

            let Some(mut stored) = queue.ready.pop_front() else {
                continue;
            };

            let message = match TaskMessage::from_bytes(&stored.payload) {
                Ok(message) => message,
                Err(e) => {
                    warn!(
                        queue = %queue_name,
                        message_id = stored.id,
                        error = %e,
                        "Dropping undecodable message"
                    );
                    continue;
                }
            };

            stored.receive_count += 1;
            let received = ReceivedMessage {
                receipt: ReceiptHandle {
                    queue_name: queue_name.clone(),
                    message_id: stored.id,
                },
                message,
                receive_count: stored.receive_count,
            };
            queue.reserved.insert(stored.id, stored);
            return Ok(Some(received));
        }

        Ok(None)
    }

    async fn ack(&self, receipt: &ReceiptHandle) -> Result<(), MessagingError> {
        self.ensure_connected()?;
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(&receipt.queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(&receipt.queue_name))?;

        queue
            .reserved
            .remove(&receipt.message_id)
            .map(|_| ())
            .ok_or_else(|| MessagingError::message_not_found(receipt.to_string()))
    }

    async fn nack(&self, receipt: &ReceiptHandle, requeue: bool) -> Result<(), MessagingError> {
        self.ensure_connected()?;
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(&receipt.queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(&receipt.queue_name))?;

        let stored = queue
            .reserved
            .remove(&receipt.message_id)
            .ok_or_else(|| MessagingError::message_not_found(receipt.to_string()))?;
        if requeue {
            queue.ready.push_front(stored);
        }
        Ok(())
    }

    async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats, MessagingError> {
        self.ensure_connected()?;
        let now = Utc::now();
        let queues = self.queues.read().await;
        let queue = queues
            .get(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        // Due-but-unpromoted messages count as ready, not delayed
        let delayed = queue
            .delayed
            .iter()
            .filter(|m| m.eta.map(|eta| eta > now).unwrap_or(false))
            .count() as u64;

        Ok(QueueStats {
            queue_name: queue_name.to_string(),
            pending: (queue.ready.len() + queue.delayed.len()) as u64,
            delayed,
            reserved: queue.reserved.len() as u64,
            active: 0,
        })
    }

    async fn task_state(&self, task_id: Uuid) -> Result<Option<MessageState>, MessagingError> {
        self.ensure_connected()?;
        let queues = self.queues.read().await;
        Ok(queues.values().find_map(|queue| queue.state_of(task_id)))
    }

    async fn health_check(&self) -> Result<bool, MessagingError> {
        Ok(self.is_connected())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Task, TaskPriority};
    use serde_json::Map;

    fn create_test_broker() -> InMemoryBroker {
        InMemoryBroker::with_queues(&["high", "default", "low"])
    }

    fn message_for(queue: &str, eta: Option<DateTime<Utc>>) -> TaskMessage {
        TaskMessage::from_task(&Task::new(
            "work",
            vec![],
            Map::new(),
            TaskPriority::Normal,
            queue,
            eta,
        ))
    }

    fn lanes() -> Vec<String> {
        vec!["high".to_string(), "default".to_string(), "low".to_string()]
    }

    #[tokio::test]
    async fn test_fifo_within_queue() {
        let broker = create_test_broker();
        let first = message_for("default", None);
        let second = message_for("default", None);
        broker.enqueue("default", first.clone()).await.unwrap();
        broker.enqueue("default", second.clone()).await.unwrap();

        let got = broker.dequeue(&lanes()).await.unwrap().unwrap();
        assert_eq!(got.message.task_id, first.task_id);
        let got = broker.dequeue(&lanes()).await.unwrap().unwrap();
        assert_eq!(got.message.task_id, second.task_id);
        assert!(broker.dequeue(&lanes()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_strict_priority_across_queues() {
        let broker = create_test_broker();
        let low = message_for("low", None);
        let normal = message_for("default", None);
        let high = message_for("high", None);
        broker.enqueue("low", low.clone()).await.unwrap();
        broker.enqueue("default", normal.clone()).await.unwrap();
        broker.enqueue("high", high.clone()).await.unwrap();

        let order: Vec<Uuid> = [
            broker.dequeue(&lanes()).await.unwrap().unwrap(),
            broker.dequeue(&lanes()).await.unwrap().unwrap(),
            broker.dequeue(&lanes()).await.unwrap().unwrap(),
        ]
        .into_iter()
        .map(|received| received.message.task_id)
        .collect();

        assert_eq!(order, vec![high.task_id, normal.task_id, low.task_id]);
    }

    #[tokio::test]
    async fn test_delayed_message_waits_for_eta() {
        let broker = create_test_broker();
        let eta = Utc::now() + chrono::Duration::milliseconds(50);
        let delayed = message_for("default", Some(eta));
        broker.enqueue("default", delayed.clone()).await.unwrap();

        assert!(broker.dequeue(&lanes()).await.unwrap().is_none());
        assert_eq!(
            broker.task_state(delayed.task_id).await.unwrap(),
            Some(MessageState::Delayed)
        );
        let stats = broker.queue_stats("default").await.unwrap();
        assert_eq!((stats.pending, stats.delayed), (1, 1));

        tokio::time::sleep(std::time::Duration::from_millis(70)).await;
        let got = broker.dequeue(&lanes()).await.unwrap().unwrap();
        assert_eq!(got.message.task_id, delayed.task_id);
    }

    #[tokio::test]
    async fn test_reserve_ack_and_nack() {
        let broker = create_test_broker();
        let message = message_for("default", None);
        broker.enqueue("default", message.clone()).await.unwrap();

        let received = broker.dequeue(&lanes()).await.unwrap().unwrap();
        let stats = broker.queue_stats("default").await.unwrap();
        assert_eq!((stats.pending, stats.reserved), (0, 1));
        assert_eq!(
            broker.task_state(message.task_id).await.unwrap(),
            Some(MessageState::Reserved)
        );

        broker.nack(&received.receipt, true).await.unwrap();
        let again = broker.dequeue(&lanes()).await.unwrap().unwrap();
        assert_eq!(again.receive_count, 2);

        broker.ack(&again.receipt).await.unwrap();
        assert_eq!(broker.queue_length("default").await, 0);
        assert!(matches!(
            broker.ack(&again.receipt).await,
            Err(MessagingError::MessageNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_disconnected_broker_fails_fast() {
        let broker = create_test_broker();
        broker.disconnect();

        let error = broker
            .enqueue("default", message_for("default", None))
            .await
            .unwrap_err();
        assert!(error.is_connectivity());
        assert!(!broker.health_check().await.unwrap());

        broker.reconnect();
        assert!(broker.enqueue("default", message_for("default", None)).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_queue() {
        let broker = InMemoryBroker::new();
        assert!(matches!(
            broker.enqueue("missing", message_for("missing", None)).await,
            Err(MessagingError::QueueNotFound { .. })
        ));
        assert!(broker.ensure_queue("").await.is_err());
    }
}
