//! # In-Memory Messaging Provider
//!
//! `MessagingService` over per-queue `VecDeque`s with visibility-timeout
//! simulation and a dead-letter archive. Used by tests and single-process
//! runs; nothing survives a restart.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::messaging::service::traits::{MessagingService, QueueMessage};
use crate::messaging::service::types::{MessageId, QueueStats, QueuedMessage, ReceiptHandle};
use crate::messaging::MessagingError;

#[derive(Debug, Clone)]
struct InMemoryQueuedMessage {
    id: u64,
    payload: Vec<u8>,
    enqueued_at: DateTime<Utc>,
    /// None = visible now
    visible_at: Option<DateTime<Utc>>,
    receive_count: u32,
}

#[derive(Debug)]
struct InMemoryQueue {
    messages: VecDeque<InMemoryQueuedMessage>,
    dead_letters: Vec<InMemoryQueuedMessage>,
    next_id: u64,
    total_sent: u64,
    total_acked: u64,
}

impl InMemoryQueue {
    fn new() -> Self {
        Self {
            messages: VecDeque::new(),
            dead_letters: Vec::new(),
            next_id: 1,
            total_sent: 0,
            total_acked: 0,
        }
    }

    fn take(&mut self, receipt_handle: &ReceiptHandle) -> Result<InMemoryQueuedMessage, MessagingError> {
        let message_id: u64 = receipt_handle
            .as_str()
            .parse()
            .map_err(|_| MessagingError::invalid_receipt_handle(receipt_handle.as_str()))?;
        let position = self
            .messages
            .iter()
            .position(|m| m.id == message_id)
            .ok_or_else(|| MessagingError::message_not_found(message_id.to_string()))?;
        self.messages
            .remove(position)
            .ok_or_else(|| MessagingError::message_not_found(message_id.to_string()))
    }
}

#[derive(Debug)]
pub struct InMemoryMessagingService {
    queues: RwLock<HashMap<String, InMemoryQueue>>,
}

impl Default for InMemoryMessagingService {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMessagingService {
    pub fn new() -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_queues(queue_names: &[&str]) -> Self {
        let queues = queue_names
            .iter()
            .map(|name| (name.to_string(), InMemoryQueue::new()))
            .collect();
        Self {
            queues: RwLock::new(queues),
        }
    }

    /// Messages in a queue, visible or not
    pub async fn queue_length(&self, queue_name: &str) -> usize {
        let queues = self.queues.read().await;
        queues.get(queue_name).map_or(0, |q| q.messages.len())
    }

    /// Total messages ever sent to a queue
    pub async fn total_sent(&self, queue_name: &str) -> u64 {
        let queues = self.queues.read().await;
        queues.get(queue_name).map_or(0, |q| q.total_sent)
    }

    pub async fn dead_letter_count(&self, queue_name: &str) -> usize {
        let queues = self.queues.read().await;
        queues.get(queue_name).map_or(0, |q| q.dead_letters.len())
    }

    /// Decoded copies of every queued message, without receiving them
    pub async fn peek_all<T: QueueMessage>(&self, queue_name: &str) -> Result<Vec<T>, MessagingError> {
        let queues = self.queues.read().await;
        queues
            .get(queue_name)
            .map_or_else(Vec::new, |q| q.messages.iter().collect())
            .into_iter()
            .map(|m| T::from_bytes(&m.payload))
            .collect()
    }

    /// Enqueue raw bytes, bypassing serialization
    pub async fn send_raw(&self, queue_name: &str, payload: Vec<u8>) -> Result<MessageId, MessagingError> {
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let id = queue.next_id;
        queue.next_id += 1;
        queue.total_sent += 1;
        queue.messages.push_back(InMemoryQueuedMessage {
            id,
            payload,
            enqueued_at: Utc::now(),
            visible_at: None,
            receive_count: 0,
        });
        Ok(MessageId::from(id))
    }
}

#[async_trait]
impl MessagingService for InMemoryMessagingService {
    async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        let mut queues = self.queues.write().await;
        queues
            .entry(queue_name.to_string())
            .or_insert_with(InMemoryQueue::new);
        Ok(())
    }

    async fn send_message<T: QueueMessage>(
        &self,
        queue_name: &str,
        message: &T,
    ) -> Result<MessageId, MessagingError> {
        let payload = message.to_bytes()?;
        self.send_raw(queue_name, payload).await
    }

    async fn receive_messages<T: QueueMessage>(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage<T>>, MessagingError> {
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let now = Utc::now();
        let visible_until = chrono::Duration::from_std(visibility_timeout)
            .ok()
            .and_then(|timeout| now.checked_add_signed(timeout))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let mut received = Vec::new();
        let mut undecodable = Vec::new();

        for msg in queue.messages.iter_mut() {
            if received.len() >= max_messages {
                break;
            }
            if msg.visible_at.is_some_and(|vt| vt > now) {
                continue;
            }

            let Ok(deserialized) = T::from_bytes(&msg.payload) else {
                undecodable.push(msg.id);
                continue;
            };
            msg.visible_at = Some(visible_until);
            msg.receive_count += 1;

            received.push(QueuedMessage::new(
                ReceiptHandle::from(msg.id),
                deserialized,
                msg.receive_count,
                msg.enqueued_at,
            ));
        }

        // Payloads that can never decode would block the queue; archive them
        for id in undecodable {
            tracing::warn!(queue_name, message_id = id, "Dead-lettering undecodable message");
            let msg = queue.take(&ReceiptHandle::from(id))?;
            queue.dead_letters.push(msg);
        }

        Ok(received)
    }

    async fn ack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError> {
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;
        queue.take(receipt_handle)?;
        queue.total_acked += 1;
        Ok(())
    }

    async fn nack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> Result<(), MessagingError> {
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        if requeue {
            let message_id: u64 = receipt_handle
                .as_str()
                .parse()
                .map_err(|_| MessagingError::invalid_receipt_handle(receipt_handle.as_str()))?;
            let msg = queue
                .messages
                .iter_mut()
                .find(|m| m.id == message_id)
                .ok_or_else(|| MessagingError::message_not_found(message_id.to_string()))?;
            msg.visible_at = None;
        } else {
            let msg = queue.take(receipt_handle)?;
            queue.dead_letters.push(msg);
        }
        Ok(())
    }

    async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats, MessagingError> {
        let queues = self.queues.read().await;
        let queue = queues
            .get(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let now = Utc::now();
        let in_flight = queue
            .messages
            .iter()
            .filter(|m| m.visible_at.is_some_and(|vt| vt > now))
            .count();
        let oldest_message_age = queue
            .messages
            .iter()
            .map(|m| m.enqueued_at)
            .min()
            .and_then(|oldest| (now - oldest).to_std().ok());

        Ok(QueueStats {
            queue_name: queue_name.to_string(),
            message_count: queue.messages.len() as u64,
            in_flight_count: in_flight as u64,
            oldest_message_age,
        })
    }

    async fn health_check(&self) -> Result<bool, MessagingError> {
        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}
