//! # Messaging Provider Enum
//!
//! Enum dispatch over the concrete providers. `MessagingService` has generic
//! methods and cannot be a trait object, so components hold this instead.

use std::sync::Arc;
use std::time::Duration;

use super::providers::{InMemoryMessagingService, PgMessagingService};
use super::traits::{MessagingService, QueueMessage};
use super::types::{MessageId, QueueStats, QueuedMessage, ReceiptHandle};
use crate::messaging::MessagingError;

#[derive(Debug, Clone)]
pub enum MessagingProvider {
    InMemory(Arc<InMemoryMessagingService>),
    Postgres(Arc<PgMessagingService>),
}

impl MessagingProvider {
    pub fn provider_name(&self) -> &'static str {
        match self {
            Self::InMemory(s) => s.provider_name(),
            Self::Postgres(s) => s.provider_name(),
        }
    }

    pub async fn ensure_queues(&self, queue_names: &[String]) -> Result<(), MessagingError> {
        match self {
            Self::InMemory(s) => s.ensure_queues(queue_names).await,
            Self::Postgres(s) => s.ensure_queues(queue_names).await,
        }
    }

    pub async fn send_message<T: QueueMessage>(
        &self,
        queue_name: &str,
        message: &T,
    ) -> Result<MessageId, MessagingError> {
        match self {
            Self::InMemory(s) => s.send_message(queue_name, message).await,
            Self::Postgres(s) => s.send_message(queue_name, message).await,
        }
    }

    pub async fn receive_messages<T: QueueMessage>(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage<T>>, MessagingError> {
        match self {
            Self::InMemory(s) => {
                s.receive_messages(queue_name, max_messages, visibility_timeout)
                    .await
            }
            Self::Postgres(s) => {
                s.receive_messages(queue_name, max_messages, visibility_timeout)
                    .await
            }
        }
    }

    pub async fn ack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError> {
        match self {
            Self::InMemory(s) => s.ack_message(queue_name, receipt_handle).await,
            Self::Postgres(s) => s.ack_message(queue_name, receipt_handle).await,
        }
    }

    pub async fn nack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> Result<(), MessagingError> {
        match self {
            Self::InMemory(s) => s.nack_message(queue_name, receipt_handle, requeue).await,
            Self::Postgres(s) => s.nack_message(queue_name, receipt_handle, requeue).await,
        }
    }

    pub async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats, MessagingError> {
        match self {
            Self::InMemory(s) => s.queue_stats(queue_name).await,
            Self::Postgres(s) => s.queue_stats(queue_name).await,
        }
    }

    pub async fn health_check(&self) -> Result<bool, MessagingError> {
        match self {
            Self::InMemory(s) => s.health_check().await,
            Self::Postgres(s) => s.health_check().await,
        }
    }
}

impl From<Arc<InMemoryMessagingService>> for MessagingProvider {
    fn from(service: Arc<InMemoryMessagingService>) -> Self {
        Self::InMemory(service)
    }
}

impl From<Arc<PgMessagingService>> for MessagingProvider {
    fn from(service: Arc<PgMessagingService>) -> Self {
        Self::Postgres(service)
    }
}
