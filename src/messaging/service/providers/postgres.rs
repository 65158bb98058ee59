//! # PostgreSQL Messaging Provider
//!
//! Queues live as rows in `opinion_work_messages`, partitioned by
//! `queue_name`. Receiving claims rows with `FOR UPDATE SKIP LOCKED` and
//! pushes their `visible_at` forward; dead-lettered messages move to
//! `opinion_work_messages_archive`. The schema is created by
//! [`PostgresStore::ensure_schema`](crate::store::PostgresStore::ensure_schema).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;

use crate::messaging::service::traits::{MessagingService, QueueMessage};
use crate::messaging::service::types::{MessageId, QueueStats, QueuedMessage, ReceiptHandle};
use crate::messaging::MessagingError;

#[derive(Debug, Clone)]
pub struct PgMessagingService {
    pool: PgPool,
}

impl PgMessagingService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn message_id(receipt_handle: &ReceiptHandle) -> Result<i64, MessagingError> {
        receipt_handle
            .as_i64()
            .ok_or_else(|| MessagingError::invalid_receipt_handle(receipt_handle.as_str()))
    }
}

#[async_trait]
impl MessagingService for PgMessagingService {
    async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        if queue_name.trim().is_empty() {
            return Err(MessagingError::invalid_queue_name(queue_name, "must not be empty"));
        }
        debug!(queue_name, "Queues share one table; nothing to create");
        Ok(())
    }

    async fn send_message<T: QueueMessage>(
        &self,
        queue_name: &str,
        message: &T,
    ) -> Result<MessageId, MessagingError> {
        let payload: serde_json::Value = serde_json::from_slice(&message.to_bytes()?)?;
        let msg_id: i64 = sqlx::query_scalar(
            "INSERT INTO opinion_work_messages (queue_name, payload) VALUES ($1, $2) RETURNING msg_id",
        )
        .bind(queue_name)
        .bind(payload)
        .fetch_one(&self.pool)
        .await?;
        Ok(MessageId::from(msg_id))
    }

    async fn receive_messages<T: QueueMessage>(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage<T>>, MessagingError> {
        let rows: Vec<(i64, serde_json::Value, i32, DateTime<Utc>)> = sqlx::query_as(
            "UPDATE opinion_work_messages \
             SET visible_at = now() + make_interval(secs => $3), receive_count = receive_count + 1 \
             WHERE msg_id IN ( \
                 SELECT msg_id FROM opinion_work_messages \
                 WHERE queue_name = $1 AND visible_at <= now() \
                 ORDER BY msg_id \
                 LIMIT $2 \
                 FOR UPDATE SKIP LOCKED) \
             RETURNING msg_id, payload, receive_count, enqueued_at",
        )
        .bind(queue_name)
        .bind(i64::try_from(max_messages).unwrap_or(i64::MAX))
        .bind(visibility_timeout.as_secs_f64())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(msg_id, payload, receive_count, enqueued_at)| -> Result<QueuedMessage<T>, MessagingError> {
                let message = T::from_bytes(&serde_json::to_vec(&payload)?)?;
                Ok(QueuedMessage::new(
                    ReceiptHandle::from(msg_id),
                    message,
                    u32::try_from(receive_count).unwrap_or_default(),
                    enqueued_at,
                ))
            })
            .collect()
    }

    async fn ack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError> {
        let deleted = sqlx::query("DELETE FROM opinion_work_messages WHERE queue_name = $1 AND msg_id = $2")
            .bind(queue_name)
            .bind(Self::message_id(receipt_handle)?)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Err(MessagingError::message_not_found(receipt_handle.as_str()));
        }
        Ok(())
    }

    async fn nack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> Result<(), MessagingError> {
        let msg_id = Self::message_id(receipt_handle)?;
        let affected = if requeue {
            sqlx::query(
                "UPDATE opinion_work_messages SET visible_at = now() \
                 WHERE queue_name = $1 AND msg_id = $2",
            )
            .bind(queue_name)
            .bind(msg_id)
            .execute(&self.pool)
            .await?
            .rows_affected()
        } else {
            sqlx::query(
                "WITH moved AS ( \
                     DELETE FROM opinion_work_messages WHERE queue_name = $1 AND msg_id = $2 \
                     RETURNING msg_id, queue_name, payload, enqueued_at, receive_count) \
                 INSERT INTO opinion_work_messages_archive \
                     (msg_id, queue_name, payload, enqueued_at, receive_count) \
                 SELECT msg_id, queue_name, payload, enqueued_at, receive_count FROM moved",
            )
            .bind(queue_name)
            .bind(msg_id)
            .execute(&self.pool)
            .await?
            .rows_affected()
        };
        if affected == 0 {
            return Err(MessagingError::message_not_found(receipt_handle.as_str()));
        }
        Ok(())
    }

    async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats, MessagingError> {
        let (message_count, in_flight_count, oldest): (i64, i64, Option<DateTime<Utc>>) = sqlx::query_as(
            "SELECT count(*), count(*) FILTER (WHERE visible_at > now()), min(enqueued_at) \
             FROM opinion_work_messages WHERE queue_name = $1",
        )
        .bind(queue_name)
        .fetch_one(&self.pool)
        .await?;

        Ok(QueueStats {
            queue_name: queue_name.to_string(),
            message_count: u64::try_from(message_count).unwrap_or_default(),
            in_flight_count: u64::try_from(in_flight_count).unwrap_or_default(),
            oldest_message_age: oldest.and_then(|at| (Utc::now() - at).to_std().ok()),
        })
    }

    async fn health_check(&self) -> Result<bool, MessagingError> {
        let one: i32 = sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await?;
        Ok(one == 1)
    }

    fn provider_name(&self) -> &'static str {
        "postgres"
    }
}
