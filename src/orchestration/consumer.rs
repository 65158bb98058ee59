//! # Queue Consumer
//!
//! At-least-once consumer for both work queues. Each received batch is
//! handled concurrently; successes are acked, failures are nacked for
//! redelivery until the item's delivery limit, after which it takes the
//! dead-letter path so that queue accounting and dependent jobs still move.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use super::job_processor::JobProcessor;
use crate::config::{ProcessingConfig, QueuesConfig};
use crate::error::OpinionsError;
use crate::fetching::RecordFetchWorker;
use crate::logging::{log_error, log_queue_operation};
use crate::messaging::{MessagingError, QueuedMessage, WorkDispatcher, WorkKind, WorkMessage};

/// A delivery whose handling failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDelivery {
    pub queue_name: String,
    pub receipt_handle: String,
    pub receive_count: u32,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub received: usize,
    pub acked: usize,
    pub requeued: usize,
    pub dead_lettered: usize,
    pub failed: Vec<FailedDelivery>,
}

impl BatchOutcome {
    pub fn is_empty(&self) -> bool {
        self.received == 0
    }

    pub fn merge(&mut self, other: BatchOutcome) {
        self.received += other.received;
        self.acked += other.acked;
        self.requeued += other.requeued;
        self.dead_lettered += other.dead_lettered;
        self.failed.extend(other.failed);
    }
}

#[derive(Debug)]
enum Disposition {
    Acked,
    Requeued(FailedDelivery),
    DeadLettered(Option<FailedDelivery>),
}

pub struct QueueConsumer {
    dispatcher: WorkDispatcher,
    fetch_worker: Arc<RecordFetchWorker>,
    processor: Arc<JobProcessor>,
    batch_size: usize,
    visibility_timeout: Duration,
    poll_interval: Duration,
    max_fetch_deliveries: u32,
    max_processing_deliveries: u32,
}

impl std::fmt::Debug for QueueConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueConsumer")
            .field("batch_size", &self.batch_size)
            .field("visibility_timeout", &self.visibility_timeout)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl QueueConsumer {
    pub fn new(
        dispatcher: WorkDispatcher,
        fetch_worker: Arc<RecordFetchWorker>,
        processor: Arc<JobProcessor>,
        queues: &QueuesConfig,
        processing: &ProcessingConfig,
    ) -> Self {
        Self {
            dispatcher,
            fetch_worker,
            processor,
            batch_size: queues.batch_size,
            visibility_timeout: queues.visibility_timeout(),
            poll_interval: queues.poll_interval(),
            max_fetch_deliveries: queues.max_fetch_deliveries,
            max_processing_deliveries: processing.max_attempts,
        }
    }

    /// Receive and handle one batch from the queue for `kind`
    #[instrument(skip(self))]
    pub async fn poll_queue(&self, kind: WorkKind) -> Result<BatchOutcome, MessagingError> {
        let queue_name = self.dispatcher.queue_for(kind);
        let deliveries = self
            .dispatcher
            .provider()
            .receive_messages::<serde_json::Value>(queue_name, self.batch_size, self.visibility_timeout)
            .await?;

        let mut outcome = BatchOutcome {
            received: deliveries.len(),
            ..Default::default()
        };
        if deliveries.is_empty() {
            return Ok(outcome);
        }

        let dispositions = join_all(
            deliveries
                .into_iter()
                .map(|delivery| self.handle_delivery(queue_name, kind, delivery)),
        )
        .await;

        for disposition in dispositions {
            match disposition {
                Ok(Disposition::Acked) => outcome.acked += 1,
                Ok(Disposition::Requeued(failure)) => {
                    outcome.requeued += 1;
                    outcome.failed.push(failure);
                }
                Ok(Disposition::DeadLettered(failure)) => {
                    outcome.dead_lettered += 1;
                    outcome.failed.extend(failure);
                }
                // Ack/nack itself failed; the visibility timeout redelivers it
                Err(err) => log_error("queue_consumer", "settle_delivery", &err, Some(queue_name)),
            }
        }

        log_queue_operation(
            "poll",
            queue_name,
            None,
            "handled",
            Some(&format!(
                "received={} acked={} requeued={} dead_lettered={}",
                outcome.received, outcome.acked, outcome.requeued, outcome.dead_lettered
            )),
        );
        Ok(outcome)
    }

    /// Poll both queues once
    pub async fn poll_once(&self) -> Result<BatchOutcome, MessagingError> {
        let mut outcome = self.poll_queue(WorkKind::Fetch).await?;
        outcome.merge(self.poll_queue(WorkKind::Process).await?);
        Ok(outcome)
    }

    /// Poll until `shutdown` turns true, sleeping between empty polls
    pub async fn run_until(&self, mut shutdown: watch::Receiver<bool>) {
        info!(poll_interval_ms = self.poll_interval.as_millis() as u64, "Queue consumer started");

        while !*shutdown.borrow() {
            let idle = match self.poll_once().await {
                Ok(outcome) => outcome.is_empty(),
                Err(err) => {
                    error!(error = %err, "Queue poll failed");
                    true
                }
            };
            if !idle {
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {},
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        debug!("Shutdown sender dropped");
                        break;
                    }
                }
            }
        }

        info!("Queue consumer stopped");
    }

    async fn handle_delivery(
        &self,
        queue_name: &str,
        kind: WorkKind,
        delivery: QueuedMessage<serde_json::Value>,
    ) -> Result<Disposition, MessagingError> {
        let provider = self.dispatcher.provider();
        let receipt = &delivery.receipt_handle;

        let message = match serde_json::from_value::<WorkMessage>(delivery.message.clone()) {
            Ok(message) if message.kind() == kind => message,
            Ok(message) => {
                warn!(queue_name, kind = %message.kind(), "Work item on the wrong queue; dead-lettering");
                provider.nack_message(queue_name, receipt, false).await?;
                return Ok(Disposition::DeadLettered(Some(self.failure(
                    queue_name,
                    &delivery,
                    format!("{} item on {queue_name}", message.kind()),
                ))));
            }
            Err(err) => {
                warn!(queue_name, error = %err, "Malformed work item; dead-lettering");
                provider.nack_message(queue_name, receipt, false).await?;
                return Ok(Disposition::DeadLettered(Some(self.failure(
                    queue_name,
                    &delivery,
                    err.to_string(),
                ))));
            }
        };

        let error = match self.execute(&message).await {
            Ok(()) => {
                provider.ack_message(queue_name, receipt).await?;
                return Ok(Disposition::Acked);
            }
            Err(err) => err,
        };
        let failure = self.failure(queue_name, &delivery, error.to_string());

        if delivery.receive_count < self.max_deliveries(kind) {
            warn!(
                queue_name,
                receive_count = delivery.receive_count,
                error = %error,
                "Work item failed; requeueing"
            );
            provider.nack_message(queue_name, receipt, true).await?;
            return Ok(Disposition::Requeued(failure));
        }

        if let Err(dead_letter_err) = self.dead_letter(&message).await {
            // Leave it on the queue so the dead-letter path runs again later
            log_error("queue_consumer", "dead_letter", &dead_letter_err, Some(queue_name));
            provider.nack_message(queue_name, receipt, true).await?;
            return Ok(Disposition::Requeued(failure));
        }
        warn!(
            queue_name,
            receive_count = delivery.receive_count,
            error = %error,
            "Work item exhausted its deliveries; dead-lettered"
        );
        provider.nack_message(queue_name, receipt, false).await?;
        Ok(Disposition::DeadLettered(Some(failure)))
    }

    async fn execute(&self, message: &WorkMessage) -> Result<(), OpinionsError> {
        match message {
            WorkMessage::Fetch { id } => {
                self.fetch_worker.handle(*id).await?;
            }
            WorkMessage::Process { username } => {
                self.processor.process(username).await?;
            }
        }
        Ok(())
    }

    async fn dead_letter(&self, message: &WorkMessage) -> Result<(), OpinionsError> {
        match message {
            WorkMessage::Fetch { id } => {
                self.fetch_worker.dead_letter(*id).await?;
            }
            WorkMessage::Process { username } => {
                self.processor.dead_letter(username).await?;
            }
        }
        Ok(())
    }

    fn max_deliveries(&self, kind: WorkKind) -> u32 {
        match kind {
            WorkKind::Fetch => self.max_fetch_deliveries,
            WorkKind::Process => self.max_processing_deliveries,
        }
    }

    fn failure(
        &self,
        queue_name: &str,
        delivery: &QueuedMessage<serde_json::Value>,
        error: String,
    ) -> FailedDelivery {
        FailedDelivery {
            queue_name: queue_name.to_string(),
            receipt_handle: delivery.receipt_handle.to_string(),
            receive_count: delivery.receive_count,
            error,
        }
    }
}
