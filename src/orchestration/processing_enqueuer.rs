//! # Processing Enqueuer
//!
//! Promotes a job whose dependencies are exhausted from `Waiting` to
//! `Queued` and hands it to the processing queue. Both initiation and fan-in
//! can reach this point for the same job; the conditional `mark_queued`
//! lets exactly one of them through.

use chrono::Utc;
use tracing::{debug, instrument};

use super::errors::OrchestrationError;
use crate::logging::{log_job_operation, log_queue_operation};
use crate::messaging::WorkDispatcher;
use crate::models::{CounterField, Job, QueueName, Username};
use crate::store::StoreHandles;

#[derive(Debug, Clone)]
pub struct ProcessingEnqueuer {
    stores: StoreHandles,
    dispatcher: WorkDispatcher,
}

impl ProcessingEnqueuer {
    pub fn new(stores: StoreHandles, dispatcher: WorkDispatcher) -> Self {
        Self { stores, dispatcher }
    }

    /// Queue the job for processing. `None` when another actor already did.
    #[instrument(skip(self), fields(username = %username))]
    pub async fn enqueue(&self, username: &Username) -> Result<Option<Job>, OrchestrationError> {
        let counter = self
            .stores
            .counters
            .increment(QueueName::Processing, CounterField::QueueLength)
            .await?;
        let position = counter.queue_length;

        let Some(job) = self
            .stores
            .jobs
            .mark_queued(username, position, Utc::now())
            .await?
        else {
            // The position was never used; give it back
            self.stores
                .counters
                .decrement(QueueName::Processing, CounterField::QueueLength)
                .await?;
            debug!(username = %username, "Job already queued by another actor");
            return Ok(None);
        };

        self.dispatcher.dispatch_process(username).await?;

        log_queue_operation(
            "enqueue_processing",
            QueueName::Processing.as_str(),
            Some(position),
            "queued",
            None,
        );
        log_job_operation(
            "mark_queued",
            username,
            Some(job.correlation_id),
            "queued",
            None,
        );
        Ok(Some(job))
    }
}
