//! # Job Processor
//!
//! Handles one processing work item: gathers the job's resolved records,
//! runs the external analysis, stores the result and retires the job.
//! Failures put the job back to `Queued`; the consumer decides when
//! redelivery has gone on long enough and calls [`JobProcessor::dead_letter`].

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::errors::ProcessingError;
use crate::analysis::{AnalysisInput, Analyzer, MissingRecordPolicy};
use crate::artifacts::{ArtifactRef, ArtifactStore};
use crate::logging::{log_error, log_job_operation};
use crate::models::{required_record_ids, CounterField, Job, QueueName, RecordStatus, Username};
use crate::store::{ReadConsistency, StoreError, StoreHandles};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Completed {
        artifact: ArtifactRef,
        resolved: usize,
        missing: usize,
    },
    /// No job exists: a redelivery after the job already completed
    AlreadyCompleted,
    /// The job was not `Queued`: a duplicate or stale processing item.
    /// Nothing ran and no counter moved.
    NotQueued,
}

pub struct JobProcessor {
    stores: StoreHandles,
    artifacts: Arc<dyn ArtifactStore>,
    analyzer: Arc<dyn Analyzer>,
    policy: MissingRecordPolicy,
}

impl std::fmt::Debug for JobProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobProcessor")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl JobProcessor {
    pub fn new(
        stores: StoreHandles,
        artifacts: Arc<dyn ArtifactStore>,
        analyzer: Arc<dyn Analyzer>,
        policy: MissingRecordPolicy,
    ) -> Self {
        Self {
            stores,
            artifacts,
            analyzer,
            policy,
        }
    }

    #[instrument(skip(self), fields(username = %username))]
    pub async fn process(&self, username: &Username) -> Result<ProcessOutcome, ProcessingError> {
        let job = match self.stores.jobs.mark_processing(username, Utc::now()).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                info!(username = %username, "Job is not queued; skipping duplicate processing item");
                return Ok(ProcessOutcome::NotQueued);
            }
            Err(StoreError::NotFound { .. }) => {
                info!(username = %username, "No job to process; already completed");
                return Ok(ProcessOutcome::AlreadyCompleted);
            }
            Err(err) => return Err(err.into()),
        };
        log_job_operation(
            "mark_processing",
            username,
            Some(job.correlation_id),
            "processing",
            None,
        );

        match self.run(&job).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                warn!(username = %username, error = %err, "Processing failed; returning job to queue");
                match self.stores.jobs.mark_processing_retry(username).await {
                    Ok(Some(_)) => {}
                    Ok(None) => warn!(username = %username, "Job left processing before retry was recorded"),
                    Err(retry_err) => {
                        log_error("job_processor", "mark_processing_retry", &retry_err, Some(username.as_str()));
                    }
                }
                Err(err)
            }
        }
    }

    /// Give up on a job after its processing item exhausted redelivery
    #[instrument(skip(self), fields(username = %username))]
    pub async fn dead_letter(&self, username: &Username) -> Result<(), ProcessingError> {
        let job = match self.stores.jobs.mark_processing_failed(username, Utc::now()).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                info!(username = %username, "Dead-lettered job already failed or was never queued");
                return Ok(());
            }
            Err(StoreError::NotFound { .. }) => {
                info!(username = %username, "Dead-lettered job no longer exists");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        self.stores
            .counters
            .increment(QueueName::Processing, CounterField::ProcessedItems)
            .await?;
        log_job_operation(
            "mark_processing_failed",
            username,
            Some(job.correlation_id),
            "failed",
            None,
        );
        Ok(())
    }

    async fn run(&self, job: &Job) -> Result<ProcessOutcome, ProcessingError> {
        let username = &job.username;
        let entries = self.artifacts.load_snapshot(username).await?;
        let required = required_record_ids(&entries);
        let found = self
            .stores
            .records
            .bulk_get(&required, ReadConsistency::Strong)
            .await?;

        let mut records = HashMap::with_capacity(required.len());
        let mut missing = Vec::new();
        for id in &required {
            match found.get(id) {
                Some(record) if record.status == RecordStatus::Cached => match &record.payload {
                    Some(payload) => {
                        records.insert(*id, payload.clone());
                    }
                    None => missing.push(*id),
                },
                _ => missing.push(*id),
            }
        }

        let input = AnalysisInput {
            username: username.clone(),
            entries,
            records,
            missing,
        };
        if !self.policy.permits(&input) {
            return Err(ProcessingError::TooManyMissingRecords {
                username: username.clone(),
                missing: input.missing.len(),
                required: input.required_count(),
                limit: self.policy.max_missing_fraction,
            });
        }
        if !input.missing.is_empty() {
            warn!(
                username = %username,
                missing = input.missing.len(),
                required = input.required_count(),
                "Analyzing with unresolved records"
            );
        }

        let result = self.analyzer.analyze(&input)?;
        let artifact = self.artifacts.put_completed(username, &result).await?;

        self.stores.jobs.delete(username).await?;
        self.stores
            .counters
            .increment(QueueName::Processing, CounterField::ProcessedItems)
            .await?;
        if let Err(err) = self.artifacts.delete_snapshot(username).await {
            log_error("job_processor", "delete_snapshot", &err, Some(username.as_str()));
        }

        log_job_operation(
            "complete",
            username,
            Some(job.correlation_id),
            "completed",
            Some(&artifact.location),
        );
        Ok(ProcessOutcome::Completed {
            artifact,
            resolved: input.records.len(),
            missing: input.missing.len(),
        })
    }
}
