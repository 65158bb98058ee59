//! # ETA Calculator
//!
//! Pure mapping from a job and the two queue counters to a client-facing
//! progress report. Persisted timestamps are reported as observed; every
//! other milestone is estimated from the previous one and the number of
//! queue items still ahead of the job. Estimates never precede `now` and
//! never decrease along the lifecycle.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EtaConfig;
use crate::models::{Job, JobStatus, QueueCounter, Username};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "at", rename_all = "camelCase")]
pub enum Milestone {
    Observed(DateTime<Utc>),
    Estimated(DateTime<Utc>),
}

impl Milestone {
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Self::Observed(at) | Self::Estimated(at) => *at,
        }
    }

    pub fn is_observed(&self) -> bool {
        matches!(self, Self::Observed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusReport {
    pub username: Username,
    pub status: JobStatus,
    pub now: DateTime<Utc>,
    pub created: Milestone,
    pub initialised: Milestone,
    pub queued: Milestone,
    pub processing_started: Milestone,
    pub completed: Milestone,
    pub failed: Option<Milestone>,
    pub total_records: u32,
    pub remaining_records: usize,
    /// Fetch items still ahead of the job's last dependency
    pub fetch_queue_position: i64,
    /// Processing items still ahead of the job
    pub processing_queue_position: i64,
}

#[derive(Debug, Clone, Default)]
pub struct EtaCalculator {
    config: EtaConfig,
}

impl EtaCalculator {
    pub fn new(config: EtaConfig) -> Self {
        Self { config }
    }

    pub fn estimate(
        &self,
        job: &Job,
        fetch: &QueueCounter,
        processing: &QueueCounter,
        now: DateTime<Utc>,
    ) -> JobStatusReport {
        let latency = Duration::seconds(self.config.milestone_latency_seconds);

        let fetch_outstanding =
            fetch.outstanding_until(job.last_dependency_queue_position.unwrap_or(fetch.queue_length));
        let processing_outstanding = processing
            .outstanding_until(job.processing_queue_position.unwrap_or(processing.queue_length));

        let initialised = observed_or(job.initialised, || {
            (job.created + Duration::seconds(self.config.initialisation_seconds)).max(now)
        });
        let queued = observed_or(job.queued, || {
            (initialised.at() + latency).max(now)
                + Duration::seconds(fetch_outstanding * self.config.seconds_per_record)
        });
        let processing_started = observed_or(job.processing_started, || {
            (queued.at() + latency).max(now)
                + Duration::seconds(processing_outstanding * self.config.seconds_per_job)
        });
        let completed = Milestone::Estimated(
            (processing_started.at() + latency).max(now) + Duration::seconds(self.config.seconds_per_job),
        );

        JobStatusReport {
            username: job.username.clone(),
            status: job.status,
            now,
            created: Milestone::Observed(job.created),
            initialised,
            queued,
            processing_started,
            completed,
            failed: job.failed.map(Milestone::Observed),
            total_records: job.dependency_count,
            remaining_records: job.remaining(),
            fetch_queue_position: fetch_outstanding,
            processing_queue_position: processing_outstanding,
        }
    }
}

fn observed_or(observed: Option<DateTime<Utc>>, estimate: impl FnOnce() -> DateTime<Utc>) -> Milestone {
    match observed {
        Some(at) => Milestone::Observed(at),
        None => Milestone::Estimated(estimate()),
    }
}
