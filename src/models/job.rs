//! # Job
//!
//! One user's analysis request. A job owns a shrinking set of record
//! dependencies and moves through
//! `Creating -> Waiting -> Queued -> Processing`, returning to `Queued` on a
//! processing retry and ending in `Failed` once retries are exhausted. A
//! completed job is deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use super::keys::{RecordId, Username};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, initiation still registering dependencies
    Creating,
    /// Waiting on outstanding record fetches
    Waiting,
    /// Processing work item enqueued
    Queued,
    /// Analysis running
    Processing,
    /// Processing retries exhausted
    Failed,
}

impl JobStatus {
    /// A live job blocks a new initiation for the same user
    pub fn is_live(&self) -> bool {
        !matches!(self, Self::Failed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Creating => write!(f, "creating"),
            Self::Waiting => write!(f, "waiting"),
            Self::Queued => write!(f, "queued"),
            Self::Processing => write!(f, "processing"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "creating" => Ok(Self::Creating),
            "waiting" => Ok(Self::Waiting),
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid job status: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub username: Username,
    /// Ties log lines for one job instance together across workers
    pub correlation_id: Uuid,
    /// Records required at creation; never changes
    pub dependency_count: u32,
    /// Records still outstanding; only shrinks
    pub depends_on: BTreeSet<RecordId>,
    pub status: JobStatus,
    pub created: DateTime<Utc>,
    pub initialised: Option<DateTime<Utc>>,
    pub queued: Option<DateTime<Utc>>,
    pub processing_started: Option<DateTime<Utc>>,
    pub failed: Option<DateTime<Utc>>,
    pub last_dependency_queue_position: Option<i64>,
    pub processing_queue_position: Option<i64>,
}

impl Job {
    pub fn new(
        username: Username,
        required: impl IntoIterator<Item = RecordId>,
        created: DateTime<Utc>,
    ) -> Self {
        let depends_on: BTreeSet<RecordId> = required.into_iter().collect();
        Self {
            username,
            correlation_id: Uuid::new_v4(),
            dependency_count: u32::try_from(depends_on.len()).unwrap_or(u32::MAX),
            depends_on,
            status: JobStatus::Creating,
            created,
            initialised: None,
            queued: None,
            processing_started: None,
            failed: None,
            last_dependency_queue_position: None,
            processing_queue_position: None,
        }
    }

    pub fn remaining(&self) -> usize {
        self.depends_on.len()
    }

    pub fn dependencies_satisfied(&self) -> bool {
        self.depends_on.is_empty()
    }

    /// `Creating -> Waiting`, dropping the records initiation found resolved
    pub(crate) fn apply_waiting(
        &mut self,
        resolved: &BTreeSet<RecordId>,
        last_dependency_queue_position: i64,
        at: DateTime<Utc>,
    ) -> bool {
        if self.status != JobStatus::Creating {
            return false;
        }
        self.depends_on.retain(|id| !resolved.contains(id));
        self.last_dependency_queue_position = Some(last_dependency_queue_position);
        self.initialised = Some(at);
        self.status = JobStatus::Waiting;
        true
    }

    /// `Waiting -> Queued`
    pub(crate) fn apply_queued(&mut self, queue_position: i64, at: DateTime<Utc>) -> bool {
        if self.status != JobStatus::Waiting {
            return false;
        }
        self.status = JobStatus::Queued;
        self.queued = Some(at);
        self.processing_queue_position = Some(queue_position);
        true
    }

    /// `Queued -> Processing`
    pub(crate) fn apply_processing(&mut self, at: DateTime<Utc>) -> bool {
        if self.status != JobStatus::Queued {
            return false;
        }
        self.status = JobStatus::Processing;
        self.processing_started = Some(at);
        true
    }

    /// `Processing -> Queued`
    pub(crate) fn apply_processing_retry(&mut self) -> bool {
        if self.status != JobStatus::Processing {
            return false;
        }
        self.status = JobStatus::Queued;
        self.processing_started = None;
        true
    }

    /// `Queued | Processing -> Failed`
    pub(crate) fn apply_processing_failed(&mut self, at: DateTime<Utc>) -> bool {
        if !matches!(self.status, JobStatus::Queued | JobStatus::Processing) {
            return false;
        }
        self.status = JobStatus::Failed;
        self.failed = Some(at);
        true
    }
}
