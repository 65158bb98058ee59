//! # Fan-in
//!
//! When a record resolves, every job that was waiting on it drops the
//! record from its outstanding set; jobs left with nothing outstanding are
//! queued for processing. Each job is notified independently so that one
//! failure never blocks the others.

use futures::future::join_all;
use std::collections::BTreeSet;
use tracing::{debug, instrument};

use super::errors::OrchestrationError;
use super::processing_enqueuer::ProcessingEnqueuer;
use crate::logging::log_error;
use crate::models::{JobStatus, RecordId, Username};
use crate::store::{StoreError, StoreHandles};

/// What happened to each dependent of one resolved record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanInReport {
    /// Dependency removed; job still waiting on other records
    pub still_waiting: Vec<Username>,
    /// Last dependency removed and processing work enqueued here
    pub queued: Vec<Username>,
    /// Dependency removed but nothing else to do: already queued elsewhere,
    /// still initialising, or the job no longer exists
    pub unchanged: Vec<Username>,
    pub failed: Vec<Username>,
}

impl FanInReport {
    pub fn notified(&self) -> usize {
        self.still_waiting.len() + self.queued.len() + self.unchanged.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Notification {
    StillWaiting,
    Queued,
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct DependencyResolver {
    stores: StoreHandles,
    enqueuer: ProcessingEnqueuer,
}

impl DependencyResolver {
    pub fn new(stores: StoreHandles, enqueuer: ProcessingEnqueuer) -> Self {
        Self { stores, enqueuer }
    }

    #[instrument(skip(self, dependents), fields(record_id = %id, dependents = dependents.len()))]
    pub async fn notify_resolved(&self, id: RecordId, dependents: &BTreeSet<Username>) -> FanInReport {
        let outcomes = join_all(
            dependents
                .iter()
                .map(|username| async move { (username, self.notify_one(id, username).await) }),
        )
        .await;

        let mut report = FanInReport::default();
        for (username, outcome) in outcomes {
            match outcome {
                Ok(Notification::StillWaiting) => report.still_waiting.push(username.clone()),
                Ok(Notification::Queued) => report.queued.push(username.clone()),
                Ok(Notification::Unchanged) => report.unchanged.push(username.clone()),
                Err(err) => {
                    log_error("fan_in", "notify_dependent", &err, Some(username.as_str()));
                    report.failed.push(username.clone());
                }
            }
        }

        debug!(
            record_id = %id,
            queued = report.queued.len(),
            still_waiting = report.still_waiting.len(),
            failed = report.failed.len(),
            "Fan-in complete"
        );
        report
    }

    async fn notify_one(&self, id: RecordId, username: &Username) -> Result<Notification, OrchestrationError> {
        let job = match self.stores.jobs.remove_dependency(username, id).await {
            Ok(job) => job,
            // Completed and deleted already; a redelivered notification
            Err(StoreError::NotFound { .. }) => return Ok(Notification::Unchanged),
            Err(err) => return Err(err.into()),
        };

        if !job.dependencies_satisfied() {
            return Ok(Notification::StillWaiting);
        }
        // A `Creating` job is promoted by its initiator once `mark_waiting` sees the empty set
        if job.status != JobStatus::Waiting {
            return Ok(Notification::Unchanged);
        }

        match self.enqueuer.enqueue(username).await? {
            Some(_) => Ok(Notification::Queued),
            None => Ok(Notification::Unchanged),
        }
    }
}
