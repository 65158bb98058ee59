//! # Status Service
//!
//! The two exposed operations: `initiate` a job for a user and poll its
//! `status`. Both return the same report shape so a client can start
//! polling from the initiate response.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

use super::errors::OrchestrationError;
use super::eta::{EtaCalculator, JobStatusReport};
use super::job_initializer::JobInitializer;
use crate::artifacts::{ArtifactRef, ArtifactStore};
use crate::fetching::ListingSource;
use crate::models::{Job, QueueName, Username};
use crate::store::{ReadConsistency, StoreHandles};

/// Everything known about a user: an in-progress job, a finished result,
/// both (a re-run over an older result), or neither
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullStatus {
    pub pending: Option<JobStatusReport>,
    pub results: Option<ArtifactRef>,
}

pub struct StatusService {
    stores: StoreHandles,
    artifacts: Arc<dyn ArtifactStore>,
    listing: Arc<dyn ListingSource>,
    initializer: Arc<JobInitializer>,
    eta: EtaCalculator,
}

impl std::fmt::Debug for StatusService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusService")
            .field("eta", &self.eta)
            .finish_non_exhaustive()
    }
}

impl StatusService {
    pub fn new(
        stores: StoreHandles,
        artifacts: Arc<dyn ArtifactStore>,
        listing: Arc<dyn ListingSource>,
        initializer: Arc<JobInitializer>,
        eta: EtaCalculator,
    ) -> Self {
        Self {
            stores,
            artifacts,
            listing,
            initializer,
            eta,
        }
    }

    #[instrument(skip(self))]
    pub async fn initiate(&self, raw_username: &str) -> Result<JobStatusReport, OrchestrationError> {
        let username = parse_username(raw_username)?;

        // Skip the upstream listing call when the answer is already known;
        // job creation re-checks this conditionally
        if let Some(job) = self.stores.jobs.get(&username, ReadConsistency::Eventual).await? {
            if job.status.is_live() {
                return Err(OrchestrationError::JobAlreadyExists(username));
            }
        }

        let entries = self.listing.list_entries(&username).await?;
        let result = self.initializer.initiate_with_snapshot(&username, &entries).await?;
        self.report(&result.job).await
    }

    #[instrument(skip(self))]
    pub async fn status(&self, raw_username: &str) -> Result<FullStatus, OrchestrationError> {
        let username = parse_username(raw_username)?;

        let pending = match self.stores.jobs.get(&username, ReadConsistency::Eventual).await? {
            Some(job) => Some(self.report(&job).await?),
            None => None,
        };
        let results = self.artifacts.completed_exists(&username).await?;

        Ok(FullStatus { pending, results })
    }

    async fn report(&self, job: &Job) -> Result<JobStatusReport, OrchestrationError> {
        let fetch = self.stores.counters.read(QueueName::Fetch).await?;
        let processing = self.stores.counters.read(QueueName::Processing).await?;
        Ok(self.eta.estimate(job, &fetch, &processing, Utc::now()))
    }
}

fn parse_username(raw: &str) -> Result<Username, OrchestrationError> {
    let username = Username::new(raw);
    if username.is_empty() || username.as_str().chars().any(char::is_whitespace) {
        return Err(OrchestrationError::InvalidUsername(raw.to_string()));
    }
    Ok(username)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usernames_are_normalized() {
        assert_eq!(parse_username("  Alice ").unwrap(), Username::new("alice"));
    }

    #[test]
    fn test_rejects_blank_and_spaced_usernames() {
        assert!(matches!(
            parse_username("   "),
            Err(OrchestrationError::InvalidUsername(_))
        ));
        assert!(matches!(
            parse_username("two words"),
            Err(OrchestrationError::InvalidUsername(_))
        ));
    }
}
