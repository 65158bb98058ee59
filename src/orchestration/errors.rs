//! Orchestration error types
//!
//! Lost races are not errors and never appear here; they are branches on
//! the `bool`/`Option` results of conditional writes.

use thiserror::Error;

use crate::analysis::AnalysisError;
use crate::artifacts::ArtifactError;
use crate::fetching::UpstreamError;
use crate::messaging::MessagingError;
use crate::models::Username;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// A live job already exists for the user
    #[error("A job already exists for {0}")]
    JobAlreadyExists(Username),

    #[error("No job exists for {0}")]
    JobNotFound(Username),

    #[error("Invalid username: {0:?}")]
    InvalidUsername(String),

    /// A conditional job transition failed where no other actor should race
    #[error("Job {username} was not in the expected state for {operation}")]
    UnexpectedJobState {
        username: Username,
        operation: &'static str,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Messaging(#[from] MessagingError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

impl OrchestrationError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::JobAlreadyExists(_))
    }
}

/// Failures of the processing step. Every variant sends the job back to
/// `Queued` for another delivery.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error(
        "Job {username} is missing {missing} of {required} records, above the tolerated fraction {limit}"
    )]
    TooManyMissingRecords {
        username: Username,
        missing: usize,
        required: usize,
        limit: f64,
    },

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}
