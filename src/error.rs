//! Crate-level error type.
//!
//! Each layer owns a focused error enum; `OpinionsError` is what the entry
//! points (queue consumer, CLI, harness) surface when they need one type.

use thiserror::Error;

use crate::analysis::AnalysisError;
use crate::artifacts::ArtifactError;
use crate::config::ConfigurationError;
use crate::fetching::UpstreamError;
use crate::messaging::MessagingError;
use crate::orchestration::{OrchestrationError, ProcessingError};
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum OpinionsError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Orchestration error: {0}")]
    Orchestration(#[from] OrchestrationError),

    #[error("Processing error: {0}")]
    Processing(#[from] ProcessingError),
}

pub type Result<T> = std::result::Result<T, OpinionsError>;
