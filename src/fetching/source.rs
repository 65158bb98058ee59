//! Upstream boundary: the listing API that names a user's required records,
//! and the per-record metadata API. Both are external collaborators; the
//! scheduler only depends on these traits.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{ListEntry, RecordId, Username};

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Upstream request failed for {resource}: {message}")]
    Request { resource: String, message: String },

    #[error("Upstream resource not found: {resource}")]
    NotFound { resource: String },

    #[error("Upstream rate limited on {resource}")]
    RateLimited { resource: String },
}

impl UpstreamError {
    pub fn request(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Request {
            resource: resource.into(),
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Publication state of a record, which drives its cache lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AiringStatus {
    Airing,
    NotYetAired,
    Finished { ended_on: Option<NaiveDate> },
}

/// One record as returned by the upstream metadata API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub payload: serde_json::Value,
    pub airing: AiringStatus,
}

#[async_trait]
pub trait ListingSource: Send + Sync {
    /// The user's full list; implementations page internally
    async fn list_entries(&self, username: &Username) -> Result<Vec<ListEntry>, UpstreamError>;
}

#[async_trait]
pub trait RecordSource: Send + Sync {
    /// One attempt at fetching a record. Retry and rate limiting wrap this.
    async fn fetch(&self, id: RecordId) -> Result<RawRecord, UpstreamError>;
}
