//! # Artifacts
//!
//! Blob storage keyed by username: the raw list snapshot a job was started
//! from, and the completed analysis result the polling path looks for.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{ListEntry, Username};

pub mod errors;
pub mod fs;
pub mod in_memory;

pub use errors::{ArtifactError, ArtifactResult};
pub use fs::FsArtifactStore;
pub use in_memory::InMemoryArtifactStore;

/// Where a completed result can be read from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRef {
    pub key: String,
    pub location: String,
}

pub(crate) fn snapshot_key(username: &Username) -> String {
    format!("snapshot-{username}.json")
}

pub(crate) fn completed_key(username: &Username) -> String {
    format!("completed-{username}.json")
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put_snapshot(&self, username: &Username, entries: &[ListEntry]) -> ArtifactResult<()>;

    /// `NotFound` when no snapshot was written for the user
    async fn load_snapshot(&self, username: &Username) -> ArtifactResult<Vec<ListEntry>>;

    /// Deleting a missing snapshot succeeds
    async fn delete_snapshot(&self, username: &Username) -> ArtifactResult<()>;

    async fn put_completed(
        &self,
        username: &Username,
        result: &serde_json::Value,
    ) -> ArtifactResult<ArtifactRef>;

    async fn get_completed(&self, username: &Username) -> ArtifactResult<Option<serde_json::Value>>;

    async fn completed_exists(&self, username: &Username) -> ArtifactResult<Option<ArtifactRef>>;
}
