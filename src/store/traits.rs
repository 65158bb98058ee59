//! Store trait definitions
//!
//! Every mutation is a single conditional write against the shared store.
//! Callers never read-modify-write; they branch on whether the condition held.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::{BTreeSet, HashMap};
use tracing::warn;

use super::errors::StoreResult;
use crate::constants::storage::BULK_READ_BATCH_SIZE;
use crate::models::{
    CounterField, Job, QueueCounter, QueueName, Record, RecordId, Username,
};

/// Read consistency for point and bulk reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadConsistency {
    #[default]
    Eventual,
    Strong,
}

/// Outcome of writing a fetch result
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The record was absent or pending; `previous` is its prior value
    Resolved { previous: Option<Record> },
    /// The record was re-queued or resolved by someone else; nothing written
    Superseded,
}

impl Resolution {
    /// Jobs that were waiting on the record before it resolved
    pub fn dependents(&self) -> BTreeSet<Username> {
        match self {
            Self::Resolved {
                previous: Some(record),
            } => record.dependent_jobs.clone(),
            _ => BTreeSet::new(),
        }
    }

    pub fn is_superseded(&self) -> bool {
        matches!(self, Self::Superseded)
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, id: RecordId, consistency: ReadConsistency) -> StoreResult<Option<Record>>;

    /// Best-effort multi-read. Ids whose read fails are reported absent.
    async fn bulk_get(
        &self,
        ids: &[RecordId],
        consistency: ReadConsistency,
    ) -> StoreResult<HashMap<RecordId, Record>> {
        let mut found = HashMap::with_capacity(ids.len());
        for chunk in ids.chunks(BULK_READ_BATCH_SIZE) {
            let reads = join_all(chunk.iter().map(|id| self.get(*id, consistency))).await;
            for (id, read) in chunk.iter().zip(reads) {
                match read {
                    Ok(Some(record)) => {
                        found.insert(*id, record);
                    }
                    Ok(None) => {}
                    Err(err) => warn!(record_id = %id, error = %err, "Bulk read failed for record"),
                }
            }
        }
        Ok(found)
    }

    /// Create a pending record owned by `owner`. `false` if any record exists.
    async fn create(&self, id: RecordId, owner: &Username, queue_position: i64) -> StoreResult<bool>;

    /// Move a non-pending record to pending with `owner` as its only
    /// dependent. `false` if it is already pending.
    async fn mark_pending(
        &self,
        id: RecordId,
        owner: &Username,
        queue_position: i64,
    ) -> StoreResult<bool>;

    /// Register `owner` on a pending record, returning its fetch-queue
    /// position. `None` once the record has resolved.
    async fn add_dependent(&self, id: RecordId, owner: &Username) -> StoreResult<Option<i64>>;

    async fn mark_successful(
        &self,
        id: RecordId,
        payload: serde_json::Value,
        fetched_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<Resolution>;

    async fn mark_failed(
        &self,
        id: RecordId,
        attempted_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<Resolution>;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get(&self, username: &Username, consistency: ReadConsistency) -> StoreResult<Option<Job>>;

    /// Insert `job` unless a live job exists for the user. A `Failed` job is
    /// replaced.
    async fn create(&self, job: &Job) -> StoreResult<bool>;

    /// `Creating -> Waiting`, removing `resolved` from the dependency set.
    /// `None` when the job is no longer `Creating`.
    async fn mark_waiting(
        &self,
        username: &Username,
        resolved: &BTreeSet<RecordId>,
        last_dependency_queue_position: i64,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Job>>;

    /// `Waiting -> Queued`. `None` when another actor already queued it.
    async fn mark_queued(
        &self,
        username: &Username,
        queue_position: i64,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Job>>;

    /// `Queued -> Processing`. `None` when the job is not `Queued`, as for
    /// a duplicate processing item.
    async fn mark_processing(&self, username: &Username, at: DateTime<Utc>) -> StoreResult<Option<Job>>;

    /// `Processing -> Queued`. `None` unless the job is `Processing`.
    async fn mark_processing_retry(&self, username: &Username) -> StoreResult<Option<Job>>;

    /// `Queued | Processing -> Failed`. `None` from any other status.
    async fn mark_processing_failed(&self, username: &Username, at: DateTime<Utc>) -> StoreResult<Option<Job>>;

    /// Remove one outstanding dependency. Removing an absent member is a no-op.
    async fn remove_dependency(&self, username: &Username, id: RecordId) -> StoreResult<Job>;

    async fn delete(&self, username: &Username) -> StoreResult<()>;
}

#[async_trait]
pub trait QueueCounterStore: Send + Sync {
    /// Atomically add `delta` to one field, returning the updated counter
    async fn add(&self, queue: QueueName, field: CounterField, delta: i64) -> StoreResult<QueueCounter>;

    async fn read(&self, queue: QueueName) -> StoreResult<QueueCounter>;

    async fn increment(&self, queue: QueueName, field: CounterField) -> StoreResult<QueueCounter> {
        self.add(queue, field, 1).await
    }

    async fn decrement(&self, queue: QueueName, field: CounterField) -> StoreResult<QueueCounter> {
        self.add(queue, field, -1).await
    }
}
