//! # In-Memory Store
//!
//! `DashMap`-backed implementation of all three store traits. Each
//! conditional operation runs as one closure under the map's per-key lock,
//! which gives the same all-or-nothing semantics as a conditional update in
//! a shared database. Used by tests and single-process runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeSet;

use super::errors::{StoreError, StoreResult};
use super::traits::{JobStore, QueueCounterStore, ReadConsistency, RecordStore, Resolution};
use crate::models::{
    CounterField, Job, QueueCounter, QueueName, Record, RecordId, RecordStatus, Username,
};

#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: DashMap<RecordId, Record>,
    jobs: DashMap<Username, Job>,
    counters: DashMap<QueueName, QueueCounter>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or overwrite a record directly
    pub fn insert_record(&self, record: Record) {
        self.records.insert(record.id, record);
    }

    pub fn record(&self, id: RecordId) -> Option<Record> {
        self.records.get(&id).map(|r| r.value().clone())
    }

    pub fn job(&self, username: &Username) -> Option<Job> {
        self.jobs.get(username).map(|j| j.value().clone())
    }

    pub fn counter(&self, queue: QueueName) -> QueueCounter {
        self.counters
            .get(&queue)
            .map_or_else(|| QueueCounter::empty(queue), |c| *c.value())
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    fn create_record(&self, id: RecordId, owner: &Username, queue_position: i64) -> bool {
        match self.records.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Record::new_pending(id, owner, queue_position));
                true
            }
        }
    }

    fn mark_record_pending(&self, id: RecordId, owner: &Username, queue_position: i64) -> bool {
        match self.records.entry(id) {
            Entry::Occupied(mut existing) => {
                let record = existing.get_mut();
                if record.status == RecordStatus::Pending {
                    return false;
                }
                record.status = RecordStatus::Pending;
                record.queue_position = Some(queue_position);
                record.dependent_jobs = BTreeSet::from([owner.clone()]);
                true
            }
            Entry::Vacant(slot) => {
                slot.insert(Record::new_pending(id, owner, queue_position));
                true
            }
        }
    }

    fn add_record_dependent(&self, id: RecordId, owner: &Username) -> Option<i64> {
        let mut record = self.records.get_mut(&id)?;
        if record.status != RecordStatus::Pending {
            return None;
        }
        record.dependent_jobs.insert(owner.clone());
        Some(record.queue_position.unwrap_or_default())
    }

    fn resolve_record(
        &self,
        id: RecordId,
        status: RecordStatus,
        payload: Option<serde_json::Value>,
        at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Resolution {
        match self.records.entry(id) {
            Entry::Occupied(mut existing) => {
                if existing.get().status != RecordStatus::Pending {
                    return Resolution::Superseded;
                }
                let previous = existing.get().clone();
                existing.get_mut().resolve(status, payload, at, expires_at);
                Resolution::Resolved {
                    previous: Some(previous),
                }
            }
            Entry::Vacant(slot) => {
                let mut record = Record {
                    id,
                    status: RecordStatus::Pending,
                    expires_at: None,
                    queue_position: None,
                    dependent_jobs: BTreeSet::new(),
                    payload: None,
                    last_successful_fetch: None,
                    last_failed_fetch: None,
                };
                record.resolve(status, payload, at, expires_at);
                slot.insert(record);
                Resolution::Resolved { previous: None }
            }
        }
    }

    fn create_job(&self, job: &Job) -> bool {
        match self.jobs.entry(job.username.clone()) {
            Entry::Occupied(mut existing) => {
                if existing.get().status.is_live() {
                    return false;
                }
                existing.insert(job.clone());
                true
            }
            Entry::Vacant(slot) => {
                slot.insert(job.clone());
                true
            }
        }
    }

    /// Apply `update` to an existing job. `Ok(None)` when its condition fails.
    fn update_job<F>(&self, username: &Username, update: F) -> StoreResult<Option<Job>>
    where
        F: FnOnce(&mut Job) -> bool,
    {
        let mut job = self
            .jobs
            .get_mut(username)
            .ok_or_else(|| StoreError::not_found("job", username))?;
        if update(job.value_mut()) {
            Ok(Some(job.value().clone()))
        } else {
            Ok(None)
        }
    }

    fn update_job_unconditionally<F>(&self, username: &Username, update: F) -> StoreResult<Job>
    where
        F: FnOnce(&mut Job),
    {
        self.update_job(username, |job| {
            update(job);
            true
        })?
        .ok_or_else(|| StoreError::not_found("job", username))
    }

    fn add_to_counter(&self, queue: QueueName, field: CounterField, delta: i64) -> QueueCounter {
        let mut counter = self
            .counters
            .entry(queue)
            .or_insert_with(|| QueueCounter::empty(queue));
        counter.apply(field, delta);
        *counter
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn get(&self, id: RecordId, _consistency: ReadConsistency) -> StoreResult<Option<Record>> {
        Ok(self.record(id))
    }

    async fn create(&self, id: RecordId, owner: &Username, queue_position: i64) -> StoreResult<bool> {
        Ok(self.create_record(id, owner, queue_position))
    }

    async fn mark_pending(
        &self,
        id: RecordId,
        owner: &Username,
        queue_position: i64,
    ) -> StoreResult<bool> {
        Ok(self.mark_record_pending(id, owner, queue_position))
    }

    async fn add_dependent(&self, id: RecordId, owner: &Username) -> StoreResult<Option<i64>> {
        Ok(self.add_record_dependent(id, owner))
    }

    async fn mark_successful(
        &self,
        id: RecordId,
        payload: serde_json::Value,
        fetched_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<Resolution> {
        Ok(self.resolve_record(id, RecordStatus::Cached, Some(payload), fetched_at, expires_at))
    }

    async fn mark_failed(
        &self,
        id: RecordId,
        attempted_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<Resolution> {
        Ok(self.resolve_record(id, RecordStatus::Failed, None, attempted_at, expires_at))
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn get(&self, username: &Username, _consistency: ReadConsistency) -> StoreResult<Option<Job>> {
        Ok(self.job(username))
    }

    async fn create(&self, job: &Job) -> StoreResult<bool> {
        Ok(self.create_job(job))
    }

    async fn mark_waiting(
        &self,
        username: &Username,
        resolved: &BTreeSet<RecordId>,
        last_dependency_queue_position: i64,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Job>> {
        self.update_job(username, |job| {
            job.apply_waiting(resolved, last_dependency_queue_position, at)
        })
    }

    async fn mark_queued(
        &self,
        username: &Username,
        queue_position: i64,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Job>> {
        self.update_job(username, |job| job.apply_queued(queue_position, at))
    }

    async fn mark_processing(&self, username: &Username, at: DateTime<Utc>) -> StoreResult<Option<Job>> {
        self.update_job(username, |job| job.apply_processing(at))
    }

    async fn mark_processing_retry(&self, username: &Username) -> StoreResult<Option<Job>> {
        self.update_job(username, Job::apply_processing_retry)
    }

    async fn mark_processing_failed(&self, username: &Username, at: DateTime<Utc>) -> StoreResult<Option<Job>> {
        self.update_job(username, |job| job.apply_processing_failed(at))
    }

    async fn remove_dependency(&self, username: &Username, id: RecordId) -> StoreResult<Job> {
        self.update_job_unconditionally(username, |job| {
            job.depends_on.remove(&id);
        })
    }

    async fn delete(&self, username: &Username) -> StoreResult<()> {
        self.jobs.remove(username);
        Ok(())
    }
}

#[async_trait]
impl QueueCounterStore for InMemoryStore {
    async fn add(&self, queue: QueueName, field: CounterField, delta: i64) -> StoreResult<QueueCounter> {
        Ok(self.add_to_counter(queue, field, delta))
    }

    async fn read(&self, queue: QueueName) -> StoreResult<QueueCounter> {
        Ok(self.counter(queue))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobStatus;
    use chrono::Duration;
    use std::sync::Arc;

    fn alice() -> Username {
        Username::new("alice")
    }

    #[tokio::test]
    async fn test_create_loses_to_existing_record() {
        let store = InMemoryStore::new();
        assert!(RecordStore::create(&store, RecordId(1), &alice(), 1).await.unwrap());
        assert!(!RecordStore::create(&store, RecordId(1), &Username::new("bob"), 2).await.unwrap());

        let record = store.record(RecordId(1)).unwrap();
        assert_eq!(record.dependent_jobs, BTreeSet::from([alice()]));
        assert_eq!(record.queue_position, Some(1));
    }

    #[tokio::test]
    async fn test_mark_pending_fails_while_pending() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        RecordStore::create(&store, RecordId(1), &alice(), 1).await.unwrap();
        assert!(!store.mark_pending(RecordId(1), &alice(), 2).await.unwrap());

        store
            .mark_successful(RecordId(1), serde_json::json!({}), now, now - Duration::days(1))
            .await
            .unwrap();
        assert!(store.mark_pending(RecordId(1), &Username::new("bob"), 9).await.unwrap());

        let record = store.record(RecordId(1)).unwrap();
        assert_eq!(record.status, RecordStatus::Pending);
        assert_eq!(record.dependent_jobs, BTreeSet::from([Username::new("bob")]));
        assert_eq!(record.queue_position, Some(9));
    }

    #[tokio::test]
    async fn test_add_dependent_only_while_pending() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        assert_eq!(store.add_dependent(RecordId(5), &alice()).await.unwrap(), None);

        RecordStore::create(&store, RecordId(5), &alice(), 7).await.unwrap();
        assert_eq!(store.add_dependent(RecordId(5), &Username::new("bob")).await.unwrap(), Some(7));

        store.mark_failed(RecordId(5), now, now + Duration::hours(24)).await.unwrap();
        assert_eq!(store.add_dependent(RecordId(5), &Username::new("carol")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_late_result_is_superseded() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        RecordStore::create(&store, RecordId(3), &alice(), 1).await.unwrap();

        let first = store
            .mark_successful(RecordId(3), serde_json::json!({"v": 1}), now, now + Duration::days(7))
            .await
            .unwrap();
        assert_eq!(first.dependents(), BTreeSet::from([alice()]));

        let late = store
            .mark_failed(RecordId(3), now, now + Duration::hours(24))
            .await
            .unwrap();
        assert!(late.is_superseded());
        assert_eq!(store.record(RecordId(3)).unwrap().status, RecordStatus::Cached);
    }

    #[tokio::test]
    async fn test_resolution_of_absent_record_writes_it() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let resolution = store
            .mark_successful(RecordId(8), serde_json::json!({"v": 2}), now, now + Duration::days(7))
            .await
            .unwrap();
        assert_eq!(resolution, Resolution::Resolved { previous: None });
        assert!(store.record(RecordId(8)).unwrap().is_fresh(now));
    }

    async fn queue(store: &InMemoryStore, username: &Username) {
        store
            .mark_waiting(username, &BTreeSet::new(), 0, Utc::now())
            .await
            .unwrap()
            .unwrap();
        store.mark_queued(username, 1, Utc::now()).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_processing_transitions_are_conditional() {
        let store = InMemoryStore::new();
        let job = Job::new(alice(), [RecordId(1)], Utc::now());
        JobStore::create(&store, &job).await.unwrap();
        store
            .mark_waiting(&alice(), &BTreeSet::new(), 0, Utc::now())
            .await
            .unwrap()
            .unwrap();

        // Still waiting on record 1
        assert!(store.mark_processing(&alice(), Utc::now()).await.unwrap().is_none());
        assert!(store.mark_processing_retry(&alice()).await.unwrap().is_none());
        assert_eq!(store.job(&alice()).unwrap().status, JobStatus::Waiting);

        store.remove_dependency(&alice(), RecordId(1)).await.unwrap();
        store.mark_queued(&alice(), 1, Utc::now()).await.unwrap().unwrap();
        let processing = store.mark_processing(&alice(), Utc::now()).await.unwrap().unwrap();
        assert_eq!(processing.status, JobStatus::Processing);
        assert!(store.mark_processing(&alice(), Utc::now()).await.unwrap().is_none());

        let retried = store.mark_processing_retry(&alice()).await.unwrap().unwrap();
        assert_eq!(retried.status, JobStatus::Queued);
        assert!(store.mark_processing_retry(&alice()).await.unwrap().is_none());

        store.mark_processing_failed(&alice(), Utc::now()).await.unwrap().unwrap();
        assert!(store.mark_processing(&alice(), Utc::now()).await.unwrap().is_none());
        assert!(store.mark_processing_failed(&alice(), Utc::now()).await.unwrap().is_none());
        assert_eq!(store.job(&alice()).unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_job_create_replaces_only_failed_jobs() {
        let store = InMemoryStore::new();
        let job = Job::new(alice(), [RecordId(1)], Utc::now());
        assert!(JobStore::create(&store, &job).await.unwrap());
        assert!(!JobStore::create(&store, &job).await.unwrap());

        // Only a queued or processing job can be failed
        assert!(store.mark_processing_failed(&alice(), Utc::now()).await.unwrap().is_none());
        queue(&store, &alice()).await;
        store.mark_processing_failed(&alice(), Utc::now()).await.unwrap().unwrap();
        let retry = Job::new(alice(), [RecordId(2)], Utc::now());
        assert!(JobStore::create(&store, &retry).await.unwrap());
        assert_eq!(store.job(&alice()).unwrap().depends_on, BTreeSet::from([RecordId(2)]));
    }

    #[tokio::test]
    async fn test_remove_dependency_is_idempotent() {
        let store = InMemoryStore::new();
        let job = Job::new(alice(), [RecordId(1), RecordId(2)], Utc::now());
        JobStore::create(&store, &job).await.unwrap();

        let once = store.remove_dependency(&alice(), RecordId(1)).await.unwrap();
        let twice = store.remove_dependency(&alice(), RecordId(1)).await.unwrap();
        assert_eq!(once.depends_on, twice.depends_on);
        assert_eq!(twice.depends_on, BTreeSet::from([RecordId(2)]));
    }

    #[tokio::test]
    async fn test_updates_never_create_jobs() {
        let store = InMemoryStore::new();
        let err = store.remove_dependency(&alice(), RecordId(1)).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(store.mark_processing(&alice(), Utc::now()).await.is_err());
        assert_eq!(store.job_count(), 0);
    }

    #[tokio::test]
    async fn test_mark_queued_happens_once() {
        let store = InMemoryStore::new();
        let job = Job::new(alice(), [], Utc::now());
        JobStore::create(&store, &job).await.unwrap();
        assert!(store.mark_queued(&alice(), 1, Utc::now()).await.unwrap().is_none());

        store
            .mark_waiting(&alice(), &BTreeSet::new(), 0, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert!(store.mark_queued(&alice(), 1, Utc::now()).await.unwrap().is_some());
        assert!(store.mark_queued(&alice(), 2, Utc::now()).await.unwrap().is_none());
        assert_eq!(store.job(&alice()).unwrap().status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn test_concurrent_counter_increments_are_atomic() {
        let store = Arc::new(InMemoryStore::new());
        let handles: Vec<_> = (0..64)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store
                        .increment(QueueName::Fetch, CounterField::QueueLength)
                        .await
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let counter = store.read(QueueName::Fetch).await.unwrap();
        assert_eq!(counter.queue_length, 64);
        assert_eq!(counter.processed_items, 0);
        assert_eq!(store.read(QueueName::Processing).await.unwrap().queue_length, 0);
    }
}
