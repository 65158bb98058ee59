//! # Job Initializer
//!
//! Fan-out for a new job: create it, split its required records by what
//! the cache already knows, queue fetches for whatever nobody is fetching,
//! and join the fetches that are already in flight.
//!
//! ## Race handling
//!
//! Every step that can collide with another initiator or a fetch worker is a
//! conditional write. Losing one is an expected branch:
//!
//! - `create`/`mark_pending` lost: another job queued the fetch first. The
//!   reserved queue position is handed back and the record is joined instead.
//! - `add_dependent` returned nothing: the fetch finished in the meantime, so
//!   the record counts as resolved.
//! - A record queued here may resolve before the job reaches `Waiting`. A
//!   strong re-read folds those into the resolved set, and fan-in removes
//!   them from the job in any case, so `mark_waiting` always sees the truth.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::errors::OrchestrationError;
use super::processing_enqueuer::ProcessingEnqueuer;
use crate::artifacts::ArtifactStore;
use crate::logging::{log_error, log_job_operation};
use crate::messaging::WorkDispatcher;
use crate::models::{
    required_record_ids, CounterField, Job, ListEntry, QueueName, RecordId, RecordPartition, Username,
};
use crate::store::{ReadConsistency, StoreHandles};

/// Final classification of one initiation, after every race was settled
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InitiationResult {
    pub job: Job,
    /// Records this initiation queued fetches for
    pub fetches_queued: Vec<RecordId>,
    /// Records another job was already fetching; this job joined them
    pub joined: Vec<RecordId>,
    /// Records already resolved, removed from the job up front
    pub resolved: Vec<RecordId>,
    pub processing_enqueued: bool,
}

/// How queueing one record's fetch ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueAttempt {
    Queued { id: RecordId, position: i64 },
    LostRace(RecordId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueMode {
    /// No record exists yet
    Create,
    /// Record exists but is expired or failed
    Requeue,
}

pub struct JobInitializer {
    stores: StoreHandles,
    artifacts: Arc<dyn ArtifactStore>,
    dispatcher: WorkDispatcher,
    enqueuer: ProcessingEnqueuer,
    concurrency: usize,
}

impl std::fmt::Debug for JobInitializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobInitializer")
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl JobInitializer {
    pub fn new(
        stores: StoreHandles,
        artifacts: Arc<dyn ArtifactStore>,
        dispatcher: WorkDispatcher,
        enqueuer: ProcessingEnqueuer,
        concurrency: usize,
    ) -> Self {
        Self {
            stores,
            artifacts,
            dispatcher,
            enqueuer,
            concurrency: concurrency.max(1),
        }
    }

    /// Initiate from a list snapshot, storing it for the processing step
    #[instrument(skip(self, entries), fields(username = %username, entries = entries.len()))]
    pub async fn initiate_with_snapshot(
        &self,
        username: &Username,
        entries: &[ListEntry],
    ) -> Result<InitiationResult, OrchestrationError> {
        let required = required_record_ids(entries);
        self.run(username, &required, Some(entries)).await
    }

    /// Initiate from bare record ids. Processing reads the user's stored
    /// snapshot, so callers using this entry point manage snapshots themselves.
    #[instrument(skip(self, required), fields(username = %username, required = required.len()))]
    pub async fn initiate(
        &self,
        username: &Username,
        required: &[RecordId],
    ) -> Result<InitiationResult, OrchestrationError> {
        self.run(username, required, None).await
    }

    async fn run(
        &self,
        username: &Username,
        required: &[RecordId],
        snapshot: Option<&[ListEntry]>,
    ) -> Result<InitiationResult, OrchestrationError> {
        let required: Vec<RecordId> = {
            let mut seen = BTreeSet::new();
            required.iter().copied().filter(|id| seen.insert(*id)).collect()
        };

        // Best effort; anything unreadable is treated as not found and
        // corrected by the conditional writes below
        let existing = match self
            .stores
            .records
            .bulk_get(&required, ReadConsistency::Eventual)
            .await
        {
            Ok(existing) => existing,
            Err(err) => {
                warn!(username = %username, error = %err, "Bulk read failed; treating all records as not found");
                Default::default()
            }
        };
        let partition = RecordPartition::classify(&required, &existing, Utc::now());
        debug!(
            username = %username,
            not_found = partition.not_found.len(),
            not_queued = partition.not_queued.len(),
            already_queued = partition.already_queued.len(),
            cached = partition.cached.len(),
            "Partitioned required records"
        );

        let job = Job::new(username.clone(), required.iter().copied(), Utc::now());
        if !self.stores.jobs.create(&job).await? {
            return Err(OrchestrationError::JobAlreadyExists(username.clone()));
        }
        log_job_operation("create", username, Some(job.correlation_id), "creating", None);

        if let Some(entries) = snapshot {
            if let Err(err) = self.artifacts.put_snapshot(username, entries).await {
                log_error("job_initializer", "put_snapshot", &err, Some(username.as_str()));
                self.stores.jobs.delete(username).await?;
                return Err(err.into());
            }
        }

        let attempts: Vec<QueueAttempt> = stream::iter(
            partition
                .not_found
                .iter()
                .map(|id| (*id, QueueMode::Create))
                .chain(partition.not_queued.iter().map(|id| (*id, QueueMode::Requeue))),
        )
        .map(|(id, mode)| self.queue_fetch(username, id, mode))
        .buffer_unordered(self.concurrency)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<_, _>>()?;

        let mut max_position = 0_i64;
        let mut fetches_queued = Vec::new();
        let mut to_join = partition.already_queued.clone();
        for attempt in attempts {
            match attempt {
                QueueAttempt::Queued { id, position } => {
                    max_position = max_position.max(position);
                    fetches_queued.push(id);
                }
                QueueAttempt::LostRace(id) => to_join.push(id),
            }
        }

        let joins: Vec<(RecordId, Option<i64>)> = stream::iter(to_join)
            .map(|id| async move {
                self.stores
                    .records
                    .add_dependent(id, username)
                    .await
                    .map(|position| (id, position))
            })
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<_, _>>()?;

        let mut resolved: BTreeSet<RecordId> = partition.cached.iter().copied().collect();
        let mut joined = Vec::new();
        for (id, position) in joins {
            match position {
                Some(position) => {
                    max_position = max_position.max(position);
                    joined.push(id);
                }
                None => {
                    resolved.insert(id);
                }
            }
        }

        if !fetches_queued.is_empty() {
            let reread = self
                .stores
                .records
                .bulk_get(&fetches_queued, ReadConsistency::Strong)
                .await?;
            for (id, record) in &reread {
                if record.is_resolved() {
                    resolved.insert(*id);
                }
            }
        }

        let job = self
            .stores
            .jobs
            .mark_waiting(username, &resolved, max_position, Utc::now())
            .await?
            .ok_or_else(|| OrchestrationError::UnexpectedJobState {
                username: username.clone(),
                operation: "mark_waiting",
            })?;
        log_job_operation(
            "mark_waiting",
            username,
            Some(job.correlation_id),
            "waiting",
            Some(&format!("{} of {} records outstanding", job.remaining(), job.dependency_count)),
        );

        let (job, processing_enqueued) = if job.dependencies_satisfied() {
            match self.enqueuer.enqueue(username).await? {
                Some(queued) => (queued, true),
                // Fan-in got there first
                None => (job, false),
            }
        } else {
            (job, false)
        };

        Ok(InitiationResult {
            job,
            fetches_queued,
            joined,
            resolved: resolved.into_iter().collect(),
            processing_enqueued,
        })
    }

    /// Reserve a fetch-queue position and try to claim the record's fetch
    async fn queue_fetch(
        &self,
        username: &Username,
        id: RecordId,
        mode: QueueMode,
    ) -> Result<QueueAttempt, OrchestrationError> {
        let counter = self
            .stores
            .counters
            .increment(QueueName::Fetch, CounterField::QueueLength)
            .await?;
        let position = counter.queue_length;

        let claimed = match mode {
            QueueMode::Create => self.stores.records.create(id, username, position).await?,
            QueueMode::Requeue => self.stores.records.mark_pending(id, username, position).await?,
        };

        if !claimed {
            self.stores
                .counters
                .decrement(QueueName::Fetch, CounterField::QueueLength)
                .await?;
            debug!(record_id = %id, ?mode, "Another job queued this fetch first");
            return Ok(QueueAttempt::LostRace(id));
        }

        self.dispatcher.dispatch_fetch(id).await?;
        Ok(QueueAttempt::Queued { id, position })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::InMemoryArtifactStore;
    use crate::config::QueuesConfig;
    use crate::messaging::{InMemoryMessagingService, WorkMessage};
    use crate::models::{JobStatus, Record, RecordStatus};
    use crate::store::{InMemoryStore, QueueCounterStore, RecordStore, Resolution, StoreResult};
    use crate::test_helpers::cached_record;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration};
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Record store whose eventual reads and timing are scripted, so each
    /// initiation race can be replayed deterministically
    #[derive(Default)]
    struct ScriptedRaceStore {
        inner: Arc<InMemoryStore>,
        /// Returned for eventual bulk reads in place of the real contents
        stale_view: Mutex<Option<HashMap<RecordId, Record>>>,
        /// Resolved just before this initiation joins them
        resolve_before_join: Mutex<BTreeSet<RecordId>>,
        /// Resolved right after this initiation claims their fetch
        resolve_after_claim: Mutex<BTreeSet<RecordId>>,
    }

    impl ScriptedRaceStore {
        async fn resolve_now(&self, id: RecordId) -> StoreResult<Resolution> {
            let now = Utc::now();
            self.inner
                .mark_successful(id, serde_json::json!({ "id": id.0 }), now, now + Duration::days(30))
                .await
        }

        async fn after_claim(&self, id: RecordId, claimed: bool) -> StoreResult<bool> {
            if claimed && self.resolve_after_claim.lock().remove(&id) {
                self.resolve_now(id).await?;
            }
            Ok(claimed)
        }
    }

    #[async_trait]
    impl RecordStore for ScriptedRaceStore {
        async fn get(&self, id: RecordId, consistency: ReadConsistency) -> StoreResult<Option<Record>> {
            RecordStore::get(self.inner.as_ref(), id, consistency).await
        }

        async fn bulk_get(
            &self,
            ids: &[RecordId],
            consistency: ReadConsistency,
        ) -> StoreResult<HashMap<RecordId, Record>> {
            let stale = self.stale_view.lock().clone();
            match stale {
                Some(view) if consistency == ReadConsistency::Eventual => Ok(view),
                _ => self.inner.bulk_get(ids, consistency).await,
            }
        }

        async fn create(&self, id: RecordId, owner: &Username, queue_position: i64) -> StoreResult<bool> {
            let claimed = RecordStore::create(self.inner.as_ref(), id, owner, queue_position).await?;
            self.after_claim(id, claimed).await
        }

        async fn mark_pending(&self, id: RecordId, owner: &Username, queue_position: i64) -> StoreResult<bool> {
            let claimed = self.inner.mark_pending(id, owner, queue_position).await?;
            self.after_claim(id, claimed).await
        }

        async fn add_dependent(&self, id: RecordId, owner: &Username) -> StoreResult<Option<i64>> {
            if self.resolve_before_join.lock().remove(&id) {
                self.resolve_now(id).await?;
            }
            self.inner.add_dependent(id, owner).await
        }

        async fn mark_successful(
            &self,
            id: RecordId,
            payload: serde_json::Value,
            fetched_at: DateTime<Utc>,
            expires_at: DateTime<Utc>,
        ) -> StoreResult<Resolution> {
            self.inner.mark_successful(id, payload, fetched_at, expires_at).await
        }

        async fn mark_failed(
            &self,
            id: RecordId,
            attempted_at: DateTime<Utc>,
            expires_at: DateTime<Utc>,
        ) -> StoreResult<Resolution> {
            self.inner.mark_failed(id, attempted_at, expires_at).await
        }
    }

    struct Fixture {
        records: Arc<ScriptedRaceStore>,
        store: Arc<InMemoryStore>,
        messaging: Arc<InMemoryMessagingService>,
        queues: QueuesConfig,
        initializer: JobInitializer,
    }

    async fn fixture() -> Fixture {
        let records = Arc::new(ScriptedRaceStore::default());
        let store = records.inner.clone();
        let stores = StoreHandles {
            records: records.clone(),
            jobs: store.clone(),
            counters: store.clone(),
        };
        let messaging = Arc::new(InMemoryMessagingService::new());
        let queues = QueuesConfig::default();
        let dispatcher = WorkDispatcher::new(messaging.clone().into(), &queues);
        dispatcher.ensure_queues().await.unwrap();
        let enqueuer = ProcessingEnqueuer::new(stores.clone(), dispatcher.clone());
        let initializer = JobInitializer::new(
            stores,
            Arc::new(InMemoryArtifactStore::new()),
            dispatcher,
            enqueuer,
            4,
        );
        Fixture {
            records,
            store,
            messaging,
            queues,
            initializer,
        }
    }

    /// Another job's initiation already claimed `id` at the next fetch position
    async fn claimed_elsewhere(store: &InMemoryStore, id: RecordId, owner: &str) -> i64 {
        let position = store
            .increment(QueueName::Fetch, CounterField::QueueLength)
            .await
            .unwrap()
            .queue_length;
        assert!(RecordStore::create(store, id, &Username::new(owner), position).await.unwrap());
        position
    }

    fn alice() -> Username {
        Username::new("alice")
    }

    #[tokio::test]
    async fn test_stale_absent_record_loses_create_and_joins_fetch() {
        let f = fixture().await;
        let position = claimed_elsewhere(&f.store, RecordId(1), "bob").await;
        // The eventual read has not seen bob's record yet
        *f.records.stale_view.lock() = Some(HashMap::new());

        let result = f.initializer.initiate(&alice(), &[RecordId(1)]).await.unwrap();

        assert!(result.fetches_queued.is_empty());
        assert_eq!(result.joined, vec![RecordId(1)]);
        assert!(!result.processing_enqueued);
        assert_eq!(result.job.status, JobStatus::Waiting);
        assert_eq!(result.job.depends_on, BTreeSet::from([RecordId(1)]));
        assert_eq!(result.job.last_dependency_queue_position, Some(position));

        // The reserved position was handed back and no second fetch was sent
        assert_eq!(f.store.counter(QueueName::Fetch).queue_length, position);
        assert!(f.messaging.peek_all::<WorkMessage>(&f.queues.fetch_queue).await.unwrap().is_empty());
        let record = f.store.record(RecordId(1)).unwrap();
        assert_eq!(record.dependent_jobs, BTreeSet::from([Username::new("bob"), alice()]));
    }

    #[tokio::test]
    async fn test_stale_expired_record_loses_requeue_and_joins_fetch() {
        let f = fixture().await;
        let position = claimed_elsewhere(&f.store, RecordId(2), "bob").await;
        let expired = cached_record(2, Utc::now() - Duration::days(1));
        *f.records.stale_view.lock() = Some(HashMap::from([(RecordId(2), expired)]));

        let result = f.initializer.initiate(&alice(), &[RecordId(2)]).await.unwrap();

        assert_eq!(result.joined, vec![RecordId(2)]);
        assert_eq!(result.job.status, JobStatus::Waiting);
        assert_eq!(f.store.counter(QueueName::Fetch).queue_length, position);
        assert_eq!(f.store.record(RecordId(2)).unwrap().queue_position, Some(position));
    }

    #[tokio::test]
    async fn test_fetch_finishing_before_join_counts_as_resolved() {
        let f = fixture().await;
        claimed_elsewhere(&f.store, RecordId(3), "bob").await;
        f.records.resolve_before_join.lock().insert(RecordId(3));

        let result = f.initializer.initiate(&alice(), &[RecordId(3)]).await.unwrap();

        assert!(result.joined.is_empty());
        assert_eq!(result.resolved, vec![RecordId(3)]);
        assert!(result.processing_enqueued);
        assert_eq!(result.job.status, JobStatus::Queued);
        assert!(result.job.dependencies_satisfied());

        let record = f.store.record(RecordId(3)).unwrap();
        assert_eq!(record.status, RecordStatus::Cached);
        assert!(!record.dependent_jobs.contains(&alice()));
        assert_eq!(f.store.counter(QueueName::Processing).queue_length, 1);
        assert_eq!(
            f.messaging
                .peek_all::<WorkMessage>(&f.queues.processing_queue)
                .await
                .unwrap(),
            vec![WorkMessage::Process { username: alice() }]
        );
    }

    #[tokio::test]
    async fn test_fetch_resolving_before_waiting_is_folded_by_reread() {
        let f = fixture().await;
        f.records.resolve_after_claim.lock().insert(RecordId(4));

        let result = f
            .initializer
            .initiate(&alice(), &[RecordId(4), RecordId(5)])
            .await
            .unwrap();

        let mut queued = result.fetches_queued.clone();
        queued.sort();
        assert_eq!(queued, vec![RecordId(4), RecordId(5)]);
        assert_eq!(result.resolved, vec![RecordId(4)]);
        assert_eq!(result.job.status, JobStatus::Waiting);
        assert_eq!(result.job.depends_on, BTreeSet::from([RecordId(5)]));
        // Both claims kept their positions
        assert_eq!(f.store.counter(QueueName::Fetch).queue_length, 2);
        assert_eq!(result.job.last_dependency_queue_position, Some(2));
    }

    #[tokio::test]
    async fn test_every_fetch_resolving_early_queues_processing() {
        let f = fixture().await;
        f.records.resolve_after_claim.lock().insert(RecordId(6));

        let result = f.initializer.initiate(&alice(), &[RecordId(6)]).await.unwrap();

        assert_eq!(result.fetches_queued, vec![RecordId(6)]);
        assert_eq!(result.resolved, vec![RecordId(6)]);
        assert!(result.processing_enqueued);
        assert_eq!(f.store.job(&alice()).unwrap().status, JobStatus::Queued);
        assert_eq!(f.store.counter(QueueName::Processing).queue_length, 1);
    }

    #[tokio::test]
    async fn test_live_job_is_not_replaced() {
        let f = fixture().await;
        f.initializer.initiate(&alice(), &[RecordId(7)]).await.unwrap();

        let err = f.initializer.initiate(&alice(), &[RecordId(8)]).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::JobAlreadyExists(_)));
        assert_eq!(f.store.counter(QueueName::Fetch).queue_length, 1);
    }
}
