//! # Test Helpers
//!
//! In-memory collaborators and a fully wired scheduler for integration
//! tests. Nothing here needs infrastructure: stores, queues and artifacts
//! are the in-memory adapters, and the upstream sources are scripted.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::analysis::{AnalysisError, AnalysisInput, Analyzer};
use crate::artifacts::InMemoryArtifactStore;
use crate::config::OpinionsConfig;
use crate::fetching::{AiringStatus, ListingSource, RawRecord, RecordSource, UpstreamError};
use crate::messaging::{InMemoryMessagingService, MessagingError, WorkMessage};
use crate::models::{ListEntry, ListStatus, Record, RecordId, RecordStatus, Username};
use crate::orchestration::{BatchOutcome, SchedulerAdapters, SchedulerComponents};
use crate::store::{InMemoryStore, StoreHandles};

/// Listing source backed by a fixed map of user lists
#[derive(Debug, Default)]
pub struct StaticListingSource {
    lists: DashMap<Username, Vec<ListEntry>>,
}

impl StaticListingSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_list(&self, username: &str, entries: Vec<ListEntry>) {
        self.lists.insert(Username::new(username), entries);
    }
}

#[async_trait]
impl ListingSource for StaticListingSource {
    async fn list_entries(&self, username: &Username) -> Result<Vec<ListEntry>, UpstreamError> {
        self.lists
            .get(username)
            .map(|entries| entries.value().clone())
            .ok_or_else(|| UpstreamError::not_found(format!("list/{username}")))
    }
}

/// Record source with scripted responses and per-record call counts
#[derive(Debug, Default)]
pub struct ScriptedRecordSource {
    responses: DashMap<RecordId, RawRecord>,
    /// Remaining failures to return before answering normally
    failures: DashMap<RecordId, u32>,
    calls: DashMap<RecordId, u32>,
}

impl ScriptedRecordSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every id in `ids` with [`raw_record`]
    pub fn with_records(ids: impl IntoIterator<Item = u64>) -> Self {
        let source = Self::new();
        for id in ids {
            source.set_response(RecordId(id), raw_record(id));
        }
        source
    }

    pub fn set_response(&self, id: RecordId, raw: RawRecord) {
        self.responses.insert(id, raw);
    }

    /// Fail the next `times` fetches of `id`
    pub fn fail_next(&self, id: RecordId, times: u32) {
        self.failures.insert(id, times);
    }

    pub fn fetch_count(&self, id: RecordId) -> u32 {
        self.calls.get(&id).map(|count| *count).unwrap_or_default()
    }

    pub fn total_fetches(&self) -> u32 {
        self.calls.iter().map(|count| *count.value()).sum()
    }

    fn take_failure(&self, id: RecordId) -> bool {
        match self.failures.get_mut(&id) {
            Some(mut remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl RecordSource for ScriptedRecordSource {
    async fn fetch(&self, id: RecordId) -> Result<RawRecord, UpstreamError> {
        *self.calls.entry(id).or_insert(0) += 1;
        if self.take_failure(id) {
            return Err(UpstreamError::request(format!("record/{id}"), "scripted failure"));
        }
        self.responses
            .get(&id)
            .map(|raw| raw.value().clone())
            .ok_or_else(|| UpstreamError::not_found(format!("record/{id}")))
    }
}

/// Analyzer that summarizes what it was given
#[derive(Debug, Default)]
pub struct SummaryAnalyzer;

impl Analyzer for SummaryAnalyzer {
    fn analyze(&self, input: &AnalysisInput) -> Result<serde_json::Value, AnalysisError> {
        let mut missing = input.missing.clone();
        missing.sort();
        Ok(json!({
            "username": input.username,
            "entries": input.entries.len(),
            "resolved": input.records.len(),
            "missing": missing,
        }))
    }
}

/// Analyzer that fails a fixed number of times before succeeding
#[derive(Debug)]
pub struct FlakyAnalyzer {
    remaining_failures: AtomicU32,
    calls: AtomicU32,
}

impl FlakyAnalyzer {
    pub fn failing(times: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(times),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Analyzer for FlakyAnalyzer {
    fn analyze(&self, input: &AnalysisInput) -> Result<serde_json::Value, AnalysisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(AnalysisError::failed(&input.username, "scripted analysis failure"));
        }
        SummaryAnalyzer.analyze(input)
    }
}

/// Upstream payload for a record that finished airing long ago
pub fn raw_record(id: u64) -> RawRecord {
    RawRecord {
        payload: json!({ "id": id, "title": format!("Record {id}") }),
        airing: AiringStatus::Finished { ended_on: None },
    }
}

/// List entries that all count as required
pub fn completed_entries(ids: impl IntoIterator<Item = u64>) -> Vec<ListEntry> {
    ids.into_iter()
        .map(|id| ListEntry::new(id, ListStatus::Completed, Some(7)))
        .collect()
}

/// A cached record expiring at `expires_at`
pub fn cached_record(id: u64, expires_at: DateTime<Utc>) -> Record {
    Record {
        id: RecordId(id),
        status: RecordStatus::Cached,
        expires_at: Some(expires_at),
        queue_position: None,
        dependent_jobs: BTreeSet::new(),
        payload: Some(raw_record(id).payload),
        last_successful_fetch: Some(expires_at - Duration::days(90)),
        last_failed_fetch: None,
    }
}

/// Configuration with every delay removed
pub fn test_config() -> OpinionsConfig {
    let mut config = OpinionsConfig::default();
    config.fetch.retry_delay_ms = 0;
    config.fetch.min_request_interval_ms = 0;
    config.queues.poll_interval_ms = 10;
    config
}

/// A scheduler wired entirely to in-memory adapters
pub struct TestHarness {
    pub config: OpinionsConfig,
    pub store: Arc<InMemoryStore>,
    pub messaging: Arc<InMemoryMessagingService>,
    pub artifacts: Arc<InMemoryArtifactStore>,
    pub listing: Arc<StaticListingSource>,
    pub records: Arc<ScriptedRecordSource>,
    pub components: SchedulerComponents,
}

impl std::fmt::Debug for TestHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestHarness")
            .field("jobs", &self.store.job_count())
            .finish_non_exhaustive()
    }
}

impl TestHarness {
    pub async fn new(records: ScriptedRecordSource) -> Result<Self, MessagingError> {
        Self::build(test_config(), records, Arc::new(SummaryAnalyzer)).await
    }

    pub async fn build(
        config: OpinionsConfig,
        records: ScriptedRecordSource,
        analyzer: Arc<dyn Analyzer>,
    ) -> Result<Self, MessagingError> {
        let store = Arc::new(InMemoryStore::new());
        let messaging = Arc::new(InMemoryMessagingService::new());
        let artifacts = Arc::new(InMemoryArtifactStore::new());
        let listing = Arc::new(StaticListingSource::new());
        let records = Arc::new(records);

        let adapters = SchedulerAdapters {
            stores: StoreHandles::shared(store.clone()),
            messaging: messaging.clone().into(),
            artifacts: artifacts.clone(),
            listing: listing.clone(),
            records: records.clone(),
            analyzer,
        };
        let components = SchedulerComponents::assemble(&config, adapters);
        components.dispatcher.ensure_queues().await?;

        Ok(Self {
            config,
            store,
            messaging,
            artifacts,
            listing,
            records,
            components,
        })
    }

    /// Work items waiting on the fetch queue
    pub async fn pending_fetches(&self) -> Result<Vec<WorkMessage>, MessagingError> {
        self.messaging.peek_all(&self.config.queues.fetch_queue).await
    }

    /// Work items waiting on the processing queue
    pub async fn pending_processing(&self) -> Result<Vec<WorkMessage>, MessagingError> {
        self.messaging
            .peek_all(&self.config.queues.processing_queue)
            .await
    }

    /// Poll both queues until a poll receives nothing
    pub async fn drain(&self) -> Result<BatchOutcome, MessagingError> {
        let mut total = BatchOutcome::default();
        for _ in 0..1_000 {
            let outcome = self.components.consumer.poll_once().await?;
            if outcome.is_empty() {
                return Ok(total);
            }
            total.merge(outcome);
        }
        Ok(total)
    }
}
