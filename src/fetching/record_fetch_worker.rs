//! # Record Fetch Worker
//!
//! Handles one fetch work item: fetch through the shared rate-limit gate
//! with bounded retry, write the result with its TTL, fan the resolution in
//! to every waiting job, then count the item processed.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::rate_limit::RateLimitGate;
use super::retry::RetryPolicy;
use super::source::RecordSource;
use super::ttl::TtlPolicy;
use crate::config::FetchConfig;
use crate::logging::log_record_operation;
use crate::models::{CounterField, QueueName, RecordId, RecordStatus};
use crate::orchestration::{DependencyResolver, FanInReport, OrchestrationError};
use crate::store::{Resolution, StoreHandles};

/// Summary of one handled fetch item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub id: RecordId,
    pub status: RecordStatus,
    /// The record was re-queued or resolved by another worker first; nothing
    /// was written and no dependents were notified
    pub superseded: bool,
    pub fan_in: FanInReport,
}

pub struct RecordFetchWorker {
    stores: StoreHandles,
    source: Arc<dyn RecordSource>,
    resolver: DependencyResolver,
    gate: Arc<RateLimitGate>,
    retry: RetryPolicy,
    ttl: TtlPolicy,
    requests_per_fetch: u32,
}

impl std::fmt::Debug for RecordFetchWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordFetchWorker")
            .field("retry", &self.retry)
            .field("ttl", &self.ttl)
            .field("requests_per_fetch", &self.requests_per_fetch)
            .finish_non_exhaustive()
    }
}

impl RecordFetchWorker {
    pub fn new(
        stores: StoreHandles,
        source: Arc<dyn RecordSource>,
        resolver: DependencyResolver,
        gate: Arc<RateLimitGate>,
        fetch: &FetchConfig,
        ttl: TtlPolicy,
    ) -> Self {
        Self {
            stores,
            source,
            resolver,
            gate,
            retry: RetryPolicy::from_config(fetch),
            ttl,
            requests_per_fetch: fetch.requests_per_fetch,
        }
    }

    #[instrument(skip(self), fields(record_id = %id))]
    pub async fn handle(&self, id: RecordId) -> Result<FetchOutcome, OrchestrationError> {
        let fetched = self
            .retry
            .run(|_attempt| async move {
                self.gate.acquire(self.requests_per_fetch).await;
                self.source.fetch(id).await
            })
            .await;

        let now = Utc::now();
        let (status, resolution) = match fetched {
            Ok(raw) => {
                let expires_at = self.ttl.expiry_for(&raw.airing, now);
                let resolution = self
                    .stores
                    .records
                    .mark_successful(id, raw.payload, now, expires_at)
                    .await?;
                (RecordStatus::Cached, resolution)
            }
            Err(err) => {
                warn!(record_id = %id, error = %err, "Fetch failed; marking record failed");
                let resolution = self
                    .stores
                    .records
                    .mark_failed(id, now, self.ttl.failure_expiry(now))
                    .await?;
                (RecordStatus::Failed, resolution)
            }
        };

        self.complete(id, status, resolution).await
    }

    /// Resolve a record whose fetch item exhausted its deliveries, so the
    /// jobs waiting on it are not stranded
    #[instrument(skip(self), fields(record_id = %id))]
    pub async fn dead_letter(&self, id: RecordId) -> Result<FetchOutcome, OrchestrationError> {
        let now = Utc::now();
        let resolution = self
            .stores
            .records
            .mark_failed(id, now, self.ttl.failure_expiry(now))
            .await?;
        self.complete(id, RecordStatus::Failed, resolution).await
    }

    async fn complete(
        &self,
        id: RecordId,
        status: RecordStatus,
        resolution: Resolution,
    ) -> Result<FetchOutcome, OrchestrationError> {
        if resolution.is_superseded() {
            info!(record_id = %id, "Fetch result superseded; record already re-queued or resolved");
            return Ok(FetchOutcome {
                id,
                status,
                superseded: true,
                fan_in: FanInReport::default(),
            });
        }

        let dependents = resolution.dependents();
        log_record_operation("resolve", id, &status.to_string(), dependents.len(), None);
        let fan_in = self.resolver.notify_resolved(id, &dependents).await;

        self.stores
            .counters
            .increment(QueueName::Fetch, CounterField::ProcessedItems)
            .await?;

        Ok(FetchOutcome {
            id,
            status,
            superseded: false,
            fan_in,
        })
    }
}
