//! The outward operations: initiate and status, plus a scheduler running
//! its own consumer task.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use opinions_core::artifacts::InMemoryArtifactStore;
use opinions_core::config::ConfigManager;
use opinions_core::messaging::InMemoryMessagingService;
use opinions_core::models::{JobStatus, Username};
use opinions_core::orchestration::{OrchestrationError, SchedulerAdapters, SchedulerHandle};
use opinions_core::store::{InMemoryStore, StoreHandles};
use opinions_core::test_helpers::{
    cached_record, completed_entries, test_config, ScriptedRecordSource, StaticListingSource, SummaryAnalyzer,
    TestHarness,
};

type TestResult = Result<(), Box<dyn std::error::Error>>;

#[tokio::test]
async fn test_second_initiate_for_live_job_conflicts() -> TestResult {
    let harness = TestHarness::new(ScriptedRecordSource::with_records([1])).await?;
    harness.listing.set_list("alice", completed_entries([1]));

    harness.components.status.initiate("alice").await?;
    let err = harness
        .components
        .status
        .initiate("Alice")
        .await
        .expect_err("live job must not be replaced");

    assert!(matches!(err, OrchestrationError::JobAlreadyExists(ref u) if u == &Username::new("alice")));
    assert!(err.is_conflict());
    assert_eq!(harness.pending_fetches().await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_status_for_unknown_user_is_empty() -> TestResult {
    let harness = TestHarness::new(ScriptedRecordSource::new()).await?;

    let status = harness.components.status.status("nobody").await?;
    assert!(status.pending.is_none());
    assert!(status.results.is_none());
    Ok(())
}

#[tokio::test]
async fn test_invalid_usernames_are_rejected() -> TestResult {
    let harness = TestHarness::new(ScriptedRecordSource::new()).await?;

    for raw in ["", "   ", "two words"] {
        let err = harness.components.status.initiate(raw).await.expect_err("invalid username");
        assert!(matches!(err, OrchestrationError::InvalidUsername(_)), "{raw:?}: {err}");
    }
    assert_eq!(harness.store.job_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_unknown_upstream_user_creates_no_job() -> TestResult {
    let harness = TestHarness::new(ScriptedRecordSource::new()).await?;

    let err = harness
        .components
        .status
        .initiate("ghost")
        .await
        .expect_err("listing is missing");
    assert!(matches!(err, OrchestrationError::Upstream(ref upstream) if upstream.is_not_found()));
    assert_eq!(harness.store.job_count(), 0);
    assert!(harness.pending_fetches().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_status_reports_progress_then_results() -> TestResult {
    let harness = TestHarness::new(ScriptedRecordSource::with_records([2, 3])).await?;
    harness
        .store
        .insert_record(cached_record(1, Utc::now() + Duration::days(30)));
    harness.listing.set_list("bob", completed_entries([1, 2, 3]));

    let initiated = harness.components.status.initiate("bob").await?;
    assert!(initiated.created.is_observed());
    assert!(initiated.initialised.is_observed());
    assert!(!initiated.queued.is_observed());
    assert_eq!(initiated.fetch_queue_position, 2);
    assert!(initiated.queued.at() >= initiated.now);
    assert!(initiated.completed.at() >= initiated.processing_started.at());

    let waiting = harness.components.status.status("bob").await?;
    let pending = waiting.pending.ok_or("pending report missing")?;
    assert_eq!(pending.status, JobStatus::Waiting);
    assert_eq!(pending.remaining_records, 2);
    assert!(waiting.results.is_none());

    harness.drain().await?;

    let done = harness.components.status.status("bob").await?;
    assert!(done.pending.is_none());
    let results = done.results.ok_or("results missing")?;
    assert_eq!(results.key, "completed-bob.json");
    Ok(())
}

#[tokio::test]
async fn test_status_report_serializes_in_camel_case() -> TestResult {
    let harness = TestHarness::new(ScriptedRecordSource::with_records([4])).await?;
    harness.listing.set_list("carol", completed_entries([4]));

    let report = harness.components.status.initiate("carol").await?;
    let json = serde_json::to_value(&report)?;

    assert_eq!(json["username"], "carol");
    assert_eq!(json["totalRecords"], 1);
    assert_eq!(json["fetchQueuePosition"], 1);
    assert_eq!(json["initialised"]["kind"], "observed");
    assert_eq!(json["queued"]["kind"], "estimated");
    Ok(())
}

#[tokio::test]
async fn test_running_scheduler_completes_jobs_and_stops() -> TestResult {
    let config = test_config();
    let store = Arc::new(InMemoryStore::new());
    let artifacts = Arc::new(InMemoryArtifactStore::new());
    let listing = Arc::new(StaticListingSource::new());
    listing.set_list("dave", completed_entries([5, 6]));

    let adapters = SchedulerAdapters {
        stores: StoreHandles::shared(store.clone()),
        messaging: Arc::new(InMemoryMessagingService::new()).into(),
        artifacts: artifacts.clone(),
        listing,
        records: Arc::new(ScriptedRecordSource::with_records([5, 6])),
        analyzer: Arc::new(SummaryAnalyzer),
    };
    let mut scheduler = SchedulerHandle::start(ConfigManager::from_config(config, "test")?, adapters).await?;
    assert!(scheduler.is_running());

    scheduler.components.status.initiate("dave").await?;

    let finished = tokio::time::timeout(StdDuration::from_secs(5), async {
        loop {
            if artifacts.completed_count() == 1 && store.job_count() == 0 {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
    })
    .await;
    assert!(finished.is_ok(), "scheduler did not finish the job");

    scheduler.stop().await;
    assert!(!scheduler.is_running());
    Ok(())
}
