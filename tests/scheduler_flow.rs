//! End-to-end scheduling on the in-memory adapters: initiation, fetch
//! fan-out, fan-in and processing, driven by draining the work queues.

use chrono::{Duration, Utc};
use opinions_core::artifacts::ArtifactStore;
use opinions_core::messaging::WorkMessage;
use opinions_core::models::{JobStatus, QueueName, RecordId, RecordStatus, Username};
use opinions_core::store::ReadConsistency;
use opinions_core::test_helpers::{cached_record, completed_entries, ScriptedRecordSource, TestHarness};
use serde_json::json;

type TestResult = Result<(), Box<dyn std::error::Error>>;

#[tokio::test]
async fn test_partially_cached_job_waits_for_one_fetch_then_completes() -> TestResult {
    let harness = TestHarness::new(ScriptedRecordSource::with_records([1, 2, 3])).await?;
    let later = Utc::now() + Duration::days(30);
    harness.store.insert_record(cached_record(1, later));
    harness.store.insert_record(cached_record(2, later));
    harness.listing.set_list("alice", completed_entries([1, 2, 3]));

    let report = harness.components.status.initiate("alice").await?;
    assert_eq!(report.status, JobStatus::Waiting);
    assert_eq!(report.total_records, 3);
    assert_eq!(report.remaining_records, 1);

    let job = harness.store.job(&Username::new("alice")).ok_or("job missing")?;
    assert_eq!(job.depends_on.iter().copied().collect::<Vec<_>>(), vec![RecordId(3)]);
    assert_eq!(harness.pending_fetches().await?, vec![WorkMessage::Fetch { id: RecordId(3) }]);
    assert!(harness.pending_processing().await?.is_empty());

    let outcome = harness.drain().await?;
    assert_eq!(outcome.acked, 2);
    assert!(outcome.failed.is_empty());

    assert_eq!(harness.records.fetch_count(RecordId(3)), 1);
    assert_eq!(harness.records.total_fetches(), 1);
    assert!(harness.store.job(&Username::new("alice")).is_none());
    assert!(!harness.artifacts.has_snapshot(&Username::new("alice")));

    let result = harness
        .artifacts
        .get_completed(&Username::new("alice"))
        .await?
        .ok_or("result missing")?;
    assert_eq!(result["resolved"], json!(3));
    assert_eq!(result["missing"], json!([]));

    let fetch = harness.store.counter(QueueName::Fetch);
    assert_eq!((fetch.queue_length, fetch.processed_items), (1, 1));
    let processing = harness.store.counter(QueueName::Processing);
    assert_eq!((processing.queue_length, processing.processed_items), (1, 1));
    Ok(())
}

#[tokio::test]
async fn test_fully_cached_job_goes_straight_to_processing() -> TestResult {
    let harness = TestHarness::new(ScriptedRecordSource::new()).await?;
    let later = Utc::now() + Duration::days(30);
    for id in [10, 11] {
        harness.store.insert_record(cached_record(id, later));
    }
    harness.listing.set_list("bob", completed_entries([10, 11]));

    let report = harness.components.status.initiate("bob").await?;
    assert_eq!(report.status, JobStatus::Queued);
    assert_eq!(report.remaining_records, 0);
    assert!(harness.pending_fetches().await?.is_empty());
    assert_eq!(
        harness.pending_processing().await?,
        vec![WorkMessage::Process {
            username: Username::new("bob")
        }]
    );

    harness.drain().await?;
    assert_eq!(harness.records.total_fetches(), 0);
    assert_eq!(harness.artifacts.completed_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_shared_record_is_fetched_once_for_concurrent_jobs() -> TestResult {
    let harness = TestHarness::new(ScriptedRecordSource::with_records([5, 6, 7])).await?;
    harness.listing.set_list("carol", completed_entries([5, 6]));
    harness.listing.set_list("dave", completed_entries([5, 7]));

    let status = &harness.components.status;
    let (carol, dave) = tokio::join!(status.initiate("carol"), status.initiate("dave"));
    assert_eq!(carol?.remaining_records, 2);
    assert_eq!(dave?.remaining_records, 2);

    let queued: Vec<_> = harness.pending_fetches().await?;
    assert_eq!(queued.len(), 3);
    assert_eq!(
        queued
            .iter()
            .filter(|m| **m == WorkMessage::Fetch { id: RecordId(5) })
            .count(),
        1
    );

    let shared = harness.store.record(RecordId(5)).ok_or("record missing")?;
    assert_eq!(shared.status, RecordStatus::Pending);
    assert_eq!(shared.dependent_jobs.len(), 2);

    harness.drain().await?;
    assert_eq!(harness.records.fetch_count(RecordId(5)), 1);
    assert_eq!(harness.records.total_fetches(), 3);
    assert_eq!(harness.store.job_count(), 0);
    assert_eq!(harness.artifacts.completed_count(), 2);
    Ok(())
}

#[tokio::test]
async fn test_expired_record_is_refetched() -> TestResult {
    let harness = TestHarness::new(ScriptedRecordSource::with_records([4])).await?;
    harness
        .store
        .insert_record(cached_record(4, Utc::now() - Duration::days(1)));
    harness.listing.set_list("erin", completed_entries([4]));

    let report = harness.components.status.initiate("erin").await?;
    assert_eq!(report.status, JobStatus::Waiting);
    assert_eq!(
        harness.store.record(RecordId(4)).map(|r| r.status),
        Some(RecordStatus::Pending)
    );

    harness.drain().await?;
    let refreshed = harness.store.record(RecordId(4)).ok_or("record missing")?;
    assert_eq!(refreshed.status, RecordStatus::Cached);
    assert!(refreshed.expires_at.is_some_and(|at| at > Utc::now()));
    assert!(refreshed.dependent_jobs.is_empty());
    assert_eq!(harness.records.fetch_count(RecordId(4)), 1);
    Ok(())
}

#[tokio::test]
async fn test_upstream_failure_resolves_record_as_failed_and_job_still_completes() -> TestResult {
    // Record 9 has no scripted response, so every attempt is NotFound
    let harness = TestHarness::new(ScriptedRecordSource::with_records([8])).await?;
    harness.listing.set_list("frank", completed_entries([8, 9]));

    harness.components.status.initiate("frank").await?;
    harness.drain().await?;

    let failed = harness.store.record(RecordId(9)).ok_or("record missing")?;
    assert_eq!(failed.status, RecordStatus::Failed);
    assert!(failed.last_failed_fetch.is_some());
    assert_eq!(
        harness.records.fetch_count(RecordId(9)),
        harness.config.fetch.max_attempts
    );

    let result = harness
        .artifacts
        .get_completed(&Username::new("frank"))
        .await?
        .ok_or("result missing")?;
    assert_eq!(result["missing"], json!([9]));
    assert_eq!(result["resolved"], json!(1));
    Ok(())
}

#[tokio::test]
async fn test_transient_upstream_failures_are_retried_within_one_delivery() -> TestResult {
    let harness = TestHarness::new(ScriptedRecordSource::with_records([12])).await?;
    harness.records.fail_next(RecordId(12), 2);
    harness.listing.set_list("gina", completed_entries([12]));

    harness.components.status.initiate("gina").await?;
    let outcome = harness.drain().await?;

    assert_eq!(outcome.requeued, 0);
    assert_eq!(harness.records.fetch_count(RecordId(12)), 3);
    assert_eq!(
        harness.store.record(RecordId(12)).map(|r| r.status),
        Some(RecordStatus::Cached)
    );
    assert_eq!(harness.artifacts.completed_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_redelivered_fetch_is_superseded_and_not_double_counted() -> TestResult {
    let harness = TestHarness::new(ScriptedRecordSource::with_records([20])).await?;
    harness.listing.set_list("hana", completed_entries([20]));
    harness.components.status.initiate("hana").await?;

    harness.drain().await?;
    let after_first = harness.store.counter(QueueName::Fetch);

    // A duplicate delivery of the same work item arrives late
    harness.components.dispatcher.dispatch_fetch(RecordId(20)).await?;
    harness.drain().await?;

    let outcome = harness.components.fetch_worker.handle(RecordId(20)).await?;
    assert!(outcome.superseded);
    assert_eq!(harness.store.counter(QueueName::Fetch), after_first);
    assert_eq!(harness.artifacts.completed_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_dependency_removal_is_idempotent() -> TestResult {
    let harness = TestHarness::new(ScriptedRecordSource::with_records([30, 31])).await?;
    harness.listing.set_list("ivan", completed_entries([30, 31]));
    harness.components.status.initiate("ivan").await?;

    let username = Username::new("ivan");
    let jobs = &harness.components.stores.jobs;
    let once = jobs.remove_dependency(&username, RecordId(30)).await?;
    let twice = jobs.remove_dependency(&username, RecordId(30)).await?;

    assert_eq!(once.depends_on, twice.depends_on);
    assert_eq!(twice.remaining(), 1);
    assert_eq!(twice.dependency_count, 2);
    assert_eq!(twice.status, JobStatus::Waiting);

    let stored = jobs
        .get(&username, ReadConsistency::Strong)
        .await?
        .ok_or("job missing")?;
    assert_eq!(stored.depends_on, twice.depends_on);
    Ok(())
}

#[tokio::test]
async fn test_repeated_fan_in_enqueues_processing_once() -> TestResult {
    let harness = TestHarness::new(ScriptedRecordSource::with_records([40])).await?;
    harness.listing.set_list("jade", completed_entries([40]));
    harness.components.status.initiate("jade").await?;

    // Resolve the record twice, as two overlapping deliveries would
    let first = harness.components.fetch_worker.handle(RecordId(40)).await?;
    let second = harness.components.fetch_worker.handle(RecordId(40)).await?;

    assert_eq!(first.fan_in.queued, vec![Username::new("jade")]);
    assert!(second.superseded);
    assert_eq!(harness.pending_processing().await?.len(), 1);
    assert_eq!(harness.store.counter(QueueName::Processing).queue_length, 1);
    Ok(())
}
