//! # PostgreSQL Store
//!
//! Implements the store traits over `sqlx::PgPool`. Each conditional
//! operation is one statement whose `WHERE` clause carries the condition; a
//! zero-row result is the lost-race branch. Resolving a record is a
//! conditional update of the pending row followed, only when no row exists,
//! by an `INSERT ... ON CONFLICT DO NOTHING`. Counters use
//! `INSERT ... ON CONFLICT DO UPDATE SET x = x + delta`, the database's
//! native atomic add.
//!
//! PostgreSQL reads are always strongly consistent, so [`ReadConsistency`]
//! is accepted and ignored.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::errors::{StoreError, StoreResult};
use super::sentinel;
use super::traits::{JobStore, QueueCounterStore, ReadConsistency, RecordStore, Resolution};
use crate::constants::storage::BULK_READ_BATCH_SIZE;
use crate::models::{
    CounterField, Job, QueueCounter, QueueName, Record, RecordId, RecordStatus, Username,
};

const SCHEMA: &str = include_str!("../../migrations/20260101000000_create_opinion_tables.sql");

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        info!(max_connections, "Connected record store to PostgreSQL");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indexes if missing
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        debug!("Store schema ensured");
        Ok(())
    }

    /// Turn a conditional update's row into the lost-race branch, or
    /// `NotFound` when the job is gone entirely.
    async fn conditional_job(&self, username: &Username, row: Option<JobRow>) -> StoreResult<Option<Job>> {
        if let Some(row) = row {
            return Job::try_from(row).map(Some);
        }
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM opinion_jobs WHERE username = $1)")
            .bind(username.as_str())
            .fetch_one(&self.pool)
            .await?;
        if exists {
            Ok(None)
        } else {
            Err(StoreError::not_found("job", username))
        }
    }

    fn required_job(username: &Username, row: Option<JobRow>) -> StoreResult<Job> {
        row.map(Job::try_from)
            .transpose()?
            .ok_or_else(|| StoreError::not_found("job", username))
    }

    async fn resolve(
        &self,
        id: RecordId,
        status: RecordStatus,
        payload: Option<serde_json::Value>,
        at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<Resolution> {
        let key = record_key(id)?;
        let (last_successful, last_failed) = match status {
            RecordStatus::Cached => (Some(at), None),
            _ => (None, Some(at)),
        };

        // The locked subquery yields the row as it was before this update
        let previous = sqlx::query_as::<_, RecordRow>(
            "UPDATE opinion_records AS r \
             SET status = $2, expires_at = $3, dependent_jobs = ARRAY['']::TEXT[], \
                 payload = COALESCE($4, r.payload), \
                 last_successful_fetch = COALESCE($5, r.last_successful_fetch), \
                 last_failed_fetch = COALESCE($6, r.last_failed_fetch) \
             FROM (SELECT * FROM opinion_records WHERE record_id = $1 FOR UPDATE) AS old \
             WHERE r.record_id = old.record_id AND r.status = 'pending' \
             RETURNING old.*",
        )
        .bind(key)
        .bind(status.to_string())
        .bind(expires_at)
        .bind(payload.clone())
        .bind(last_successful)
        .bind(last_failed)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(row) = previous {
            return Ok(Resolution::Resolved {
                previous: Some(Record::try_from(row)?),
            });
        }

        let inserted = sqlx::query(
            "INSERT INTO opinion_records \
             (record_id, status, expires_at, dependent_jobs, payload, last_successful_fetch, last_failed_fetch) \
             VALUES ($1, $2, $3, ARRAY['']::TEXT[], $4, $5, $6) \
             ON CONFLICT (record_id) DO NOTHING",
        )
        .bind(key)
        .bind(status.to_string())
        .bind(expires_at)
        .bind(payload)
        .bind(last_successful)
        .bind(last_failed)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 1 {
            Ok(Resolution::Resolved { previous: None })
        } else {
            // Present but not pending, or re-queued since the update missed it
            debug!(record_id = %id, "Record resolution superseded");
            Ok(Resolution::Superseded)
        }
    }
}

fn record_key(id: RecordId) -> StoreResult<i64> {
    i64::try_from(id.value()).map_err(|_| StoreError::invalid_state(id, "record id exceeds BIGINT"))
}

#[derive(Debug, FromRow)]
struct RecordRow {
    record_id: i64,
    status: String,
    expires_at: Option<DateTime<Utc>>,
    queue_position: Option<i64>,
    dependent_jobs: Vec<String>,
    payload: Option<serde_json::Value>,
    last_successful_fetch: Option<DateTime<Utc>>,
    last_failed_fetch: Option<DateTime<Utc>>,
}

impl TryFrom<RecordRow> for Record {
    type Error = StoreError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        let key = format!("record-{}", row.record_id);
        let id = u64::try_from(row.record_id)
            .map(RecordId)
            .map_err(|_| StoreError::invalid_state(&key, "negative record id"))?;
        Ok(Self {
            id,
            status: row
                .status
                .parse()
                .map_err(|e: String| StoreError::invalid_state(&key, e))?,
            expires_at: row.expires_at,
            queue_position: row.queue_position,
            dependent_jobs: sentinel::decode(&key, &row.dependent_jobs)?,
            payload: row.payload,
            last_successful_fetch: row.last_successful_fetch,
            last_failed_fetch: row.last_failed_fetch,
        })
    }
}

#[derive(Debug, FromRow)]
struct JobRow {
    username: String,
    correlation_id: Uuid,
    dependency_count: i64,
    depends_on: Vec<String>,
    status: String,
    created: DateTime<Utc>,
    initialised: Option<DateTime<Utc>>,
    queued: Option<DateTime<Utc>>,
    processing_started: Option<DateTime<Utc>>,
    failed: Option<DateTime<Utc>>,
    last_dependency_queue_position: Option<i64>,
    processing_queue_position: Option<i64>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let key = format!("job-{}", row.username);
        Ok(Self {
            username: Username::new(&row.username),
            correlation_id: row.correlation_id,
            dependency_count: u32::try_from(row.dependency_count)
                .map_err(|_| StoreError::invalid_state(&key, "dependency count out of range"))?,
            depends_on: sentinel::decode(&key, &row.depends_on)?,
            status: row
                .status
                .parse()
                .map_err(|e: String| StoreError::invalid_state(&key, e))?,
            created: row.created,
            initialised: row.initialised,
            queued: row.queued,
            processing_started: row.processing_started,
            failed: row.failed,
            last_dependency_queue_position: row.last_dependency_queue_position,
            processing_queue_position: row.processing_queue_position,
        })
    }
}

#[async_trait]
impl RecordStore for PostgresStore {
    async fn get(&self, id: RecordId, _consistency: ReadConsistency) -> StoreResult<Option<Record>> {
        sqlx::query_as::<_, RecordRow>("SELECT * FROM opinion_records WHERE record_id = $1")
            .bind(record_key(id)?)
            .fetch_optional(&self.pool)
            .await?
            .map(Record::try_from)
            .transpose()
    }

    async fn bulk_get(
        &self,
        ids: &[RecordId],
        _consistency: ReadConsistency,
    ) -> StoreResult<HashMap<RecordId, Record>> {
        let mut found = HashMap::with_capacity(ids.len());
        for chunk in ids.chunks(BULK_READ_BATCH_SIZE) {
            let keys = chunk
                .iter()
                .map(|id| record_key(*id))
                .collect::<StoreResult<Vec<i64>>>()?;
            let rows = sqlx::query_as::<_, RecordRow>(
                "SELECT * FROM opinion_records WHERE record_id = ANY($1)",
            )
            .bind(keys)
            .fetch_all(&self.pool)
            .await;
            match rows {
                Ok(rows) => {
                    for row in rows {
                        let record = Record::try_from(row)?;
                        found.insert(record.id, record);
                    }
                }
                Err(err) => warn!(chunk = chunk.len(), error = %err, "Bulk record read failed for chunk"),
            }
        }
        Ok(found)
    }

    async fn create(&self, id: RecordId, owner: &Username, queue_position: i64) -> StoreResult<bool> {
        let inserted = sqlx::query(
            "INSERT INTO opinion_records (record_id, status, queue_position, dependent_jobs) \
             VALUES ($1, 'pending', $2, $3) \
             ON CONFLICT (record_id) DO NOTHING",
        )
        .bind(record_key(id)?)
        .bind(queue_position)
        .bind(sentinel::encode(&BTreeSet::from([owner.clone()])))
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(inserted == 1)
    }

    async fn mark_pending(
        &self,
        id: RecordId,
        owner: &Username,
        queue_position: i64,
    ) -> StoreResult<bool> {
        let written = sqlx::query(
            "INSERT INTO opinion_records (record_id, status, queue_position, dependent_jobs) \
             VALUES ($1, 'pending', $2, $3) \
             ON CONFLICT (record_id) DO UPDATE \
             SET status = 'pending', queue_position = EXCLUDED.queue_position, \
                 dependent_jobs = EXCLUDED.dependent_jobs \
             WHERE opinion_records.status <> 'pending'",
        )
        .bind(record_key(id)?)
        .bind(queue_position)
        .bind(sentinel::encode(&BTreeSet::from([owner.clone()])))
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(written == 1)
    }

    async fn add_dependent(&self, id: RecordId, owner: &Username) -> StoreResult<Option<i64>> {
        let position: Option<Option<i64>> = sqlx::query_scalar(
            "UPDATE opinion_records \
             SET dependent_jobs = CASE WHEN $2 = ANY(dependent_jobs) THEN dependent_jobs \
                                       ELSE array_append(dependent_jobs, $2) END \
             WHERE record_id = $1 AND status = 'pending' \
             RETURNING queue_position",
        )
        .bind(record_key(id)?)
        .bind(owner.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(position.map(Option::unwrap_or_default))
    }

    async fn mark_successful(
        &self,
        id: RecordId,
        payload: serde_json::Value,
        fetched_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<Resolution> {
        self.resolve(id, RecordStatus::Cached, Some(payload), fetched_at, expires_at)
            .await
    }

    async fn mark_failed(
        &self,
        id: RecordId,
        attempted_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<Resolution> {
        self.resolve(id, RecordStatus::Failed, None, attempted_at, expires_at)
            .await
    }
}

#[async_trait]
impl JobStore for PostgresStore {
    async fn get(&self, username: &Username, _consistency: ReadConsistency) -> StoreResult<Option<Job>> {
        sqlx::query_as::<_, JobRow>("SELECT * FROM opinion_jobs WHERE username = $1")
            .bind(username.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(Job::try_from)
            .transpose()
    }

    async fn create(&self, job: &Job) -> StoreResult<bool> {
        let written = sqlx::query(
            "INSERT INTO opinion_jobs \
             (username, correlation_id, dependency_count, depends_on, status, created, initialised, \
              queued, processing_started, failed, last_dependency_queue_position, processing_queue_position) \
             VALUES ($1, $2, $3, $4, $5, $6, NULL, NULL, NULL, NULL, NULL, NULL) \
             ON CONFLICT (username) DO UPDATE \
             SET correlation_id = EXCLUDED.correlation_id, dependency_count = EXCLUDED.dependency_count, \
                 depends_on = EXCLUDED.depends_on, status = EXCLUDED.status, created = EXCLUDED.created, \
                 initialised = NULL, queued = NULL, processing_started = NULL, failed = NULL, \
                 last_dependency_queue_position = NULL, processing_queue_position = NULL \
             WHERE opinion_jobs.status = 'failed'",
        )
        .bind(job.username.as_str())
        .bind(job.correlation_id)
        .bind(i64::from(job.dependency_count))
        .bind(sentinel::encode(&job.depends_on))
        .bind(job.status.to_string())
        .bind(job.created)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(written == 1)
    }

    async fn mark_waiting(
        &self,
        username: &Username,
        resolved: &BTreeSet<RecordId>,
        last_dependency_queue_position: i64,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Job>> {
        let resolved: Vec<String> = resolved.iter().map(ToString::to_string).collect();
        let row = sqlx::query_as::<_, JobRow>(
            "UPDATE opinion_jobs \
             SET status = 'waiting', initialised = $2, last_dependency_queue_position = $3, \
                 depends_on = ARRAY(SELECT member FROM unnest(depends_on) AS member \
                                    WHERE NOT (member = ANY($4::TEXT[]))) \
             WHERE username = $1 AND status = 'creating' \
             RETURNING *",
        )
        .bind(username.as_str())
        .bind(at)
        .bind(last_dependency_queue_position)
        .bind(resolved)
        .fetch_optional(&self.pool)
        .await?;
        self.conditional_job(username, row).await
    }

    async fn mark_queued(
        &self,
        username: &Username,
        queue_position: i64,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(
            "UPDATE opinion_jobs \
             SET status = 'queued', queued = $2, processing_queue_position = $3 \
             WHERE username = $1 AND status = 'waiting' \
             RETURNING *",
        )
        .bind(username.as_str())
        .bind(at)
        .bind(queue_position)
        .fetch_optional(&self.pool)
        .await?;
        self.conditional_job(username, row).await
    }

    async fn mark_processing(&self, username: &Username, at: DateTime<Utc>) -> StoreResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(
            "UPDATE opinion_jobs SET status = 'processing', processing_started = $2 \
             WHERE username = $1 AND status = 'queued' RETURNING *",
        )
        .bind(username.as_str())
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;
        self.conditional_job(username, row).await
    }

    async fn mark_processing_retry(&self, username: &Username) -> StoreResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(
            "UPDATE opinion_jobs SET status = 'queued', processing_started = NULL \
             WHERE username = $1 AND status = 'processing' RETURNING *",
        )
        .bind(username.as_str())
        .fetch_optional(&self.pool)
        .await?;
        self.conditional_job(username, row).await
    }

    async fn mark_processing_failed(&self, username: &Username, at: DateTime<Utc>) -> StoreResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(
            "UPDATE opinion_jobs SET status = 'failed', failed = $2 \
             WHERE username = $1 AND status IN ('queued', 'processing') RETURNING *",
        )
        .bind(username.as_str())
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;
        self.conditional_job(username, row).await
    }

    async fn remove_dependency(&self, username: &Username, id: RecordId) -> StoreResult<Job> {
        let row = sqlx::query_as::<_, JobRow>(
            "UPDATE opinion_jobs SET depends_on = array_remove(depends_on, $2) \
             WHERE username = $1 RETURNING *",
        )
        .bind(username.as_str())
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Self::required_job(username, row)
    }

    async fn delete(&self, username: &Username) -> StoreResult<()> {
        sqlx::query("DELETE FROM opinion_jobs WHERE username = $1")
            .bind(username.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl QueueCounterStore for PostgresStore {
    async fn add(&self, queue: QueueName, field: CounterField, delta: i64) -> StoreResult<QueueCounter> {
        let (length_delta, processed_delta) = match field {
            CounterField::QueueLength => (delta, 0),
            CounterField::ProcessedItems => (0, delta),
        };
        let (queue_length, processed_items): (i64, i64) = sqlx::query_as(
            "INSERT INTO opinion_queue_counters (queue_name, queue_length, processed_items) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (queue_name) DO UPDATE \
             SET queue_length = opinion_queue_counters.queue_length + EXCLUDED.queue_length, \
                 processed_items = opinion_queue_counters.processed_items + EXCLUDED.processed_items \
             RETURNING queue_length, processed_items",
        )
        .bind(queue.as_str())
        .bind(length_delta)
        .bind(processed_delta)
        .fetch_one(&self.pool)
        .await?;
        Ok(QueueCounter {
            queue_name: queue,
            queue_length,
            processed_items,
        })
    }

    async fn read(&self, queue: QueueName) -> StoreResult<QueueCounter> {
        let row: Option<(i64, i64)> = sqlx::query_as(
            "SELECT queue_length, processed_items FROM opinion_queue_counters WHERE queue_name = $1",
        )
        .bind(queue.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map_or_else(
            || QueueCounter::empty(queue),
            |(queue_length, processed_items)| QueueCounter {
                queue_name: queue,
                queue_length,
                processed_items,
            },
        ))
    }
}
