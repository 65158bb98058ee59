//! # Record
//!
//! A cached unit of upstream data, shared by every job that needs it.
//!
//! While a record is `Pending` it carries the set of jobs waiting on it; the
//! fetch that resolves it to `Cached` or `Failed` clears that set and hands
//! the previous members to fan-in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use super::keys::{RecordId, Username};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// A fetch is queued or in flight
    Pending,
    /// Payload present and valid until `expires_at`
    Cached,
    /// Last fetch failed; retried on the next demand
    Failed,
}

impl RecordStatus {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Cached => write!(f, "cached"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "cached" => Ok(Self::Cached),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid record status: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub status: RecordStatus,
    pub expires_at: Option<DateTime<Utc>>,
    /// Fetch-queue position assigned when the record last went `Pending`
    pub queue_position: Option<i64>,
    pub dependent_jobs: BTreeSet<Username>,
    pub payload: Option<serde_json::Value>,
    pub last_successful_fetch: Option<DateTime<Utc>>,
    pub last_failed_fetch: Option<DateTime<Utc>>,
}

impl Record {
    pub fn new_pending(id: RecordId, owner: &Username, queue_position: i64) -> Self {
        Self {
            id,
            status: RecordStatus::Pending,
            expires_at: None,
            queue_position: Some(queue_position),
            dependent_jobs: BTreeSet::from([owner.clone()]),
            payload: None,
            last_successful_fetch: None,
            last_failed_fetch: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.status.is_resolved()
    }

    /// Cached and not yet expired
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.status == RecordStatus::Cached && self.expires_at.is_some_and(|expiry| expiry > now)
    }

    pub fn classify(&self, now: DateTime<Utc>) -> RecordClass {
        if self.status == RecordStatus::Pending {
            RecordClass::AlreadyQueued
        } else if self.is_fresh(now) {
            RecordClass::Cached
        } else {
            RecordClass::NotQueued
        }
    }

    /// Apply a terminal fetch result, returning the dependents that were waiting
    pub(crate) fn resolve(
        &mut self,
        status: RecordStatus,
        payload: Option<serde_json::Value>,
        at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> BTreeSet<Username> {
        self.status = status;
        self.expires_at = Some(expires_at);
        match status {
            RecordStatus::Cached => {
                self.payload = payload;
                self.last_successful_fetch = Some(at);
            }
            _ => self.last_failed_fetch = Some(at),
        }
        std::mem::take(&mut self.dependent_jobs)
    }
}

/// How initiation treats one required record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordClass {
    /// No record exists
    NotFound,
    /// Exists but expired or previously failed
    NotQueued,
    /// A fetch is already pending
    AlreadyQueued,
    /// Fresh cached payload
    Cached,
}

/// Required ids split by [`RecordClass`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordPartition {
    pub not_found: Vec<RecordId>,
    pub not_queued: Vec<RecordId>,
    pub already_queued: Vec<RecordId>,
    pub cached: Vec<RecordId>,
}

impl RecordPartition {
    /// Classify every required id against a (possibly stale) bulk read
    pub fn classify(
        required: &[RecordId],
        existing: &HashMap<RecordId, Record>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut partition = Self::default();
        for id in required {
            let class = existing
                .get(id)
                .map_or(RecordClass::NotFound, |record| record.classify(now));
            match class {
                RecordClass::NotFound => partition.not_found.push(*id),
                RecordClass::NotQueued => partition.not_queued.push(*id),
                RecordClass::AlreadyQueued => partition.already_queued.push(*id),
                RecordClass::Cached => partition.cached.push(*id),
            }
        }
        partition
    }

    pub fn total(&self) -> usize {
        self.not_found.len() + self.not_queued.len() + self.already_queued.len() + self.cached.len()
    }
}
