//! # Stores
//!
//! Record cache, job store and queue counters. Two adapters implement all
//! three traits: [`InMemoryStore`] for tests and single-process runs, and
//! [`PostgresStore`] for shared deployments.

use std::sync::Arc;

pub mod errors;
pub mod in_memory;
pub mod postgres;
pub mod sentinel;
pub mod traits;

pub use errors::{StoreError, StoreResult};
pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use traits::{JobStore, QueueCounterStore, ReadConsistency, RecordStore, Resolution};

/// The three stores as trait objects, as handed to orchestration components
#[derive(Clone)]
pub struct StoreHandles {
    pub records: Arc<dyn RecordStore>,
    pub jobs: Arc<dyn JobStore>,
    pub counters: Arc<dyn QueueCounterStore>,
}

impl StoreHandles {
    /// Use one backend for all three stores
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: RecordStore + JobStore + QueueCounterStore + 'static,
    {
        Self {
            records: store.clone(),
            jobs: store.clone(),
            counters: store,
        }
    }
}

impl std::fmt::Debug for StoreHandles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandles").finish_non_exhaustive()
    }
}
