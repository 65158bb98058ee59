//! # Domain Models
//!
//! Records, jobs, queue counters and list entries as the scheduler sees
//! them. Sets here are genuine sets; storage adapters handle any
//! backend-specific encoding.

pub mod job;
pub mod keys;
pub mod list_entry;
pub mod queue_counter;
pub mod record;

pub use job::{Job, JobStatus};
pub use keys::{RecordId, Username};
pub use list_entry::{required_record_ids, ListEntry, ListStatus};
pub use queue_counter::{CounterField, QueueCounter, QueueName};
pub use record::{Record, RecordClass, RecordPartition, RecordStatus};
