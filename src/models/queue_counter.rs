use serde::{Deserialize, Serialize};
use std::fmt;

/// The two work queues whose depth is tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    Fetch,
    Processing,
}

impl QueueName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Processing => "processing",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QueueName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fetch" => Ok(Self::Fetch),
            "processing" => Ok(Self::Processing),
            _ => Err(format!("Invalid queue name: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterField {
    /// Items ever enqueued
    QueueLength,
    /// Items ever completed
    ProcessedItems,
}

/// Persisted enqueue/complete totals for one queue. Positions derived from
/// it are estimates: initiation races can leave briefly-consumed positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounter {
    pub queue_name: QueueName,
    pub queue_length: i64,
    pub processed_items: i64,
}

impl QueueCounter {
    pub fn empty(queue_name: QueueName) -> Self {
        Self {
            queue_name,
            queue_length: 0,
            processed_items: 0,
        }
    }

    /// Current queue depth
    pub fn position(&self) -> i64 {
        self.queue_length - self.processed_items
    }

    /// Items still ahead of (and including) a job's recorded position
    pub fn outstanding_until(&self, position: i64) -> i64 {
        (position - self.processed_items).max(0)
    }

    pub(crate) fn apply(&mut self, field: CounterField, delta: i64) {
        match field {
            CounterField::QueueLength => self.queue_length += delta,
            CounterField::ProcessedItems => self.processed_items += delta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outstanding_never_negative() {
        let counter = QueueCounter {
            queue_name: QueueName::Fetch,
            queue_length: 20,
            processed_items: 15,
        };
        assert_eq!(counter.position(), 5);
        assert_eq!(counter.outstanding_until(18), 3);
        assert_eq!(counter.outstanding_until(10), 0);
    }
}
