use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::keys::RecordId;

/// Status of an entry on a user's upstream list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListStatus {
    Watching,
    Completed,
    OnHold,
    Dropped,
    PlanToWatch,
}

/// One row of a user's dependency list, as returned by the listing source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListEntry {
    pub record_id: RecordId,
    pub status: ListStatus,
    /// 0 or absent means unscored
    pub score: Option<u8>,
}

impl ListEntry {
    pub fn new(record_id: impl Into<RecordId>, status: ListStatus, score: Option<u8>) -> Self {
        Self {
            record_id: record_id.into(),
            status,
            score,
        }
    }

    /// Only completed, scored entries feed the analysis
    pub fn is_required(&self) -> bool {
        self.status == ListStatus::Completed && self.score.is_some_and(|score| score > 0)
    }
}

/// Required record ids, deduplicated, in list order
pub fn required_record_ids(entries: &[ListEntry]) -> Vec<RecordId> {
    let mut seen = HashSet::new();
    entries
        .iter()
        .filter(|entry| entry.is_required())
        .map(|entry| entry.record_id)
        .filter(|id| seen.insert(*id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_ids_are_completed_and_scored() {
        let entries = vec![
            ListEntry::new(5, ListStatus::Completed, Some(8)),
            ListEntry::new(6, ListStatus::Completed, None),
            ListEntry::new(7, ListStatus::Completed, Some(0)),
            ListEntry::new(8, ListStatus::Watching, Some(9)),
            ListEntry::new(1, ListStatus::Completed, Some(6)),
            ListEntry::new(5, ListStatus::Completed, Some(7)),
        ];

        assert_eq!(required_record_ids(&entries), vec![RecordId(5), RecordId(1)]);
    }
}
