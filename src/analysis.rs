//! # Analysis Boundary
//!
//! The statistical analysis that runs once a job's dependencies are settled
//! lives outside this crate. The scheduler only builds its input, decides
//! whether enough data was resolved, and stores whatever it returns.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::config::AnalysisConfig;
use crate::models::{ListEntry, RecordId, Username};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Analysis failed for {username}: {reason}")]
    Failed { username: String, reason: String },

    #[error("Analysis input invalid: {0}")]
    InvalidInput(String),
}

impl AnalysisError {
    pub fn failed(username: &Username, reason: impl Into<String>) -> Self {
        Self::Failed {
            username: username.to_string(),
            reason: reason.into(),
        }
    }
}

/// Everything the analysis step sees for one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisInput {
    pub username: Username,
    pub entries: Vec<ListEntry>,
    /// Payloads of the required records that resolved successfully
    pub records: HashMap<RecordId, serde_json::Value>,
    /// Required records that are absent, failed, or still pending
    pub missing: Vec<RecordId>,
}

impl AnalysisInput {
    pub fn required_count(&self) -> usize {
        self.records.len() + self.missing.len()
    }

    pub fn missing_fraction(&self) -> f64 {
        match self.required_count() {
            0 => 0.0,
            total => self.missing.len() as f64 / total as f64,
        }
    }
}

/// External analysis collaborator. Pure over its input.
pub trait Analyzer: Send + Sync {
    fn analyze(&self, input: &AnalysisInput) -> Result<serde_json::Value, AnalysisError>;
}

/// How many unresolved records a job may have and still be analyzed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MissingRecordPolicy {
    pub max_missing_fraction: f64,
}

impl Default for MissingRecordPolicy {
    fn default() -> Self {
        Self::from_config(&AnalysisConfig::default())
    }
}

impl MissingRecordPolicy {
    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self {
            max_missing_fraction: config.max_missing_fraction,
        }
    }

    pub fn permits(&self, input: &AnalysisInput) -> bool {
        input.missing_fraction() <= self.max_missing_fraction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(resolved: u64, missing: u64) -> AnalysisInput {
        AnalysisInput {
            username: Username::new("carol"),
            entries: Vec::new(),
            records: (0..resolved).map(|id| (RecordId(id), json!({"id": id}))).collect(),
            missing: (resolved..resolved + missing).map(RecordId).collect(),
        }
    }

    #[test]
    fn test_missing_fraction() {
        assert_eq!(input(3, 1).missing_fraction(), 0.25);
        assert_eq!(input(0, 0).missing_fraction(), 0.0);
        assert_eq!(input(0, 2).missing_fraction(), 1.0);
    }

    #[test]
    fn test_default_policy_tolerates_everything() {
        let policy = MissingRecordPolicy::default();
        assert!(policy.permits(&input(0, 5)));
    }

    #[test]
    fn test_strict_policy() {
        let policy = MissingRecordPolicy {
            max_missing_fraction: 0.2,
        };
        assert!(policy.permits(&input(4, 1)));
        assert!(!policy.permits(&input(3, 1)));
        assert!(policy.permits(&input(0, 0)));
    }
}
