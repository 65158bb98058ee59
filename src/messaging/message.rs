use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{RecordId, Username};

/// The two work items the scheduler dispatches.
///
/// Wire shape is `{"kind":"fetch","id":N}` or
/// `{"kind":"process","username":"..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkMessage {
    Fetch { id: RecordId },
    Process { username: Username },
}

impl WorkMessage {
    pub fn kind(&self) -> WorkKind {
        match self {
            Self::Fetch { .. } => WorkKind::Fetch,
            Self::Process { .. } => WorkKind::Process,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkKind {
    Fetch,
    Process,
}

impl fmt::Display for WorkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch => write!(f, "fetch"),
            Self::Process => write!(f, "process"),
        }
    }
}
