//! Store error types

use thiserror::Error;

/// Errors from the record, job and counter stores.
///
/// A conditional write that loses its race is not an error; those surface as
/// `false`, `None` or [`Resolution::Superseded`](super::Resolution).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store backend error during {operation}: {message}")]
    Backend { operation: String, message: String },

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("Store serialization error: {0}")]
    Serialization(String),

    #[error("Invalid stored state for {key}: {message}")]
    InvalidState { key: String, message: String },
}

impl StoreError {
    pub fn backend(operation: impl Into<String>, message: impl ToString) -> Self {
        Self::Backend {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn invalid_state(key: impl ToString, message: impl Into<String>) -> Self {
        Self::InvalidState {
            key: key.to_string(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::backend("sqlx", err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = StoreError::not_found("job", "alice");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "job not found: alice");
    }
}
