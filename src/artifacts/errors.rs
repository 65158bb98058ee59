use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Artifact I/O failed during {operation} on {key}: {source}")]
    Io {
        operation: &'static str,
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Artifact not found: {key}")]
    NotFound { key: String },

    #[error("Artifact serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ArtifactError {
    pub fn io(operation: &'static str, key: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            key: key.into(),
            source,
        }
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }
}

pub type ArtifactResult<T> = Result<T, ArtifactError>;
