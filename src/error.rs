//! Error types for Repowatch
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur in Repowatch
#[derive(Debug, Error)]
pub enum RepowatchError {
    /// Provider call failed with a retryable condition (429, 5xx, network) and retries ran out
    #[error("Transient provider error: {0}")]
    TransientProvider(String),

    /// Provider rejected the call (non-429 4xx); never retried
    #[error("Fatal provider error: {0}")]
    FatalProvider(String),

    /// Persistence layer failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A start request arrived while a non-terminal batch exists
    #[error("Batch already active: {0}")]
    BatchAlreadyActive(String),

    /// Batch id is unknown or no longer tracked
    #[error("Batch not found: {0}")]
    BatchNotFound(String),

    /// Batch target could not be resolved
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// Invalid state transition or operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The scheduler actor stopped accepting commands
    #[error("Scheduler actor closed: {0}")]
    ActorClosed(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for RepowatchError {
    fn from(err: rusqlite::Error) -> Self {
        RepowatchError::Persistence(err.to_string())
    }
}

impl RepowatchError {
    /// Item-level provider failures are counted against a batch instead of aborting it
    pub fn is_provider_failure(&self) -> bool {
        matches!(
            self,
            RepowatchError::TransientProvider(_) | RepowatchError::FatalProvider(_)
        )
    }
}

/// Result type alias for Repowatch operations
pub type Result<T> = std::result::Result<T, RepowatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_already_active_error() {
        let err = RepowatchError::BatchAlreadyActive("batch-1".to_string());
        assert_eq!(err.to_string(), "Batch already active: batch-1");
    }

    #[test]
    fn test_batch_not_found_error() {
        let err = RepowatchError::BatchNotFound("batch-9".to_string());
        assert_eq!(err.to_string(), "Batch not found: batch-9");
    }

    #[test]
    fn test_provider_errors_are_item_failures() {
        assert!(RepowatchError::TransientProvider("503".to_string()).is_provider_failure());
        assert!(RepowatchError::FatalProvider("404".to_string()).is_provider_failure());
        assert!(!RepowatchError::Persistence("locked".to_string()).is_provider_failure());
    }

    #[test]
    fn test_sqlite_error_maps_to_persistence() {
        let err: RepowatchError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, RepowatchError::Persistence(_)));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: RepowatchError = io_err.into();
        assert!(matches!(err, RepowatchError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: RepowatchError = json_err.into();
        assert!(matches!(err, RepowatchError::Json(_)));
    }
}
