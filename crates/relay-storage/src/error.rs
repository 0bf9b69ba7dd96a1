//! Storage error types.

use thiserror::Error;

use relay_models::FailureKind;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to configure storage client: {0}")]
    ConfigError(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Bucket check failed: {0}")]
    BucketCheckFailed(String),

    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound(key.into())
    }

    pub fn upload_failed(msg: impl Into<String>) -> Self {
        Self::UploadFailed(msg.into())
    }

    pub fn delete_failed(msg: impl Into<String>) -> Self {
        Self::DeleteFailed(msg.into())
    }

    /// Map to the pipeline failure taxonomy. Quota exhaustion is
    /// surfaced distinctly so operators can alert on it; everything
    /// else is treated as a transient outage.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            StorageError::QuotaExceeded(_) => FailureKind::StorageQuotaExceeded,
            _ => FailureKind::StorageUnavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_is_terminal_kind() {
        let err = StorageError::QuotaExceeded("bucket full".into());
        assert_eq!(err.failure_kind(), FailureKind::StorageQuotaExceeded);
        assert!(!err.failure_kind().is_retryable());

        let err = StorageError::upload_failed("connection reset");
        assert_eq!(err.failure_kind(), FailureKind::StorageUnavailable);
        assert!(err.failure_kind().is_retryable());
    }
}
