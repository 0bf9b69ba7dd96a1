//! Worker error types.

use thiserror::Error;

use relay_models::FailureKind;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Staged source missing: {0}")]
    SourceMissing(String),

    #[error("Job was cancelled")]
    Cancelled,

    #[error("Media error: {0}")]
    Media(#[from] relay_media::MediaError),

    #[error("Storage error: {0}")]
    Storage(#[from] relay_storage::StorageError),

    #[error("Store error: {0}")]
    Store(#[from] relay_jobstore::StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] relay_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    /// Map to the failure taxonomy recorded on the job. Store, queue
    /// and IO errors stay unclassified, which keeps them retryable.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            WorkerError::SourceMissing(_) => FailureKind::CorruptSource,
            WorkerError::Cancelled => FailureKind::Cancelled,
            WorkerError::Media(e) => e.failure_kind(),
            WorkerError::Storage(e) => e.failure_kind(),
            WorkerError::Store(_) | WorkerError::Queue(_) | WorkerError::Io(_) => {
                FailureKind::Unknown
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_source_is_not_retryable() {
        let err = WorkerError::SourceMissing("/tmp/relay/staged/x".into());
        assert_eq!(err.failure_kind(), FailureKind::CorruptSource);
        assert!(!err.failure_kind().is_retryable());
    }

    #[test]
    fn test_io_defaults_to_retryable_unknown() {
        let err = WorkerError::Io(std::io::Error::other("disk hiccup"));
        assert_eq!(err.failure_kind(), FailureKind::Unknown);
        assert!(err.failure_kind().is_retryable());
    }
}
