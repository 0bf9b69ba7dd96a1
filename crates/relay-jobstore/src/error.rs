//! Job store error types.

use thiserror::Error;

use relay_models::job::StateError;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job already exists: {0}")]
    AlreadyExists(String),

    #[error("Rejected transition: {0}")]
    Transition(#[from] StateError),

    #[error("Concurrent update conflict on job {0}")]
    Conflict(String),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl StoreError {
    /// True when the write was rejected because the record is already
    /// terminal. Duplicate queue deliveries hit this path and must be
    /// treated as a no-op, not a failure.
    pub fn is_terminal_rejection(&self) -> bool {
        matches!(self, StoreError::Transition(StateError::Terminal(_)))
    }

    /// Transient errors worth an immediate bounded retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Redis(e) => e.is_timeout() || e.is_connection_dropped() || e.is_io_error(),
            StoreError::Conflict(_) => true,
            _ => false,
        }
    }
}
