//! Failure taxonomy shared across queue, store, and worker.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classified failure reason recorded on a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Source file is unreadable or malformed
    CorruptSource,
    /// Source format is not supported by the pipeline
    UnsupportedFormat,
    /// Encoder crashed or ran out of resources (transient)
    TranscodeFailure,
    /// Object storage unreachable (transient)
    StorageUnavailable,
    /// Storage quota exhausted; needs operator action
    StorageQuotaExceeded,
    /// Job was cancelled after lease
    Cancelled,
    /// Unclassified failure; treated as transient
    Unknown,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::CorruptSource => "corrupt_source",
            FailureKind::UnsupportedFormat => "unsupported_format",
            FailureKind::TranscodeFailure => "transcode_failure",
            FailureKind::StorageUnavailable => "storage_unavailable",
            FailureKind::StorageQuotaExceeded => "storage_quota_exceeded",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Unknown => "unknown",
        }
    }

    /// Whether a failure of this kind is eligible for backoff and
    /// redelivery. Unclassified failures default to retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureKind::TranscodeFailure | FailureKind::StorageUnavailable | FailureKind::Unknown
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Structured failure detail stored on a job record and surfaced to
/// polling clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: FailureKind,
    /// Human-readable message shown once retries exhaust
    pub message: String,
}

impl JobError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(FailureKind::Cancelled, "Job was cancelled")
    }
}
