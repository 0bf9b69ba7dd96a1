//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

use relay_models::FailureKind;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during variant generation.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("source file is corrupt or unreadable: {0}")]
    CorruptSource(String),

    #[error("unsupported source format: {0}")]
    UnsupportedFormat(String),

    #[error("transcode failed: {message}")]
    TranscodeFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("cancelled between variant steps")]
    Cancelled,

    #[error("operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl MediaError {
    pub fn corrupt_source(message: impl Into<String>) -> Self {
        Self::CorruptSource(message.into())
    }

    pub fn unsupported_format(message: impl Into<String>) -> Self {
        Self::UnsupportedFormat(message.into())
    }

    pub fn transcode_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::TranscodeFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Map to the pipeline failure taxonomy.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            MediaError::CorruptSource(_) | MediaError::FileNotFound(_) => {
                FailureKind::CorruptSource
            }
            MediaError::UnsupportedFormat(_) => FailureKind::UnsupportedFormat,
            MediaError::TranscodeFailed { .. }
            | MediaError::Timeout(_)
            | MediaError::FfmpegNotFound
            | MediaError::FfprobeNotFound => FailureKind::TranscodeFailure,
            MediaError::Cancelled => FailureKind::Cancelled,
            MediaError::Io(_) | MediaError::JsonParse(_) => FailureKind::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_mapping() {
        assert_eq!(
            MediaError::corrupt_source("zero bytes").failure_kind(),
            FailureKind::CorruptSource
        );
        assert_eq!(
            MediaError::unsupported_format("tiff").failure_kind(),
            FailureKind::UnsupportedFormat
        );
        assert_eq!(
            MediaError::transcode_failed("encoder crash", None, Some(1)).failure_kind(),
            FailureKind::TranscodeFailure
        );
        assert_eq!(
            MediaError::Cancelled.failure_kind(),
            FailureKind::Cancelled
        );
    }
}
