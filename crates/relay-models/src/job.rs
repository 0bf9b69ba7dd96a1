//! Media job records and the processing state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::failure::JobError;
use crate::variant::Variant;

/// Unique identifier for a media job. Assigned at intake, immutable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of source media, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Processing state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting in the work queue
    #[default]
    Queued,
    /// A worker holds the lease and is transcoding
    Processing,
    /// All variants generated and uploaded
    Completed,
    /// Unrecoverable error or retries exhausted
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    /// Terminal states accept no further automatic transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Invalid state-machine transition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("job is terminal ({0}), no further transitions allowed")]
    Terminal(JobState),

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: JobState, to: JobState },
}

/// One media job: a single uploaded asset and its derived variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaJob {
    /// Unique job ID
    pub id: JobId,

    /// Owning user; opaque to this pipeline
    pub owner_id: String,

    /// Conversation the upload belongs to, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    /// Message the upload is attached to, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,

    /// Image or video, fixed at creation
    pub source_kind: MediaKind,

    /// Declared MIME type of the upload
    pub source_mime_type: String,

    /// Size of the raw upload in bytes
    pub source_size_bytes: u64,

    /// Current processing state
    #[serde(default)]
    pub state: JobState,

    /// Lease counter; incremented each time a worker picks the job up
    #[serde(default)]
    pub attempt: u32,

    /// Derived renditions; non-empty iff state == Completed
    #[serde(default)]
    pub variants: Vec<Variant>,

    /// Failure detail; present iff state == Failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,

    /// Set exactly once, on the Completed transition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl MediaJob {
    /// Create a new queued job record at intake time.
    pub fn new(
        id: JobId,
        owner_id: impl Into<String>,
        source_kind: MediaKind,
        source_mime_type: impl Into<String>,
        source_size_bytes: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            owner_id: owner_id.into(),
            conversation_id: None,
            message_id: None,
            source_kind,
            source_mime_type: source_mime_type.into(),
            source_size_bytes,
            state: JobState::Queued,
            attempt: 0,
            variants: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Attach a conversation reference.
    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    /// Attach a message reference.
    pub fn with_message(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Queued/Processing -> Processing, incrementing the attempt
    /// counter. A stale Processing record left by a crashed worker is
    /// reconciled here: the new lease holder takes over and the
    /// counter still advances.
    pub fn start_processing(&mut self) -> Result<(), StateError> {
        if self.is_terminal() {
            return Err(StateError::Terminal(self.state));
        }
        self.state = JobState::Processing;
        self.attempt += 1;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Processing -> Completed. Variants are installed as a single
    /// atomic update so no reader ever observes a partial set.
    pub fn complete(&mut self, variants: Vec<Variant>) -> Result<(), StateError> {
        if self.is_terminal() {
            return Err(StateError::Terminal(self.state));
        }
        if self.state != JobState::Processing {
            return Err(StateError::InvalidTransition {
                from: self.state,
                to: JobState::Completed,
            });
        }
        let now = Utc::now();
        self.state = JobState::Completed;
        self.variants = variants;
        self.error = None;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Processing -> Failed with a classified error.
    pub fn fail(&mut self, error: JobError) -> Result<(), StateError> {
        if self.is_terminal() {
            return Err(StateError::Terminal(self.state));
        }
        self.state = JobState::Failed;
        self.variants.clear();
        self.error = Some(error);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Explicit external re-process request: Failed -> Queued.
    ///
    /// Clears variants and error; the attempt counter is NOT reset.
    pub fn reprocess(&mut self) -> Result<(), StateError> {
        if self.state != JobState::Failed {
            return Err(StateError::InvalidTransition {
                from: self.state,
                to: JobState::Queued,
            });
        }
        self.state = JobState::Queued;
        self.variants.clear();
        self.error = None;
        self.completed_at = None;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Core record invariant: variants non-empty iff Completed,
    /// error present iff Failed.
    pub fn invariants_hold(&self) -> bool {
        let variants_ok = (self.state == JobState::Completed) == !self.variants.is_empty();
        let error_ok = (self.state == JobState::Failed) == self.error.is_some();
        variants_ok && error_ok
    }
}
