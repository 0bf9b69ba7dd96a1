//! Queue message payload, produced by the intake collaborator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use relay_models::{JobId, MediaKind};

/// Payload enqueued by intake once the raw upload is staged and the
/// job record is created. Mime/size validation happens upstream; the
/// pipeline trusts this payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueJob {
    /// Pre-assigned job ID, matching the job record
    pub job_id: JobId,
    /// Owning user
    pub owner_id: String,
    /// Conversation context, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// Message the upload is attached to, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Path to the staged raw upload
    pub source_path: String,
    /// Image or video
    pub source_kind: MediaKind,
    /// Declared MIME type
    pub source_mime_type: String,
    /// Upload size in bytes
    pub source_size_bytes: u64,
    /// When the job was enqueued
    pub created_at: DateTime<Utc>,
}

impl EnqueueJob {
    pub fn new(
        job_id: JobId,
        owner_id: impl Into<String>,
        source_path: impl Into<String>,
        source_kind: MediaKind,
        source_mime_type: impl Into<String>,
        source_size_bytes: u64,
    ) -> Self {
        Self {
            job_id,
            owner_id: owner_id.into(),
            conversation_id: None,
            message_id: None,
            source_path: source_path.into(),
            source_kind,
            source_mime_type: source_mime_type.into(),
            source_size_bytes,
            created_at: Utc::now(),
        }
    }

    /// Set conversation context.
    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    /// Set message reference.
    pub fn with_message(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    /// Idempotency key for deduplication. Job ids are assigned per
    /// asset at intake, so the id alone identifies the work.
    pub fn idempotency_key(&self) -> String {
        format!("media:{}", self.job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_job_serde_roundtrip() {
        let job = EnqueueJob::new(
            JobId::new(),
            "user-1",
            "/tmp/relay/staged/abc.mp4",
            MediaKind::Video,
            "video/mp4",
            8_200_000,
        )
        .with_conversation("conv-1")
        .with_message("msg-7");

        let json = serde_json::to_string(&job).expect("serialize EnqueueJob");
        let decoded: EnqueueJob = serde_json::from_str(&json).expect("deserialize EnqueueJob");

        assert_eq!(decoded.job_id, job.job_id);
        assert_eq!(decoded.owner_id, job.owner_id);
        assert_eq!(decoded.source_kind, MediaKind::Video);
        assert_eq!(decoded.conversation_id.as_deref(), Some("conv-1"));
        assert_eq!(decoded.message_id.as_deref(), Some("msg-7"));
        assert_eq!(decoded.source_size_bytes, 8_200_000);
    }

    #[test]
    fn test_idempotency_key_tracks_job_id() {
        let id = JobId::from_string("j-1");
        let a = EnqueueJob::new(
            id.clone(),
            "u",
            "/tmp/a",
            MediaKind::Image,
            "image/jpeg",
            10,
        );
        let b = EnqueueJob::new(id, "u", "/tmp/a", MediaKind::Image, "image/jpeg", 10);
        assert_eq!(a.idempotency_key(), b.idempotency_key());
    }
}
