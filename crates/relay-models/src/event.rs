//! Completion/failure events published to the notification transport.

use serde::{Deserialize, Serialize};

use crate::failure::JobError;
use crate::job::{JobId, JobState, MediaJob};
use crate::variant::Variant;

/// Terminal outcome carried by a job event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Completed,
    Failed,
}

/// The single event published per job once it reaches a terminal
/// state. Routed to connected clients by an external fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: JobId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub status: EventStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variants: Vec<Variant>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

impl JobEvent {
    /// Build the event for a terminal job record.
    ///
    /// Returns `None` for non-terminal records; callers only publish
    /// after the Completed/Failed transition has been persisted.
    pub fn from_job(job: &MediaJob) -> Option<Self> {
        let status = match job.state {
            JobState::Completed => EventStatus::Completed,
            JobState::Failed => EventStatus::Failed,
            _ => return None,
        };
        Some(Self {
            job_id: job.id.clone(),
            message_id: job.message_id.clone(),
            conversation_id: job.conversation_id.clone(),
            status,
            variants: job.variants.clone(),
            error: job.error.clone(),
        })
    }
}
