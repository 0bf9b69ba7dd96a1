//! Job record store seam.

use async_trait::async_trait;

use relay_models::{JobError, JobId, MediaJob, Variant};

use crate::error::StoreResult;

/// Durable store for `MediaJob` records.
///
/// The store exclusively owns job lifecycle; the worker pool is the
/// only writer of state/variants/error/attempt. Every state-changing
/// write persists the whole record atomically, so no reader can ever
/// observe a Completed job with a partial variant list.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new Queued record at intake. Rejects duplicate ids.
    async fn create(&self, job: &MediaJob) -> StoreResult<()>;

    /// Load a record.
    async fn get(&self, id: &JobId) -> StoreResult<MediaJob>;

    /// Transition to Processing, incrementing the attempt counter.
    /// Rejected with a terminal error for Completed/Failed records.
    async fn mark_processing(&self, id: &JobId) -> StoreResult<MediaJob>;

    /// Transition to Completed with the full variant set.
    async fn complete(&self, id: &JobId, variants: Vec<Variant>) -> StoreResult<MediaJob>;

    /// Transition to Failed with a classified error.
    async fn fail(&self, id: &JobId, error: JobError) -> StoreResult<MediaJob>;

    /// Explicit external re-process: Failed -> Queued, clearing
    /// variants and error but keeping the attempt counter.
    async fn reprocess(&self, id: &JobId) -> StoreResult<MediaJob>;

    /// Flag a job for cancellation. Workers observe the flag between
    /// variant steps; in-flight transforms are not interrupted.
    async fn request_cancel(&self, id: &JobId) -> StoreResult<()>;

    /// Whether cancellation has been requested for a job.
    async fn cancel_requested(&self, id: &JobId) -> StoreResult<bool>;
}
