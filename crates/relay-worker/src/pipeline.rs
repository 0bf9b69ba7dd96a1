//! The per-job pipeline: lease in, terminal state out.
//!
//! One leased message is driven to exactly one of three outcomes:
//! Completed (variants uploaded, record updated, event published),
//! Failed (classified error recorded, event published), or a deferred
//! redelivery when the failure is transient and attempts remain.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use relay_jobstore::JobStore;
use relay_media::{CancelFlag, MediaGenerator};
use relay_models::{storage_key, FailureKind, JobError, JobEvent, JobId, MediaJob, Variant};
use relay_queue::{EventPublisher, LeasedMessage, WorkQueue};
use relay_storage::ObjectStore;

use crate::backoff::retry_delay;
use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};

/// Everything a job needs to run, shared across the pool.
pub struct PipelineContext {
    pub store: Arc<dyn JobStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub generator: Arc<dyn MediaGenerator>,
    pub events: Arc<dyn EventPublisher>,
    pub queue: Arc<dyn WorkQueue>,
    pub config: WorkerConfig,
}

/// Drive one leased message to its outcome.
///
/// Never returns an error: every failure path either resolves the
/// lease (ack or deferred redelivery) or deliberately leaves it to
/// expire so another worker retries.
pub async fn run_leased(ctx: &PipelineContext, lease: &LeasedMessage) {
    let job_id = &lease.job.job_id;

    // Duplicate delivery against a terminal record is a no-op; the
    // record is never touched, only the message is resolved.
    match ctx.store.get(job_id).await {
        Ok(record) if record.is_terminal() => {
            info!(
                "Job {} already {}, dropping duplicate delivery",
                job_id, record.state
            );
            ack_or_warn(ctx, &lease.message_id).await;
            return;
        }
        Ok(_) => {}
        Err(relay_jobstore::StoreError::NotFound(_)) => {
            warn!("No record for job {}, dropping message", job_id);
            ack_or_warn(ctx, &lease.message_id).await;
            return;
        }
        Err(e) => {
            // Leave the lease; it expires and redelivers.
            error!("Failed to load job {}: {}", job_id, e);
            return;
        }
    }

    // Cancelled while queued: fail without transcoding anything.
    if cancel_flagged(ctx, job_id).await {
        if mark_processing_or_resolve(ctx, lease).await.is_some() {
            finish_failed(ctx, lease, JobError::cancelled()).await;
        }
        return;
    }

    let record = match mark_processing_or_resolve(ctx, lease).await {
        Some(r) => r,
        None => return,
    };

    info!(
        "Processing job {} (attempt {}/{}, kind {})",
        job_id, record.attempt, ctx.config.max_attempts, record.source_kind
    );

    let scratch = PathBuf::from(&ctx.config.work_dir).join(job_id.as_str());
    let result = process(ctx, lease, &record, &scratch).await;
    tokio::fs::remove_dir_all(&scratch).await.ok();

    match result {
        Ok(variants) => finish_completed(ctx, lease, variants).await,
        Err(err) => {
            let kind = err.failure_kind();
            if kind.is_retryable() && record.attempt < ctx.config.max_attempts {
                let delay =
                    retry_delay(record.attempt, ctx.config.backoff_base, ctx.config.backoff_cap);
                warn!(
                    "Job {} attempt {} failed ({}), retrying in {:?}: {}",
                    job_id, record.attempt, kind, delay, err
                );
                if let Err(e) = ctx
                    .queue
                    .requeue_delayed(&lease.message_id, &lease.job, delay)
                    .await
                {
                    // Lease expiry covers us, just without the backoff.
                    error!("Failed to defer job {}: {}", job_id, e);
                }
            } else {
                error!(
                    "Job {} failed for good after attempt {} ({}): {}",
                    job_id, record.attempt, kind, err
                );
                let job_error = if kind == FailureKind::Cancelled {
                    JobError::cancelled()
                } else {
                    JobError::new(kind, err.to_string())
                };
                finish_failed(ctx, lease, job_error).await;
            }
        }
    }
}

/// Transform and upload, with a cancel watcher running alongside.
/// The watcher polls the store and raises an in-process flag that the
/// generators and the upload loop check between steps, so a cancel
/// landing mid-job stops it at the next step boundary.
async fn process(
    ctx: &PipelineContext,
    lease: &LeasedMessage,
    record: &MediaJob,
    scratch: &Path,
) -> WorkerResult<Vec<Variant>> {
    let cancel = CancelFlag::new();
    let watcher = tokio::spawn(watch_for_cancel(
        Arc::clone(&ctx.store),
        record.id.clone(),
        cancel.clone(),
    ));
    let result = transform_and_upload(ctx, lease, record, scratch, &cancel).await;
    watcher.abort();
    result
}

/// Returns the full variant set or the first error; uploads are
/// all-or-nothing, and partially uploaded objects are simply
/// overwritten on the next attempt.
async fn transform_and_upload(
    ctx: &PipelineContext,
    lease: &LeasedMessage,
    record: &MediaJob,
    scratch: &Path,
    cancel: &CancelFlag,
) -> WorkerResult<Vec<Variant>> {
    let source = Path::new(&lease.job.source_path);
    if !tokio::fs::try_exists(source).await.unwrap_or(false) {
        return Err(WorkerError::SourceMissing(lease.job.source_path.clone()));
    }

    let generated = ctx
        .generator
        .generate(source, record.source_kind, scratch, cancel)
        .await?;

    let mut variants = Vec::with_capacity(generated.len());
    for g in &generated {
        if cancel.is_set() {
            return Err(WorkerError::Cancelled);
        }
        let key = storage_key(&record.id, g.variant_type, g.format);
        let stored = ctx
            .objects
            .put_file(&key, &g.path, g.format.content_type())
            .await?;
        variants.push(Variant {
            variant_type: g.variant_type,
            storage_key: stored.key,
            format: g.format,
            width: g.width,
            height: g.height,
            size_bytes: stored.size_bytes,
        });
    }

    Ok(variants)
}

/// Poll the store's cancel flag while a job runs. Exits once raised;
/// otherwise runs until aborted by `process`. An in-flight encode is
/// never interrupted, the job stops at its next checkpoint.
async fn watch_for_cancel(store: Arc<dyn JobStore>, job_id: JobId, cancel: CancelFlag) {
    let mut tick = tokio::time::interval(Duration::from_secs(2));
    tick.tick().await;
    loop {
        tick.tick().await;
        if store.cancel_requested(&job_id).await.unwrap_or(false) {
            info!("Cancel requested for running job {}", job_id);
            cancel.set();
            return;
        }
    }
}

/// Transition to Processing. On a terminal rejection (duplicate won
/// the race) the message is acked and `None` returned; on a transient
/// store error the lease is left to expire.
async fn mark_processing_or_resolve(
    ctx: &PipelineContext,
    lease: &LeasedMessage,
) -> Option<MediaJob> {
    match ctx.store.mark_processing(&lease.job.job_id).await {
        Ok(record) => Some(record),
        Err(e) if e.is_terminal_rejection() => {
            info!(
                "Job {} reached a terminal state concurrently, dropping message",
                lease.job.job_id
            );
            ack_or_warn(ctx, &lease.message_id).await;
            None
        }
        Err(e) => {
            error!("Failed to mark job {} processing: {}", lease.job.job_id, e);
            None
        }
    }
}

async fn finish_completed(ctx: &PipelineContext, lease: &LeasedMessage, variants: Vec<Variant>) {
    let job_id = &lease.job.job_id;
    match ctx.store.complete(job_id, variants).await {
        Ok(updated) => {
            info!(
                "Job {} completed with {} variants",
                job_id,
                updated.variants.len()
            );
            publish_event(ctx, &updated).await;
            ack_or_warn(ctx, &lease.message_id).await;
            remove_source(lease).await;
        }
        Err(e) if e.is_terminal_rejection() => {
            ack_or_warn(ctx, &lease.message_id).await;
        }
        Err(e) => {
            error!("Failed to persist completion of job {}: {}", job_id, e);
        }
    }
}

async fn finish_failed(ctx: &PipelineContext, lease: &LeasedMessage, job_error: JobError) {
    let job_id = &lease.job.job_id;
    match ctx.store.fail(job_id, job_error).await {
        Ok(updated) => {
            publish_event(ctx, &updated).await;
            ack_or_warn(ctx, &lease.message_id).await;
            remove_source(lease).await;
        }
        Err(e) if e.is_terminal_rejection() => {
            ack_or_warn(ctx, &lease.message_id).await;
        }
        Err(e) => {
            error!("Failed to persist failure of job {}: {}", job_id, e);
        }
    }
}

/// Publish the terminal event. Best-effort: the record is already
/// durable, clients can always poll.
async fn publish_event(ctx: &PipelineContext, job: &MediaJob) {
    if let Some(event) = JobEvent::from_job(job) {
        if let Err(e) = ctx.events.publish(&event).await {
            warn!("Dropped terminal event for job {}: {}", job.id, e);
        }
    }
}

/// Cancel flag lookup; a store hiccup reads as "not cancelled" so a
/// flaky flag check never blocks progress.
async fn cancel_flagged(ctx: &PipelineContext, job_id: &JobId) -> bool {
    ctx.store.cancel_requested(job_id).await.unwrap_or(false)
}

async fn ack_or_warn(ctx: &PipelineContext, message_id: &str) {
    if let Err(e) = ctx.queue.ack(message_id).await {
        warn!("Failed to ack message {}: {}", message_id, e);
    }
}

/// Drop the staged upload once the job is terminal. Kept alive across
/// retries so a redelivered message can still read it.
async fn remove_source(lease: &LeasedMessage) {
    if let Err(e) = tokio::fs::remove_file(&lease.job.source_path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(
                "Failed to remove staged source {}: {}",
                lease.job.source_path, e
            );
        }
    }
}
