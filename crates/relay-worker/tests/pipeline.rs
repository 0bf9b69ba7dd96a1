//! End-to-end pipeline tests over in-memory fakes.
//!
//! No Redis, no S3, no codecs: every seam is a scripted fake, so
//! these tests pin down outcome semantics (terminal states, retry
//! routing, duplicate deliveries, cancellation) rather than transport
//! behavior.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use relay_jobstore::{JobStore, StoreError, StoreResult};
use relay_media::{CancelFlag, GeneratedVariant, MediaError, MediaGenerator, MediaResult};
use relay_models::{
    EventStatus, FailureKind, JobError, JobEvent, JobId, JobState, MediaJob, MediaKind, Variant,
    VariantFormat, VariantType,
};
use relay_queue::{EnqueueJob, EventPublisher, LeasedMessage, QueueResult, WorkQueue};
use relay_storage::{ObjectStore, StorageError, StorageResult, StoredObject};
use relay_worker::pipeline::run_leased;
use relay_worker::{PipelineContext, WorkerConfig};

#[derive(Default)]
struct MemoryJobStore {
    jobs: Mutex<HashMap<String, MediaJob>>,
    cancelled: Mutex<HashSet<String>>,
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: &MediaJob) -> StoreResult<()> {
        let mut jobs = self.jobs.lock().unwrap();
        if jobs.contains_key(job.id.as_str()) {
            return Err(StoreError::AlreadyExists(job.id.to_string()));
        }
        jobs.insert(job.id.to_string(), job.clone());
        Ok(())
    }

    async fn get(&self, id: &JobId) -> StoreResult<MediaJob> {
        self.jobs
            .lock()
            .unwrap()
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn mark_processing(&self, id: &JobId) -> StoreResult<MediaJob> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(id.as_str())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        job.start_processing()?;
        Ok(job.clone())
    }

    async fn complete(&self, id: &JobId, variants: Vec<Variant>) -> StoreResult<MediaJob> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(id.as_str())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        job.complete(variants)?;
        Ok(job.clone())
    }

    async fn fail(&self, id: &JobId, error: JobError) -> StoreResult<MediaJob> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(id.as_str())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        job.fail(error)?;
        Ok(job.clone())
    }

    async fn reprocess(&self, id: &JobId) -> StoreResult<MediaJob> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(id.as_str())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        job.reprocess()?;
        Ok(job.clone())
    }

    async fn request_cancel(&self, id: &JobId) -> StoreResult<()> {
        self.cancelled.lock().unwrap().insert(id.to_string());
        Ok(())
    }

    async fn cancel_requested(&self, id: &JobId) -> StoreResult<bool> {
        Ok(self.cancelled.lock().unwrap().contains(id.as_str()))
    }
}

#[derive(Default)]
struct MemoryObjectStore {
    objects: Mutex<HashMap<String, u64>>,
    fail_next: AtomicU32,
}

impl MemoryObjectStore {
    fn fail_next_uploads(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        _content_type: &str,
    ) -> StorageResult<StoredObject> {
        if self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StorageError::upload_failed("injected outage"));
        }
        let size_bytes = std::fs::metadata(path).map(|m| m.len()).unwrap_or(1024);
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), size_bytes);
        Ok(StoredObject {
            key: key.to_string(),
            size_bytes,
        })
    }

    async fn delete_prefix(&self, prefix: &str) -> StorageResult<u32> {
        let mut objects = self.objects.lock().unwrap();
        let keys: Vec<String> = objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        for k in &keys {
            objects.remove(k);
        }
        Ok(keys.len() as u32)
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.objects.lock().unwrap().contains_key(key))
    }
}

enum GeneratorScript {
    ImageOk,
    CorruptSource,
    TranscodeCrash,
    /// Bails the way real generators do once the flag is raised
    /// between variant steps.
    CancelledBetweenSteps,
    /// Raises the flag itself, then returns variants; models a cancel
    /// landing after the last encode but before upload.
    RaisesCancelThenOk,
}

struct ScriptedGenerator {
    script: GeneratorScript,
    calls: AtomicU32,
}

impl ScriptedGenerator {
    fn new(script: GeneratorScript) -> Self {
        Self {
            script,
            calls: AtomicU32::new(0),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        _source: &Path,
        _kind: MediaKind,
        scratch: &Path,
        cancel: &CancelFlag,
    ) -> MediaResult<Vec<GeneratedVariant>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let write_variants = || -> MediaResult<Vec<GeneratedVariant>> {
            std::fs::create_dir_all(scratch)?;
            let mut out = Vec::new();
            for (t, w, h) in [
                (VariantType::Thumbnail, 300u32, 225u32),
                (VariantType::Preview, 1080, 810),
                (VariantType::High, 4000, 3000),
            ] {
                let path = scratch.join(format!("{}.jpeg", t));
                std::fs::write(&path, b"jpeg bytes")?;
                out.push(GeneratedVariant {
                    variant_type: t,
                    path,
                    format: VariantFormat::Jpeg,
                    width: Some(w),
                    height: Some(h),
                });
            }
            Ok(out)
        };
        match self.script {
            GeneratorScript::ImageOk => write_variants(),
            GeneratorScript::CorruptSource => {
                Err(MediaError::corrupt_source("moov atom not found"))
            }
            GeneratorScript::TranscodeCrash => {
                Err(MediaError::transcode_failed("encoder crash", None, Some(1)))
            }
            GeneratorScript::CancelledBetweenSteps => Err(MediaError::Cancelled),
            GeneratorScript::RaisesCancelThenOk => {
                cancel.set();
                write_variants()
            }
        }
    }
}

#[derive(Default)]
struct RecordingQueue {
    acked: Mutex<Vec<String>>,
    deferred: Mutex<Vec<(String, Duration)>>,
}

#[async_trait]
impl WorkQueue for RecordingQueue {
    async fn enqueue(&self, _job: &EnqueueJob) -> QueueResult<String> {
        Ok("0-0".to_string())
    }

    async fn lease(
        &self,
        _consumer: &str,
        _block: Duration,
        _count: usize,
    ) -> QueueResult<Vec<LeasedMessage>> {
        Ok(Vec::new())
    }

    async fn ack(&self, message_id: &str) -> QueueResult<()> {
        self.acked.lock().unwrap().push(message_id.to_string());
        Ok(())
    }

    async fn requeue_delayed(
        &self,
        message_id: &str,
        _job: &EnqueueJob,
        delay: Duration,
    ) -> QueueResult<()> {
        self.deferred
            .lock()
            .unwrap()
            .push((message_id.to_string(), delay));
        Ok(())
    }

    async fn claim_stale(
        &self,
        _consumer: &str,
        _min_idle: Duration,
        _count: usize,
    ) -> QueueResult<Vec<LeasedMessage>> {
        Ok(Vec::new())
    }

    async fn promote_due(&self) -> QueueResult<u32> {
        Ok(0)
    }

    async fn cancel(&self, _message_id: &str) -> QueueResult<()> {
        Ok(())
    }
}

#[derive(Default)]
struct RecordingPublisher {
    events: Mutex<Vec<JobEvent>>,
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &JobEvent) -> QueueResult<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

struct Harness {
    store: Arc<MemoryJobStore>,
    objects: Arc<MemoryObjectStore>,
    generator: Arc<ScriptedGenerator>,
    queue: Arc<RecordingQueue>,
    events: Arc<RecordingPublisher>,
    ctx: PipelineContext,
    work: TempDir,
}

impl Harness {
    fn new(script: GeneratorScript) -> Self {
        let work = TempDir::new().expect("create work dir");
        let store = Arc::new(MemoryJobStore::default());
        let objects = Arc::new(MemoryObjectStore::default());
        let generator = Arc::new(ScriptedGenerator::new(script));
        let queue = Arc::new(RecordingQueue::default());
        let events = Arc::new(RecordingPublisher::default());

        let config = WorkerConfig {
            max_attempts: 3,
            backoff_base: Duration::from_millis(1),
            backoff_cap: Duration::from_millis(10),
            work_dir: work.path().to_string_lossy().to_string(),
            ..WorkerConfig::default()
        };

        let ctx = PipelineContext {
            store: store.clone(),
            objects: objects.clone(),
            generator: generator.clone(),
            events: events.clone(),
            queue: queue.clone(),
            config,
        };

        Self {
            store,
            objects,
            generator,
            queue,
            events,
            ctx,
            work,
        }
    }

    /// Create the job record plus a staged source file, and return a
    /// lease the way the queue would deliver it.
    async fn seed_job(&self, kind: MediaKind, message_id: &str) -> (JobId, LeasedMessage, PathBuf) {
        let id = JobId::new();
        let (mime, ext) = match kind {
            MediaKind::Image => ("image/jpeg", "jpg"),
            MediaKind::Video => ("video/mp4", "mp4"),
        };

        let source = self.work.path().join(format!("{}.{}", id, ext));
        std::fs::write(&source, b"staged upload bytes").expect("write staged source");

        let job = MediaJob::new(id.clone(), "user-1", kind, mime, 19).with_message("msg-1");
        self.store.create(&job).await.expect("seed job record");

        let payload = EnqueueJob::new(
            id.clone(),
            "user-1",
            source.to_string_lossy().to_string(),
            kind,
            mime,
            19,
        )
        .with_message("msg-1");

        let lease = LeasedMessage {
            message_id: message_id.to_string(),
            job: payload,
        };
        (id, lease, source)
    }

    /// Re-deliver the same payload under a fresh stream entry id, as
    /// promotion after backoff would.
    fn redeliver(&self, lease: &LeasedMessage, message_id: &str) -> LeasedMessage {
        LeasedMessage {
            message_id: message_id.to_string(),
            job: lease.job.clone(),
        }
    }
}

#[tokio::test]
async fn test_image_job_runs_to_completed() {
    let h = Harness::new(GeneratorScript::ImageOk);
    let (id, lease, source) = h.seed_job(MediaKind::Image, "1-0").await;

    run_leased(&h.ctx, &lease).await;

    let job = h.store.get(&id).await.unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempt, 1);
    assert_eq!(job.variants.len(), 3);
    assert!(job.completed_at.is_some());
    assert!(job.invariants_hold());

    for t in VariantType::ALL {
        let key = format!("{}/{}.jpeg", id, t);
        assert!(h.objects.exists(&key).await.unwrap(), "missing {}", key);
    }

    let events = h.events.events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, EventStatus::Completed);
    assert_eq!(events[0].variants.len(), 3);
    assert_eq!(events[0].message_id.as_deref(), Some("msg-1"));

    assert_eq!(h.queue.acked.lock().unwrap().as_slice(), ["1-0"]);
    assert!(h.queue.deferred.lock().unwrap().is_empty());
    assert!(!source.exists(), "staged source not cleaned up");
}

#[tokio::test]
async fn test_duplicate_delivery_is_a_noop() {
    let h = Harness::new(GeneratorScript::ImageOk);
    let (id, lease, _source) = h.seed_job(MediaKind::Image, "1-0").await;

    run_leased(&h.ctx, &lease).await;
    let first = h.store.get(&id).await.unwrap();

    let dup = h.redeliver(&lease, "2-0");
    run_leased(&h.ctx, &dup).await;

    let job = h.store.get(&id).await.unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempt, 1);
    assert_eq!(job.completed_at, first.completed_at);
    assert_eq!(h.generator.calls(), 1);

    // Both deliveries resolved, one event total.
    assert_eq!(h.queue.acked.lock().unwrap().as_slice(), ["1-0", "2-0"]);
    assert_eq!(h.events.events.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_storage_outage_retries_then_completes() {
    let h = Harness::new(GeneratorScript::ImageOk);
    let (id, lease, _source) = h.seed_job(MediaKind::Image, "1-0").await;
    h.objects.fail_next_uploads(2);

    run_leased(&h.ctx, &lease).await;
    run_leased(&h.ctx, &h.redeliver(&lease, "1-1")).await;
    run_leased(&h.ctx, &h.redeliver(&lease, "1-2")).await;

    let job = h.store.get(&id).await.unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempt, 3);
    assert!(job.invariants_hold());

    let deferred = h.queue.deferred.lock().unwrap();
    assert_eq!(deferred.len(), 2);
    assert_eq!(deferred[0].0, "1-0");
    assert_eq!(deferred[1].0, "1-1");
    drop(deferred);

    assert_eq!(h.events.events.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_corrupt_video_fails_without_retry() {
    let h = Harness::new(GeneratorScript::CorruptSource);
    let (id, lease, source) = h.seed_job(MediaKind::Video, "1-0").await;

    run_leased(&h.ctx, &lease).await;

    let job = h.store.get(&id).await.unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempt, 1);
    assert!(job.variants.is_empty());
    assert!(job.invariants_hold());
    assert_eq!(job.error.as_ref().unwrap().kind, FailureKind::CorruptSource);

    let events = h.events.events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, EventStatus::Failed);
    drop(events);

    assert!(h.queue.deferred.lock().unwrap().is_empty());
    assert_eq!(h.queue.acked.lock().unwrap().as_slice(), ["1-0"]);
    assert!(!source.exists());
}

#[tokio::test]
async fn test_transcode_crash_exhausts_attempts() {
    let h = Harness::new(GeneratorScript::TranscodeCrash);
    let (id, lease, _source) = h.seed_job(MediaKind::Video, "1-0").await;

    run_leased(&h.ctx, &lease).await;
    run_leased(&h.ctx, &h.redeliver(&lease, "1-1")).await;
    run_leased(&h.ctx, &h.redeliver(&lease, "1-2")).await;

    let job = h.store.get(&id).await.unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempt, 3);
    assert_eq!(
        job.error.as_ref().unwrap().kind,
        FailureKind::TranscodeFailure
    );
    assert!(job.invariants_hold());

    assert_eq!(h.queue.deferred.lock().unwrap().len(), 2);
    assert_eq!(h.generator.calls(), 3);
    assert_eq!(h.events.events.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_cancel_before_lease_skips_transcode() {
    let h = Harness::new(GeneratorScript::ImageOk);
    let (id, lease, _source) = h.seed_job(MediaKind::Image, "1-0").await;
    h.store.request_cancel(&id).await.unwrap();

    run_leased(&h.ctx, &lease).await;

    let job = h.store.get(&id).await.unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.error.as_ref().unwrap().kind, FailureKind::Cancelled);
    assert_eq!(h.generator.calls(), 0);

    let events = h.events.events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, EventStatus::Failed);
}

#[tokio::test]
async fn test_cancel_between_variant_steps_fails_without_retry() {
    let h = Harness::new(GeneratorScript::CancelledBetweenSteps);
    let (id, lease, source) = h.seed_job(MediaKind::Video, "1-0").await;

    run_leased(&h.ctx, &lease).await;

    let job = h.store.get(&id).await.unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempt, 1);
    assert_eq!(job.error.as_ref().unwrap().kind, FailureKind::Cancelled);
    assert!(job.invariants_hold());

    // Cancellation is terminal, never deferred for retry.
    assert!(h.queue.deferred.lock().unwrap().is_empty());
    assert_eq!(h.queue.acked.lock().unwrap().as_slice(), ["1-0"]);
    assert!(!source.exists());
}

#[tokio::test]
async fn test_cancel_raised_during_transcode_skips_uploads() {
    let h = Harness::new(GeneratorScript::RaisesCancelThenOk);
    let (id, lease, _source) = h.seed_job(MediaKind::Image, "1-0").await;

    run_leased(&h.ctx, &lease).await;

    let job = h.store.get(&id).await.unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.error.as_ref().unwrap().kind, FailureKind::Cancelled);
    assert_eq!(h.generator.calls(), 1);

    // The upload loop saw the flag before the first put.
    assert!(h.objects.objects.lock().unwrap().is_empty());

    let events = h.events.events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, EventStatus::Failed);
}

#[tokio::test]
async fn test_message_without_record_is_dropped() {
    let h = Harness::new(GeneratorScript::ImageOk);

    let payload = EnqueueJob::new(
        JobId::new(),
        "user-1",
        "/nonexistent/staged.jpg",
        MediaKind::Image,
        "image/jpeg",
        10,
    );
    let lease = LeasedMessage {
        message_id: "9-0".to_string(),
        job: payload,
    };

    run_leased(&h.ctx, &lease).await;

    assert_eq!(h.queue.acked.lock().unwrap().as_slice(), ["9-0"]);
    assert!(h.events.events.lock().unwrap().is_empty());
    assert_eq!(h.generator.calls(), 0);
}

/// The one test that swaps the scripted generator for the real image
/// transcoder: a 4000x3000 JPEG goes all the way to Completed with
/// correctly capped renditions.
#[tokio::test]
async fn test_large_jpeg_end_to_end_with_real_transcoder() {
    let work = TempDir::new().expect("create work dir");
    let store = Arc::new(MemoryJobStore::default());
    let objects = Arc::new(MemoryObjectStore::default());
    let queue = Arc::new(RecordingQueue::default());
    let events = Arc::new(RecordingPublisher::default());

    let config = WorkerConfig {
        work_dir: work.path().join("scratch").to_string_lossy().to_string(),
        ..WorkerConfig::default()
    };
    let ctx = PipelineContext {
        store: store.clone(),
        objects: objects.clone(),
        generator: Arc::new(relay_media::Transcoder::new()),
        events: events.clone(),
        queue: queue.clone(),
        config,
    };

    let id = JobId::new();
    let source = work.path().join(format!("{}.jpg", id));
    let img = image::RgbImage::from_pixel(4000, 3000, image::Rgb([90, 120, 200]));
    image::DynamicImage::ImageRgb8(img)
        .save_with_format(&source, image::ImageFormat::Jpeg)
        .expect("write source jpeg");
    let size = std::fs::metadata(&source).unwrap().len();

    let job = MediaJob::new(id.clone(), "user-1", MediaKind::Image, "image/jpeg", size);
    store.create(&job).await.unwrap();

    let lease = LeasedMessage {
        message_id: "1-0".to_string(),
        job: EnqueueJob::new(
            id.clone(),
            "user-1",
            source.to_string_lossy().to_string(),
            MediaKind::Image,
            "image/jpeg",
            size,
        ),
    };

    run_leased(&ctx, &lease).await;

    let job = store.get(&id).await.unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.variants.len(), 3);

    let dims = |t: VariantType| {
        let v = job
            .variants
            .iter()
            .find(|v| v.variant_type == t)
            .unwrap_or_else(|| panic!("missing {} variant", t));
        (v.width, v.height)
    };
    assert_eq!(dims(VariantType::Thumbnail), (Some(300), Some(225)));
    assert_eq!(dims(VariantType::Preview), (Some(1080), Some(810)));
    assert_eq!(dims(VariantType::High), (Some(4000), Some(3000)));

    for t in VariantType::ALL {
        let key = format!("{}/{}.jpeg", id, t);
        assert!(objects.exists(&key).await.unwrap(), "missing {}", key);
    }
    assert!(!source.exists());
}

#[tokio::test]
async fn test_failed_job_can_be_reprocessed_to_completion() {
    let h = Harness::new(GeneratorScript::ImageOk);
    let (id, lease, _source) = h.seed_job(MediaKind::Image, "1-0").await;
    h.objects.fail_next_uploads(9);

    // Exhaust all attempts against a dead object store.
    run_leased(&h.ctx, &lease).await;
    run_leased(&h.ctx, &h.redeliver(&lease, "1-1")).await;
    run_leased(&h.ctx, &h.redeliver(&lease, "1-2")).await;
    assert_eq!(h.store.get(&id).await.unwrap().state, JobState::Failed);

    // Operator re-queues the job; the attempt counter carries over.
    h.store.reprocess(&id).await.unwrap();
    h.objects.fail_next_uploads(0);

    // Terminal cleanup removed the staged source, re-stage it.
    std::fs::write(&lease.job.source_path, b"staged upload bytes").unwrap();

    run_leased(&h.ctx, &h.redeliver(&lease, "2-0")).await;

    let job = h.store.get(&id).await.unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempt, 4);
    assert!(job.error.is_none());
    assert!(job.invariants_hold());
}
