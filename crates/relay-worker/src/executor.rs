//! Worker pool driving the lease loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use relay_queue::LeasedMessage;

use crate::error::{WorkerError, WorkerResult};
use crate::pipeline::{run_leased, PipelineContext};

/// Pool of job slots fed from the work queue.
///
/// Concurrency is a semaphore over spawned tasks; the lease loop only
/// asks the queue for as many messages as there are free slots, so a
/// lease is never held while waiting for capacity.
pub struct WorkerPool {
    ctx: Arc<PipelineContext>,
    job_semaphore: Arc<Semaphore>,
    shutdown: tokio::sync::watch::Sender<bool>,
    consumer_name: String,
}

impl WorkerPool {
    pub fn new(ctx: PipelineContext) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(ctx.config.max_concurrent_jobs));
        let (shutdown, _) = tokio::sync::watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Self {
            ctx: Arc::new(ctx),
            job_semaphore,
            shutdown,
            consumer_name,
        }
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    /// Run until shutdown is signalled, then drain in-flight jobs.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting worker pool '{}' with {} job slots",
            self.consumer_name, self.ctx.config.max_concurrent_jobs
        );

        let mut shutdown_rx = self.shutdown.subscribe();
        let maintenance = self.spawn_maintenance();

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping lease loop");
                        break;
                    }
                }
                result = self.lease_batch() => {
                    if let Err(e) = result {
                        error!("Lease loop error: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        maintenance.abort();

        info!("Waiting for in-flight jobs to finish...");
        let drained = tokio::time::timeout(self.ctx.config.shutdown_timeout, self.drain()).await;
        if drained.is_err() {
            warn!(
                "Shutdown timeout elapsed with jobs still in flight; their leases will be reclaimed"
            );
        }

        info!("Worker pool stopped");
        Ok(())
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Lease up to the number of free slots and hand each message to a
    /// job task.
    async fn lease_batch(&self) -> WorkerResult<()> {
        let free = self.job_semaphore.available_permits();
        if free == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let leased = self
            .ctx
            .queue
            .lease(&self.consumer_name, self.ctx.config.lease_block, free.min(5))
            .await?;

        if !leased.is_empty() {
            debug!("Leased {} messages", leased.len());
        }
        for message in leased {
            self.spawn_job(message).await?;
        }
        Ok(())
    }

    async fn spawn_job(&self, message: LeasedMessage) -> WorkerResult<()> {
        let permit = self
            .job_semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| WorkerError::Io(std::io::Error::other("job semaphore closed")))?;

        let ctx = Arc::clone(&self.ctx);
        tokio::spawn(async move {
            let _permit = permit;
            run_leased(&ctx, &message).await;
        });
        Ok(())
    }

    /// Background task: reclaim stale leases from crashed workers and
    /// promote deferred retries whose backoff has lapsed.
    fn spawn_maintenance(&self) -> tokio::task::JoinHandle<()> {
        let ctx = Arc::clone(&self.ctx);
        let semaphore = Arc::clone(&self.job_semaphore);
        let consumer_name = self.consumer_name.clone();
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut claim_tick = tokio::time::interval(ctx.config.claim_interval);
            let mut promote_tick = tokio::time::interval(Duration::from_secs(1));

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = promote_tick.tick() => {
                        if let Err(e) = ctx.queue.promote_due().await {
                            warn!("Failed to promote deferred messages: {}", e);
                        }
                    }
                    _ = claim_tick.tick() => {
                        match ctx.queue.claim_stale(&consumer_name, ctx.config.claim_min_idle, 5).await {
                            Ok(claimed) if !claimed.is_empty() => {
                                info!("Claimed {} stale leases", claimed.len());
                                for message in claimed {
                                    let Ok(permit) = semaphore.clone().acquire_owned().await else {
                                        return;
                                    };
                                    let ctx = Arc::clone(&ctx);
                                    tokio::spawn(async move {
                                        let _permit = permit;
                                        run_leased(&ctx, &message).await;
                                    });
                                }
                            }
                            Ok(_) => {}
                            Err(e) => warn!("Failed to claim stale leases: {}", e),
                        }
                    }
                }
            }
        })
    }

    /// Wait until every job slot is free again.
    async fn drain(&self) {
        loop {
            if self.job_semaphore.available_permits() == self.ctx.config.max_concurrent_jobs {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
