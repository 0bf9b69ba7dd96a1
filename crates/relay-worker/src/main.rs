//! Media transcoding worker binary.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use relay_jobstore::RedisJobStore;
use relay_media::{check_ffmpeg, check_ffprobe, Transcoder};
use relay_queue::{RedisEventPublisher, RedisWorkQueue};
use relay_storage::S3MediaStore;
use relay_worker::{PipelineContext, WorkerConfig, WorkerPool};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("relay=info,aws_config=warn"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting relay-worker");

    // External tools must be present before the first lease.
    if let Err(e) = check_ffmpeg() {
        error!("{}", e);
        std::process::exit(1);
    }
    if let Err(e) = check_ffprobe() {
        error!("{}", e);
        std::process::exit(1);
    }

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    let queue = match RedisWorkQueue::from_env() {
        Ok(q) => q,
        Err(e) => {
            error!("Failed to create work queue: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = queue.init().await {
        error!("Failed to initialize work queue: {}", e);
        std::process::exit(1);
    }

    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());

    let store = match RedisJobStore::new(&redis_url) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create job store: {}", e);
            std::process::exit(1);
        }
    };

    let objects = match S3MediaStore::from_env() {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create object store: {}", e);
            std::process::exit(1);
        }
    };

    let events = match RedisEventPublisher::new(&redis_url) {
        Ok(p) => p,
        Err(e) => {
            error!("Failed to create event publisher: {}", e);
            std::process::exit(1);
        }
    };

    let generator = Transcoder::new().with_ffmpeg_timeout(config.ffmpeg_timeout_secs);

    let ctx = PipelineContext {
        store: Arc::new(store),
        objects: Arc::new(objects),
        generator: Arc::new(generator),
        events: Arc::new(events),
        queue: Arc::new(queue),
        config,
    };

    let pool = Arc::new(WorkerPool::new(ctx));

    let signal_pool = Arc::clone(&pool);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        signal_pool.shutdown();
    });

    if let Err(e) = pool.run().await {
        error!("Worker pool error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}
