//! Terminal job events via Redis Pub/Sub.

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::{debug, warn};

use relay_models::JobEvent;

use crate::error::{QueueError, QueueResult};

/// Immediate publish attempts before giving up. Delivery is
/// at-most-once; a dropped event never rolls back the job's state.
const PUBLISH_ATTEMPTS: u32 = 3;

/// Notification seam: one completion/failure event per job, routed to
/// clients by an external fan-out.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &JobEvent) -> QueueResult<()>;
}

/// Pub/Sub implementation of [`EventPublisher`].
pub struct RedisEventPublisher {
    client: redis::Client,
    topic: String,
}

impl RedisEventPublisher {
    pub fn new(redis_url: &str) -> QueueResult<Self> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
            topic: "relay:media:events".to_string(),
        })
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    async fn try_publish(&self, payload: &str) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.publish::<_, _, ()>(&self.topic, payload).await?;
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for RedisEventPublisher {
    async fn publish(&self, event: &JobEvent) -> QueueResult<()> {
        let payload = serde_json::to_string(event)?;

        let mut last_err = String::new();
        for attempt in 1..=PUBLISH_ATTEMPTS {
            match self.try_publish(&payload).await {
                Ok(()) => {
                    debug!("Published event for job {} to {}", event.job_id, self.topic);
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "Publish attempt {}/{} for job {} failed: {}",
                        attempt, PUBLISH_ATTEMPTS, event.job_id, e
                    );
                    last_err = e.to_string();
                }
            }
        }

        Err(QueueError::PublishFailed {
            attempts: PUBLISH_ATTEMPTS,
            message: last_err,
        })
    }
}
