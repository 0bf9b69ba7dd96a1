//! Durable work queue on Redis Streams.
//!
//! Messages are leased through a consumer group; a leased message
//! stays pending until the worker acks it, and messages idle past the
//! visibility timeout can be claimed by another consumer. Backoff
//! redelivery goes through a ZSET of deferred messages scored by
//! deliver-at time.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::{AsyncCommands, Script};
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::payload::EnqueueJob;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for jobs
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// ZSET holding deferred (backoff) messages
    pub delayed_set: String,
    /// Lease visibility timeout; must exceed the worst-case transcode
    pub visibility_timeout: Duration,
    /// TTL for enqueue dedup keys
    pub dedup_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "relay:media:jobs".to_string(),
            consumer_group: "relay:media:workers".to_string(),
            delayed_set: "relay:media:delayed".to_string(),
            visibility_timeout: Duration::from_secs(600), // 10 minutes, video-safe
            dedup_ttl: Duration::from_secs(3600),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            delayed_set: std::env::var("QUEUE_DELAYED_SET").unwrap_or(defaults.delayed_set),
            visibility_timeout: Duration::from_secs(
                std::env::var("QUEUE_VISIBILITY_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(600),
            ),
            dedup_ttl: defaults.dedup_ttl,
        }
    }
}

/// Moves due deferred entries from the ZSET back onto the stream.
/// Claim and re-add run inside one script, so a crash between them can
/// never strand a retry with no copy in either structure.
const PROMOTE_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, tonumber(ARGV[2]))
local promoted = 0
for _, payload in ipairs(due) do
    redis.call('ZREM', KEYS[1], payload)
    redis.call('XADD', KEYS[2], '*', 'job', payload)
    promoted = promoted + 1
end
return promoted
"#;

/// A message held under lease by one consumer.
#[derive(Debug, Clone)]
pub struct LeasedMessage {
    /// Stream entry id; needed to ack
    pub message_id: String,
    /// Deserialized payload
    pub job: EnqueueJob,
}

/// Work queue seam the worker pool depends on.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Enqueue a job; rejects duplicates by idempotency key.
    async fn enqueue(&self, job: &EnqueueJob) -> QueueResult<String>;

    /// Lease up to `count` messages, blocking up to `block` when the
    /// stream is empty.
    async fn lease(
        &self,
        consumer: &str,
        block: Duration,
        count: usize,
    ) -> QueueResult<Vec<LeasedMessage>>;

    /// Acknowledge and remove a message.
    async fn ack(&self, message_id: &str) -> QueueResult<()>;

    /// Schedule a job for redelivery after `delay` and drop the
    /// current lease. Implements retry backoff.
    async fn requeue_delayed(&self, message_id: &str, job: &EnqueueJob, delay: Duration)
        -> QueueResult<()>;

    /// Claim messages whose lease has been idle longer than
    /// `min_idle` (crashed-worker recovery).
    async fn claim_stale(
        &self,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> QueueResult<Vec<LeasedMessage>>;

    /// Move due deferred messages back onto the stream. Returns how
    /// many were promoted.
    async fn promote_due(&self) -> QueueResult<u32>;

    /// Cancel an unleased message by deleting it from the stream.
    async fn cancel(&self, message_id: &str) -> QueueResult<()>;
}

/// Redis Streams implementation of [`WorkQueue`].
pub struct RedisWorkQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl RedisWorkQueue {
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Initialize the queue (create the consumer group if absent).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Number of messages on the stream.
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    /// Number of deferred messages waiting for their backoff to lapse.
    pub async fn delayed_len(&self) -> QueueResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let len: u64 = conn.zcard(&self.config.delayed_set).await?;
        Ok(len)
    }

    async fn xadd(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        payload: &str,
    ) -> QueueResult<String> {
        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("job")
            .arg(payload)
            .query_async(conn)
            .await?;
        Ok(message_id)
    }

    fn parse_entry(
        &self,
        message_id: &str,
        map: &std::collections::HashMap<String, redis::Value>,
    ) -> Option<EnqueueJob> {
        if let Some(redis::Value::BulkString(payload)) = map.get("job") {
            let payload_str = String::from_utf8_lossy(payload);
            match serde_json::from_str::<EnqueueJob>(&payload_str) {
                Ok(job) => return Some(job),
                Err(e) => warn!("Failed to parse job payload {}: {}", message_id, e),
            }
        }
        None
    }
}

#[async_trait]
impl WorkQueue for RedisWorkQueue {
    async fn enqueue(&self, job: &EnqueueJob) -> QueueResult<String> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let payload = serde_json::to_string(job)?;
        let dedup_key = format!("relay:dedup:{}", job.idempotency_key());
        let exists: bool = conn.exists(&dedup_key).await?;
        if exists {
            warn!("Duplicate job rejected: {}", job.job_id);
            return Err(QueueError::Duplicate(job.job_id.to_string()));
        }

        let message_id = self.xadd(&mut conn, &payload).await?;
        conn.set_ex::<_, _, ()>(&dedup_key, "1", self.config.dedup_ttl.as_secs())
            .await?;

        info!("Enqueued job {} with message ID {}", job.job_id, message_id);
        Ok(message_id)
    }

    async fn lease(
        &self,
        consumer: &str,
        block: Duration,
        count: usize,
    ) -> QueueResult<Vec<LeasedMessage>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: redis::streams::StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block.as_millis() as u64)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let mut leased = Vec::new();
        for stream_key in result.keys {
            for entry in stream_key.ids {
                let message_id = entry.id.clone();
                match self.parse_entry(&message_id, &entry.map) {
                    Some(job) => {
                        debug!("Leased job {} ({})", job.job_id, message_id);
                        leased.push(LeasedMessage { message_id, job });
                    }
                    None => {
                        // Malformed payloads are acked so they never
                        // poison the group.
                        self.ack(&message_id).await.ok();
                    }
                }
            }
        }

        Ok(leased)
    }

    async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acked message: {}", message_id);
        Ok(())
    }

    async fn requeue_delayed(
        &self,
        message_id: &str,
        job: &EnqueueJob,
        delay: Duration,
    ) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let payload = serde_json::to_string(job)?;
        let deliver_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;
        conn.zadd::<_, _, _, ()>(&self.config.delayed_set, payload, deliver_at)
            .await?;

        // Release the lease only after the deferred copy is durable.
        self.ack(message_id).await?;

        info!(
            "Deferred job {} for {}ms (message {})",
            job.job_id,
            delay.as_millis(),
            message_id
        );
        Ok(())
    }

    async fn claim_stale(
        &self,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> QueueResult<Vec<LeasedMessage>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: redis::streams::StreamAutoClaimReply = redis::cmd("XAUTOCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg(min_idle.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        let mut leased = Vec::new();
        for entry in result.claimed {
            let message_id = entry.id.clone();
            match self.parse_entry(&message_id, &entry.map) {
                Some(job) => {
                    info!("Claimed stale job {} ({})", job.job_id, message_id);
                    leased.push(LeasedMessage { message_id, job });
                }
                None => {
                    self.ack(&message_id).await.ok();
                }
            }
        }

        Ok(leased)
    }

    async fn promote_due(&self) -> QueueResult<u32> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let now = Utc::now().timestamp_millis();
        let promoted: u32 = Script::new(PROMOTE_SCRIPT)
            .key(&self.config.delayed_set)
            .key(&self.config.stream_name)
            .arg(now)
            .arg(16)
            .invoke_async(&mut conn)
            .await?;

        if promoted > 0 {
            debug!("Promoted {} deferred messages", promoted);
        }
        Ok(promoted)
    }

    async fn cancel(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;
        info!("Cancelled queued message {}", message_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_visibility_exceeds_video_worst_case() {
        let config = QueueConfig::default();
        assert!(config.visibility_timeout >= Duration::from_secs(600));
    }

    #[test]
    fn test_promotion_claims_and_readds_in_one_script() {
        // Both sides of the move must stay in the same script; split
        // calls reopen the crash window that loses a deferred retry.
        assert!(PROMOTE_SCRIPT.contains("ZREM"));
        assert!(PROMOTE_SCRIPT.contains("XADD"));
        assert!(PROMOTE_SCRIPT.contains("ZRANGEBYSCORE"));
    }
}
