//! Redis-backed job record store.
//!
//! Records are stored as whole JSON values and every transition is a
//! compare-and-set on the previously read bytes, so concurrent writers
//! (duplicate deliveries, reconcilers) can never interleave partial
//! updates or resurrect a terminal record.

use async_trait::async_trait;
use redis::{AsyncCommands, Script};
use tracing::debug;

use relay_models::job::StateError;
use relay_models::{JobError, JobId, MediaJob, Variant};

use crate::error::{StoreError, StoreResult};
use crate::retry::{with_retry, RetryConfig};
use crate::store::JobStore;

/// Attempts for one compare-and-set loop before giving up.
const CAS_ATTEMPTS: u32 = 5;

const CAS_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2])
    return 1
else
    return 0
end
"#;

/// Redis-backed implementation of [`JobStore`].
pub struct RedisJobStore {
    client: redis::Client,
    retry: RetryConfig,
}

impl RedisJobStore {
    pub fn new(redis_url: &str) -> StoreResult<Self> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
            retry: RetryConfig::default(),
        })
    }

    pub fn from_env() -> StoreResult<Self> {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        Self::new(&url)
    }

    fn record_key(id: &JobId) -> String {
        format!("relay:job:{}", id)
    }

    fn cancel_key(id: &JobId) -> String {
        format!("relay:job:{}:cancel", id)
    }

    async fn load(&self, id: &JobId) -> StoreResult<(MediaJob, String)> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw: Option<String> = conn.get(Self::record_key(id)).await?;
        let raw = raw.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let job: MediaJob = serde_json::from_str(&raw)?;
        Ok((job, raw))
    }

    /// Read-modify-write with a compare-and-set on the serialized
    /// record. `apply` enforces the state machine; a terminal
    /// rejection propagates unchanged so callers can treat it as a
    /// duplicate-delivery no-op.
    async fn update<F>(&self, id: &JobId, apply: F) -> StoreResult<MediaJob>
    where
        F: Fn(&mut MediaJob) -> Result<(), StateError>,
    {
        for _ in 0..CAS_ATTEMPTS {
            let (mut job, old_raw) = self.load(id).await?;
            apply(&mut job)?;
            let new_raw = serde_json::to_string(&job)?;

            let mut conn = self.client.get_multiplexed_async_connection().await?;
            let swapped: i32 = Script::new(CAS_SCRIPT)
                .key(Self::record_key(id))
                .arg(&old_raw)
                .arg(&new_raw)
                .invoke_async(&mut conn)
                .await?;

            if swapped == 1 {
                debug!("Job {} -> {}", id, job.state);
                return Ok(job);
            }
            // Lost the race; reload and re-apply.
        }

        Err(StoreError::Conflict(id.to_string()))
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn create(&self, job: &MediaJob) -> StoreResult<()> {
        let raw = serde_json::to_string(job)?;
        let key = Self::record_key(&job.id);
        with_retry(&self.retry, "create", || {
            let raw = raw.clone();
            let key = key.clone();
            async move {
                let mut conn = self.client.get_multiplexed_async_connection().await?;
                let created: bool = redis::cmd("SET")
                    .arg(&key)
                    .arg(&raw)
                    .arg("NX")
                    .query_async(&mut conn)
                    .await?;
                if created {
                    Ok(())
                } else {
                    Err(StoreError::AlreadyExists(job.id.to_string()))
                }
            }
        })
        .await
    }

    async fn get(&self, id: &JobId) -> StoreResult<MediaJob> {
        with_retry(&self.retry, "get", || async move {
            self.load(id).await.map(|(job, _)| job)
        })
        .await
    }

    async fn mark_processing(&self, id: &JobId) -> StoreResult<MediaJob> {
        self.update(id, |job| job.start_processing()).await
    }

    async fn complete(&self, id: &JobId, variants: Vec<Variant>) -> StoreResult<MediaJob> {
        self.update(id, |job| job.complete(variants.clone())).await
    }

    async fn fail(&self, id: &JobId, error: JobError) -> StoreResult<MediaJob> {
        self.update(id, |job| job.fail(error.clone())).await
    }

    async fn reprocess(&self, id: &JobId) -> StoreResult<MediaJob> {
        self.update(id, |job| job.reprocess()).await
    }

    async fn request_cancel(&self, id: &JobId) -> StoreResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        // Flag expires with the longest plausible job lifetime.
        conn.set_ex::<_, _, ()>(Self::cancel_key(id), "1", 86400)
            .await?;
        Ok(())
    }

    async fn cancel_requested(&self, id: &JobId) -> StoreResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let flagged: bool = conn.exists(Self::cancel_key(id)).await?;
        Ok(flagged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let id = JobId::from_string("abc");
        assert_eq!(RedisJobStore::record_key(&id), "relay:job:abc");
        assert_eq!(RedisJobStore::cancel_key(&id), "relay:job:abc:cancel");
    }
}
