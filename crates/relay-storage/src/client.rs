//! S3-compatible storage client.

use std::path::Path;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::store::{ObjectStore, StoredObject};

/// Variants are immutable once written under a key, so downstream
/// caches may hold them indefinitely.
const CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

/// Configuration for the storage client.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// S3 API endpoint URL
    pub endpoint_url: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Bucket holding all media variants
    pub bucket_name: String,
    /// Region ("auto" for R2-style providers)
    pub region: String,
}

impl S3Config {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self {
            endpoint_url: std::env::var("S3_ENDPOINT_URL")
                .map_err(|_| StorageError::config_error("S3_ENDPOINT_URL not set"))?,
            access_key_id: std::env::var("S3_ACCESS_KEY_ID")
                .map_err(|_| StorageError::config_error("S3_ACCESS_KEY_ID not set"))?,
            secret_access_key: std::env::var("S3_SECRET_ACCESS_KEY")
                .map_err(|_| StorageError::config_error("S3_SECRET_ACCESS_KEY not set"))?,
            bucket_name: std::env::var("S3_BUCKET_NAME").unwrap_or_else(|_| "media".to_string()),
            region: std::env::var("S3_REGION").unwrap_or_else(|_| "auto".to_string()),
        })
    }
}

/// S3-compatible media storage client.
#[derive(Clone)]
pub struct S3MediaStore {
    client: Client,
    bucket: String,
    bucket_ready: std::sync::Arc<OnceCell<()>>,
}

impl S3MediaStore {
    /// Create a new client from configuration.
    pub fn new(config: S3Config) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "relay-media",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(sdk_config),
            bucket: config.bucket_name,
            bucket_ready: std::sync::Arc::new(OnceCell::new()),
        }
    }

    /// Create from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self::new(S3Config::from_env()?))
    }

    /// Verify the bucket exists, creating it if absent. Guarded by a
    /// OnceCell so the check runs once per process, not per upload.
    pub async fn ensure_bucket(&self) -> StorageResult<()> {
        self.bucket_ready
            .get_or_try_init(|| async {
                match self.client.head_bucket().bucket(&self.bucket).send().await {
                    Ok(_) => {
                        debug!("Bucket {} exists", self.bucket);
                        Ok(())
                    }
                    Err(head_err) => {
                        debug!("Bucket {} not reachable, attempting create", self.bucket);
                        match self
                            .client
                            .create_bucket()
                            .bucket(&self.bucket)
                            .send()
                            .await
                        {
                            Ok(_) => {
                                info!("Created bucket {}", self.bucket);
                                Ok(())
                            }
                            Err(e) if already_exists(&e.to_string()) => Ok(()),
                            Err(e) => Err(StorageError::BucketCheckFailed(format!(
                                "head: {}; create: {}",
                                head_err, e
                            ))),
                        }
                    }
                }
            })
            .await
            .map(|_| ())
    }
}

fn already_exists(msg: &str) -> bool {
    msg.contains("BucketAlreadyOwnedByYou") || msg.contains("BucketAlreadyExists")
}

fn classify_upload_error(msg: String) -> StorageError {
    if msg.contains("QuotaExceeded") || msg.contains("EntityTooLarge") {
        StorageError::QuotaExceeded(msg)
    } else {
        StorageError::UploadFailed(msg)
    }
}

#[async_trait]
impl ObjectStore for S3MediaStore {
    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> StorageResult<StoredObject> {
        self.ensure_bucket().await?;

        let size_bytes = tokio::fs::metadata(path).await?.len();
        debug!("Uploading {} ({} bytes) to {}", path.display(), size_bytes, key);

        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .cache_control(CACHE_CONTROL)
            .send()
            .await
            .map_err(|e| classify_upload_error(e.to_string()))?;

        info!("Uploaded {} to {}", path.display(), key);
        Ok(StoredObject {
            key: key.to_string(),
            size_bytes,
        })
    }

    async fn delete_prefix(&self, prefix: &str) -> StorageResult<u32> {
        let listed = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .send()
            .await
            .map_err(|e| StorageError::delete_failed(e.to_string()))?;

        let keys: Vec<String> = listed
            .contents
            .unwrap_or_default()
            .into_iter()
            .filter_map(|o| o.key)
            .collect();

        if keys.is_empty() {
            return Ok(0);
        }

        let objects: Vec<_> = keys
            .iter()
            .map(|k| {
                aws_sdk_s3::types::ObjectIdentifier::builder()
                    .key(k)
                    .build()
                    .map_err(|e| StorageError::delete_failed(e.to_string()))
            })
            .collect::<StorageResult<_>>()?;

        let delete = aws_sdk_s3::types::Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .map_err(|e| StorageError::delete_failed(e.to_string()))?;

        self.client
            .delete_objects()
            .bucket(&self.bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| StorageError::delete_failed(e.to_string()))?;

        info!("Deleted {} objects under {}", keys.len(), prefix);
        Ok(keys.len() as u32)
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let service_err = e.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(StorageError::BucketCheckFailed(service_err.to_string()))
                }
            }
        }
    }
}
