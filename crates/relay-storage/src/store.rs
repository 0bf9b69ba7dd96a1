//! Object store seam.

use std::path::Path;

use async_trait::async_trait;

use crate::error::StorageResult;

/// Reference to a stored object returned by an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Object key within the media bucket
    pub key: String,
    /// Size of the stored object in bytes
    pub size_bytes: u64,
}

/// Durable object storage. Uploads under a given key overwrite, so
/// retrying an upload is always safe.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload a local file under `key` with the given content type.
    /// Objects are immutable once written under a key and are served
    /// with long-cache headers.
    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> StorageResult<StoredObject>;

    /// Delete every object under `prefix`. Used when a job's variants
    /// are regenerated or discarded.
    async fn delete_prefix(&self, prefix: &str) -> StorageResult<u32>;

    /// Whether an object exists under `key`.
    async fn exists(&self, key: &str) -> StorageResult<bool>;
}
