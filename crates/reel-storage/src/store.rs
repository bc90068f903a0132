//! The `BlobStore` seam.
//!
//! The pipeline never names the S3 client directly: the worker, publisher,
//! and orchestrator hold `Arc<dyn BlobStore>` so storage can be swapped in
//! tests without a live endpoint.

use std::path::Path;

use async_trait::async_trait;

use crate::client::S3Client;
use crate::error::StorageResult;

/// Minimal object-store surface the pipeline depends on.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload a local file to `key`.
    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> StorageResult<()>;

    /// Upload raw bytes to `key`.
    async fn put_bytes(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> StorageResult<()>;

    /// Download `key` to a local file.
    async fn fetch_file(&self, key: &str, path: &Path) -> StorageResult<()>;

    /// Check whether `key` exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Delete the given keys. Returns the number requested for deletion.
    async fn delete(&self, keys: &[String]) -> StorageResult<u32>;
}

#[async_trait]
impl BlobStore for S3Client {
    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> StorageResult<()> {
        self.upload_file(path, key, content_type).await
    }

    async fn put_bytes(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> StorageResult<()> {
        self.upload_bytes(bytes, key, content_type).await
    }

    async fn fetch_file(&self, key: &str, path: &Path) -> StorageResult<()> {
        self.download_file(key, path).await
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        S3Client::exists(self, key).await
    }

    async fn delete(&self, keys: &[String]) -> StorageResult<u32> {
        self.delete_objects(keys).await
    }
}
