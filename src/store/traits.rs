//! Object store trait definitions

use crate::checksums::ChecksumAlgorithm;
use crate::types::{ObjectMetadata, Owner, StorageClass};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    #[error("Bucket not empty: {0}")]
    BucketNotEmpty(String),

    #[error("Bucket already exists: {0}")]
    BucketAlreadyExists(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Disk full: insufficient storage space")]
    DiskFull,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Other(String),
}

/// Everything needed to install an assembled payload as a finalized object.
///
/// `source_path` is a fully written file on the same filesystem as the store
/// root; installation renames it into place, so the caller's temp-file guard
/// finds nothing left to clean up on success.
#[derive(Debug)]
pub struct StoreObjectRequest {
    pub bucket: String,
    pub object_id: Uuid,
    pub key: String,
    pub content_type: Option<String>,
    pub store_headers: HashMap<String, String>,
    pub source_path: PathBuf,
    pub user_metadata: HashMap<String, String>,
    pub encryption_headers: HashMap<String, String>,
    /// ETag without quotes, already in its final form (multipart or KMS
    /// suffixes included).
    pub etag: String,
    /// Object tags from the request. Accepted for contract compatibility and
    /// not persisted; the mock has no tagging surface.
    pub tags: Vec<(String, String)>,
    pub checksum: Option<String>,
    pub checksum_algorithm: Option<ChecksumAlgorithm>,
    pub owner: Owner,
    pub storage_class: StorageClass,
}

/// Abstract store for finalized objects and the bucket directories that hold
/// them. The multipart engine consumes this contract; handlers use the wider
/// lookup/listing surface.
///
/// This trait is object-safe and used as `Arc<dyn ObjectStore>`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    // === Bucket operations ===

    /// Create a new bucket
    async fn create_bucket(&self, bucket: &str) -> Result<(), StoreError>;

    /// Delete a bucket (must be empty)
    async fn delete_bucket(&self, bucket: &str) -> Result<(), StoreError>;

    /// List all bucket names
    async fn list_buckets(&self) -> Result<Vec<String>, StoreError>;

    /// Check if a bucket exists
    async fn head_bucket(&self, bucket: &str) -> Result<bool, StoreError>;

    /// Directory holding a bucket's objects. Purely path arithmetic; the
    /// directory may not exist.
    fn bucket_path(&self, bucket: &str) -> PathBuf;

    // === Object operations ===

    /// Atomically install the payload at `source_path` as the object's data
    /// file and record its metadata sidecar. Replaces any object previously
    /// stored under the same key.
    async fn store_object(&self, request: StoreObjectRequest) -> Result<ObjectMetadata, StoreError>;

    /// Look up metadata by internal id.
    async fn object_metadata(
        &self,
        bucket: &str,
        object_id: Uuid,
    ) -> Result<ObjectMetadata, StoreError>;

    /// Filesystem path of an object's data file. Purely path arithmetic.
    fn data_path(&self, bucket: &str, object_id: Uuid) -> PathBuf;

    /// Resolve a user-visible key to the object's internal id.
    fn resolve_key(&self, bucket: &str, key: &str) -> Option<Uuid>;

    /// Stream an object's data without buffering the whole file.
    async fn open_object(
        &self,
        bucket: &str,
        object_id: Uuid,
    ) -> Result<BoxStream<'static, Result<Bytes, StoreError>>, StoreError>;

    /// Delete an object by key.
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError>;

    /// List objects in a bucket filtered by key prefix, sorted by key.
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectMetadata>, StoreError>;

    /// Copy/rename a fully written payload file into a staging part location.
    /// Returns the number of bytes materialized.
    async fn materialize_part(&self, source: &Path, dest: &Path) -> Result<u64, StoreError>;
}
