//! Filesystem-backed object store with per-object metadata sidecars

use super::traits::{ObjectStore, StoreError, StoreObjectRequest};
use crate::types::{ObjectMetadata, S3STUB_TOOL};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::fs;
use tokio_util::io::ReaderStream;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Name of the finalized data file inside an object directory.
const DATA_FILE: &str = "data.bin";
/// Metadata sidecar name, next to the data file.
const META_FILE: &str = "data.bin.meta";

/// Async-safe path existence check (avoids blocking the Tokio runtime)
async fn path_exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

/// Async-safe directory check
async fn is_dir(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

/// ENOSPC raw error code on Linux and macOS.
const ENOSPC: i32 = 28;

/// Convert an io::Error into StoreError, detecting disk-full (ENOSPC).
fn io_to_store_error(e: std::io::Error) -> StoreError {
    if e.raw_os_error() == Some(ENOSPC) {
        StoreError::DiskFull
    } else {
        StoreError::Io(e)
    }
}

/// Atomically write data to a file using write-to-temp + fsync + rename.
async fn atomic_write(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let parent = path
        .parent()
        .ok_or_else(|| StoreError::Other("Cannot atomic-write to a path with no parent".into()))?
        .to_path_buf();
    let path = path.to_path_buf();
    let data = data.to_vec();

    tokio::task::spawn_blocking(move || {
        let mut tmp = NamedTempFile::new_in(&parent).map_err(io_to_store_error)?;
        tmp.write_all(&data).map_err(io_to_store_error)?;
        tmp.as_file().sync_all().map_err(io_to_store_error)?;
        tmp.persist(&path)
            .map_err(|e| io_to_store_error(e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| StoreError::Other(format!("spawn_blocking join failed: {}", e)))?
}

/// Filesystem object store
///
/// Storage layout:
/// ```text
/// {root}/{bucket}/{object_id}/data.bin        # Finalized object data
/// {root}/{bucket}/{object_id}/data.bin.meta   # Object metadata (JSON)
/// {root}/{bucket}/{object_id}/{upload_id}/    # Multipart staging (engine-owned)
/// ```
///
/// Each bucket is a real subdirectory under the root. The key → object id
/// index lives in memory and is rebuilt from the sidecars at startup.
pub struct FilesystemStore {
    root: PathBuf,
    index: DashMap<String, DashMap<String, Uuid>>,
}

impl FilesystemStore {
    /// Open a store rooted at `root`, creating the directory if needed and
    /// rehydrating the key index from metadata sidecars on disk.
    pub async fn open(root: PathBuf) -> Result<Self, StoreError> {
        fs::create_dir_all(&root).await?;
        let store = Self {
            root,
            index: DashMap::new(),
        };
        store.rehydrate().await?;
        Ok(store)
    }

    fn object_dir(&self, bucket: &str, object_id: Uuid) -> PathBuf {
        self.root.join(bucket).join(object_id.to_string())
    }

    fn meta_path(&self, bucket: &str, object_id: Uuid) -> PathBuf {
        self.object_dir(bucket, object_id).join(META_FILE)
    }

    /// Rebuild the key index by scanning `<bucket>/<object_id>/data.bin.meta`
    /// sidecars. Staging directories and unparsable entries are skipped.
    async fn rehydrate(&self) -> Result<(), StoreError> {
        let mut buckets = fs::read_dir(&self.root).await?;
        while let Some(bucket_entry) = buckets.next_entry().await? {
            if !bucket_entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(bucket) = bucket_entry.file_name().to_str().map(str::to_string) else {
                continue;
            };

            let mut found = Vec::new();
            let mut objects = fs::read_dir(bucket_entry.path()).await?;
            while let Some(object_entry) = objects.next_entry().await? {
                let Some(object_id) = object_entry
                    .file_name()
                    .to_str()
                    .and_then(|name| Uuid::parse_str(name).ok())
                else {
                    continue;
                };
                let meta_path = object_entry.path().join(META_FILE);
                match self.read_metadata(&meta_path).await {
                    Ok(meta) => found.push((meta.key, object_id)),
                    Err(StoreError::NotFound(_)) => {}
                    Err(e) => {
                        warn!("Skipping unreadable sidecar {:?}: {}", meta_path, e);
                    }
                }
            }

            let bucket_index = self.index.entry(bucket).or_default();
            for (key, object_id) in found {
                bucket_index.insert(key, object_id);
            }
        }
        let total: usize = self.index.iter().map(|b| b.value().len()).sum();
        if total > 0 {
            debug!("Rehydrated {} objects from {:?}", total, self.root);
        }
        Ok(())
    }

    /// Read metadata from a .meta sidecar
    async fn read_metadata(&self, meta_path: &Path) -> Result<ObjectMetadata, StoreError> {
        if !path_exists(meta_path).await {
            return Err(StoreError::NotFound(meta_path.display().to_string()));
        }
        let data = fs::read(meta_path).await?;
        let metadata: ObjectMetadata = serde_json::from_slice(&data)?;
        Ok(metadata)
    }

    /// Write metadata to a .meta sidecar
    async fn write_metadata(
        &self,
        meta_path: &Path,
        metadata: &ObjectMetadata,
    ) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(metadata)?;
        atomic_write(meta_path, &data).await?;
        debug!("Wrote metadata to {:?}", meta_path);
        Ok(())
    }

    async fn require_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        if !is_dir(&self.bucket_path(bucket)).await {
            return Err(StoreError::BucketNotFound(bucket.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FilesystemStore {
    // === Bucket operations ===

    #[instrument(skip(self))]
    async fn create_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        let bucket_dir = self.bucket_path(bucket);
        fs::create_dir_all(&bucket_dir).await?;
        self.index.entry(bucket.to_string()).or_default();
        debug!("Created bucket directory: {:?}", bucket_dir);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        let bucket_dir = self.bucket_path(bucket);
        if !path_exists(&bucket_dir).await {
            return Err(StoreError::BucketNotFound(bucket.to_string()));
        }
        let occupied = self
            .index
            .get(bucket)
            .map(|entry| !entry.value().is_empty())
            .unwrap_or(false);
        if occupied {
            return Err(StoreError::BucketNotEmpty(bucket.to_string()));
        }
        self.index.remove(bucket);
        fs::remove_dir_all(&bucket_dir).await?;
        debug!("Deleted bucket directory: {:?}", bucket_dir);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_buckets(&self) -> Result<Vec<String>, StoreError> {
        let mut buckets = Vec::new();
        if !path_exists(&self.root).await {
            return Ok(buckets);
        }
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    buckets.push(name.to_string());
                }
            }
        }
        buckets.sort();
        Ok(buckets)
    }

    #[instrument(skip(self))]
    async fn head_bucket(&self, bucket: &str) -> Result<bool, StoreError> {
        Ok(is_dir(&self.bucket_path(bucket)).await)
    }

    fn bucket_path(&self, bucket: &str) -> PathBuf {
        self.root.join(bucket)
    }

    // === Object operations ===

    #[instrument(skip(self, request), fields(bucket = %request.bucket, key = %request.key))]
    async fn store_object(&self, request: StoreObjectRequest) -> Result<ObjectMetadata, StoreError> {
        self.require_bucket(&request.bucket).await?;

        let object_dir = self.object_dir(&request.bucket, request.object_id);
        fs::create_dir_all(&object_dir).await.map_err(io_to_store_error)?;

        let data_path = object_dir.join(DATA_FILE);
        let size = fs::metadata(&request.source_path).await?.len();
        // Same filesystem by construction, so this is an atomic rename.
        fs::rename(&request.source_path, &data_path)
            .await
            .map_err(io_to_store_error)?;

        if !request.tags.is_empty() {
            debug!(
                "Ignoring {} object tag(s) for {}/{}",
                request.tags.len(),
                request.bucket,
                request.key
            );
        }

        let metadata = ObjectMetadata {
            tool: S3STUB_TOOL.to_string(),
            object_id: request.object_id,
            key: request.key.clone(),
            etag: request.etag,
            size,
            last_modified: Utc::now(),
            content_type: request.content_type,
            user_metadata: request.user_metadata,
            store_headers: request.store_headers,
            encryption_headers: request.encryption_headers,
            checksum: request.checksum,
            checksum_algorithm: request.checksum_algorithm,
            storage_class: request.storage_class,
            owner: request.owner,
        };
        self.write_metadata(&self.meta_path(&request.bucket, request.object_id), &metadata)
            .await?;

        // Swap the index entry; an overwritten key leaves an orphaned object
        // directory behind, removed best-effort once the new one is live.
        let previous = self
            .index
            .entry(request.bucket.clone())
            .or_default()
            .insert(request.key.clone(), request.object_id);
        if let Some(old_id) = previous.filter(|old_id| *old_id != request.object_id) {
            let old_dir = self.object_dir(&request.bucket, old_id);
            if let Err(e) = fs::remove_dir_all(&old_dir).await {
                warn!("Failed to remove replaced object dir {:?}: {}", old_dir, e);
            }
        }

        debug!(
            "Stored {}/{} ({} bytes) as {}",
            request.bucket, request.key, size, request.object_id
        );
        Ok(metadata)
    }

    #[instrument(skip(self))]
    async fn object_metadata(
        &self,
        bucket: &str,
        object_id: Uuid,
    ) -> Result<ObjectMetadata, StoreError> {
        self.read_metadata(&self.meta_path(bucket, object_id))
            .await
            .map_err(|e| match e {
                StoreError::NotFound(_) => {
                    StoreError::NotFound(format!("{}/{}", bucket, object_id))
                }
                other => other,
            })
    }

    fn data_path(&self, bucket: &str, object_id: Uuid) -> PathBuf {
        self.object_dir(bucket, object_id).join(DATA_FILE)
    }

    fn resolve_key(&self, bucket: &str, key: &str) -> Option<Uuid> {
        self.index.get(bucket)?.value().get(key).map(|id| *id)
    }

    #[instrument(skip(self))]
    async fn open_object(
        &self,
        bucket: &str,
        object_id: Uuid,
    ) -> Result<BoxStream<'static, Result<Bytes, StoreError>>, StoreError> {
        let data_path = self.data_path(bucket, object_id);
        if !path_exists(&data_path).await {
            return Err(StoreError::NotFound(format!("{}/{}", bucket, object_id)));
        }
        let file = fs::File::open(&data_path).await?;
        let stream = ReaderStream::new(file).map(|result| result.map_err(StoreError::Io));
        debug!("Opened object stream for {}/{}", bucket, object_id);
        Ok(Box::pin(stream))
    }

    #[instrument(skip(self))]
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        let object_id = self
            .index
            .get(bucket)
            .and_then(|entry| entry.value().remove(key).map(|(_, id)| id))
            .ok_or_else(|| StoreError::NotFound(format!("{}/{}", bucket, key)))?;

        let object_dir = self.object_dir(bucket, object_id);
        if path_exists(&object_dir).await {
            fs::remove_dir_all(&object_dir).await?;
        }
        debug!("Deleted {}/{} ({})", bucket, key, object_id);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectMetadata>, StoreError> {
        self.require_bucket(bucket).await?;

        let ids: Vec<Uuid> = match self.index.get(bucket) {
            Some(entry) => entry
                .value()
                .iter()
                .filter(|kv| kv.key().starts_with(prefix))
                .map(|kv| *kv.value())
                .collect(),
            None => Vec::new(),
        };

        let mut objects = Vec::with_capacity(ids.len());
        for object_id in ids {
            match self.object_metadata(bucket, object_id).await {
                Ok(meta) => objects.push(meta),
                // Raced with a concurrent delete; skip.
                Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    #[instrument(skip(self))]
    async fn materialize_part(&self, source: &Path, dest: &Path) -> Result<u64, StoreError> {
        fs::copy(source, dest).await.map_err(io_to_store_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Owner, StorageClass};
    use std::collections::HashMap;

    async fn store_bytes(
        store: &FilesystemStore,
        bucket: &str,
        key: &str,
        data: &[u8],
    ) -> ObjectMetadata {
        let object_id = Uuid::new_v4();
        let staged = store.bucket_path(bucket).join(format!("{}.staged", object_id));
        fs::write(&staged, data).await.expect("stage payload");

        store
            .store_object(StoreObjectRequest {
                bucket: bucket.to_string(),
                object_id,
                key: key.to_string(),
                content_type: None,
                store_headers: HashMap::new(),
                source_path: staged,
                user_metadata: HashMap::new(),
                encryption_headers: HashMap::new(),
                etag: crate::checksums::md5_hex(data),
                tags: Vec::new(),
                checksum: None,
                checksum_algorithm: None,
                owner: Owner::default(),
                storage_class: StorageClass::Standard,
            })
            .await
            .expect("store object")
    }

    #[tokio::test]
    async fn test_bucket_lifecycle() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FilesystemStore::open(dir.path().to_path_buf())
            .await
            .expect("open store");

        store.create_bucket("pail").await.expect("create");
        assert!(store.head_bucket("pail").await.expect("head"));
        assert_eq!(store.list_buckets().await.expect("list"), vec!["pail"]);

        store.delete_bucket("pail").await.expect("delete");
        assert!(!store.head_bucket("pail").await.expect("head"));
        assert!(matches!(
            store.delete_bucket("pail").await,
            Err(StoreError::BucketNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_store_and_fetch_object() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FilesystemStore::open(dir.path().to_path_buf())
            .await
            .expect("open store");
        store.create_bucket("pail").await.expect("create");

        let meta = store_bytes(&store, "pail", "a/b.txt", b"payload").await;
        assert_eq!(meta.size, 7);

        let object_id = store.resolve_key("pail", "a/b.txt").expect("resolved");
        assert_eq!(object_id, meta.object_id);

        let fetched = store.object_metadata("pail", object_id).await.expect("meta");
        assert_eq!(fetched.etag, meta.etag);

        let mut stream = store.open_object("pail", object_id).await.expect("open");
        let mut data = Vec::new();
        while let Some(chunk) = stream.next().await {
            data.extend_from_slice(&chunk.expect("chunk"));
        }
        assert_eq!(data, b"payload");
    }

    #[tokio::test]
    async fn test_overwrite_replaces_object_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FilesystemStore::open(dir.path().to_path_buf())
            .await
            .expect("open store");
        store.create_bucket("pail").await.expect("create");

        let first = store_bytes(&store, "pail", "k", b"one").await;
        let second = store_bytes(&store, "pail", "k", b"two").await;
        assert_ne!(first.object_id, second.object_id);

        assert_eq!(store.resolve_key("pail", "k"), Some(second.object_id));
        assert!(!path_exists(&store.data_path("pail", first.object_id)).await);
    }

    #[tokio::test]
    async fn test_delete_object() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FilesystemStore::open(dir.path().to_path_buf())
            .await
            .expect("open store");
        store.create_bucket("pail").await.expect("create");
        store_bytes(&store, "pail", "gone.txt", b"x").await;

        store.delete_object("pail", "gone.txt").await.expect("delete");
        assert_eq!(store.resolve_key("pail", "gone.txt"), None);
        assert!(matches!(
            store.delete_object("pail", "gone.txt").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_bucket_requires_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FilesystemStore::open(dir.path().to_path_buf())
            .await
            .expect("open store");
        store.create_bucket("pail").await.expect("create");
        store_bytes(&store, "pail", "k", b"data").await;

        assert!(matches!(
            store.delete_bucket("pail").await,
            Err(StoreError::BucketNotEmpty(_))
        ));
        store.delete_object("pail", "k").await.expect("delete");
        store.delete_bucket("pail").await.expect("delete bucket");
    }

    #[tokio::test]
    async fn test_list_objects_prefix_and_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FilesystemStore::open(dir.path().to_path_buf())
            .await
            .expect("open store");
        store.create_bucket("pail").await.expect("create");
        store_bytes(&store, "pail", "logs/b.log", b"b").await;
        store_bytes(&store, "pail", "logs/a.log", b"a").await;
        store_bytes(&store, "pail", "docs/readme", b"r").await;

        let listed = store.list_objects("pail", "logs/").await.expect("list");
        let keys: Vec<&str> = listed.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(keys, vec!["logs/a.log", "logs/b.log"]);
    }

    #[tokio::test]
    async fn test_rehydrate_rebuilds_index() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().to_path_buf();
        let object_id;
        {
            let store = FilesystemStore::open(root.clone()).await.expect("open");
            store.create_bucket("pail").await.expect("create");
            object_id = store_bytes(&store, "pail", "kept.txt", b"kept").await.object_id;
        }

        let reopened = FilesystemStore::open(root).await.expect("reopen");
        assert_eq!(reopened.resolve_key("pail", "kept.txt"), Some(object_id));
    }
}
