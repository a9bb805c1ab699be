//! File-backed multipart upload state management
//!
//! Parts are staged as individual `<partNumber>.part` files under
//! `<bucket>/<objectId>/<uploadId>/` until CompleteMultipartUpload assembles
//! them and installs the result through the object store. Uploads are
//! ephemeral — the registry is process-local and lost on restart; clients
//! handle this gracefully.
//!
//! Terminal transitions are serialized by a per-upload token: complete and
//! abort take the token, re-check that the upload is still registered, do
//! their I/O, and unregister before touching the staging directory. A
//! concurrent abort during complete (or vice versa) therefore fails with
//! `NoSuchUpload` instead of corrupting state.

use crate::api::S3Error;
use crate::checksums::{self, ChecksumAlgorithm};
use crate::store::{ObjectStore, StoreError, StoreObjectRequest};
use crate::types::{headers, ObjectMetadata, Owner, StorageClass};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::BoxStream;
use futures::StreamExt;
use md5::{Digest, Md5};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

/// Highest part number S3 accepts.
pub const MAX_PART_NUMBER: u32 = 10_000;

/// Read/write buffer size for part staging and assembly.
const COPY_BUF_SIZE: usize = 64 * 1024;

/// Byte stream feeding a part upload. The body may already have been run
/// through the aws-chunked decoder by the HTTP layer.
pub type PartPayload = BoxStream<'static, Result<Bytes, S3Error>>;

/// Externally visible upload descriptor.
#[derive(Debug, Clone)]
pub struct MultipartUpload {
    pub key: String,
    pub upload_id: String,
    pub owner: Owner,
    pub initiator: Owner,
    pub storage_class: StorageClass,
    pub initiated: DateTime<Utc>,
}

/// Full registration record for an in-progress upload.
#[derive(Debug, Clone)]
pub struct MultipartUploadInfo {
    pub upload: MultipartUpload,
    pub bucket: String,
    pub object_id: Uuid,
    pub content_type: Option<String>,
    pub user_metadata: HashMap<String, String>,
    pub store_headers: HashMap<String, String>,
    pub encryption_headers: HashMap<String, String>,
    pub checksum: Option<String>,
    pub checksum_algorithm: Option<ChecksumAlgorithm>,
}

impl MultipartUploadInfo {
    fn kms_key_id(&self) -> Option<&str> {
        self.encryption_headers
            .get(headers::AMZ_SSE_KMS_KEY_ID)
            .map(String::as_str)
    }
}

/// Everything CreateMultipartUpload captures.
#[derive(Debug)]
pub struct PrepareUpload {
    pub bucket: String,
    pub key: String,
    pub object_id: Uuid,
    pub upload_id: String,
    pub content_type: Option<String>,
    pub user_metadata: HashMap<String, String>,
    pub store_headers: HashMap<String, String>,
    pub encryption_headers: HashMap<String, String>,
    pub owner: Owner,
    pub initiator: Owner,
    pub storage_class: StorageClass,
    pub checksum: Option<String>,
    pub checksum_algorithm: Option<ChecksumAlgorithm>,
}

/// One staged part as reported by ListParts.
#[derive(Debug, Clone)]
pub struct PartInfo {
    pub part_number: u32,
    /// Hex MD5 of the part bytes, KMS-suffixed when applicable. Unquoted.
    pub etag: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// Source designation for UploadPartCopy.
#[derive(Debug, Clone)]
pub struct CopyPartSource {
    pub bucket: String,
    pub object_id: Uuid,
    /// Inclusive byte range; the whole object when absent.
    pub range: Option<(u64, u64)>,
}

/// Result of a successful CompleteMultipartUpload.
#[derive(Debug, Clone)]
pub struct CompletedMultipart {
    /// Multipart ETag, `<hex32>-<count>`, unquoted.
    pub etag: String,
    pub metadata: ObjectMetadata,
}

struct UploadEntry {
    info: MultipartUploadInfo,
    /// Per-upload token serializing terminal transitions.
    gate: tokio::sync::Mutex<()>,
}

/// Removes a partially written file unless disarmed. Covers every early
/// return between file creation and the rename that consumes it.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Thread-safe registry and engine for in-progress multipart uploads.
pub struct MultipartEngine {
    store: Arc<dyn ObjectStore>,
    uploads: DashMap<String, Arc<UploadEntry>>,
}

impl MultipartEngine {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            uploads: DashMap::new(),
        }
    }

    fn staging_dir(&self, info: &MultipartUploadInfo) -> PathBuf {
        self.store
            .bucket_path(&info.bucket)
            .join(info.object_id.to_string())
            .join(&info.upload.upload_id)
    }

    /// Look up a registered upload and validate the bucket/key pair the
    /// client addressed it with.
    fn lookup(&self, upload_id: &str, bucket: &str, key: &str) -> Result<Arc<UploadEntry>, S3Error> {
        let entry = self
            .uploads
            .get(upload_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| S3Error::NoSuchUpload(upload_id.to_string()))?;
        if entry.info.bucket != bucket || entry.info.upload.key != key {
            return Err(S3Error::NoSuchUpload(upload_id.to_string()));
        }
        Ok(entry)
    }

    /// Register a new upload and create its staging directory.
    pub async fn prepare(&self, request: PrepareUpload) -> Result<MultipartUpload, S3Error> {
        let upload = MultipartUpload {
            key: request.key,
            upload_id: request.upload_id,
            owner: request.owner,
            initiator: request.initiator,
            storage_class: request.storage_class,
            initiated: Utc::now(),
        };
        let info = MultipartUploadInfo {
            upload: upload.clone(),
            bucket: request.bucket,
            object_id: request.object_id,
            content_type: request.content_type,
            user_metadata: request.user_metadata,
            store_headers: request.store_headers,
            encryption_headers: request.encryption_headers,
            checksum: request.checksum,
            checksum_algorithm: request.checksum_algorithm,
        };

        // Staging must exist before the upload becomes observable.
        let staging = self.staging_dir(&info);
        fs::create_dir_all(&staging)
            .await
            .map_err(|e| S3Error::InternalError(format!("create staging {:?}: {}", staging, e)))?;

        let entry = Arc::new(UploadEntry {
            info,
            gate: tokio::sync::Mutex::new(()),
        });
        match self.uploads.entry(upload.upload_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                let _ = fs::remove_dir_all(&staging).await;
                Err(S3Error::InternalError(format!(
                    "upload id already registered: {}",
                    upload.upload_id
                )))
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(entry);
                debug!(
                    "Prepared multipart upload {} for key {}",
                    upload.upload_id, upload.key
                );
                Ok(upload)
            }
        }
    }

    /// Fetch the descriptor of a registered upload.
    pub fn get_upload(&self, upload_id: &str) -> Result<MultipartUpload, S3Error> {
        self.uploads
            .get(upload_id)
            .map(|e| e.value().info.upload.clone())
            .ok_or_else(|| S3Error::NoSuchUpload(upload_id.to_string()))
    }

    /// Snapshot of registered uploads, filtered by bucket and key prefix.
    /// Ordered by (key, upload id) so listings are deterministic.
    pub fn list_uploads(&self, bucket: Option<&str>, prefix: Option<&str>) -> Vec<MultipartUpload> {
        let mut result: Vec<MultipartUpload> = self
            .uploads
            .iter()
            .filter(|entry| {
                if let Some(b) = bucket {
                    if entry.value().info.bucket != b {
                        return false;
                    }
                }
                match prefix {
                    Some(p) if !p.is_empty() => entry.value().info.upload.key.starts_with(p),
                    _ => true,
                }
            })
            .map(|entry| entry.value().info.upload.clone())
            .collect();
        result.sort_by(|a, b| a.key.cmp(&b.key).then(a.upload_id.cmp(&b.upload_id)));
        result
    }

    /// Stage one part, overwriting any previous part with the same number.
    /// Returns the part's ETag (hex MD5, KMS-suffixed when applicable).
    pub async fn put_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        mut payload: PartPayload,
    ) -> Result<String, S3Error> {
        check_part_number(part_number)?;
        let entry = self.lookup(upload_id, bucket, key)?;
        let staging = self.staging_dir(&entry.info);

        // Stream into a uniquely named temp file, then rename onto the final
        // part path so same-number races resolve to the last writer.
        let tmp_path = staging.join(format!("{}.tmp-{}", part_number, Uuid::new_v4()));
        let mut guard = TempFileGuard::new(tmp_path.clone());
        let mut file = fs::File::create(&tmp_path)
            .await
            .map_err(|e| put_part_io_error(e, upload_id))?;

        let mut hasher = Md5::new();
        let mut size: u64 = 0;
        while let Some(chunk) = payload.next().await {
            let chunk = chunk?;
            hasher.update(&chunk);
            size += chunk.len() as u64;
            file.write_all(&chunk)
                .await
                .map_err(|e| S3Error::InternalError(format!("write part: {}", e)))?;
        }
        file.flush()
            .await
            .map_err(|e| S3Error::InternalError(format!("flush part: {}", e)))?;
        drop(file);

        let part_path = staging.join(format!("{}.part", part_number));
        fs::rename(&tmp_path, &part_path)
            .await
            .map_err(|e| put_part_io_error(e, upload_id))?;
        guard.disarm();

        let digest: [u8; 16] = hasher.finalize().into();
        let etag = checksums::tagged_etag(hex::encode(digest), entry.info.kms_key_id());
        debug!(
            "Staged part {} ({} bytes) for upload {}",
            part_number, size, upload_id
        );
        Ok(etag)
    }

    /// Stage a part by copying a byte range out of an existing object.
    pub async fn copy_part(
        &self,
        source: CopyPartSource,
        dest_bucket: &str,
        dest_key: &str,
        upload_id: &str,
        part_number: u32,
    ) -> Result<String, S3Error> {
        check_part_number(part_number)?;
        let entry = self.lookup(upload_id, dest_bucket, dest_key)?;
        let staging = self.staging_dir(&entry.info);
        if !fs::try_exists(&staging).await.unwrap_or(false) {
            return Err(S3Error::NoSuchUpload(upload_id.to_string()));
        }

        let source_meta = self
            .store
            .object_metadata(&source.bucket, source.object_id)
            .await
            .map_err(|e| match e {
                StoreError::NotFound(k) => S3Error::NoSuchKey(k),
                other => other.into(),
            })?;
        let source_path = self.store.data_path(&source.bucket, source.object_id);

        let tmp_path = staging.join(format!("{}.tmp-{}", part_number, Uuid::new_v4()));
        let mut guard = TempFileGuard::new(tmp_path.clone());

        let digest: [u8; 16] = match source.range {
            None => {
                self.store
                    .materialize_part(&source_path, &tmp_path)
                    .await
                    .map_err(|e| S3Error::InternalError(format!("copy part: {}", e)))?;
                checksums::file_md5_raw(&tmp_path)
                    .await
                    .map_err(|e| S3Error::InternalError(format!("digest part: {}", e)))?
            }
            Some((start, end)) => {
                if start > end || end >= source_meta.size {
                    return Err(S3Error::InvalidRange(format!(
                        "bytes={}-{} exceeds object of {} bytes",
                        start, end, source_meta.size
                    )));
                }
                copy_file_range(&source_path, &tmp_path, start, end - start + 1)
                    .await
                    .map_err(|e| S3Error::InternalError(format!("copy range: {}", e)))?
            }
        };

        let part_path = staging.join(format!("{}.part", part_number));
        fs::rename(&tmp_path, &part_path)
            .await
            .map_err(|e| put_part_io_error(e, upload_id))?;
        guard.disarm();

        Ok(checksums::tagged_etag(
            hex::encode(digest),
            entry.info.kms_key_id(),
        ))
    }

    /// Scan the staging directory and report the staged parts, ascending by
    /// part number. Part MD5s are recomputed from the files on every call.
    pub async fn list_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<Vec<PartInfo>, S3Error> {
        let entry = self.lookup(upload_id, bucket, key)?;
        let staging = self.staging_dir(&entry.info);
        let kms_key_id = entry.info.kms_key_id();

        let mut dir = fs::read_dir(&staging)
            .await
            .map_err(|_| S3Error::NoSuchUpload(upload_id.to_string()))?;

        let mut parts = Vec::new();
        while let Some(file) = dir
            .next_entry()
            .await
            .map_err(|e| S3Error::InternalError(format!("scan staging: {}", e)))?
        {
            let name = file.file_name();
            let Some(part_number) = name
                .to_str()
                .and_then(|n| n.strip_suffix(".part"))
                .and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };
            let meta = file
                .metadata()
                .await
                .map_err(|e| S3Error::InternalError(format!("stat part: {}", e)))?;
            let md5 = checksums::file_md5_hex(&file.path())
                .await
                .map_err(|e| S3Error::InternalError(format!("digest part: {}", e)))?;
            parts.push(PartInfo {
                part_number,
                etag: checksums::tagged_etag(md5, kms_key_id),
                size: meta.len(),
                last_modified: meta
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now()),
            });
        }
        parts.sort_by_key(|p| p.part_number);
        Ok(parts)
    }

    /// Drop an in-progress upload: unregister it and delete its staging.
    pub async fn abort(&self, bucket: &str, key: &str, upload_id: &str) -> Result<(), S3Error> {
        let entry = self.lookup(upload_id, bucket, key)?;
        let _token = entry.gate.lock().await;

        // A complete (or another abort) may have won the race while we
        // waited for the token.
        if !self.uploads.contains_key(upload_id) {
            return Err(S3Error::NoSuchUpload(upload_id.to_string()));
        }
        self.uploads.remove(upload_id);
        self.remove_upload_files(&entry.info).await;
        debug!("Aborted multipart upload {}", upload_id);
        Ok(())
    }

    /// Assemble the client-listed parts into the final object, install it,
    /// and retire the upload. Returns the multipart ETag.
    pub async fn complete(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        requested_parts: &[(u32, String)],
        encryption_headers: HashMap<String, String>,
    ) -> Result<CompletedMultipart, S3Error> {
        let entry = self.lookup(upload_id, bucket, key)?;
        let _token = entry.gate.lock().await;

        // Re-check under the token; an abort may have retired the upload
        // between lookup and here.
        if !self.uploads.contains_key(upload_id) {
            return Err(S3Error::NoSuchUpload(upload_id.to_string()));
        }

        if requested_parts.is_empty() {
            return Err(S3Error::InvalidPart(
                "You must specify at least one part".to_string(),
            ));
        }
        for window in requested_parts.windows(2) {
            if window[0].0 >= window[1].0 {
                return Err(S3Error::InvalidPartOrder);
            }
        }

        let info = &entry.info;
        let staging = self.staging_dir(info);
        let mut merged_encryption = info.encryption_headers.clone();
        merged_encryption.extend(encryption_headers);
        let kms_key_id = merged_encryption
            .get(headers::AMZ_SSE_KMS_KEY_ID)
            .map(String::as_str);

        // Assemble into a temp file next to the final location; the guard
        // removes it on every failure path before the store takes ownership.
        let object_dir = self
            .store
            .bucket_path(&info.bucket)
            .join(info.object_id.to_string());
        let tmp_path = object_dir.join(format!(".assembly-{}", Uuid::new_v4()));
        let mut guard = TempFileGuard::new(tmp_path.clone());
        let mut assembled = fs::File::create(&tmp_path)
            .await
            .map_err(|e| S3Error::InternalError(format!("create assembly file: {}", e)))?;

        let mut digests: Vec<[u8; 16]> = Vec::with_capacity(requested_parts.len());
        for (part_number, client_etag) in requested_parts {
            let part_path = staging.join(format!("{}.part", part_number));
            let digest = append_part(&part_path, &mut assembled).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    S3Error::InvalidPart(format!("Part {} has not been uploaded", part_number))
                } else {
                    S3Error::InternalError(format!("assemble part {}: {}", part_number, e))
                }
            })?;

            let expected = checksums::tagged_etag(hex::encode(digest), kms_key_id);
            let client = client_etag.trim_matches('"');
            if client != expected {
                return Err(S3Error::InvalidPart(format!(
                    "ETag mismatch for part {}: expected \"{}\", got \"{}\"",
                    part_number, expected, client
                )));
            }
            digests.push(digest);
        }
        assembled
            .flush()
            .await
            .map_err(|e| S3Error::InternalError(format!("flush assembly: {}", e)))?;
        drop(assembled);

        let etag = checksums::multipart_etag(&digests);

        // Failure here leaves the upload registered so the client can retry.
        let metadata = self
            .store
            .store_object(StoreObjectRequest {
                bucket: info.bucket.clone(),
                object_id: info.object_id,
                key: info.upload.key.clone(),
                content_type: info.content_type.clone(),
                store_headers: info.store_headers.clone(),
                source_path: tmp_path.clone(),
                user_metadata: info.user_metadata.clone(),
                encryption_headers: merged_encryption,
                etag: etag.clone(),
                tags: Vec::new(),
                checksum: info.checksum.clone(),
                checksum_algorithm: info.checksum_algorithm,
                owner: info.upload.owner.clone(),
                storage_class: info.upload.storage_class,
            })
            .await?;
        guard.disarm();

        // Unregister before removing staging; cleanup failure is logged but
        // the object already exists, so the operation succeeded.
        self.uploads.remove(upload_id);
        if let Err(e) = fs::remove_dir_all(&staging).await {
            warn!("Failed to remove staging for {}: {}", upload_id, e);
        }

        debug!(
            "Completed multipart upload {} -> {}/{} etag {}",
            upload_id, info.bucket, info.upload.key, etag
        );
        Ok(CompletedMultipart { etag, metadata })
    }

    /// Remove everything an aborted upload staged, including the object
    /// directory when no finalized data file lives there.
    async fn remove_upload_files(&self, info: &MultipartUploadInfo) {
        let object_dir = self
            .store
            .bucket_path(&info.bucket)
            .join(info.object_id.to_string());
        let data_path = self.store.data_path(&info.bucket, info.object_id);

        let target = if fs::try_exists(&data_path).await.unwrap_or(false) {
            self.staging_dir(info)
        } else {
            object_dir
        };
        if let Err(e) = fs::remove_dir_all(&target).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove {:?}: {}", target, e);
            }
        }
    }
}

fn check_part_number(part_number: u32) -> Result<(), S3Error> {
    if !(1..=MAX_PART_NUMBER).contains(&part_number) {
        return Err(S3Error::InvalidArgument(format!(
            "Part number must be an integer between 1 and {}, inclusive",
            MAX_PART_NUMBER
        )));
    }
    Ok(())
}

/// Map part-write I/O failures: a vanished staging directory means the
/// upload was aborted or completed underneath us.
fn put_part_io_error(e: std::io::Error, upload_id: &str) -> S3Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        S3Error::NoSuchUpload(upload_id.to_string())
    } else {
        S3Error::InternalError(format!("stage part: {}", e))
    }
}

/// Append one part file to the assembly target, returning the part's raw MD5.
async fn append_part(
    part_path: &Path,
    assembled: &mut fs::File,
) -> std::io::Result<[u8; 16]> {
    let mut part = fs::File::open(part_path).await?;
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    loop {
        let n = part.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        assembled.write_all(&buf[..n]).await?;
    }
    Ok(hasher.finalize().into())
}

/// Copy `len` bytes starting at `start` from `source` into a new file at
/// `dest`, returning the raw MD5 of the copied range.
async fn copy_file_range(
    source: &Path,
    dest: &Path,
    start: u64,
    len: u64,
) -> std::io::Result<[u8; 16]> {
    use tokio::io::AsyncSeekExt;

    let mut input = fs::File::open(source).await?;
    input.seek(std::io::SeekFrom::Start(start)).await?;
    let mut output = fs::File::create(dest).await?;

    let mut hasher = Md5::new();
    let mut remaining = len;
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = input.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "source shorter than requested range",
            ));
        }
        hasher.update(&buf[..n]);
        output.write_all(&buf[..n]).await?;
        remaining -= n as u64;
    }
    output.flush().await?;
    Ok(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FilesystemStore;

    const BUCKET: &str = "bucket";

    async fn engine() -> (tempfile::TempDir, Arc<FilesystemStore>, Arc<MultipartEngine>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(
            FilesystemStore::open(dir.path().to_path_buf())
                .await
                .expect("open store"),
        );
        store.create_bucket(BUCKET).await.expect("create bucket");
        let engine = Arc::new(MultipartEngine::new(store.clone()));
        (dir, store, engine)
    }

    fn payload(data: Vec<u8>) -> PartPayload {
        futures::stream::iter(vec![Ok(Bytes::from(data))]).boxed()
    }

    fn prepare_request(key: &str, upload_id: &str) -> PrepareUpload {
        PrepareUpload {
            bucket: BUCKET.to_string(),
            key: key.to_string(),
            object_id: Uuid::new_v4(),
            upload_id: upload_id.to_string(),
            content_type: None,
            user_metadata: HashMap::new(),
            store_headers: HashMap::new(),
            encryption_headers: HashMap::new(),
            owner: Owner::default(),
            initiator: Owner::default(),
            storage_class: StorageClass::Standard,
            checksum: None,
            checksum_algorithm: None,
        }
    }

    async fn read_object(store: &FilesystemStore, key: &str) -> Vec<u8> {
        let object_id = store.resolve_key(BUCKET, key).expect("resolved");
        let mut stream = store.open_object(BUCKET, object_id).await.expect("open");
        let mut data = Vec::new();
        while let Some(chunk) = stream.next().await {
            data.extend_from_slice(&chunk.expect("chunk"));
        }
        data
    }

    #[tokio::test]
    async fn test_prepare_and_put_part() {
        let (_dir, _store, engine) = engine().await;
        engine
            .prepare(prepare_request("key.bin", "u1"))
            .await
            .expect("prepare");

        let data = vec![0u8; 1024];
        let etag = engine
            .put_part(BUCKET, "key.bin", "u1", 1, payload(data.clone()))
            .await
            .expect("put part");
        assert_eq!(etag, checksums::md5_hex(&data));
    }

    #[tokio::test]
    async fn test_put_part_unknown_upload() {
        let (_dir, _store, engine) = engine().await;
        let result = engine
            .put_part(BUCKET, "key.bin", "missing", 1, payload(vec![0u8; 16]))
            .await;
        assert!(matches!(result, Err(S3Error::NoSuchUpload(_))));
    }

    #[tokio::test]
    async fn test_invalid_part_number() {
        let (_dir, _store, engine) = engine().await;
        engine
            .prepare(prepare_request("key.bin", "u1"))
            .await
            .expect("prepare");

        for bad in [0u32, 10_001] {
            let result = engine
                .put_part(BUCKET, "key.bin", "u1", bad, payload(vec![0u8; 8]))
                .await;
            assert!(matches!(result, Err(S3Error::InvalidArgument(_))));
        }
    }

    #[tokio::test]
    async fn test_bucket_key_mismatch() {
        let (_dir, store, engine) = engine().await;
        store.create_bucket("other").await.expect("create bucket");
        engine
            .prepare(prepare_request("key.bin", "u1"))
            .await
            .expect("prepare");

        let result = engine
            .put_part("other", "key.bin", "u1", 1, payload(vec![0u8; 8]))
            .await;
        assert!(matches!(result, Err(S3Error::NoSuchUpload(_))));
    }

    #[tokio::test]
    async fn test_complete_roundtrip() {
        let (_dir, store, engine) = engine().await;
        engine
            .prepare(prepare_request("key.bin", "u1"))
            .await
            .expect("prepare");

        let part1 = vec![1u8; 100];
        let part2 = vec![2u8; 200];
        let etag1 = engine
            .put_part(BUCKET, "key.bin", "u1", 1, payload(part1.clone()))
            .await
            .expect("part 1");
        let etag2 = engine
            .put_part(BUCKET, "key.bin", "u1", 2, payload(part2.clone()))
            .await
            .expect("part 2");

        let completed = engine
            .complete(
                BUCKET,
                "key.bin",
                "u1",
                &[(1, etag1), (2, etag2)],
                HashMap::new(),
            )
            .await
            .expect("complete");
        assert!(completed.etag.ends_with("-2"));
        assert_eq!(completed.metadata.size, 300);

        let data = read_object(&store, "key.bin").await;
        assert_eq!(&data[..100], &[1u8; 100][..]);
        assert_eq!(&data[100..], &[2u8; 200][..]);

        // The upload is retired and its staging is gone.
        assert!(matches!(
            engine.get_upload("u1"),
            Err(S3Error::NoSuchUpload(_))
        ));
        assert!(engine.list_uploads(Some(BUCKET), None).is_empty());
    }

    #[tokio::test]
    async fn test_complete_etag_matches_definition() {
        let (_dir, _store, engine) = engine().await;
        engine
            .prepare(prepare_request("key.bin", "u1"))
            .await
            .expect("prepare");

        let part1 = vec![b'a'; 4096];
        let part2 = vec![b'b'; 1024];
        let etag1 = engine
            .put_part(BUCKET, "key.bin", "u1", 1, payload(part1.clone()))
            .await
            .expect("part 1");
        let etag2 = engine
            .put_part(BUCKET, "key.bin", "u1", 2, payload(part2.clone()))
            .await
            .expect("part 2");

        let d1: [u8; 16] = Md5::digest(&part1).into();
        let d2: [u8; 16] = Md5::digest(&part2).into();
        let expected = checksums::multipart_etag(&[d1, d2]);

        let completed = engine
            .complete(
                BUCKET,
                "key.bin",
                "u1",
                &[(1, etag1), (2, etag2)],
                HashMap::new(),
            )
            .await
            .expect("complete");
        assert_eq!(completed.etag, expected);
    }

    #[tokio::test]
    async fn test_complete_missing_part() {
        let (_dir, _store, engine) = engine().await;
        engine
            .prepare(prepare_request("key.bin", "u1"))
            .await
            .expect("prepare");
        let etag1 = engine
            .put_part(BUCKET, "key.bin", "u1", 1, payload(vec![1u8; 64]))
            .await
            .expect("part 1");

        let result = engine
            .complete(
                BUCKET,
                "key.bin",
                "u1",
                &[(1, etag1), (2, "0000".to_string())],
                HashMap::new(),
            )
            .await;
        assert!(matches!(result, Err(S3Error::InvalidPart(_))));

        // Failure before install leaves the upload registered for retry.
        assert!(engine.get_upload("u1").is_ok());
    }

    #[tokio::test]
    async fn test_complete_rejects_descending_order() {
        let (_dir, _store, engine) = engine().await;
        engine
            .prepare(prepare_request("key.bin", "u1"))
            .await
            .expect("prepare");
        let etag1 = engine
            .put_part(BUCKET, "key.bin", "u1", 1, payload(vec![1u8; 64]))
            .await
            .expect("part 1");
        let etag2 = engine
            .put_part(BUCKET, "key.bin", "u1", 2, payload(vec![2u8; 64]))
            .await
            .expect("part 2");

        let result = engine
            .complete(
                BUCKET,
                "key.bin",
                "u1",
                &[(2, etag2), (1, etag1)],
                HashMap::new(),
            )
            .await;
        assert!(matches!(result, Err(S3Error::InvalidPartOrder)));
    }

    #[tokio::test]
    async fn test_complete_with_gap_preserves_client_order() {
        let (_dir, store, engine) = engine().await;
        engine
            .prepare(prepare_request("key.bin", "u1"))
            .await
            .expect("prepare");
        let etag1 = engine
            .put_part(BUCKET, "key.bin", "u1", 1, payload(b"first".to_vec()))
            .await
            .expect("part 1");
        let etag5 = engine
            .put_part(BUCKET, "key.bin", "u1", 5, payload(b"fifth".to_vec()))
            .await
            .expect("part 5");

        engine
            .complete(
                BUCKET,
                "key.bin",
                "u1",
                &[(1, etag1), (5, etag5)],
                HashMap::new(),
            )
            .await
            .expect("complete");
        assert_eq!(read_object(&store, "key.bin").await, b"firstfifth");
    }

    #[tokio::test]
    async fn test_abort_removes_everything() {
        let (_dir, store, engine) = engine().await;
        let request = prepare_request("key.bin", "u1");
        let object_id = request.object_id;
        engine.prepare(request).await.expect("prepare");
        engine
            .put_part(BUCKET, "key.bin", "u1", 1, payload(vec![0u8; 1024]))
            .await
            .expect("put part");

        engine.abort(BUCKET, "key.bin", "u1").await.expect("abort");

        assert!(matches!(
            engine.get_upload("u1"),
            Err(S3Error::NoSuchUpload(_))
        ));
        assert!(engine.list_uploads(Some(BUCKET), None).is_empty());
        let object_dir = store.bucket_path(BUCKET).join(object_id.to_string());
        assert!(!object_dir.exists());

        // Terminal: both a second abort and a complete now fail.
        assert!(matches!(
            engine.abort(BUCKET, "key.bin", "u1").await,
            Err(S3Error::NoSuchUpload(_))
        ));
        let result = engine
            .complete(BUCKET, "key.bin", "u1", &[(1, "x".into())], HashMap::new())
            .await;
        assert!(matches!(result, Err(S3Error::NoSuchUpload(_))));
    }

    #[tokio::test]
    async fn test_list_parts_sorted_and_idempotent() {
        let (_dir, _store, engine) = engine().await;
        engine
            .prepare(prepare_request("key.bin", "u1"))
            .await
            .expect("prepare");

        for n in [3u32, 1, 2] {
            engine
                .put_part(BUCKET, "key.bin", "u1", n, payload(vec![n as u8; 100]))
                .await
                .expect("put part");
        }

        let first = engine.list_parts(BUCKET, "key.bin", "u1").await.expect("list");
        let numbers: Vec<u32> = first.iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(first[0].size, 100);
        assert_eq!(first[0].etag, checksums::md5_hex(&[1u8; 100]));

        let second = engine.list_parts(BUCKET, "key.bin", "u1").await.expect("list");
        let etags: Vec<&str> = second.iter().map(|p| p.etag.as_str()).collect();
        assert_eq!(
            etags,
            first.iter().map(|p| p.etag.as_str()).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_overwrite_part_last_writer_wins() {
        let (_dir, _store, engine) = engine().await;
        engine
            .prepare(prepare_request("key.bin", "u1"))
            .await
            .expect("prepare");

        let etag1 = engine
            .put_part(BUCKET, "key.bin", "u1", 1, payload(vec![1u8; 100]))
            .await
            .expect("first write");
        let etag2 = engine
            .put_part(BUCKET, "key.bin", "u1", 1, payload(vec![2u8; 100]))
            .await
            .expect("second write");
        assert_ne!(etag1, etag2);

        let parts = engine.list_parts(BUCKET, "key.bin", "u1").await.expect("list");
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].etag, etag2);
    }

    #[tokio::test]
    async fn test_kms_key_suffixes_part_etag() {
        let (_dir, _store, engine) = engine().await;
        let mut request = prepare_request("key.bin", "u1");
        request.encryption_headers.insert(
            headers::AMZ_SSE_KMS_KEY_ID.to_string(),
            "valid-key".to_string(),
        );
        engine.prepare(request).await.expect("prepare");

        let data = vec![9u8; 256];
        let etag = engine
            .put_part(BUCKET, "key.bin", "u1", 1, payload(data.clone()))
            .await
            .expect("put part");
        assert_eq!(etag, format!("{}-valid-key", checksums::md5_hex(&data)));
    }

    #[tokio::test]
    async fn test_copy_part_with_range() {
        let (_dir, store, engine) = engine().await;

        // Seed a source object through a one-part upload.
        let source: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        engine
            .prepare(prepare_request("source.bin", "seed"))
            .await
            .expect("prepare seed");
        let seed_etag = engine
            .put_part(BUCKET, "source.bin", "seed", 1, payload(source.clone()))
            .await
            .expect("seed part");
        engine
            .complete(BUCKET, "source.bin", "seed", &[(1, seed_etag)], HashMap::new())
            .await
            .expect("seed complete");
        let source_id = store.resolve_key(BUCKET, "source.bin").expect("source id");

        engine
            .prepare(prepare_request("dest.bin", "u2"))
            .await
            .expect("prepare dest");
        let etag = engine
            .copy_part(
                CopyPartSource {
                    bucket: BUCKET.to_string(),
                    object_id: source_id,
                    range: Some((100, 199)),
                },
                BUCKET,
                "dest.bin",
                "u2",
                1,
            )
            .await
            .expect("copy part");
        assert_eq!(etag, checksums::md5_hex(&source[100..200]));

        engine
            .complete(BUCKET, "dest.bin", "u2", &[(1, etag)], HashMap::new())
            .await
            .expect("complete");
        assert_eq!(read_object(&store, "dest.bin").await, &source[100..200]);
    }

    #[tokio::test]
    async fn test_copy_part_range_validation() {
        let (_dir, store, engine) = engine().await;
        engine
            .prepare(prepare_request("source.bin", "seed"))
            .await
            .expect("prepare seed");
        let seed_etag = engine
            .put_part(BUCKET, "source.bin", "seed", 1, payload(vec![0u8; 100]))
            .await
            .expect("seed part");
        engine
            .complete(BUCKET, "source.bin", "seed", &[(1, seed_etag)], HashMap::new())
            .await
            .expect("seed complete");
        let source_id = store.resolve_key(BUCKET, "source.bin").expect("source id");

        engine
            .prepare(prepare_request("dest.bin", "u2"))
            .await
            .expect("prepare dest");
        let result = engine
            .copy_part(
                CopyPartSource {
                    bucket: BUCKET.to_string(),
                    object_id: source_id,
                    range: Some((50, 100)),
                },
                BUCKET,
                "dest.bin",
                "u2",
                1,
            )
            .await;
        assert!(matches!(result, Err(S3Error::InvalidRange(_))));
    }

    #[tokio::test]
    async fn test_copy_part_missing_source() {
        let (_dir, _store, engine) = engine().await;
        engine
            .prepare(prepare_request("dest.bin", "u2"))
            .await
            .expect("prepare dest");

        let result = engine
            .copy_part(
                CopyPartSource {
                    bucket: BUCKET.to_string(),
                    object_id: Uuid::new_v4(),
                    range: None,
                },
                BUCKET,
                "dest.bin",
                "u2",
                1,
            )
            .await;
        assert!(matches!(result, Err(S3Error::NoSuchKey(_))));
    }

    #[tokio::test]
    async fn test_list_uploads_filters_and_orders() {
        let (_dir, store, engine) = engine().await;
        store.create_bucket("other").await.expect("create bucket");

        let mut request = prepare_request("beta/file", "u-b");
        engine.prepare(request).await.expect("prepare");
        request = prepare_request("alpha/file", "u-a");
        engine.prepare(request).await.expect("prepare");
        request = prepare_request("alpha/other", "u-c");
        request.bucket = "other".to_string();
        engine.prepare(request).await.expect("prepare");

        let all = engine.list_uploads(Some(BUCKET), None);
        let keys: Vec<&str> = all.iter().map(|u| u.key.as_str()).collect();
        assert_eq!(keys, vec!["alpha/file", "beta/file"]);

        let filtered = engine.list_uploads(Some(BUCKET), Some("beta/"));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].upload_id, "u-b");
    }

    #[tokio::test]
    async fn test_complete_abort_race_exactly_one_wins() {
        for _ in 0..8 {
            let (_dir, _store, engine) = engine().await;
            engine
                .prepare(prepare_request("key.bin", "u1"))
                .await
                .expect("prepare");
            let etag = engine
                .put_part(BUCKET, "key.bin", "u1", 1, payload(vec![7u8; 512]))
                .await
                .expect("put part");

            let complete_engine = engine.clone();
            let complete_etag = etag.clone();
            let completer = tokio::spawn(async move {
                complete_engine
                    .complete(
                        BUCKET,
                        "key.bin",
                        "u1",
                        &[(1, complete_etag)],
                        HashMap::new(),
                    )
                    .await
            });
            let abort_engine = engine.clone();
            let aborter =
                tokio::spawn(async move { abort_engine.abort(BUCKET, "key.bin", "u1").await });

            let complete_result = completer.await.expect("join");
            let abort_result = aborter.await.expect("join");

            assert!(
                complete_result.is_ok() != abort_result.is_ok(),
                "exactly one of complete/abort must win: complete={:?} abort={:?}",
                complete_result.as_ref().map(|c| &c.etag),
                abort_result
            );
            let loser = if complete_result.is_ok() {
                abort_result.err().map(|e| e.code())
            } else {
                complete_result.err().map(|e| e.code())
            };
            assert_eq!(loser, Some("NoSuchUpload"));
        }
    }
}
