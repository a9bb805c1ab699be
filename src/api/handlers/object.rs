//! Object S3 handlers: GetObject, HeadObject, PutObject, CopyObject,
//! DeleteObject, and the multipart operations that ride on PUT/DELETE
//! (UploadPart, UploadPartCopy, AbortMultipartUpload, ListParts).

use super::{
    announced_checksum_algorithm, build_object_headers, checksum_from_headers,
    extract_content_type, extract_encryption_headers, extract_store_headers,
    extract_user_metadata, request_payload, spool_payload, xml_response, AppState, ObjectQuery,
};
use crate::api::extractors::ValidatedPath;
use crate::api::xml::{CopyObjectResult, CopyPartResult, ListPartsResult};
use crate::api::S3Error;
use crate::checksums;
use crate::multipart::CopyPartSource;
use crate::store::{ObjectStore, StoreObjectRequest};
use crate::types::{headers as hdr, Owner, StorageClass};
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// GET object handler
/// GET /{bucket}/{key} — GetObject
/// GET /{bucket}/{key}?uploadId=X — ListParts
#[instrument(skip(state))]
pub async fn get_object(
    State(state): State<Arc<AppState>>,
    ValidatedPath { bucket, key }: ValidatedPath,
    Query(query): Query<ObjectQuery>,
) -> Result<Response, S3Error> {
    // ListParts
    if let Some(upload_id) = &query.upload_id {
        info!("ListParts {}/{} uploadId={}", bucket, key, upload_id);
        let parts = state.multipart.list_parts(&bucket, &key, upload_id).await?;
        let xml = ListPartsResult {
            bucket,
            key,
            upload_id: upload_id.clone(),
            parts,
            owner: Owner::default(),
            max_parts: 1000,
            is_truncated: false,
        }
        .to_xml();
        return Ok(xml_response(xml));
    }

    info!("GET {}/{}", bucket, key);

    let object_id = state
        .store
        .resolve_key(&bucket, &key)
        .ok_or_else(|| S3Error::NoSuchKey(key.clone()))?;
    let metadata = state.store.object_metadata(&bucket, object_id).await?;
    let stream = state.store.open_object(&bucket, object_id).await?;

    let response_headers = build_object_headers(&metadata);
    let body = Body::from_stream(stream);
    Ok((StatusCode::OK, response_headers, body).into_response())
}

/// HEAD object handler
/// HEAD /{bucket}/{key}
#[instrument(skip(state))]
pub async fn head_object(
    State(state): State<Arc<AppState>>,
    ValidatedPath { bucket, key }: ValidatedPath,
) -> Result<Response, S3Error> {
    info!("HEAD {}/{}", bucket, key);

    let object_id = state
        .store
        .resolve_key(&bucket, &key)
        .ok_or_else(|| S3Error::NoSuchKey(key.clone()))?;
    let metadata = state.store.object_metadata(&bucket, object_id).await?;

    let response_headers = build_object_headers(&metadata);
    Ok((StatusCode::OK, response_headers).into_response())
}

/// PUT object handler with copy and multipart upload dispatch
/// PUT /{bucket}/{key} — PutObject
/// PUT /{bucket}/{key}?partNumber=N&uploadId=X — UploadPart
/// With x-amz-copy-source: CopyObject, or UploadPartCopy when the multipart
/// query parameters are present.
#[instrument(skip(state, req_headers, body))]
pub async fn put_object_or_copy(
    State(state): State<Arc<AppState>>,
    ValidatedPath { bucket, key }: ValidatedPath,
    Query(query): Query<ObjectQuery>,
    req_headers: HeaderMap,
    body: Body,
) -> Result<Response, S3Error> {
    let part_number = query.parsed_part_number()?;
    let is_copy = req_headers.contains_key(hdr::AMZ_COPY_SOURCE);

    match (part_number, &query.upload_id) {
        (Some(part_number), Some(upload_id)) if is_copy => {
            upload_part_copy(&state, &bucket, &key, upload_id, part_number, &req_headers).await
        }
        (Some(part_number), Some(upload_id)) => {
            upload_part(
                &state,
                &bucket,
                &key,
                upload_id,
                part_number,
                &req_headers,
                body,
            )
            .await
        }
        _ if is_copy => copy_object(&state, &bucket, &key, &req_headers).await,
        _ => put_object(&state, &bucket, &key, &req_headers, body).await,
    }
}

/// PutObject (internal)
async fn put_object(
    state: &Arc<AppState>,
    bucket: &str,
    key: &str,
    req_headers: &HeaderMap,
    body: Body,
) -> Result<Response, S3Error> {
    info!("PUT {}/{}", bucket, key);

    let header_checksum = checksum_from_headers(req_headers);
    let algorithm = announced_checksum_algorithm(req_headers)
        .or(header_checksum.as_ref().map(|(a, _)| *a));

    let (payload, trailer) = request_payload(req_headers, body);
    let mut spooled =
        spool_payload(&state.store.bucket_path(bucket), payload, algorithm).await?;

    // Prefer the trailer checksum (what the client actually sent), then an
    // inline header, then our own computation.
    let trailer_checksum = trailer.as_ref().and_then(|t| t.checksum());
    let trailer_algorithm = trailer.as_ref().and_then(|t| t.algorithm());
    let (checksum_algorithm, checksum) = match (trailer_algorithm, trailer_checksum) {
        (Some(algorithm), Some(value)) => (Some(algorithm), Some(value)),
        _ => match header_checksum {
            Some((algorithm, value)) => (Some(algorithm), Some(value)),
            None => (algorithm, spooled.checksum.clone()),
        },
    };

    let encryption_headers = extract_encryption_headers(req_headers);
    let kms_key_id = encryption_headers
        .get(hdr::AMZ_SSE_KMS_KEY_ID)
        .map(String::as_str);
    let etag = checksums::tagged_etag(hex::encode(spooled.md5), kms_key_id);

    let metadata = state
        .store
        .store_object(StoreObjectRequest {
            bucket: bucket.to_string(),
            object_id: Uuid::new_v4(),
            key: key.to_string(),
            content_type: extract_content_type(req_headers),
            store_headers: extract_store_headers(req_headers),
            source_path: spooled.path.clone(),
            user_metadata: extract_user_metadata(req_headers),
            encryption_headers,
            etag,
            tags: Vec::new(),
            checksum,
            checksum_algorithm,
            owner: Owner::default(),
            storage_class: StorageClass::parse_lenient(
                req_headers
                    .get(hdr::AMZ_STORAGE_CLASS)
                    .and_then(|v| v.to_str().ok()),
            ),
        })
        .await?;
    spooled.disarm();

    debug!("Stored {}/{} ({} bytes)", bucket, key, metadata.size);
    Ok((StatusCode::OK, [("ETag", metadata.quoted_etag())], "").into_response())
}

/// UploadPart (internal)
async fn upload_part(
    state: &Arc<AppState>,
    bucket: &str,
    key: &str,
    upload_id: &str,
    part_number: u32,
    req_headers: &HeaderMap,
    body: Body,
) -> Result<Response, S3Error> {
    info!(
        "UploadPart {}/{} part={} uploadId={}",
        bucket, key, part_number, upload_id
    );

    let (payload, _trailer) = request_payload(req_headers, body);
    let etag = state
        .multipart
        .put_part(bucket, key, upload_id, part_number, payload)
        .await?;
    Ok((StatusCode::OK, [("ETag", format!("\"{}\"", etag))], "").into_response())
}

/// UploadPartCopy (internal)
async fn upload_part_copy(
    state: &Arc<AppState>,
    bucket: &str,
    key: &str,
    upload_id: &str,
    part_number: u32,
    req_headers: &HeaderMap,
) -> Result<Response, S3Error> {
    let (source_bucket, source_key) = parse_copy_source(req_headers)?;
    let range = parse_copy_range(req_headers)?;
    info!(
        "UploadPartCopy {}/{} -> {}/{} part={} uploadId={}",
        source_bucket, source_key, bucket, key, part_number, upload_id
    );

    let source_id = state
        .store
        .resolve_key(&source_bucket, &source_key)
        .ok_or_else(|| S3Error::NoSuchKey(source_key.clone()))?;

    let etag = state
        .multipart
        .copy_part(
            CopyPartSource {
                bucket: source_bucket,
                object_id: source_id,
                range,
            },
            bucket,
            key,
            upload_id,
            part_number,
        )
        .await?;

    let xml = CopyPartResult {
        etag: format!("\"{}\"", etag),
        last_modified: Utc::now(),
    }
    .to_xml();
    Ok(xml_response(xml))
}

/// CopyObject (internal)
async fn copy_object(
    state: &Arc<AppState>,
    bucket: &str,
    key: &str,
    req_headers: &HeaderMap,
) -> Result<Response, S3Error> {
    let (source_bucket, source_key) = parse_copy_source(req_headers)?;
    info!("COPY {}/{} -> {}/{}", source_bucket, source_key, bucket, key);

    let source_id = state
        .store
        .resolve_key(&source_bucket, &source_key)
        .ok_or_else(|| S3Error::NoSuchKey(source_key.clone()))?;
    let source_meta = state.store.object_metadata(&source_bucket, source_id).await?;
    let source_path = state.store.data_path(&source_bucket, source_id);

    // Materialize a private copy first; the source object may be replaced
    // while the new sidecar is being written.
    let dest_dir = state.store.bucket_path(bucket);
    let tmp_path = dest_dir.join(format!(".copy-{}", Uuid::new_v4()));
    state
        .store
        .materialize_part(&source_path, &tmp_path)
        .await
        .map_err(|e| S3Error::InternalError(format!("copy object: {}", e)))?;

    let stored = state
        .store
        .store_object(StoreObjectRequest {
            bucket: bucket.to_string(),
            object_id: Uuid::new_v4(),
            key: key.to_string(),
            content_type: source_meta.content_type.clone(),
            store_headers: source_meta.store_headers.clone(),
            source_path: tmp_path.clone(),
            user_metadata: source_meta.user_metadata.clone(),
            encryption_headers: extract_encryption_headers(req_headers),
            etag: source_meta.etag.clone(),
            tags: Vec::new(),
            checksum: source_meta.checksum.clone(),
            checksum_algorithm: source_meta.checksum_algorithm,
            owner: Owner::default(),
            storage_class: source_meta.storage_class,
        })
        .await;
    let metadata = match stored {
        Ok(metadata) => metadata,
        Err(e) => {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
    };

    let xml = CopyObjectResult {
        etag: metadata.quoted_etag(),
        last_modified: metadata.last_modified,
    }
    .to_xml();
    Ok(xml_response(xml))
}

/// DELETE object handler
/// DELETE /{bucket}/{key} — DeleteObject
/// DELETE /{bucket}/{key}?uploadId=X — AbortMultipartUpload
#[instrument(skip(state))]
pub async fn delete_object(
    State(state): State<Arc<AppState>>,
    ValidatedPath { bucket, key }: ValidatedPath,
    Query(query): Query<ObjectQuery>,
) -> Result<Response, S3Error> {
    // AbortMultipartUpload
    if let Some(upload_id) = &query.upload_id {
        info!(
            "AbortMultipartUpload {}/{} uploadId={}",
            bucket, key, upload_id
        );
        state.multipart.abort(&bucket, &key, upload_id).await?;
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    info!("DELETE {}/{}", bucket, key);

    // S3 treats deleting a missing key as success.
    if let Err(err) = state.store.delete_object(&bucket, &key).await {
        match S3Error::from(err) {
            S3Error::NoSuchKey(_) => {}
            other => return Err(other),
        }
    }

    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Parse x-amz-copy-source into (bucket, key). The header value is
/// URL-encoded `bucket/key`, optionally with a leading slash.
fn parse_copy_source(req_headers: &HeaderMap) -> Result<(String, String), S3Error> {
    let copy_source = req_headers
        .get(hdr::AMZ_COPY_SOURCE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| S3Error::InvalidRequest("Missing x-amz-copy-source header".to_string()))?;

    let copy_source = urlencoding::decode(copy_source)
        .map_err(|_| S3Error::InvalidArgument("Invalid copy source encoding".to_string()))?;
    let copy_source = copy_source.trim_start_matches('/');

    let (source_bucket, source_key) = copy_source
        .split_once('/')
        .ok_or_else(|| S3Error::InvalidArgument("Copy source must be bucket/key".to_string()))?;
    Ok((source_bucket.to_string(), source_key.to_string()))
}

/// Parse x-amz-copy-source-range (`bytes=a-b`, both inclusive).
fn parse_copy_range(req_headers: &HeaderMap) -> Result<Option<(u64, u64)>, S3Error> {
    let Some(raw) = req_headers
        .get(hdr::AMZ_COPY_SOURCE_RANGE)
        .and_then(|v| v.to_str().ok())
    else {
        return Ok(None);
    };

    let invalid = || S3Error::InvalidArgument(format!("Invalid copy source range: {raw}"));
    let spec = raw.strip_prefix("bytes=").ok_or_else(invalid)?;
    let (start, end) = spec.split_once('-').ok_or_else(invalid)?;
    let start: u64 = start.parse().map_err(|_| invalid())?;
    let end: u64 = end.parse().map_err(|_| invalid())?;
    if start > end {
        return Err(invalid());
    }
    Ok(Some((start, end)))
}
