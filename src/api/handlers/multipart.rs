//! Multipart upload S3 handlers: CreateMultipartUpload, CompleteMultipartUpload.

use super::{
    announced_checksum_algorithm, checksum_from_headers, extract_content_type,
    extract_encryption_headers, extract_store_headers, extract_user_metadata, xml_response,
    AppState, ObjectQuery,
};
use crate::api::extractors::ValidatedPath;
use crate::api::xml::{
    CompleteMultipartUploadRequest, CompleteMultipartUploadResult, InitiateMultipartUploadResult,
};
use crate::api::S3Error;
use crate::multipart::PrepareUpload;
use crate::types::{headers as hdr, Owner, StorageClass};
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// POST object handler — dispatches multipart upload operations by query param.
/// POST /{bucket}/{key}?uploads — CreateMultipartUpload
/// POST /{bucket}/{key}?uploadId=X — CompleteMultipartUpload
#[instrument(skip(state, req_headers, body))]
pub async fn post_object(
    State(state): State<Arc<AppState>>,
    ValidatedPath { bucket, key }: ValidatedPath,
    Query(query): Query<ObjectQuery>,
    req_headers: HeaderMap,
    body: Bytes,
) -> Result<Response, S3Error> {
    if query.uploads.is_some() {
        initiate_multipart_upload(&state, &bucket, &key, &req_headers).await
    } else if let Some(upload_id) = &query.upload_id {
        complete_multipart_upload(&state, &bucket, &key, upload_id, &req_headers, body).await
    } else {
        Err(S3Error::InvalidRequest(
            "POST on object requires ?uploads or ?uploadId parameter".to_string(),
        ))
    }
}

/// POST /{bucket}/{key}?uploads — CreateMultipartUpload
async fn initiate_multipart_upload(
    state: &AppState,
    bucket: &str,
    key: &str,
    req_headers: &HeaderMap,
) -> Result<Response, S3Error> {
    info!("CreateMultipartUpload {}/{}", bucket, key);

    let header_checksum = checksum_from_headers(req_headers);
    let checksum_algorithm = announced_checksum_algorithm(req_headers)
        .or(header_checksum.as_ref().map(|(a, _)| *a));

    let upload = state
        .multipart
        .prepare(PrepareUpload {
            bucket: bucket.to_string(),
            key: key.to_string(),
            object_id: Uuid::new_v4(),
            upload_id: Uuid::new_v4().to_string(),
            content_type: extract_content_type(req_headers),
            user_metadata: extract_user_metadata(req_headers),
            store_headers: extract_store_headers(req_headers),
            encryption_headers: extract_encryption_headers(req_headers),
            owner: Owner::default(),
            initiator: Owner::default(),
            storage_class: StorageClass::parse_lenient(
                req_headers
                    .get(hdr::AMZ_STORAGE_CLASS)
                    .and_then(|v| v.to_str().ok()),
            ),
            checksum: header_checksum.map(|(_, value)| value),
            checksum_algorithm,
        })
        .await?;

    let xml = InitiateMultipartUploadResult {
        bucket: bucket.to_string(),
        key: key.to_string(),
        upload_id: upload.upload_id,
    }
    .to_xml();
    Ok(xml_response(xml))
}

/// POST /{bucket}/{key}?uploadId=X — CompleteMultipartUpload
async fn complete_multipart_upload(
    state: &AppState,
    bucket: &str,
    key: &str,
    upload_id: &str,
    req_headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, S3Error> {
    info!(
        "CompleteMultipartUpload {}/{} uploadId={}",
        bucket, key, upload_id
    );

    let body_str = std::str::from_utf8(&body).map_err(|_| S3Error::MalformedXML)?;
    let complete_req = CompleteMultipartUploadRequest::from_xml(body_str).map_err(|e| {
        warn!("Failed to parse CompleteMultipartUpload XML: {}", e);
        S3Error::MalformedXML
    })?;

    let requested_parts: Vec<(u32, String)> = complete_req
        .parts
        .iter()
        .map(|p| (p.part_number, p.etag.clone()))
        .collect();

    let completed = state
        .multipart
        .complete(
            bucket,
            key,
            upload_id,
            &requested_parts,
            extract_encryption_headers(req_headers),
        )
        .await?;

    debug!(
        "CompleteMultipartUpload {}/{} -> {} bytes, etag {}",
        bucket, key, completed.metadata.size, completed.etag
    );

    let xml = CompleteMultipartUploadResult {
        location: format!("/{}/{}", bucket, key),
        bucket: bucket.to_string(),
        key: key.to_string(),
        etag: format!("\"{}\"", completed.etag),
    }
    .to_xml();
    Ok(xml_response(xml))
}
