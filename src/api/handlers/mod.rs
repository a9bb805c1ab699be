//! S3 API request handlers

mod bucket;
mod multipart;
mod object;
mod status;

pub use bucket::{
    bucket_get_handler, create_bucket, delete_bucket, head_bucket, head_root, list_buckets,
};
pub use multipart::post_object;
pub use object::{delete_object, get_object, head_object, put_object_or_copy};
pub use status::health_check;

use super::aws_chunked::{self, AwsChunkedStream, TrailerHandle};
use super::errors::S3Error;
use crate::checksums::{ChecksumAlgorithm, StreamingHasher};
use crate::multipart::{MultipartEngine, PartPayload};
use crate::store::ObjectStore;
use crate::types::headers as hdr;
use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Application state shared across handlers
pub struct AppState {
    pub store: Arc<dyn ObjectStore>,
    pub multipart: Arc<MultipartEngine>,
}

/// Query parameters for object-level operations (multipart upload)
#[derive(Debug, Deserialize, Default)]
pub struct ObjectQuery {
    /// CreateMultipartUpload (POST with ?uploads)
    pub uploads: Option<String>,
    /// UploadPart / CompleteMultipartUpload (with ?uploadId)
    #[serde(rename = "uploadId")]
    pub upload_id: Option<String>,
    /// UploadPart (PUT with ?partNumber); S3 transports this as a decimal
    /// string.
    #[serde(rename = "partNumber")]
    pub part_number: Option<String>,
}

impl ObjectQuery {
    /// Parse `partNumber` if present.
    pub fn parsed_part_number(&self) -> Result<Option<u32>, S3Error> {
        self.part_number
            .as_deref()
            .map(|raw| {
                raw.parse::<u32>().map_err(|_| {
                    S3Error::InvalidArgument(format!("Invalid part number: {raw}"))
                })
            })
            .transpose()
    }
}

/// Query parameters for bucket-level GET operations
#[derive(Debug, Deserialize, Default)]
pub struct BucketGetQuery {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    #[serde(rename = "list-type")]
    pub list_type: Option<u8>,
    #[serde(rename = "max-keys")]
    pub max_keys: Option<u32>,
    /// GetBucketLocation query parameter
    pub location: Option<String>,
    /// GetBucketVersioning query parameter
    pub versioning: Option<String>,
    /// ListMultipartUploads query parameter
    pub uploads: Option<String>,
}

/// Build an XML response with the right content type.
pub fn xml_response(xml: String) -> Response {
    (StatusCode::OK, [("Content-Type", "application/xml")], xml).into_response()
}

pub fn hval(s: &str) -> HeaderValue {
    HeaderValue::from_bytes(s.as_bytes()).unwrap_or_else(|_| HeaderValue::from_static(""))
}

/// Extract the Content-Type header.
pub fn extract_content_type(req_headers: &HeaderMap) -> Option<String> {
    req_headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Extract user-provided x-amz-meta-* headers, stored without the prefix.
pub fn extract_user_metadata(req_headers: &HeaderMap) -> HashMap<String, String> {
    req_headers
        .iter()
        .filter_map(|(name, value)| {
            let suffix = name.as_str().strip_prefix(hdr::AMZ_META_PREFIX)?;
            let value = value.to_str().ok()?;
            Some((suffix.to_string(), value.to_string()))
        })
        .collect()
}

/// Extract the x-amz-server-side-encryption-* header family, verbatim.
pub fn extract_encryption_headers(req_headers: &HeaderMap) -> HashMap<String, String> {
    req_headers
        .iter()
        .filter_map(|(name, value)| {
            if !name.as_str().starts_with(hdr::AMZ_SSE_PREFIX) {
                return None;
            }
            let value = value.to_str().ok()?;
            Some((name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

/// Standard response headers recorded at store time and echoed on GET/HEAD.
const STORE_HEADER_NAMES: [&str; 5] = [
    "cache-control",
    "content-disposition",
    "content-encoding",
    "content-language",
    "expires",
];

pub fn extract_store_headers(req_headers: &HeaderMap) -> HashMap<String, String> {
    STORE_HEADER_NAMES
        .iter()
        .filter_map(|name| {
            let value = req_headers.get(*name)?.to_str().ok()?;
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}

/// Build response headers for an object from its metadata.
pub fn build_object_headers(metadata: &crate::types::ObjectMetadata) -> HeaderMap {
    use axum::http::header::HeaderName;

    let content_type = metadata
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".to_string());

    let mut response = HeaderMap::new();
    response.insert("ETag", hval(&metadata.quoted_etag()));
    response.insert("Content-Length", hval(&metadata.size.to_string()));
    response.insert("Content-Type", hval(&content_type));
    response.insert(
        "Last-Modified",
        hval(
            &metadata
                .last_modified
                .format("%a, %d %b %Y %H:%M:%S GMT")
                .to_string(),
        ),
    );
    if metadata.storage_class != crate::types::StorageClass::Standard {
        response.insert(hdr::AMZ_STORAGE_CLASS, hval(metadata.storage_class.as_str()));
    }
    if let (Some(algorithm), Some(checksum)) =
        (metadata.checksum_algorithm, metadata.checksum.as_ref())
    {
        response.insert(algorithm.trailer_header(), hval(checksum));
    }

    // Headers recorded at store time (Cache-Control and friends)
    for (name, value) in &metadata.store_headers {
        if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
            response.insert(name, hval(value));
        }
    }

    // Encryption headers, echoed verbatim
    for (name, value) in &metadata.encryption_headers {
        if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
            response.insert(name, hval(value));
        }
    }

    // User-provided custom metadata (x-amz-meta-*)
    for (key, value) in &metadata.user_metadata {
        let header_name = format!("{}{}", hdr::AMZ_META_PREFIX, key);
        if let Ok(name) = HeaderName::from_bytes(header_name.as_bytes()) {
            response.insert(name, hval(value));
        }
    }

    response
}

/// Checksum algorithm announced in headers, from either the explicit
/// algorithm header or the SDK variant.
pub fn announced_checksum_algorithm(req_headers: &HeaderMap) -> Option<ChecksumAlgorithm> {
    [hdr::AMZ_CHECKSUM_ALGORITHM, hdr::AMZ_SDK_CHECKSUM_ALGORITHM]
        .iter()
        .find_map(|name| req_headers.get(*name))
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

/// A full checksum supplied directly in an `x-amz-checksum-*` header.
pub fn checksum_from_headers(req_headers: &HeaderMap) -> Option<(ChecksumAlgorithm, String)> {
    for algorithm in [
        ChecksumAlgorithm::Crc32,
        ChecksumAlgorithm::Crc32c,
        ChecksumAlgorithm::Sha1,
        ChecksumAlgorithm::Sha256,
    ] {
        if let Some(value) = req_headers
            .get(algorithm.trailer_header())
            .and_then(|v| v.to_str().ok())
        {
            return Some((algorithm, value.to_string()));
        }
    }
    None
}

/// Turn a request body into a payload stream, unwrapping aws-chunked framing
/// when the request announces it. The returned handle (chunked bodies only)
/// exposes the trailer checksum after the stream has been consumed.
pub fn request_payload(
    req_headers: &HeaderMap,
    body: Body,
) -> (PartPayload, Option<TrailerHandle>) {
    let stream = body.into_data_stream();
    if aws_chunked::is_aws_chunked(req_headers) {
        let decoded_length = aws_chunked::decoded_content_length(req_headers);
        let trailer = aws_chunked::trailer_checksum_header(req_headers);
        let decoder = AwsChunkedStream::new(stream, decoded_length, trailer).verifying();
        let handle = decoder.trailer_handle();
        (
            decoder.map(|item| item.map_err(S3Error::from)).boxed(),
            Some(handle),
        )
    } else {
        (
            stream
                .map(|item| item.map_err(|e| S3Error::IncompleteBody(e.to_string())))
                .boxed(),
            None,
        )
    }
}

/// A request body spooled to a temp file, with the digests collected on the
/// way through. The file is removed on drop unless [`disarm`](Self::disarm)
/// was called (the store renames it away on success).
pub struct SpooledBody {
    pub path: PathBuf,
    pub md5: [u8; 16],
    pub checksum: Option<String>,
    pub size: u64,
    armed: bool,
}

impl SpooledBody {
    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for SpooledBody {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Stream a payload into a uniquely named temp file under `dir`, computing
/// MD5 and optionally one extra checksum.
pub async fn spool_payload(
    dir: &Path,
    mut payload: PartPayload,
    algorithm: Option<ChecksumAlgorithm>,
) -> Result<SpooledBody, S3Error> {
    let path = dir.join(format!(".upload-{}", Uuid::new_v4()));
    let mut spooled = SpooledBody {
        path: path.clone(),
        md5: [0; 16],
        checksum: None,
        size: 0,
        armed: true,
    };

    let mut file = tokio::fs::File::create(&path)
        .await
        .map_err(|e| S3Error::InternalError(format!("create spool file: {}", e)))?;
    let mut hasher = StreamingHasher::new(algorithm);
    while let Some(chunk) = payload.next().await {
        let chunk = chunk?;
        hasher.update(&chunk);
        spooled.size += chunk.len() as u64;
        file.write_all(&chunk)
            .await
            .map_err(|e| S3Error::InternalError(format!("write spool file: {}", e)))?;
    }
    file.flush()
        .await
        .map_err(|e| S3Error::InternalError(format!("flush spool file: {}", e)))?;

    let (md5, checksum) = hasher.finish();
    spooled.md5 = md5;
    spooled.checksum = checksum;
    Ok(spooled)
}
