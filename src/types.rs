//! Core types for the s3stub object store.

use crate::checksums::ChecksumAlgorithm;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Tool version identifier — uses crate name and version from Cargo.toml
pub const S3STUB_TOOL: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Well-known S3 header names the store records or interprets.
pub mod headers {
    /// Prefix for user-defined object metadata.
    pub const AMZ_META_PREFIX: &str = "x-amz-meta-";
    /// Prefix for the server-side-encryption header family.
    pub const AMZ_SSE_PREFIX: &str = "x-amz-server-side-encryption";
    /// KMS key id header; its presence tags ETags with the key id.
    pub const AMZ_SSE_KMS_KEY_ID: &str = "x-amz-server-side-encryption-aws-kms-key-id";
    /// Storage class requested at PUT/initiate time.
    pub const AMZ_STORAGE_CLASS: &str = "x-amz-storage-class";
    /// Checksum algorithm announced for an upload.
    pub const AMZ_CHECKSUM_ALGORITHM: &str = "x-amz-checksum-algorithm";
    /// SDK-internal variant of the checksum algorithm announcement.
    pub const AMZ_SDK_CHECKSUM_ALGORITHM: &str = "x-amz-sdk-checksum-algorithm";
    /// Trailer name announced for an aws-chunked body.
    pub const AMZ_TRAILER: &str = "x-amz-trailer";
    /// Payload hash marker; `STREAMING-*` values select chunked decoding.
    pub const AMZ_CONTENT_SHA256: &str = "x-amz-content-sha256";
    /// Length of the payload once chunk framing is stripped.
    pub const AMZ_DECODED_CONTENT_LENGTH: &str = "x-amz-decoded-content-length";
    /// Copy source for CopyObject / UploadPartCopy.
    pub const AMZ_COPY_SOURCE: &str = "x-amz-copy-source";
    /// Byte range for UploadPartCopy.
    pub const AMZ_COPY_SOURCE_RANGE: &str = "x-amz-copy-source-range";
}

/// A principal owning or initiating an upload. The mock has no IAM; every
/// request acts as this fixed principal unless a test injects another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub id: String,
    pub display_name: String,
}

impl Default for Owner {
    fn default() -> Self {
        Self {
            id: "s3stub".to_string(),
            display_name: "s3stub".to_string(),
        }
    }
}

/// S3 storage class tag. The mock records the class verbatim and applies no
/// tiering semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StorageClass {
    #[default]
    Standard,
    StandardIa,
    OnezoneIa,
    IntelligentTiering,
    Glacier,
    DeepArchive,
    ReducedRedundancy,
}

impl StorageClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "STANDARD",
            Self::StandardIa => "STANDARD_IA",
            Self::OnezoneIa => "ONEZONE_IA",
            Self::IntelligentTiering => "INTELLIGENT_TIERING",
            Self::Glacier => "GLACIER",
            Self::DeepArchive => "DEEP_ARCHIVE",
            Self::ReducedRedundancy => "REDUCED_REDUNDANCY",
        }
    }

    /// Parse a header value, falling back to STANDARD for anything unknown.
    pub fn parse_lenient(value: Option<&str>) -> Self {
        match value {
            Some("STANDARD_IA") => Self::StandardIa,
            Some("ONEZONE_IA") => Self::OnezoneIa,
            Some("INTELLIGENT_TIERING") => Self::IntelligentTiering,
            Some("GLACIER") => Self::Glacier,
            Some("DEEP_ARCHIVE") => Self::DeepArchive,
            Some("REDUCED_REDUNDANCY") => Self::ReducedRedundancy,
            _ => Self::Standard,
        }
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur when validating user-provided bucket/key inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValidationError(String);

impl fmt::Display for KeyValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for KeyValidationError {}

/// Validate an object key.
///
/// Keys never become filesystem paths here (objects live under UUID
/// directories), but they do land in XML documents and log lines.
pub fn validate_object_key(key: &str) -> Result<(), KeyValidationError> {
    if key.is_empty() {
        return Err(KeyValidationError(
            "Object key must not be empty".to_string(),
        ));
    }
    if key.contains('\0') {
        return Err(KeyValidationError(
            "Key must not contain NUL bytes".to_string(),
        ));
    }
    Ok(())
}

/// Validate a bucket name. Buckets map directly to directories under the
/// store root, so this is the traversal boundary.
pub fn validate_bucket_name(bucket: &str) -> Result<(), KeyValidationError> {
    if bucket.is_empty() {
        return Err(KeyValidationError(
            "Bucket name must not be empty".to_string(),
        ));
    }
    if bucket.len() > 63 {
        return Err(KeyValidationError(
            "Bucket name must be at most 63 characters".to_string(),
        ));
    }
    if !bucket
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
    {
        return Err(KeyValidationError(
            "Bucket name must contain only lowercase letters, digits, '-' and '.'".to_string(),
        ));
    }
    if bucket == "." || bucket == ".." {
        return Err(KeyValidationError("Invalid bucket name".to_string()));
    }
    Ok(())
}

/// Per-object metadata, stored as a JSON sidecar next to the data file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectMetadata {
    /// Tool version: "s3stub/0.3.2"
    pub tool: String,

    /// Stable internal identifier; names the object's directory on disk.
    pub object_id: Uuid,

    /// User-visible object key.
    pub key: String,

    /// ETag without surrounding quotes. Hex MD5 for plain objects,
    /// `<hex>-<n>` for multipart-completed ones, possibly KMS-suffixed.
    pub etag: String,

    /// Size of the object data in bytes.
    pub size: u64,

    /// Creation timestamp (UTC ISO8601)
    pub last_modified: DateTime<Utc>,

    /// Content-Type header if provided
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// User-provided custom metadata (x-amz-meta-* headers, stored without the prefix)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub user_metadata: HashMap<String, String>,

    /// Response headers recorded at store time (Cache-Control and friends).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub store_headers: HashMap<String, String>,

    /// x-amz-server-side-encryption-* headers, echoed back verbatim.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub encryption_headers: HashMap<String, String>,

    /// Checksum recorded for the object, base64-encoded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,

    /// Algorithm the checksum was computed with.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum_algorithm: Option<ChecksumAlgorithm>,

    #[serde(default)]
    pub storage_class: StorageClass,

    #[serde(default)]
    pub owner: Owner,
}

impl ObjectMetadata {
    /// Get ETag value as it appears in HTTP headers (quoted).
    pub fn quoted_etag(&self) -> String {
        format!("\"{}\"", self.etag)
    }

    /// The KMS key id recorded for this object, if any.
    pub fn kms_key_id(&self) -> Option<&str> {
        self.encryption_headers
            .get(headers::AMZ_SSE_KMS_KEY_ID)
            .map(String::as_str)
    }
}
