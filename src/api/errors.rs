//! S3 error types and XML responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

/// S3 API errors
#[derive(Debug, Clone, Error)]
pub enum S3Error {
    #[error("NoSuchKey: The specified key does not exist.")]
    NoSuchKey(String),

    #[error("NoSuchBucket: The specified bucket does not exist.")]
    NoSuchBucket(String),

    #[error("BucketNotEmpty: The bucket you tried to delete is not empty.")]
    BucketNotEmpty(String),

    #[error("NoSuchUpload: The specified multipart upload does not exist. The upload ID might be invalid, or the multipart upload might have been aborted or completed.")]
    NoSuchUpload(String),

    #[error("InvalidPart: {0}")]
    InvalidPart(String),

    #[error("InvalidPartOrder: The list of parts was not in ascending order. Parts must be ordered by part number.")]
    InvalidPartOrder,

    #[error("InvalidRange: {0}")]
    InvalidRange(String),

    #[error("IncompleteBody: {0}")]
    IncompleteBody(String),

    #[error("BadDigest: The checksum you specified did not match what we received.")]
    BadDigest,

    #[error("InternalError: We encountered an internal error. Please try again.")]
    InternalError(String),

    #[error("InvalidArgument: {0}")]
    InvalidArgument(String),

    #[error("InvalidRequest: {0}")]
    InvalidRequest(String),

    #[error("MalformedXML: The XML you provided was not well-formed.")]
    MalformedXML,
}

impl S3Error {
    /// Get the S3 error code
    pub fn code(&self) -> &'static str {
        match self {
            S3Error::NoSuchKey(_) => "NoSuchKey",
            S3Error::NoSuchBucket(_) => "NoSuchBucket",
            S3Error::BucketNotEmpty(_) => "BucketNotEmpty",
            S3Error::NoSuchUpload(_) => "NoSuchUpload",
            S3Error::InvalidPart(_) => "InvalidPart",
            S3Error::InvalidPartOrder => "InvalidPartOrder",
            S3Error::InvalidRange(_) => "InvalidRange",
            S3Error::IncompleteBody(_) => "IncompleteBody",
            S3Error::BadDigest => "BadDigest",
            S3Error::InternalError(_) => "InternalError",
            S3Error::InvalidArgument(_) => "InvalidArgument",
            S3Error::InvalidRequest(_) => "InvalidRequest",
            S3Error::MalformedXML => "MalformedXML",
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            S3Error::NoSuchKey(_) => StatusCode::NOT_FOUND,
            S3Error::NoSuchBucket(_) => StatusCode::NOT_FOUND,
            S3Error::BucketNotEmpty(_) => StatusCode::CONFLICT,
            S3Error::NoSuchUpload(_) => StatusCode::NOT_FOUND,
            S3Error::InvalidPart(_) => StatusCode::BAD_REQUEST,
            S3Error::InvalidPartOrder => StatusCode::BAD_REQUEST,
            S3Error::InvalidRange(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            S3Error::IncompleteBody(_) => StatusCode::BAD_REQUEST,
            S3Error::BadDigest => StatusCode::BAD_REQUEST,
            S3Error::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            S3Error::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            S3Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            S3Error::MalformedXML => StatusCode::BAD_REQUEST,
        }
    }

    /// Generate XML error response
    pub fn to_xml(&self) -> String {
        let resource = match self {
            S3Error::NoSuchKey(key) => key.clone(),
            S3Error::NoSuchBucket(bucket) => bucket.clone(),
            S3Error::NoSuchUpload(upload_id) => upload_id.clone(),
            _ => String::new(),
        };

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<Error>
    <Code>{}</Code>
    <Message>{}</Message>
    <Resource>{}</Resource>
    <RequestId>00000000-0000-0000-0000-000000000000</RequestId>
</Error>"#,
            self.code(),
            self,
            resource
        )
    }
}

impl IntoResponse for S3Error {
    fn into_response(self) -> Response {
        // InternalError is the only kind logged with its full cause; the rest
        // travel back to the client with a brief reason.
        if let S3Error::InternalError(ref cause) = self {
            error!("internal error: {}", cause);
        }

        let status = self.status_code();
        let body = self.to_xml();

        (status, [("Content-Type", "application/xml")], body).into_response()
    }
}

impl From<crate::store::StoreError> for S3Error {
    fn from(err: crate::store::StoreError) -> Self {
        use crate::store::StoreError;
        match err {
            StoreError::NotFound(key) => S3Error::NoSuchKey(key),
            StoreError::BucketNotFound(bucket) => S3Error::NoSuchBucket(bucket),
            StoreError::BucketNotEmpty(bucket) => S3Error::BucketNotEmpty(bucket),
            other => S3Error::InternalError(other.to_string()),
        }
    }
}

impl From<super::aws_chunked::ChunkedError> for S3Error {
    fn from(err: super::aws_chunked::ChunkedError) -> Self {
        use super::aws_chunked::ChunkedError;
        match err {
            ChunkedError::MalformedChunkedEncoding(reason) => S3Error::InvalidRequest(reason),
            ChunkedError::UnexpectedEof(reason) => S3Error::IncompleteBody(reason),
            ChunkedError::ChecksumMismatch { .. } => S3Error::BadDigest,
            ChunkedError::Body(reason) => S3Error::IncompleteBody(reason),
        }
    }
}
