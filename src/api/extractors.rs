//! Custom Axum extractors for S3 API validation
//!
//! These extractors validate S3 request parameters once, eliminating
//! repetitive validation code from handlers.

use super::errors::S3Error;
use super::handlers::AppState;
use crate::store::ObjectStore;
use crate::types::{validate_bucket_name, validate_object_key};
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, Path},
    http::request::Parts,
};
use std::sync::Arc;

/// Validated bucket extractor
///
/// Checks the bucket name shape and that the bucket exists in the store.
/// Returns `S3Error::NoSuchBucket` if it does not.
#[derive(Debug, Clone)]
pub struct ValidatedBucket(pub String);

impl std::ops::Deref for ValidatedBucket {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for ValidatedBucket
where
    S: Send + Sync,
    Arc<AppState>: FromRef<S>,
{
    type Rejection = S3Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(bucket): Path<String> = Path::from_request_parts(parts, state)
            .await
            .map_err(|_| S3Error::InvalidArgument("Invalid bucket path".to_string()))?;

        validate_bucket_name(&bucket).map_err(|e| S3Error::InvalidArgument(e.to_string()))?;

        let app_state = Arc::<AppState>::from_ref(state);
        if !app_state.store.head_bucket(&bucket).await? {
            return Err(S3Error::NoSuchBucket(bucket));
        }

        Ok(ValidatedBucket(bucket))
    }
}

/// Validated bucket and key extractor
///
/// Validates the bucket as [`ValidatedBucket`] does and normalizes the key
/// by removing leading slashes.
#[derive(Debug, Clone)]
pub struct ValidatedPath {
    pub bucket: String,
    pub key: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for ValidatedPath
where
    S: Send + Sync,
    Arc<AppState>: FromRef<S>,
{
    type Rejection = S3Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path((bucket, key)): Path<(String, String)> = Path::from_request_parts(parts, state)
            .await
            .map_err(|_| S3Error::InvalidArgument("Invalid bucket/key path".to_string()))?;

        validate_bucket_name(&bucket).map_err(|e| S3Error::InvalidArgument(e.to_string()))?;

        let app_state = Arc::<AppState>::from_ref(state);
        if !app_state.store.head_bucket(&bucket).await? {
            return Err(S3Error::NoSuchBucket(bucket));
        }

        // Normalize key by removing leading slashes
        let key = key.trim_start_matches('/').to_string();
        validate_object_key(&key).map_err(|e| S3Error::InvalidArgument(e.to_string()))?;

        Ok(ValidatedPath { bucket, key })
    }
}
