//! Bucket S3 handlers: CreateBucket, DeleteBucket, HeadBucket, ListBuckets,
//! ListObjectsV2, ListMultipartUploads.

use super::{xml_response, AppState, BucketGetQuery};
use crate::api::extractors::ValidatedBucket;
use crate::api::xml::{
    BucketInfo, ListBucketResult, ListBucketsResult, ListMultipartUploadsResult, S3Object,
};
use crate::api::S3Error;
use crate::store::ObjectStore;
use crate::types::{validate_bucket_name, Owner};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument};

/// CREATE bucket handler
/// PUT /{bucket}
#[instrument(skip(state))]
pub async fn create_bucket(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
) -> Result<Response, S3Error> {
    info!("CREATE bucket {}", bucket);

    validate_bucket_name(&bucket).map_err(|e| S3Error::InvalidArgument(e.to_string()))?;
    state.store.create_bucket(&bucket).await?;

    Ok((StatusCode::OK, [("Location", format!("/{}", bucket))], "").into_response())
}

/// DELETE bucket handler
/// DELETE /{bucket}
#[instrument(skip(state))]
pub async fn delete_bucket(
    State(state): State<Arc<AppState>>,
    ValidatedBucket(bucket): ValidatedBucket,
) -> Result<Response, S3Error> {
    info!("DELETE bucket {}", bucket);

    state.store.delete_bucket(&bucket).await?;

    Ok(StatusCode::NO_CONTENT.into_response())
}

/// HEAD bucket handler
/// HEAD /{bucket}
#[instrument(skip(state))]
pub async fn head_bucket(
    State(state): State<Arc<AppState>>,
    ValidatedBucket(bucket): ValidatedBucket,
) -> Result<Response, S3Error> {
    info!("HEAD bucket {}", bucket);
    Ok((StatusCode::OK, [("x-amz-bucket-region", "us-east-1")]).into_response())
}

/// HEAD / — probe some S3 clients send before anything else.
pub async fn head_root() -> StatusCode {
    StatusCode::OK
}

/// LIST buckets handler
/// GET /
#[instrument(skip(state))]
pub async fn list_buckets(State(state): State<Arc<AppState>>) -> Result<Response, S3Error> {
    info!("LIST buckets");

    let buckets = state.store.list_buckets().await?;
    let xml = ListBucketsResult {
        owner: Owner::default(),
        buckets: buckets
            .into_iter()
            .map(|name| BucketInfo {
                name,
                creation_date: Utc::now(),
            })
            .collect(),
    }
    .to_xml();

    Ok(xml_response(xml))
}

/// Bucket-level GET handler — dispatches on query params
/// GET /{bucket}?list-type=2&prefix=  -> ListObjectsV2
/// GET /{bucket}?location            -> GetBucketLocation
/// GET /{bucket}?versioning          -> GetBucketVersioning
/// GET /{bucket}?uploads             -> ListMultipartUploads
#[instrument(skip(state))]
pub async fn bucket_get_handler(
    State(state): State<Arc<AppState>>,
    ValidatedBucket(bucket): ValidatedBucket,
    Query(query): Query<BucketGetQuery>,
) -> Result<Response, S3Error> {
    if query.location.is_some() {
        info!("GET bucket location: {}", bucket);
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<LocationConstraint xmlns="http://s3.amazonaws.com/doc/2006-03-01/">us-east-1</LocationConstraint>"#;
        return Ok(xml_response(xml.to_string()));
    }

    if query.versioning.is_some() {
        info!("GET bucket versioning: {}", bucket);
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<VersioningConfiguration xmlns="http://s3.amazonaws.com/doc/2006-03-01/"/>"#;
        return Ok(xml_response(xml.to_string()));
    }

    if query.uploads.is_some() {
        info!("LIST multipart uploads: {}", bucket);
        let prefix = query.prefix.as_deref();
        let uploads = state.multipart.list_uploads(Some(&bucket), prefix);
        let xml = ListMultipartUploadsResult {
            bucket,
            prefix: prefix.unwrap_or("").to_string(),
            uploads,
            max_uploads: 1000,
            is_truncated: false,
        }
        .to_xml();
        return Ok(xml_response(xml));
    }

    // Default: ListObjectsV2
    if let Some(list_type) = query.list_type {
        if list_type != 2 {
            return Err(S3Error::InvalidArgument(
                "Only ListObjectsV2 is supported (list-type=2)".to_string(),
            ));
        }
    }
    let prefix = query.prefix.unwrap_or_default();
    let delimiter = query.delimiter.clone();
    let max_keys = query.max_keys.unwrap_or(1000);
    info!("LIST {}/{}*", bucket, prefix);

    let all_objects: Vec<S3Object> = state
        .store
        .list_objects(&bucket, &prefix)
        .await?
        .into_iter()
        .map(|meta| S3Object {
            key: meta.key.clone(),
            size: meta.size,
            last_modified: meta.last_modified,
            etag: meta.quoted_etag(),
            storage_class: meta.storage_class.as_str().to_string(),
        })
        .collect();

    // Walk keys in ascending order, rolling delimiter groups up into
    // CommonPrefixes. Contents entries and distinct prefixes both count
    // against max-keys, the way S3 accounts for them; stopping early with
    // keys left over marks the listing truncated.
    let mut contents = Vec::new();
    let mut common_prefixes: Vec<String> = Vec::new();
    let mut seen_prefixes = std::collections::BTreeSet::new();
    let mut is_truncated = false;

    for obj in all_objects {
        if let Some(ref delim) = delimiter {
            let after_prefix = &obj.key[prefix.len()..];
            if let Some(pos) = after_prefix.find(delim.as_str()) {
                let common = format!("{}{}{}", prefix, &after_prefix[..pos], delim);
                // Keys under an already-emitted prefix consume no quota
                if seen_prefixes.contains(&common) {
                    continue;
                }
                if contents.len() + common_prefixes.len() >= max_keys as usize {
                    is_truncated = true;
                    break;
                }
                seen_prefixes.insert(common.clone());
                common_prefixes.push(common);
                continue;
            }
        }
        if contents.len() + common_prefixes.len() >= max_keys as usize {
            is_truncated = true;
            break;
        }
        contents.push(obj);
    }

    let xml = ListBucketResult {
        name: bucket,
        prefix,
        delimiter,
        max_keys,
        is_truncated,
        contents,
        common_prefixes,
    }
    .to_xml();

    Ok(xml_response(xml))
}
