//! s3stub - S3-compatible object-storage mock for integration testing
//!
//! This library provides the core functionality of the s3stub server: a
//! filesystem-backed object store, a file-backed multipart upload engine,
//! and an aws-chunked decoding pipeline behind an S3-shaped HTTP API.

pub mod api;
pub mod checksums;
pub mod config;
pub mod multipart;
pub mod store;
pub mod types;
