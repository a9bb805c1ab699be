//! Content digests and S3 ETag computation.
//!
//! MD5 drives ETags: a plain object's ETag is the hex MD5 of its bytes, and
//! a multipart object's ETag is the MD5 of the concatenated raw part digests
//! with a `-<count>` suffix. The `x-amz-checksum-*` family (SHA256, SHA1,
//! CRC32, CRC32C) is computed separately and reported base64-encoded.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use md5::{Digest, Md5};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tokio::io::AsyncReadExt;

/// Read buffer size for streaming digests over part files.
const DIGEST_BUF_SIZE: usize = 64 * 1024;

/// Checksum algorithms accepted in `x-amz-checksum-*` headers and trailers.
///
/// MD5 is not listed here; it is always computed for the ETag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ChecksumAlgorithm {
    Crc32,
    Crc32c,
    Sha1,
    Sha256,
}

impl ChecksumAlgorithm {
    /// Canonical string used in S3 headers and XML.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Crc32 => "CRC32",
            Self::Crc32c => "CRC32C",
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
        }
    }

    /// The trailer header that carries this algorithm's checksum in an
    /// aws-chunked body.
    pub fn trailer_header(&self) -> &'static str {
        match self {
            Self::Crc32 => "x-amz-checksum-crc32",
            Self::Crc32c => "x-amz-checksum-crc32c",
            Self::Sha1 => "x-amz-checksum-sha1",
            Self::Sha256 => "x-amz-checksum-sha256",
        }
    }

    /// Inverse of [`trailer_header`](Self::trailer_header), case-insensitive.
    pub fn from_trailer_header(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "x-amz-checksum-crc32" => Some(Self::Crc32),
            "x-amz-checksum-crc32c" => Some(Self::Crc32c),
            "x-amz-checksum-sha1" => Some(Self::Sha1),
            "x-amz-checksum-sha256" => Some(Self::Sha256),
            _ => None,
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a [`ChecksumAlgorithm`] from a string fails.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown checksum algorithm: {0}")]
pub struct ParseChecksumAlgorithmError(String);

impl FromStr for ChecksumAlgorithm {
    type Err = ParseChecksumAlgorithmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CRC32" => Ok(Self::Crc32),
            "CRC32C" => Ok(Self::Crc32c),
            "SHA1" => Ok(Self::Sha1),
            "SHA256" => Ok(Self::Sha256),
            _ => Err(ParseChecksumAlgorithmError(s.to_owned())),
        }
    }
}

/// Hex MD5 of a byte slice.
pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Streaming MD5 over a file, returning the raw 16-byte digest.
///
/// Part files can be gigabytes; this never buffers more than one read.
pub async fn file_md5_raw(path: &Path) -> std::io::Result<[u8; 16]> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; DIGEST_BUF_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}

/// Streaming hex MD5 over a file.
pub async fn file_md5_hex(path: &Path) -> std::io::Result<String> {
    Ok(hex::encode(file_md5_raw(path).await?))
}

/// Composite ETag for a multipart object: MD5 over the concatenated raw part
/// digests, hex-encoded, suffixed with the part count. No surrounding quotes;
/// callers add them where the wire format demands.
pub fn multipart_etag(part_digests: &[[u8; 16]]) -> String {
    let mut concat = Vec::with_capacity(part_digests.len() * 16);
    for digest in part_digests {
        concat.extend_from_slice(digest);
    }
    format!("{}-{}", hex::encode(Md5::digest(&concat)), part_digests.len())
}

/// Append the KMS key id to an ETag when the object was stored with one.
///
/// Real S3 does not do this; existing clients of the mock compare against the
/// suffixed form, so the quirk is load-bearing.
pub fn tagged_etag(md5_hex: impl Into<String>, kms_key_id: Option<&str>) -> String {
    let md5_hex = md5_hex.into();
    match kms_key_id {
        Some(key_id) => format!("{md5_hex}-{key_id}"),
        None => md5_hex,
    }
}

/// Base64 checksum of a byte slice under the given algorithm.
pub fn compute_checksum(algorithm: ChecksumAlgorithm, data: &[u8]) -> String {
    match algorithm {
        ChecksumAlgorithm::Crc32 => {
            let mut hasher = crc32fast::Hasher::new();
            hasher.update(data);
            BASE64_STANDARD.encode(hasher.finalize().to_be_bytes())
        }
        ChecksumAlgorithm::Crc32c => BASE64_STANDARD.encode(crc32c::crc32c(data).to_be_bytes()),
        ChecksumAlgorithm::Sha1 => BASE64_STANDARD.encode(sha1::Sha1::digest(data)),
        ChecksumAlgorithm::Sha256 => BASE64_STANDARD.encode(sha2::Sha256::digest(data)),
    }
}

/// Incremental hasher computing MD5 and optionally one extra S3 checksum.
///
/// Used wherever a body is consumed exactly once but several digests are
/// needed: part writes, plain PUTs, and trailer verification in the chunked
/// decoder.
pub struct StreamingHasher {
    md5: Md5,
    sha1: Option<sha1::Sha1>,
    sha256: Option<sha2::Sha256>,
    crc32: Option<crc32fast::Hasher>,
    crc32c: Option<u32>,
    algorithm: Option<ChecksumAlgorithm>,
}

impl StreamingHasher {
    /// MD5 is always computed; `algorithm` requests one extra checksum.
    pub fn new(algorithm: Option<ChecksumAlgorithm>) -> Self {
        let mut hasher = Self {
            md5: Md5::new(),
            sha1: None,
            sha256: None,
            crc32: None,
            crc32c: None,
            algorithm,
        };
        match algorithm {
            Some(ChecksumAlgorithm::Sha1) => hasher.sha1 = Some(<sha1::Sha1 as Digest>::new()),
            Some(ChecksumAlgorithm::Sha256) => {
                hasher.sha256 = Some(<sha2::Sha256 as Digest>::new());
            }
            Some(ChecksumAlgorithm::Crc32) => hasher.crc32 = Some(crc32fast::Hasher::new()),
            Some(ChecksumAlgorithm::Crc32c) => hasher.crc32c = Some(0),
            None => {}
        }
        hasher
    }

    /// Feed more data into every active digest.
    pub fn update(&mut self, data: &[u8]) {
        Digest::update(&mut self.md5, data);
        if let Some(ref mut h) = self.sha1 {
            Digest::update(h, data);
        }
        if let Some(ref mut h) = self.sha256 {
            Digest::update(h, data);
        }
        if let Some(ref mut h) = self.crc32 {
            h.update(data);
        }
        if let Some(ref mut val) = self.crc32c {
            *val = crc32c::crc32c_append(*val, data);
        }
    }

    /// Finalize, returning the raw MD5 digest and the extra checksum (base64)
    /// if one was requested.
    pub fn finish(self) -> ([u8; 16], Option<String>) {
        let md5: [u8; 16] = Digest::finalize(self.md5).into();
        let checksum = self.algorithm.map(|algorithm| match algorithm {
            ChecksumAlgorithm::Sha1 => {
                BASE64_STANDARD.encode(Digest::finalize(self.sha1.unwrap_or_default()))
            }
            ChecksumAlgorithm::Sha256 => {
                BASE64_STANDARD.encode(Digest::finalize(self.sha256.unwrap_or_default()))
            }
            ChecksumAlgorithm::Crc32 => {
                let val = self.crc32.map(crc32fast::Hasher::finalize).unwrap_or(0);
                BASE64_STANDARD.encode(val.to_be_bytes())
            }
            ChecksumAlgorithm::Crc32c => {
                BASE64_STANDARD.encode(self.crc32c.unwrap_or(0).to_be_bytes())
            }
        });
        (md5, checksum)
    }
}
