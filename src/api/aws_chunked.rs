//! AWS chunked transfer encoding decoder
//!
//! When an SDK signs the payload (`STREAMING-AWS4-HMAC-SHA256-PAYLOAD` and
//! friends), the body is framed as aws-chunked:
//!
//! ```text
//! <hex-chunk-size>;chunk-signature=<signature>\r\n
//! <chunk-data>\r\n
//! ...
//! 0;chunk-signature=<signature>\r\n
//! [<checksum-trailer-name>:<base64-checksum>\r\n]
//! \r\n
//! ```
//!
//! [`AwsChunkedStream`] unwraps that framing as the body streams through: it
//! yields only payload bytes, swallows size lines and signatures, and captures
//! the trailing checksum. Nothing here verifies signatures, and the whole body
//! is never held in memory — parsing works on a small carry-over buffer.

use crate::checksums::{ChecksumAlgorithm, StreamingHasher};
use crate::types::headers;
use axum::http::HeaderMap;
use bytes::{Bytes, BytesMut};
use futures::Stream;
use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use thiserror::Error;

/// Longest accepted chunk-header or trailer line. Real lines are well under
/// 200 bytes; anything bigger is a framing violation, not a big chunk.
const MAX_LINE_LEN: usize = 8192;

/// Errors produced while unwrapping aws-chunked framing.
#[derive(Debug, Clone, Error)]
pub enum ChunkedError {
    #[error("malformed chunked encoding: {0}")]
    MalformedChunkedEncoding(String),

    #[error("unexpected end of chunked body: {0}")]
    UnexpectedEof(String),

    #[error("checksum mismatch: trailer {expected}, computed {computed}")]
    ChecksumMismatch { expected: String, computed: String },

    #[error("body error: {0}")]
    Body(String),
}

/// Check if the request body uses AWS chunked encoding
pub fn is_aws_chunked(req_headers: &HeaderMap) -> bool {
    req_headers
        .get(headers::AMZ_CONTENT_SHA256)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("STREAMING-"))
        .unwrap_or(false)
}

/// Get the decoded content length from headers
pub fn decoded_content_length(req_headers: &HeaderMap) -> Option<u64> {
    req_headers
        .get(headers::AMZ_DECODED_CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

/// The checksum trailer announced via `x-amz-trailer`, if any.
pub fn trailer_checksum_header(req_headers: &HeaderMap) -> Option<String> {
    req_headers
        .get(headers::AMZ_TRAILER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
}

/// Observables that outlive the decoder: the handler hands the stream to the
/// writer by value, then reads the trailer results from this handle.
#[derive(Clone)]
pub struct TrailerHandle(Arc<Mutex<TrailerState>>);

#[derive(Default)]
struct TrailerState {
    decoded_length: Option<u64>,
    read_decoded_length: u64,
    algorithm: Option<ChecksumAlgorithm>,
    checksum: Option<String>,
}

impl TrailerHandle {
    /// Length announced by the client, as supplied at construction.
    pub fn decoded_length(&self) -> Option<u64> {
        self.0.lock().decoded_length
    }

    /// Payload bytes actually emitted. Equals `decoded_length` on success.
    pub fn read_decoded_length(&self) -> u64 {
        self.0.lock().read_decoded_length
    }

    /// Algorithm inferred from the captured trailer's header name.
    pub fn algorithm(&self) -> Option<ChecksumAlgorithm> {
        self.0.lock().algorithm
    }

    /// The base64 checksum from the trailer, verbatim.
    pub fn checksum(&self) -> Option<String> {
        self.0.lock().checksum.clone()
    }
}

enum DecodeState {
    /// Reading a `<hex-size>[;attrs]\r\n` line.
    Header,
    /// Emitting chunk payload bytes.
    Chunk { remaining: u64 },
    /// Expecting the `\r\n` that closes a chunk.
    ChunkCrlf,
    /// Reading trailer lines after the zero chunk.
    Trailers,
    Done,
}

/// Stream adapter unwrapping aws-chunked framing from an underlying body
/// stream. Yields payload bytes only.
pub struct AwsChunkedStream<S> {
    inner: S,
    buf: BytesMut,
    state: DecodeState,
    decoded_length: Option<u64>,
    read_decoded_length: u64,
    /// Trailer header retained from the framing, lowercase.
    trailer_name: Option<String>,
    /// Captured `(algorithm, base64)` once the trailer line is seen.
    captured: Option<(ChecksumAlgorithm, String)>,
    /// Set when the caller asked for verification against the trailer.
    verifier: Option<StreamingHasher>,
    handle: TrailerHandle,
}

impl<S> AwsChunkedStream<S> {
    /// Wrap `inner`. `decoded_length` is the client-announced payload length;
    /// `trailer_name` selects which trailer line (if any) to retain.
    pub fn new(inner: S, decoded_length: Option<u64>, trailer_name: Option<String>) -> Self {
        let handle = TrailerHandle(Arc::new(Mutex::new(TrailerState {
            decoded_length,
            ..TrailerState::default()
        })));
        Self {
            inner,
            buf: BytesMut::new(),
            state: DecodeState::Header,
            decoded_length,
            read_decoded_length: 0,
            trailer_name,
            captured: None,
            verifier: None,
            handle,
        }
    }

    /// Also verify the payload against the trailer checksum. Requires the
    /// trailer name to map to a known algorithm; a mismatch at EOF fails the
    /// stream with [`ChunkedError::ChecksumMismatch`].
    pub fn verifying(mut self) -> Self {
        let algorithm = self
            .trailer_name
            .as_deref()
            .and_then(ChecksumAlgorithm::from_trailer_header);
        self.verifier = algorithm.map(|a| StreamingHasher::new(Some(a)));
        self
    }

    /// Handle for reading the post-EOF observables.
    pub fn trailer_handle(&self) -> TrailerHandle {
        self.handle.clone()
    }

    /// Find one `\r\n`-terminated line in the buffer and consume it.
    fn take_line(&mut self) -> Result<Option<String>, ChunkedError> {
        let Some(pos) = self.buf.windows(2).position(|w| w == b"\r\n") else {
            if self.buf.len() > MAX_LINE_LEN {
                return Err(ChunkedError::MalformedChunkedEncoding(
                    "header line exceeds maximum length".to_string(),
                ));
            }
            return Ok(None);
        };
        let line = self.buf.split_to(pos + 2);
        let line = &line[..pos];
        String::from_utf8(line.to_vec()).map(Some).map_err(|_| {
            ChunkedError::MalformedChunkedEncoding("header line is not valid UTF-8".to_string())
        })
    }

    /// End-of-chunks bookkeeping: length check, trailer verification, and
    /// publishing the observables.
    fn finalize(&mut self) -> Result<(), ChunkedError> {
        if let Some(expected) = self.decoded_length {
            if self.read_decoded_length < expected {
                return Err(ChunkedError::UnexpectedEof(format!(
                    "decoded {} of {} expected bytes",
                    self.read_decoded_length, expected
                )));
            }
            if self.read_decoded_length > expected {
                return Err(ChunkedError::MalformedChunkedEncoding(format!(
                    "decoded {} bytes, {} announced",
                    self.read_decoded_length, expected
                )));
            }
        }

        if let Some(hasher) = self.verifier.take() {
            let (_, computed) = hasher.finish();
            if let (Some((_, expected)), Some(computed)) = (self.captured.as_ref(), computed) {
                if *expected != computed {
                    return Err(ChunkedError::ChecksumMismatch {
                        expected: expected.clone(),
                        computed,
                    });
                }
            }
        }

        let mut state = self.handle.0.lock();
        state.read_decoded_length = self.read_decoded_length;
        if let Some((algorithm, checksum)) = self.captured.take() {
            state.algorithm = Some(algorithm);
            state.checksum = Some(checksum);
        }
        Ok(())
    }
}

impl<S, E> Stream for AwsChunkedStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    type Item = Result<Bytes, ChunkedError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match this.state {
                DecodeState::Header => match this.take_line() {
                    Err(e) => {
                        this.state = DecodeState::Done;
                        return Poll::Ready(Some(Err(e)));
                    }
                    Ok(Some(line)) => {
                        // "<hex-size>" optionally followed by ";attr=..."
                        let size_hex = line.split(';').next().unwrap_or("").trim();
                        let size = match u64::from_str_radix(size_hex, 16) {
                            Ok(size) => size,
                            Err(_) => {
                                this.state = DecodeState::Done;
                                return Poll::Ready(Some(Err(
                                    ChunkedError::MalformedChunkedEncoding(format!(
                                        "invalid chunk size line: {:?}",
                                        line
                                    )),
                                )));
                            }
                        };
                        this.state = if size == 0 {
                            DecodeState::Trailers
                        } else {
                            DecodeState::Chunk { remaining: size }
                        };
                    }
                    Ok(None) => match futures::ready!(Pin::new(&mut this.inner).poll_next(cx)) {
                        Some(Ok(bytes)) => this.buf.extend_from_slice(&bytes),
                        Some(Err(e)) => {
                            this.state = DecodeState::Done;
                            return Poll::Ready(Some(Err(ChunkedError::Body(e.to_string()))));
                        }
                        None => {
                            this.state = DecodeState::Done;
                            return Poll::Ready(Some(Err(ChunkedError::UnexpectedEof(
                                "body ended inside a chunk header".to_string(),
                            ))));
                        }
                    },
                },

                DecodeState::Chunk { remaining } => {
                    if !this.buf.is_empty() {
                        let take = remaining.min(this.buf.len() as u64) as usize;
                        let chunk = this.buf.split_to(take).freeze();
                        this.read_decoded_length += chunk.len() as u64;
                        if let Some(ref mut hasher) = this.verifier {
                            hasher.update(&chunk);
                        }
                        let remaining = remaining - chunk.len() as u64;
                        this.state = if remaining == 0 {
                            DecodeState::ChunkCrlf
                        } else {
                            DecodeState::Chunk { remaining }
                        };
                        return Poll::Ready(Some(Ok(chunk)));
                    }
                    match futures::ready!(Pin::new(&mut this.inner).poll_next(cx)) {
                        Some(Ok(bytes)) => this.buf.extend_from_slice(&bytes),
                        Some(Err(e)) => {
                            this.state = DecodeState::Done;
                            return Poll::Ready(Some(Err(ChunkedError::Body(e.to_string()))));
                        }
                        None => {
                            this.state = DecodeState::Done;
                            return Poll::Ready(Some(Err(ChunkedError::UnexpectedEof(
                                "body ended inside chunk data".to_string(),
                            ))));
                        }
                    }
                }

                DecodeState::ChunkCrlf => {
                    if this.buf.len() >= 2 {
                        if &this.buf[..2] != b"\r\n" {
                            this.state = DecodeState::Done;
                            return Poll::Ready(Some(Err(
                                ChunkedError::MalformedChunkedEncoding(
                                    "missing CRLF after chunk data".to_string(),
                                ),
                            )));
                        }
                        let _ = this.buf.split_to(2);
                        this.state = DecodeState::Header;
                        continue;
                    }
                    match futures::ready!(Pin::new(&mut this.inner).poll_next(cx)) {
                        Some(Ok(bytes)) => this.buf.extend_from_slice(&bytes),
                        Some(Err(e)) => {
                            this.state = DecodeState::Done;
                            return Poll::Ready(Some(Err(ChunkedError::Body(e.to_string()))));
                        }
                        None => {
                            this.state = DecodeState::Done;
                            return Poll::Ready(Some(Err(ChunkedError::UnexpectedEof(
                                "body ended before chunk terminator".to_string(),
                            ))));
                        }
                    }
                }

                DecodeState::Trailers => match this.take_line() {
                    Err(e) => {
                        this.state = DecodeState::Done;
                        return Poll::Ready(Some(Err(e)));
                    }
                    Ok(Some(line)) => {
                        if line.is_empty() {
                            this.state = DecodeState::Done;
                            return match this.finalize() {
                                Ok(()) => Poll::Ready(None),
                                Err(e) => Poll::Ready(Some(Err(e))),
                            };
                        }
                        let Some((name, value)) = line.split_once(':') else {
                            this.state = DecodeState::Done;
                            return Poll::Ready(Some(Err(
                                ChunkedError::MalformedChunkedEncoding(format!(
                                    "invalid trailer line: {:?}",
                                    line
                                )),
                            )));
                        };
                        let name = name.trim().to_ascii_lowercase();
                        if this.trailer_name.as_deref() == Some(name.as_str()) {
                            if let Some(algorithm) =
                                ChecksumAlgorithm::from_trailer_header(&name)
                            {
                                this.captured = Some((algorithm, value.trim().to_string()));
                            }
                        }
                    }
                    Ok(None) => match futures::ready!(Pin::new(&mut this.inner).poll_next(cx)) {
                        Some(Ok(bytes)) => this.buf.extend_from_slice(&bytes),
                        Some(Err(e)) => {
                            this.state = DecodeState::Done;
                            return Poll::Ready(Some(Err(ChunkedError::Body(e.to_string()))));
                        }
                        None => {
                            this.state = DecodeState::Done;
                            // A missing final CRLF after the zero chunk is
                            // tolerated; some clients omit it.
                            return match this.finalize() {
                                Ok(()) => Poll::Ready(None),
                                Err(e) => Poll::Ready(Some(Err(e))),
                            };
                        }
                    },
                },

                DecodeState::Done => return Poll::Ready(None),
            }
        }
    }
}
