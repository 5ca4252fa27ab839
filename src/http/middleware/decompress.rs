//! Request body decompression.
//!
//! Decodes `gzip`, `deflate` (zlib) and `br` request bodies before they
//! reach the application. Encodings are checked in that order and the first
//! one listed in `Content-Encoding` is used.
//!
//! A body that fails to decode is forwarded unchanged, with its original
//! headers, and the failure is only logged at debug level.

use std::io::Read;

use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use flate2::read::{GzDecoder, ZlibDecoder};

/// Supported request content encodings, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentCoding {
    Gzip,
    Deflate,
    Brotli,
}

impl ContentCoding {
    const PRIORITY: [ContentCoding; 3] =
        [ContentCoding::Gzip, ContentCoding::Deflate, ContentCoding::Brotli];

    fn token(&self) -> &'static str {
        match self {
            ContentCoding::Gzip => "gzip",
            ContentCoding::Deflate => "deflate",
            ContentCoding::Brotli => "br",
        }
    }

    /// Decode `body`, reading at most `limit + 1` decoded bytes so an
    /// oversized result is detectable without inflating all of it.
    fn decode(&self, body: &[u8], limit: usize) -> std::io::Result<Vec<u8>> {
        let limit = limit.saturating_add(1) as u64;
        let mut decoded = Vec::new();
        match self {
            ContentCoding::Gzip => GzDecoder::new(body).take(limit).read_to_end(&mut decoded)?,
            ContentCoding::Deflate => ZlibDecoder::new(body).take(limit).read_to_end(&mut decoded)?,
            ContentCoding::Brotli => brotli::Decompressor::new(body, 4096)
                .take(limit)
                .read_to_end(&mut decoded)?,
        };
        Ok(decoded)
    }
}

/// The highest-priority supported coding listed in `Content-Encoding`.
pub fn request_coding(headers: &HeaderMap) -> Option<ContentCoding> {
    let listed: Vec<String> = headers
        .get_all(header::CONTENT_ENCODING)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .collect();

    ContentCoding::PRIORITY
        .into_iter()
        .find(|coding| listed.iter().any(|token| token == coding.token()))
}

/// Decode a compressed request body in place.
///
/// On success the `Content-Encoding` header is removed and `Content-Length`
/// reflects the decoded body. Bodies larger than `max_body`, before or after
/// decoding, are rejected with 413.
pub async fn decompress_request(
    State(max_body): State<usize>,
    request: Request,
    next: Next,
) -> Response {
    let Some(coding) = request_coding(request.headers()) else {
        return next.run(request).await;
    };

    let (mut parts, body) = request.into_parts();
    let raw = match axum::body::to_bytes(body, max_body).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(error = %e, "Request body rejected before decompression");
            return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response();
        }
    };

    let body = match coding.decode(&raw, max_body) {
        Ok(decoded) if decoded.len() > max_body => {
            tracing::debug!(
                coding = coding.token(),
                compressed_len = raw.len(),
                max_body,
                "Decoded request body exceeds limit"
            );
            return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response();
        }
        Ok(decoded) => {
            parts.headers.remove(header::CONTENT_ENCODING);
            parts
                .headers
                .insert(header::CONTENT_LENGTH, HeaderValue::from(decoded.len()));
            Bytes::from(decoded)
        }
        Err(e) => {
            tracing::debug!(
                coding = coding.token(),
                error = %e,
                "Request body decode failed, forwarding as received"
            );
            raw
        }
    };

    next.run(Request::from_parts(parts, Body::from(body))).await
}
