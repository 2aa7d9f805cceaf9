//! Range-aware byte streamer for video/media responses.
//!
//! Grounded on the original `video_streamer.py` (`VideoStreamer`): proxies a
//! GET honoring the client's `Range` header end-to-end, silently truncating
//! the response when the origin answers with 404/416/4xx rather than
//! surfacing an error after headers have already gone out.

use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Response, StatusCode, header};
use futures_util::StreamExt;
use reqwest::header::RANGE;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::config::defaults::INBOUND_HEADER_ALLOWLIST;
use crate::http_client::ClientFactory;
use crate::proxy_pool::SharedProxyPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedRange {
    pub start: u64,
    pub end: u64,
}

/// Mirrors the original `_parse_range_header`: clamps to file bounds when
/// known, swaps an inverted range, and caps the span at `max_range_size`.
/// Returns `None` when the header is absent or doesn't parse as a valid
/// `bytes=start-end` range — callers treat that the same as "no range".
pub fn parse_range_header(
    range_header: Option<&str>,
    file_size: u64,
    max_range_size: u64,
) -> Option<ParsedRange> {
    let header = range_header?;
    let rest = header.strip_prefix("bytes=")?;
    let (start_str, end_str) = rest.split_once('-')?;
    let mut start = start_str.parse::<u64>().ok()?;
    let mut end = if end_str.is_empty() {
        if file_size > 0 { file_size - 1 } else { 0 }
    } else {
        end_str.parse::<u64>().ok()?
    };

    if file_size > 0 {
        if start >= file_size {
            start = file_size - 1;
            end = file_size - 1;
        }
        if end >= file_size {
            end = file_size - 1;
        }
        if start > end {
            std::mem::swap(&mut start, &mut end);
        }
        if end - start + 1 > max_range_size {
            end = (start + max_range_size - 1).min(file_size - 1);
        }
    }

    Some(ParsedRange { start, end })
}

fn full_file_range(file_size: u64) -> ParsedRange {
    ParsedRange {
        start: 0,
        end: if file_size > 0 { file_size - 1 } else { 0 },
    }
}

fn canonicalize_outbound_headers(inbound: &HeaderMap, overlay: &std::collections::HashMap<String, String>) -> HeaderMap {
    let mut out = HeaderMap::new();
    out.insert(header::ACCEPT, HeaderValue::from_static("*/*"));
    out.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("identity"));

    for name in INBOUND_HEADER_ALLOWLIST {
        if matches!(*name, "Range") {
            continue;
        }
        if let Some(value) = inbound.get(*name) {
            if let Ok(hn) = header::HeaderName::from_bytes(name.as_bytes()) {
                out.insert(hn, value.clone());
            }
        }
    }

    for (k, v) in overlay {
        if let (Ok(hn), Ok(hv)) = (
            header::HeaderName::from_bytes(k.as_bytes()),
            HeaderValue::from_str(v),
        ) {
            out.insert(hn, hv);
        }
    }

    out
}

/// Streams `target_url` to the client, honoring `client_range` against
/// `file_size` (0 = unknown).
pub async fn stream_video(
    target_url: &str,
    inbound_headers: &HeaderMap,
    header_overlay: &std::collections::HashMap<String, String>,
    client_range: Option<&str>,
    file_size: u64,
    content_type: &str,
    config: &Config,
    factory: &ClientFactory,
    proxy_pool: &SharedProxyPool,
) -> Response<Body> {
    info!("streaming video with range support from {}", target_url);
    debug!("range header: {:?}", client_range);

    if file_size == 0 {
        warn!("file size is unknown, range requests may not work properly");
    }

    let range_requested = parse_range_header(client_range, file_size, config.max_range_size);
    let parsed = range_requested.unwrap_or_else(|| full_file_range(file_size));
    let range_requested = range_requested.is_some();

    let mut outbound_headers = canonicalize_outbound_headers(inbound_headers, header_overlay);
    if range_requested {
        let range_value = if file_size > 0 {
            format!("bytes={}-{}", parsed.start, parsed.end)
        } else {
            format!("bytes={}-", parsed.start)
        };
        info!("sending range to source: {}", range_value);
        if let Ok(v) = HeaderValue::from_str(&range_value) {
            outbound_headers.insert(RANGE, v);
        }
    }

    let proxy_endpoint = if proxy_pool.available().await {
        proxy_pool.pick().await
    } else {
        None
    };

    let timeout_multiplier = if proxy_endpoint.is_some() { 30.0 } else { 10.0 };
    let overall_timeout = Duration::from_secs_f64(config.stream_timeout * timeout_multiplier);

    let client = match factory.acquire(
        outbound_headers,
        true,
        false,
        proxy_endpoint.as_deref(),
        overall_timeout,
    ) {
        Ok(c) => c,
        Err(e) => {
            error!("failed to build streaming client: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to initialize upstream client");
        }
    };

    let upstream = match client.get(target_url).send().await {
        Ok(r) => r,
        Err(e) => {
            error!("video stream error: {}", e);
            if let Some(p) = &proxy_endpoint {
                proxy_pool.fail(p).await;
            }
            return empty_framed_response(content_type, range_requested, parsed, file_size);
        }
    };

    let status = upstream.status();
    info!("source response status: {}", status);

    if status == StatusCode::NOT_FOUND {
        error!("video not found (404): {}", target_url);
        return empty_framed_response(content_type, range_requested, parsed, file_size);
    }
    if status == StatusCode::RANGE_NOT_SATISFIABLE {
        error!("range not satisfiable (416): {}", target_url);
        return empty_framed_response(content_type, range_requested, parsed, file_size);
    }
    if status.as_u16() >= 400 {
        error!("source server error {}: {}", status, target_url);
        return empty_framed_response(content_type, range_requested, parsed, file_size);
    }

    let response_content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(content_type)
        .to_string();
    let content_range = upstream
        .headers()
        .get(header::CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let content_length_header = upstream
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    info!("video content-type: {}", response_content_type);
    info!("content-range: {}", content_range);

    let expected_bytes = expected_bytes_from_headers(&content_range, content_length_header.as_deref());
    let chunk_size = config.stream_chunk_size;

    let proxy_for_stream = proxy_endpoint.clone();
    let pool_for_stream = proxy_pool.clone();
    let mut bytes_streamed: u64 = 0;

    let byte_stream = upstream.bytes_stream().map(move |chunk_result| {
        match chunk_result {
            Ok(chunk) => {
                bytes_streamed += chunk.len() as u64;
                debug!("streamed {} bytes so far", bytes_streamed);
                Ok(chunk)
            }
            Err(e) => {
                let proxy = proxy_for_stream.clone();
                let pool = pool_for_stream.clone();
                tokio::spawn(async move {
                    if let Some(p) = proxy {
                        pool.fail(&p).await;
                    }
                });
                Err(e)
            }
        }
    });

    let body = if expected_bytes > 0 {
        Body::from_stream(truncate_at(byte_stream, expected_bytes, chunk_size))
    } else {
        Body::from_stream(byte_stream)
    };

    if let Some(p) = &proxy_endpoint {
        proxy_pool.succeed(p).await;
    }

    framed_response(body, &response_content_type, range_requested, parsed, file_size)
}

/// Wraps a byte stream, capping total forwarded bytes at `expected_bytes`
/// and otherwise just batching reads at roughly `chunk_size`.
fn truncate_at<S>(
    stream: S,
    expected_bytes: u64,
    _chunk_size: usize,
) -> impl futures_util::Stream<Item = Result<bytes::Bytes, reqwest::Error>>
where
    S: futures_util::Stream<Item = Result<bytes::Bytes, reqwest::Error>>,
{
    let mut seen: u64 = 0;
    stream.take_while(move |item| {
        let keep = seen < expected_bytes;
        if let Ok(chunk) = item {
            seen += chunk.len() as u64;
        }
        futures_util::future::ready(keep)
    })
}

fn expected_bytes_from_headers(content_range: &str, content_length: Option<&str>) -> u64 {
    if !content_range.is_empty() {
        if let Some(total) = parse_content_range_span(content_range) {
            info!("expected bytes from content-range: {}", total);
            return total;
        }
    }
    if let Some(len) = content_length {
        if let Ok(v) = len.parse::<u64>() {
            info!("expected bytes from content-length: {}", v);
            return v;
        }
    }
    0
}

fn parse_content_range_span(content_range: &str) -> Option<u64> {
    let rest = content_range.strip_prefix("bytes ")?;
    let (range_part, _total) = rest.split_once('/')?;
    let (start_str, end_str) = range_part.split_once('-')?;
    let start: u64 = start_str.trim().parse().ok()?;
    let end: u64 = end_str.trim().parse().ok()?;
    Some(end.saturating_sub(start) + 1)
}

fn empty_framed_response(
    content_type: &str,
    range_requested: bool,
    parsed: ParsedRange,
    file_size: u64,
) -> Response<Body> {
    framed_response(Body::empty(), content_type, range_requested, parsed, file_size)
}

fn framed_response(
    body: Body,
    content_type: &str,
    range_requested: bool,
    parsed: ParsedRange,
    file_size: u64,
) -> Response<Body> {
    let status = if range_requested {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };

    let mut builder = Response::builder()
        .status(status)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .header(header::ACCESS_CONTROL_ALLOW_HEADERS, "*")
        .header(
            header::ACCESS_CONTROL_EXPOSE_HEADERS,
            "Content-Length, Content-Range, Accept-Ranges",
        )
        .header(header::CONTENT_TYPE, content_type)
        .header("X-Content-Type-Options", "nosniff");

    if range_requested && file_size > 0 {
        let content_length = parsed.end - parsed.start + 1;
        builder = builder
            .header(
                header::CONTENT_RANGE,
                format!("bytes {}-{}/{}", parsed.start, parsed.end, file_size),
            )
            .header(header::CONTENT_LENGTH, content_length.to_string());
    } else if !range_requested && file_size > 0 {
        builder = builder.header(header::CONTENT_LENGTH, file_size.to_string());
    }

    builder
        .body(body)
        .unwrap_or_else(|_| Response::builder().status(StatusCode::INTERNAL_SERVER_ERROR).body(Body::empty()).unwrap())
}

fn error_response(status: StatusCode, msg: &str) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .body(Body::from(msg.to_string()))
        .unwrap_or_else(|_| Response::builder().status(StatusCode::INTERNAL_SERVER_ERROR).body(Body::empty()).unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_range_is_none() {
        assert_eq!(parse_range_header(None, 1000, 104_857_600), None);
        assert_eq!(full_file_range(1000), ParsedRange { start: 0, end: 999 });
    }

    #[test]
    fn absent_range_with_unknown_size_falls_back_to_zero_zero() {
        assert_eq!(parse_range_header(None, 0, 104_857_600), None);
        assert_eq!(full_file_range(0), ParsedRange { start: 0, end: 0 });
    }

    #[test]
    fn clamps_start_past_end_of_file() {
        let r = parse_range_header(Some("bytes=5000-5999"), 1000, 104_857_600);
        assert_eq!(r, Some(ParsedRange { start: 999, end: 999 }));
    }

    #[test]
    fn swaps_inverted_range() {
        let r = parse_range_header(Some("bytes=500-100"), 1000, 104_857_600);
        assert_eq!(r, Some(ParsedRange { start: 100, end: 500 }));
    }

    #[test]
    fn caps_span_at_max_range_size() {
        let r = parse_range_header(Some("bytes=0-999"), 10_000, 100).unwrap();
        assert_eq!(r.start, 0);
        assert_eq!(r.end, 99);
    }

    #[test]
    fn unparseable_range_is_none_and_treated_as_absent() {
        let r = parse_range_header(Some("not-a-range"), 1000, 104_857_600);
        assert_eq!(r, None);
        assert_eq!(full_file_range(1000), ParsedRange { start: 0, end: 999 });
    }

    #[test]
    fn open_ended_range_fills_to_file_size() {
        let r = parse_range_header(Some("bytes=100-"), 1000, 104_857_600);
        assert_eq!(r, Some(ParsedRange { start: 100, end: 999 }));
    }

    #[test]
    fn expected_bytes_prefers_content_range_over_length() {
        let v = expected_bytes_from_headers("bytes 0-999/5000", Some("12345"));
        assert_eq!(v, 1000);
    }

    #[test]
    fn expected_bytes_falls_back_to_content_length() {
        let v = expected_bytes_from_headers("", Some("2048"));
        assert_eq!(v, 2048);
    }

    #[test]
    fn expected_bytes_zero_when_unbounded() {
        let v = expected_bytes_from_headers("", None);
        assert_eq!(v, 0);
    }
}
