//! Content prober: HEAD-then-ranged-GET cascade to recover status,
//! content-type, length, and range support without buffering a body.
//!
//! Grounded on the original `content_info_getter.py` (`ContentInfoGetter`).

use std::collections::HashMap;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderValue, RANGE};
use tracing::{debug, info, warn};

use crate::proxy_pool::SharedProxyPool;

/// How much of a probe response body to read looking for an m3u8 marker.
/// Bounded so a plain-GET probe against a large file never buffers it whole.
const BODY_PREFIX_CAP: usize = 2048;

#[derive(Debug, Clone, Default)]
pub struct ProbedContentInfo {
    pub status: u16,
    pub content_type: String,
    pub content_length: u64,
    pub accept_ranges: bool,
    pub response_headers: HashMap<String, String>,
    pub method_used: &'static str,
    pub body_prefix: String,
    pub error: Option<String>,
}

impl ProbedContentInfo {
    fn unknown(error: impl Into<String>) -> Self {
        ProbedContentInfo {
            status: 0,
            content_type: String::new(),
            content_length: 0,
            accept_ranges: false,
            response_headers: HashMap::new(),
            method_used: "GET_ALL_FAILED",
            body_prefix: String::new(),
            error: Some(error.into()),
        }
    }
}

/// Reads up to `cap` bytes off a response body without buffering the rest.
async fn body_prefix(response: reqwest::Response, cap: usize) -> String {
    let mut stream = response.bytes_stream();
    let mut buf = Vec::with_capacity(cap);
    while buf.len() < cap {
        match stream.next().await {
            Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
            _ => break,
        }
    }
    buf.truncate(cap);
    String::from_utf8_lossy(&buf).into_owned()
}

/// `use_head=true` tries a HEAD first; either way, falls through the ranged
/// and plain GET strategies on failure or an unusable response.
pub async fn probe(
    client: &Client,
    url: &str,
    headers: &HeaderMap,
    use_head: bool,
    proxy_pool: &SharedProxyPool,
    proxy_endpoint: Option<&str>,
) -> ProbedContentInfo {
    if use_head {
        match client.head(url).headers(headers.clone()).send().await {
            Ok(resp) => {
                let status = resp.status().as_u16();
                if matches!(status, 200 | 206) {
                    if let Some(len) = content_length(resp.headers()) {
                        if len > 0 {
                            // HEAD never carries a body to sniff.
                            return from_response_parts(status, resp.headers(), len, "HEAD", String::new());
                        }
                    }
                }
                debug!("HEAD probe unusable for {}: status {}", url, status);
            }
            Err(e) => {
                warn!("HEAD probe failed for {}: {}", url, e);
                if let Some(p) = proxy_endpoint {
                    proxy_pool.fail(p).await;
                }
            }
        }
    }

    for (range_value, label) in [("bytes=0-0", "RANGE_0_0"), ("bytes=0-999", "RANGE_0_999")] {
        match get_with_range(client, url, headers, range_value).await {
            Ok(resp) => {
                let status = resp.status().as_u16();
                if status == 206 {
                    let response_headers = resp.headers().clone();
                    if let Some(total) = parse_content_range_total(&response_headers) {
                        if total > 0 {
                            let prefix = body_prefix(resp, BODY_PREFIX_CAP).await;
                            return from_response_parts(status, &response_headers, total, label, prefix);
                        }
                    }
                }
                debug!("{} probe unusable for {}: status {}", label, url, status);
            }
            Err(e) => {
                warn!("{} probe failed for {}: {}", label, url, e);
                if let Some(p) = proxy_endpoint {
                    proxy_pool.fail(p).await;
                }
            }
        }
    }

    match client.get(url).headers(headers.clone()).send().await {
        Ok(resp) => {
            let status = resp.status().as_u16();
            if status == 200 {
                let response_headers = resp.headers().clone();
                if let Some(len) = content_length(&response_headers) {
                    if len > 0 {
                        let prefix = body_prefix(resp, BODY_PREFIX_CAP).await;
                        return from_response_parts(status, &response_headers, len, "GET", prefix);
                    }
                }
            }
            ProbedContentInfo::unknown(format!("plain GET returned unusable status {status}"))
        }
        Err(e) => {
            warn!("plain GET probe failed for {}: {}", url, e);
            if let Some(p) = proxy_endpoint {
                proxy_pool.fail(p).await;
            }
            ProbedContentInfo::unknown(e.to_string())
        }
    }
}

async fn get_with_range(
    client: &Client,
    url: &str,
    headers: &HeaderMap,
    range: &'static str,
) -> Result<reqwest::Response, reqwest::Error> {
    let mut headers = headers.clone();
    headers.insert(RANGE, HeaderValue::from_static(range));
    client.get(url).headers(headers).send().await
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
}

/// Parses `Content-Range: bytes start-end/total` (or `bytes */total`).
fn parse_content_range_total(headers: &HeaderMap) -> Option<u64> {
    let value = headers
        .get(reqwest::header::CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())?;
    let (_, total_part) = value.rsplit_once('/')?;
    total_part.trim().parse::<u64>().ok()
}

fn from_response_parts(
    status: u16,
    headers: &HeaderMap,
    content_length: u64,
    method_used: &'static str,
    body_prefix: String,
) -> ProbedContentInfo {
    let content_type = headers
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let accept_ranges = headers
        .get(reqwest::header::ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.eq_ignore_ascii_case("bytes"))
        .unwrap_or(method_used.starts_with("RANGE"));

    let response_headers = headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
        .collect();

    ProbedContentInfo {
        status,
        content_type,
        content_length,
        accept_ranges,
        response_headers,
        method_used,
        body_prefix,
        error: None,
    }
}

/// Classifies a probed target per the dispatcher's vocabulary matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentClass {
    M3u8,
    Video,
    Generic,
}

pub struct ClassifierVocab<'a> {
    pub video_extensions: &'a [String],
    pub video_patterns: &'a [String],
    pub video_indicators: &'a [String],
    pub video_content_types: &'a [String],
}

pub fn classify(
    url: &str,
    info: &ProbedContentInfo,
    vocab: &ClassifierVocab,
) -> (ContentClass, bool) {
    let content_type_lower = info.content_type.to_ascii_lowercase();

    if vocab
        .video_content_types
        .iter()
        .any(|ct| ct.eq_ignore_ascii_case(content_type_lower.trim()))
    {
        info!("content-type '{}' exact-matches the known video vocabulary", info.content_type);
    }

    if crate::config::defaults::M3U8_CONTENT_TYPES
        .iter()
        .any(|m| content_type_lower.contains(m))
    {
        return (ContentClass::M3u8, false);
    }

    let url_lower = url.to_ascii_lowercase();
    let url_looks_video = vocab
        .video_extensions
        .iter()
        .any(|ext| url_lower.ends_with(ext.as_str()))
        || vocab.video_patterns.iter().any(|p| url_lower.contains(p.as_str()));

    if !url_looks_video {
        return (ContentClass::Generic, false);
    }

    let content_type_matches = vocab
        .video_indicators
        .iter()
        .any(|ind| content_type_lower.contains(ind.as_str()));
    if content_type_matches {
        return (ContentClass::Video, false);
    }

    let is_octet_stream = content_type_lower.contains("application/octet-stream");
    if is_octet_stream {
        return (ContentClass::Video, false);
    }

    let size_and_range_heuristic = info.content_length > 1_000_000 && info.accept_ranges;
    if size_and_range_heuristic {
        return (ContentClass::Video, true);
    }

    (ContentClass::Generic, false)
}

pub fn probe_timeout(connect: Duration, read: Duration) -> Duration {
    connect + read
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> (Vec<String>, Vec<String>, Vec<String>, Vec<String>) {
        (
            vec![".mp4".to_string()],
            vec!["/hls/".to_string()],
            vec!["video/".to_string()],
            vec!["video/mp4".to_string()],
        )
    }

    #[test]
    fn classifies_m3u8_by_content_type() {
        let info = ProbedContentInfo {
            content_type: "application/vnd.apple.mpegurl".to_string(),
            ..Default::default()
        };
        let (exts, pats, inds, cts) = vocab();
        let v = ClassifierVocab {
            video_extensions: &exts,
            video_patterns: &pats,
            video_indicators: &inds,
            video_content_types: &cts,
        };
        assert_eq!(classify("http://x/a.m3u8", &info, &v).0, ContentClass::M3u8);
    }

    #[test]
    fn classifies_video_by_extension_and_content_type() {
        let info = ProbedContentInfo {
            content_type: "video/mp4".to_string(),
            ..Default::default()
        };
        let (exts, pats, inds, cts) = vocab();
        let v = ClassifierVocab {
            video_extensions: &exts,
            video_patterns: &pats,
            video_indicators: &inds,
            video_content_types: &cts,
        };
        let (class, lossy) = classify("http://x/movie.mp4", &info, &v);
        assert_eq!(class, ContentClass::Video);
        assert!(!lossy);
    }

    #[test]
    fn classifies_video_via_size_and_range_heuristic_marks_lossy() {
        let info = ProbedContentInfo {
            content_type: "application/octet-stream".to_string(),
            content_length: 2_000_000,
            accept_ranges: false,
            ..Default::default()
        };
        let (exts, pats, inds, cts) = vocab();
        let v = ClassifierVocab {
            video_extensions: &exts,
            video_patterns: &pats,
            video_indicators: &inds,
            video_content_types: &cts,
        };
        // octet-stream short-circuits to video before the heuristic is even reached.
        let (class, lossy) = classify("http://x/movie.mp4", &info, &v);
        assert_eq!(class, ContentClass::Video);
        assert!(!lossy);
    }

    #[test]
    fn size_and_range_heuristic_triggers_lossy_flag() {
        let info = ProbedContentInfo {
            content_type: "binary/x".to_string(),
            content_length: 2_000_000,
            accept_ranges: true,
            ..Default::default()
        };
        let (exts, pats, inds, cts) = vocab();
        let v = ClassifierVocab {
            video_extensions: &exts,
            video_patterns: &pats,
            video_indicators: &inds,
            video_content_types: &cts,
        };
        let (class, lossy) = classify("http://x/a/hls/segment", &info, &v);
        assert_eq!(class, ContentClass::Video);
        assert!(lossy);
    }

    #[test]
    fn generic_when_url_does_not_look_video() {
        let info = ProbedContentInfo::default();
        let (exts, pats, inds, cts) = vocab();
        let v = ClassifierVocab {
            video_extensions: &exts,
            video_patterns: &pats,
            video_indicators: &inds,
            video_content_types: &cts,
        };
        assert_eq!(classify("http://x/api/data", &info, &v).0, ContentClass::Generic);
    }

    #[test]
    fn exact_content_type_match_does_not_change_classification() {
        let info = ProbedContentInfo {
            content_type: "video/mp4".to_string(),
            ..Default::default()
        };
        let (exts, pats, inds, cts) = vocab();
        let v = ClassifierVocab {
            video_extensions: &exts,
            video_patterns: &pats,
            video_indicators: &inds,
            video_content_types: &cts,
        };
        // the exact-match vocabulary only drives a log line, not the verdict.
        let (class, _) = classify("http://x/movie.mp4", &info, &v);
        assert_eq!(class, ContentClass::Video);
    }
}
