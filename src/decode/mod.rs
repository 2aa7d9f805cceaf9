//! Path decoding and target URL resolution.
//!
//! Grounded on the original `url_utils.py` (`decode_base64_url`,
//! `parse_encoded_data`, `normalize_url`, `build_url`): the four inbound
//! path conventions all carry a base64-url payload in their second segment
//! and differ only in where the target URL and header overrides live.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use regex::Regex;
use std::sync::LazyLock;

use crate::config::defaults::HEADER_OVERLAY_ALLOWLIST;
use crate::errors::AppError;

static ABSOLUTE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s]+").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Enc,
    Enc1,
    Enc2,
    Enc3,
    Literal,
}

impl HandlerKind {
    fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "enc" => Some(HandlerKind::Enc),
            "enc1" => Some(HandlerKind::Enc1),
            "enc2" => Some(HandlerKind::Enc2),
            "enc3" => Some(HandlerKind::Enc3),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DecodedPath {
    pub handler_kind: HandlerKind,
    pub encoded_params: HashMap<String, String>,
    pub additional_segments: Vec<String>,
    pub literal_path: Option<String>,
}

/// Decodes a URL-safe base64 payload, following the original's tolerance
/// for missing padding and percent-encoded input.
pub fn decode_base64_url(encoded: &str) -> Result<String, AppError> {
    let unescaped = urlencoding::decode(encoded)
        .map_err(|e| AppError::BadRequest(format!("base64 payload unescape error: {e}")))?
        .into_owned();

    let translated: String = unescaped
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();

    let padding = (4 - translated.len() % 4) % 4;
    let padded = format!("{translated}{}", "=".repeat(padding));

    let bytes = B64
        .decode(padded.as_bytes())
        .map_err(|e| AppError::BadRequest(format!("base64 decode error: {e}")))?;

    String::from_utf8(bytes).map_err(|e| AppError::BadRequest(format!("decoded payload is not utf-8: {e}")))
}

/// Splits a decoded payload into `param/key=value` overrides and the
/// remaining URL-fragment tail.
pub fn parse_encoded_data(decoded: &str) -> (HashMap<String, String>, Vec<String>) {
    let mut params = HashMap::new();
    if decoded.is_empty() {
        return (params, Vec::new());
    }

    let parts: Vec<&str> = decoded.split('/').collect();
    let mut i = 0;
    let mut tail_start = 0;

    while i < parts.len() {
        if parts[i] == "param" && i + 1 < parts.len() {
            if let Some((key, value)) = parts[i + 1].split_once('=') {
                let decoded_value = urlencoding::decode(value)
                    .map(|c| c.into_owned())
                    .unwrap_or_else(|_| value.to_string());
                params.insert(key.to_string(), decoded_value);
                i += 2;
                tail_start = i;
                continue;
            }
        }
        i += 1;
    }

    (params, parts[tail_start..].iter().map(|s| s.to_string()).collect())
}

/// Strips duplicated scheme prefixes, expands protocol-relative URLs, and
/// repairs single-slash schemes, finally prefixing `https://` if none.
pub fn normalize_url(url: &str) -> Result<String, AppError> {
    if url.is_empty() {
        return Err(AppError::BadRequest("empty url".to_string()));
    }

    let mut url = url.to_string();
    for proto1 in ["https://", "http://"] {
        for proto2 in ["https://", "http://"] {
            let duplicate = format!("{proto1}{proto2}");
            if url.starts_with(&duplicate) {
                url = url[proto1.len()..].to_string();
                break;
            }
        }
    }

    if let Some(rest) = url.strip_prefix("//") {
        url = format!("https:{rest}");
    }

    url = repair_single_slash_scheme(&url);

    if !url.starts_with("http://") && !url.starts_with("https://") {
        url = format!("https://{url}");
    }

    Ok(url)
}

/// `https:/host` -> `https://host`, leaving an already-correct `://` alone.
fn repair_single_slash_scheme(url: &str) -> String {
    for scheme in ["https:", "http:"] {
        if let Some(rest) = url.strip_prefix(scheme) {
            if let Some(after_slash) = rest.strip_prefix('/') {
                if !after_slash.starts_with('/') {
                    return format!("{scheme}//{after_slash}");
                }
            }
        }
    }
    url.to_string()
}

/// Joins segments, extracts an embedded absolute URL if present, normalizes,
/// and merges caller-supplied query parameters.
pub fn build_url(segments: &[String], extra_query: Option<&str>) -> Result<String, AppError> {
    if segments.is_empty() {
        return Err(AppError::BadRequest("no url segments provided".to_string()));
    }

    let joined = segments.join("/");

    let mut candidate = if let Some(m) = ABSOLUTE_URL.find(&joined) {
        m.as_str().to_string()
    } else {
        normalize_url(&joined)?
    };

    let mut parsed =
        url::Url::parse(&candidate).map_err(|e| AppError::BadRequest(format!("invalid url: {e}")))?;

    if parsed.host_str().is_none() {
        return Err(AppError::BadRequest(format!("invalid hostname in url: {candidate}")));
    }

    if let Some(extra) = extra_query {
        if !extra.is_empty() {
            let merged = overlay_query_pairs(parsed.query().unwrap_or(""), extra);
            parsed.set_query(Some(&merged));
        }
    }

    candidate = parsed.to_string();
    Ok(candidate)
}

fn parse_query_pairs(query: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Overlays `extra`'s key/value pairs onto `existing`'s, last-value-wins on a
/// shared key, preserving the order keys were first seen in.
fn overlay_query_pairs(existing: &str, extra: &str) -> String {
    let mut pairs = parse_query_pairs(existing);
    for (key, value) in parse_query_pairs(extra) {
        match pairs.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => pairs.push((key, value)),
        }
    }
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .finish()
}

/// Splits the raw request path into its handler kind and remaining segments.
pub fn classify_path(raw_path: &str) -> Result<DecodedPathSkeleton, AppError> {
    let segments: Vec<&str> = raw_path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return Err(AppError::BadRequest("empty path".to_string()));
    }

    match HandlerKind::from_segment(segments[0]) {
        Some(kind) => Ok(DecodedPathSkeleton::Encoded {
            kind,
            payload: segments.get(1).map(|s| s.to_string()),
            extra_segments: segments[2.min(segments.len())..]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }),
        None => Ok(DecodedPathSkeleton::Literal(raw_path.to_string())),
    }
}

pub enum DecodedPathSkeleton {
    Encoded {
        kind: HandlerKind,
        payload: Option<String>,
        extra_segments: Vec<String>,
    },
    Literal(String),
}

/// Full decode: classifies the path, decodes the base64 payload, assembles
/// the target URL by handler-kind rule, and resolves header overrides.
pub struct Resolved {
    pub decoded_path: DecodedPath,
    pub target_url: String,
    pub header_overlay: HashMap<String, String>,
}

pub fn resolve(raw_path: &str, query: Option<&str>) -> Result<Resolved, AppError> {
    match classify_path(raw_path)? {
        DecodedPathSkeleton::Literal(path) => {
            let target_url = normalize_literal(&path)?;
            Ok(Resolved {
                decoded_path: DecodedPath {
                    handler_kind: HandlerKind::Literal,
                    encoded_params: HashMap::new(),
                    additional_segments: Vec::new(),
                    literal_path: Some(path),
                },
                target_url,
                header_overlay: HashMap::new(),
            })
        }
        DecodedPathSkeleton::Encoded {
            kind,
            payload,
            extra_segments,
        } => {
            let payload = payload
                .ok_or_else(|| AppError::BadRequest("missing encoded payload segment".to_string()))?;
            let decoded = decode_base64_url(&payload)?;
            let (params, tail) = parse_encoded_data(&decoded);

            let (target_url, header_overlay) = match kind {
                HandlerKind::Enc | HandlerKind::Enc1 | HandlerKind::Enc3 => {
                    if extra_segments.is_empty() {
                        return Err(AppError::BadRequest(
                            "no url segments after encoded block".to_string(),
                        ));
                    }
                    let url = build_url(&extra_segments, query)?;
                    (url, filter_header_overlay(&params))
                }
                HandlerKind::Enc2 => {
                    if tail.is_empty() {
                        return Err(AppError::BadRequest(
                            "no url segments in encoded payload".to_string(),
                        ));
                    }
                    let mut extra_query = query.unwrap_or("").to_string();
                    for seg in &extra_segments {
                        if let Ok(decoded_fragment) = decode_base64_url(seg) {
                            if !decoded_fragment.is_empty() {
                                extra_query = overlay_query_pairs(&extra_query, &decoded_fragment);
                            }
                        }
                    }
                    let combined_extra_query = if extra_query.is_empty() { None } else { Some(extra_query) };
                    let url = build_url(&tail, combined_extra_query.as_deref())?;
                    (url, filter_header_overlay(&params))
                }
                HandlerKind::Literal => unreachable!("literal handled above"),
            };

            Ok(Resolved {
                decoded_path: DecodedPath {
                    handler_kind: kind,
                    encoded_params: params,
                    additional_segments: extra_segments,
                    literal_path: None,
                },
                target_url,
                header_overlay,
            })
        }
    }
}

fn normalize_literal(path: &str) -> Result<String, AppError> {
    build_url(&[path.to_string()], None)
}

fn filter_header_overlay(params: &HashMap<String, String>) -> HashMap<String, String> {
    params
        .iter()
        .filter(|(k, _)| HEADER_OVERLAY_ALLOWLIST.iter().any(|allowed| allowed == k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(plain: &str) -> String {
        B64.encode(plain.as_bytes())
            .replace('+', "-")
            .replace('/', "_")
    }

    #[test]
    fn base64_round_trip() {
        let original = "param/User-Agent=curl/https://example.com/video.mp4";
        let encoded = encode(original);
        let decoded = decode_base64_url(&encoded).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn base64_decode_rejects_garbage() {
        assert!(decode_base64_url("%%%not-base64%%%").is_err());
    }

    #[test]
    fn parse_encoded_data_splits_params_and_tail() {
        let (params, tail) = parse_encoded_data("param/User-Agent=curl/https:/example.com/a");
        assert_eq!(params.get("User-Agent"), Some(&"curl".to_string()));
        assert_eq!(tail, vec!["https:", "example.com", "a"]);
    }

    #[test]
    fn parse_encoded_data_empty_input() {
        let (params, tail) = parse_encoded_data("");
        assert!(params.is_empty());
        assert!(tail.is_empty());
    }

    #[test]
    fn normalize_strips_duplicated_scheme() {
        assert_eq!(
            normalize_url("https://http://example.com").unwrap(),
            "https://example.com"
        );
    }

    #[test]
    fn normalize_expands_protocol_relative() {
        assert_eq!(
            normalize_url("//example.com/x").unwrap(),
            "https://example.com/x"
        );
    }

    #[test]
    fn normalize_repairs_single_slash_scheme() {
        assert_eq!(
            normalize_url("https:/example.com").unwrap(),
            "https://example.com"
        );
    }

    #[test]
    fn normalize_prefixes_missing_scheme() {
        assert_eq!(normalize_url("example.com/a").unwrap(), "https://example.com/a");
    }

    #[test]
    fn build_url_extracts_embedded_absolute_url() {
        let segments = vec!["prefix".to_string(), "https://example.com/a".to_string()];
        let url = build_url(&segments, None).unwrap();
        assert_eq!(url, "https://example.com/a");
    }

    #[test]
    fn build_url_merges_extra_query() {
        let segments = vec!["https://example.com/a?x=1".to_string()];
        let url = build_url(&segments, Some("y=2")).unwrap();
        assert_eq!(url, "https://example.com/a?x=1&y=2");
    }

    #[test]
    fn build_url_overlays_duplicate_key_last_value_wins() {
        let segments = vec!["https://example.com/a?x=1".to_string()];
        let url = build_url(&segments, Some("x=2")).unwrap();
        assert_eq!(url, "https://example.com/a?x=2");
    }

    #[test]
    fn build_url_rejects_missing_hostname() {
        let segments = vec!["://".to_string()];
        assert!(build_url(&segments, None).is_err());
    }

    #[test]
    fn literal_path_classifies_as_literal() {
        match classify_path("example.com/video.mp4").unwrap() {
            DecodedPathSkeleton::Literal(_) => {}
            _ => panic!("expected literal"),
        }
    }

    #[test]
    fn enc_prefix_classifies_as_encoded() {
        match classify_path("enc2/abc/seg1").unwrap() {
            DecodedPathSkeleton::Encoded { kind, .. } => assert_eq!(kind, HandlerKind::Enc2),
            _ => panic!("expected encoded"),
        }
    }

    #[test]
    fn classify_path_rejects_empty() {
        assert!(classify_path("").is_err());
    }

    #[test]
    fn header_overlay_drops_non_allowlisted_keys() {
        let mut params = HashMap::new();
        params.insert("User-Agent".to_string(), "curl".to_string());
        params.insert("X-Secret".to_string(), "nope".to_string());
        let overlay = filter_header_overlay(&params);
        assert_eq!(overlay.len(), 1);
        assert_eq!(overlay.get("User-Agent"), Some(&"curl".to_string()));
    }

    #[test]
    fn resolve_enc_requires_extra_segments() {
        let payload = encode("param/User-Agent=curl");
        let raw_path = format!("enc/{payload}");
        let result = resolve(&raw_path, None);
        assert!(result.is_err());
    }

    #[test]
    fn resolve_enc2_builds_url_from_payload_tail() {
        let payload = encode("https://example.com/stream.m3u8");
        let raw_path = format!("enc2/{payload}");
        let resolved = resolve(&raw_path, None).unwrap();
        assert_eq!(resolved.target_url, "https://example.com/stream.m3u8");
    }
}
