//! HLS/m3u8 manifest rewriter.
//!
//! Grounded on the original `m3u8_processor.py` (`M3U8Processor`): fetches
//! the playlist with a plain GET and rewrites every URL-shaped token into a
//! self-referencing `enc2`-wrapped proxy URL, resolving relative tokens
//! against the playlist's own URL first.

use std::collections::HashMap;
use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use regex::Regex;
use reqwest::Method;
use tracing::{error, info};

use crate::config::Config;
use crate::config::defaults::{M3U8_BODY_MARKERS, M3U8_CONTENT_TYPES};
use crate::generic::{self, CapturedResponse};
use crate::http_client::ClientFactory;
use crate::prober::ProbedContentInfo;
use crate::proxy_pool::SharedProxyPool;

static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s"',]+|/[^\s"',]*"#).unwrap());

/// Content-type or leading-bytes sniff for an m3u8 playlist.
pub fn looks_like_m3u8(info: &ProbedContentInfo, body_prefix: &str) -> bool {
    let content_type_lower = info.content_type.to_ascii_lowercase();
    if M3U8_CONTENT_TYPES.iter().any(|m| content_type_lower.contains(m)) {
        return true;
    }
    let body_lower = body_prefix.to_ascii_lowercase();
    body_lower.starts_with("#extm3u") || M3U8_BODY_MARKERS.iter().any(|m| body_lower.contains(m))
}

pub async fn process(
    target_url: &str,
    caller_headers: &HashMap<String, String>,
    config: &Config,
    factory: &ClientFactory,
    proxy_pool: &SharedProxyPool,
) -> CapturedResponse {
    info!("processing m3u8 playlist: {}", target_url);

    let response = generic::process_request(
        target_url,
        &Method::GET,
        None,
        caller_headers,
        config,
        factory,
        proxy_pool,
    )
    .await;

    if response.status != 200 {
        return response;
    }

    let modified = replace_domains(&response.body, target_url, config);

    let mut headers = HashMap::new();
    headers.insert("content-type".to_string(), "application/vnd.apple.mpegurl".to_string());
    headers.insert("cache-control".to_string(), "no-cache".to_string());

    CapturedResponse {
        final_url: target_url.to_string(),
        set_cookies: Vec::new(),
        headers,
        status: 200,
        body: modified,
        error: None,
    }
}

fn replace_domains(content: &str, base_url: &str, config: &Config) -> String {
    if config.our_domain.is_empty() {
        return content.to_string();
    }

    let base = match url::Url::parse(base_url) {
        Ok(u) => u,
        Err(e) => {
            error!("error replacing domains in m3u8: invalid base url: {}", e);
            return content.to_string();
        }
    };

    URL_PATTERN
        .replace_all(content, |caps: &regex::Captures| {
            let token = &caps[0];
            rewrite_token(token, &base, config).unwrap_or_else(|| token.to_string())
        })
        .into_owned()
}

fn rewrite_token(token: &str, base: &url::Url, config: &Config) -> Option<String> {
    let resolved = if token.starts_with("http://") || token.starts_with("https://") {
        token.to_string()
    } else {
        base.join(token).ok()?.to_string()
    };

    let parsed = url::Url::parse(&resolved).ok()?;
    if parsed.host_str().is_none() {
        return None;
    }

    Some(format!(
        "{}://{}/enc2/{}",
        config.our_scheme,
        config.our_domain,
        encode_base64_url(&resolved)
    ))
}

fn encode_base64_url(value: &str) -> String {
    B64.encode(value.as_bytes())
        .replace('+', "-")
        .replace('/', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_domain() -> Config {
        let mut c = Config::default();
        c.our_domain = "proxy.example.com".to_string();
        c.our_scheme = "https".to_string();
        c
    }

    #[test]
    fn no_rewrite_when_our_domain_unset() {
        let content = "#EXTM3U\nhttps://origin.example.com/seg1.ts\n";
        let result = replace_domains(content, "https://origin.example.com/playlist.m3u8", &Config::default());
        assert_eq!(result, content);
    }

    #[test]
    fn rewrites_absolute_segment_url() {
        let content = "#EXTM3U\nhttps://origin.example.com/seg1.ts\n";
        let result = replace_domains(content, "https://origin.example.com/playlist.m3u8", &config_with_domain());
        assert!(result.contains("https://proxy.example.com/enc2/"));
        assert!(!result.contains("origin.example.com/seg1.ts"));
    }

    #[test]
    fn resolves_relative_segment_against_base() {
        let content = "#EXTM3U\n/hls/seg1.ts\n";
        let result = replace_domains(content, "https://origin.example.com/live/playlist.m3u8", &config_with_domain());
        assert!(result.contains("https://proxy.example.com/enc2/"));
    }

    #[test]
    fn leaves_comment_lines_alone_when_no_url_shaped_token() {
        let content = "#EXT-X-VERSION:3\n#EXTINF:10.0,\n";
        let result = replace_domains(content, "https://origin.example.com/playlist.m3u8", &config_with_domain());
        assert_eq!(result, content);
    }

    #[test]
    fn detects_m3u8_by_content_type() {
        let info = ProbedContentInfo {
            content_type: "application/vnd.apple.mpegurl".to_string(),
            ..Default::default()
        };
        assert!(looks_like_m3u8(&info, ""));
    }

    #[test]
    fn detects_m3u8_by_body_marker() {
        let info = ProbedContentInfo::default();
        assert!(looks_like_m3u8(&info, "#EXTM3U\n#EXT-X-VERSION:3\n"));
    }

    #[test]
    fn base64_url_encoding_is_url_safe() {
        let encoded = encode_base64_url("https://a.example.com/x?y=1");
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
    }
}
