//! Configuration default values.
//!
//! This module contains all the default values for configuration options,
//! making them easily changeable in one central location. They back the
//! `#[serde(default = "...")]` fields in [`super::Config`] and are used
//! again by `Config::default_for_tests` in unit tests.

// Web server defaults
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_LOG_LEVEL: &str = "WARNING";
pub const DEFAULT_OUR_SCHEME: &str = "https";

// Upstream timeout defaults (seconds)
pub const DEFAULT_TIMEOUT_CONNECT: f64 = 10.0;
pub const DEFAULT_TIMEOUT_READ: f64 = 60.0;
pub const DEFAULT_TIMEOUT_WRITE: f64 = 10.0;
pub const DEFAULT_TIMEOUT_POOL: f64 = 10.0;
pub const DEFAULT_STREAM_TIMEOUT: f64 = 60.0;

// Limits
pub const DEFAULT_MAX_REDIRECTS: u32 = 5;
pub const DEFAULT_STREAM_CHUNK_SIZE: usize = 102_400;
pub const DEFAULT_MAX_RANGE_SIZE: u64 = 104_857_600;
pub const DEFAULT_MAX_REQUEST_SIZE: usize = 10_485_760;

// Proxy pool defaults
pub const DEFAULT_USE_PROXY: bool = false;
pub const DEFAULT_PROXY_TEST_URL: &str = "http://httpbin.org/ip";
pub const DEFAULT_PROXY_TEST_TIMEOUT: u64 = 10;
pub const DEFAULT_MAX_PROXY_RETRIES: u32 = 3;
/// Additional test URLs tried during validation alongside `proxy_test_url`;
/// any 200 response counts as a pass.
pub const PROXY_TEST_URLS: &[&str] = &[
    "https://ifconfig.me/ip",
    "http://httpbin.org/ip",
    "http://api.ipify.org?format=json",
];
/// Failures beyond this threshold demote a proxy out of the working set.
pub const PROXY_FAILURE_THRESHOLD: u32 = 5;
/// Timeout multiplier applied to proxy validation relative to configured budgets.
pub const PROXY_VALIDATION_TIMEOUT_MULTIPLIER: f64 = 30.0;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

pub fn default_video_extensions() -> Vec<String> {
    [
        ".mp4", ".m4v", ".mkv", ".webm", ".flv", ".avi", ".mov", ".wmv", ".mpeg", ".mpg", ".3gp",
        ".m3u8", ".ts",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

pub fn default_video_patterns() -> Vec<String> {
    [
        "/video/",
        "/stream/",
        ".m3u8",
        ".mpd",
        "/hls/",
        "/dash/",
        "index.m3u8",
        "manifest.mpd",
        "playlist.m3u8",
        "hls.m3u8",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

pub fn default_video_indicators() -> Vec<String> {
    [
        "video/",
        "application/x-mpegurl",
        "application/vnd.apple.mpegurl",
        "application/dash+xml",
        "application/vnd.ms-sstr+xml",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

pub fn default_video_content_types() -> Vec<String> {
    [
        "video/mp4",
        "video/mpeg",
        "video/quicktime",
        "video/x-msvideo",
        "video/x-flv",
        "video/webm",
        "video/3gpp",
        "video/ogg",
        "application/x-mpegurl",
        "application/vnd.apple.mpegurl",
        "video/mp2t",
        "application/dash+xml",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Content-Type substrings that mark an m3u8 playlist.
pub const M3U8_CONTENT_TYPES: &[&str] = &[
    "application/vnd.apple.mpegurl",
    "application/x-mpegurl",
    "audio/mpegurl",
    "audio/x-mpegurl",
];

/// Body-prefix markers that mark an m3u8 playlist when the content-type is absent or generic.
pub const M3U8_BODY_MARKERS: &[&str] = &[
    "#ext-x-version:",
    "#extinf:",
    "#ext-x-targetduration:",
];

/// Header names copied from `param/k=v` overlays onto the outbound request,
/// case-sensitive as the client wrote them in the encoded payload.
pub const HEADER_OVERLAY_ALLOWLIST: &[&str] = &[
    "User-Agent",
    "Origin",
    "Referer",
    "Cookie",
    "Content-Type",
    "Accept",
    "x-csrf-token",
    "Sec-Fetch-Dest",
    "Sec-Fetch-Mode",
    "Sec-Fetch-Site",
    "Authorization",
    "Range",
];

/// Inbound request headers forwarded to the target; everything else is dropped.
pub const INBOUND_HEADER_ALLOWLIST: &[&str] = &[
    "User-Agent",
    "Accept",
    "Content-Type",
    "Origin",
    "Referer",
    "Cookie",
    "Range",
    "Authorization",
];
